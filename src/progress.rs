//! Observer trait for run, stage and extractor events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::ConversionConfigBuilder::observer`]. The CLI uses it to
//! drive its progress bar; tests use it to check the run state machine.
//!
//! # Example
//!
//! ```rust
//! use docrip::{ConversionConfig, PipelineObserver, RunState};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct StateLog(Mutex<Vec<RunState>>);
//!
//! impl PipelineObserver for StateLog {
//!     fn on_state_change(&self, _run_id: &str, state: RunState) {
//!         self.0.lock().unwrap().push(state);
//!     }
//! }
//!
//! let config = ConversionConfig::builder()
//!     .observer(Arc::new(StateLog::default()) as Arc<dyn PipelineObserver>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

use crate::convert::RunState;

/// Called by the pipeline as a run advances.
///
/// Implementations must be `Send + Sync`: several documents may be converted
/// concurrently with one shared observer. Every method defaults to a no-op.
pub trait PipelineObserver: Send + Sync {
    /// Called once the input is acquired and a run id assigned.
    fn on_run_start(&self, run_id: &str, document_name: &str) {
        let _ = (run_id, document_name);
    }

    /// Called on every state machine transition, terminal states included.
    fn on_state_change(&self, run_id: &str, state: RunState) {
        let _ = (run_id, state);
    }

    /// Called after each extractor in the plan has finished or failed.
    ///
    /// * `recovered`: elements merged into the result
    /// * `failed`: element or extractor failures turned into defects
    fn on_extractor_complete(&self, run_id: &str, extractor: &str, recovered: usize, failed: usize) {
        let _ = (run_id, extractor, recovered, failed);
    }

    /// Called once with the QA verdict.
    fn on_run_complete(&self, run_id: &str, success: bool) {
        let _ = (run_id, success);
    }
}

/// Used when no observer is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type Observer = Arc<dyn PipelineObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        extractors: AtomicUsize,
        failures: AtomicUsize,
    }

    impl PipelineObserver for Counting {
        fn on_extractor_complete(&self, _: &str, _: &str, _: usize, failed: usize) {
            self.extractors.fetch_add(1, Ordering::SeqCst);
            self.failures.fetch_add(failed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_accepts_all_events() {
        let o = NoopObserver;
        o.on_run_start("run_1", "doc");
        o.on_state_change("run_1", RunState::Detecting);
        o.on_extractor_complete("run_1", "docx-text", 3, 0);
        o.on_run_complete("run_1", true);
    }

    #[test]
    fn observer_is_object_safe_and_shareable() {
        let c = Arc::new(Counting {
            extractors: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        });
        let o: Observer = c.clone();
        o.on_extractor_complete("r", "a", 2, 1);
        o.on_extractor_complete("r", "b", 0, 4);
        assert_eq!(c.extractors.load(Ordering::SeqCst), 2);
        assert_eq!(c.failures.load(Ordering::SeqCst), 5);
    }
}
