//! Extraction orchestrator: run the planned extractors and merge their output.
//!
//! Each extractor is fault-isolated. A whole-extractor error, a per-element
//! error, a missing registration or the run deadline each become exactly one
//! [`crate::model::ProcessingDefect`]; nothing short-circuits the remaining
//! extractors.
//!
//! Elements from all extractors are staged first, then merged in reading
//! order (page, then top-to-bottom, then left-to-right) with a stable sort,
//! so the result never depends on the order extractors were invoked in.
//! Each element is appended together with its provenance record.

use crate::config::ConversionConfig;
use crate::error::ElementError;
use crate::model::{ExtractedElement, ExtractionResult};
use crate::pipeline::extractors::{
    MathExtractor, NativeTextExtractor, OcrExtractor, TableExtractor, WordImageExtractor,
    WordTableExtractor, WordTextExtractor,
};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::route::{ExtractorId, RoutePlan};
use crate::progress::PipelineObserver;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::any::Any;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// One element, or the reason it could not be produced.
pub type ElementOutcome = Result<ExtractedElement, ElementError>;

/// Future returned by [`Extractor::extract`]. The outer `Err` fails the
/// whole extractor; inner `Err`s fail single elements.
pub type ExtractorFuture<'a> = BoxFuture<'a, Result<Vec<ElementOutcome>, ElementError>>;

/// A pluggable extraction tool.
pub trait Extractor: Send + Sync {
    /// Tool name recorded in provenance and the run report.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn extract<'a>(
        &'a self,
        document: Arc<SourceDocument>,
        context: &'a ExtractionContext,
    ) -> ExtractorFuture<'a>;
}

/// Read-only view of the run handed to every extractor.
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    plan: Vec<ExtractorId>,
}

impl ExtractionContext {
    pub fn new(plan: Vec<ExtractorId>) -> Self {
        Self { plan }
    }

    /// True when `id` also runs in this plan.
    pub fn includes(&self, id: ExtractorId) -> bool {
        self.plan.contains(&id)
    }

    pub fn plan(&self) -> &[ExtractorId] {
        &self.plan
    }
}

/// Extractors by id. Callers may replace any entry.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<ExtractorId, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in pdfium, vision and DOCX extractors.
    pub fn with_defaults(config: &ConversionConfig) -> Self {
        let pdfium_dir = config.pdfium_library_dir.clone();
        Self::new()
            .with(
                ExtractorId::NativeText,
                Arc::new(NativeTextExtractor::new(pdfium_dir.clone())),
            )
            .with(ExtractorId::Table, Arc::new(TableExtractor::new(pdfium_dir.clone())))
            .with(ExtractorId::Math, Arc::new(MathExtractor::new(pdfium_dir)))
            .with(ExtractorId::Ocr, Arc::new(OcrExtractor::new(config.clone())))
            .with(ExtractorId::WordText, Arc::new(WordTextExtractor))
            .with(ExtractorId::WordTable, Arc::new(WordTableExtractor))
            .with(ExtractorId::WordImage, Arc::new(WordImageExtractor))
    }

    pub fn register(&mut self, id: ExtractorId, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(id, extractor);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, id: ExtractorId, extractor: Arc<dyn Extractor>) -> Self {
        self.register(id, extractor);
        self
    }

    pub fn get(&self, id: ExtractorId) -> Option<Arc<dyn Extractor>> {
        self.extractors.get(&id).cloned()
    }

    pub fn contains(&self, id: ExtractorId) -> bool {
        self.extractors.contains_key(&id)
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self
            .extractors
            .iter()
            .map(|(id, e)| format!("{id}={}", e.name()))
            .collect();
        names.sort();
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &names)
            .finish()
    }
}

/// Runs a [`RoutePlan`] against one document.
pub struct Orchestrator<'a> {
    registry: &'a ExtractorRegistry,
    deadline: Instant,
    run_id: &'a str,
    observer: Option<&'a dyn PipelineObserver>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(registry: &'a ExtractorRegistry, deadline: Instant) -> Self {
        Self {
            registry,
            deadline,
            run_id: "",
            observer: None,
        }
    }

    pub fn run_id(mut self, run_id: &'a str) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn observer(mut self, observer: Option<&'a dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Invoke every planned extractor and fold their output into one result.
    ///
    /// Never fails: whatever was gathered before an error or the deadline is
    /// kept.
    pub async fn extract(&self, document: Arc<SourceDocument>, plan: &RoutePlan) -> ExtractionResult {
        let mut result = ExtractionResult::new();
        for defect in &plan.defects {
            result.record_defect(defect.clone());
        }

        let context = ExtractionContext::new(plan.extractors.clone());
        let started = Instant::now();
        let mut staged: Vec<(ExtractedElement, String)> = Vec::new();

        for &id in &plan.extractors {
            let severity = id.failure_severity();
            let Some(extractor) = self.registry.get(id) else {
                warn!(run_id = self.run_id, "No extractor registered for '{}'", id);
                let err = ElementError::MissingExtractor {
                    extractor: id.to_string(),
                };
                result.record_failure(&err, id.as_str(), severity);
                self.notify(id.as_str(), 0, 1);
                continue;
            };

            let name = extractor.name().to_string();
            let tool = format!("{}@{}", name, extractor.version());

            if Instant::now() >= self.deadline {
                warn!(run_id = self.run_id, "Deadline passed; skipping {}", name);
                let err = ElementError::Timeout {
                    extractor: name.clone(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                result.record_failure(&err, &tool, severity);
                self.notify(&name, 0, 1);
                continue;
            }

            result
                .tool_versions
                .insert(name.clone(), extractor.version().to_string());
            debug!(run_id = self.run_id, "Running extractor {}", tool);

            // A panic while building or polling the future is caught here.
            let call = match panic::catch_unwind(AssertUnwindSafe(|| {
                extractor.extract(document.clone(), &context)
            })) {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().boxed(),
                Err(payload) => future::ready(Err(payload)).boxed(),
            };

            let (recovered, failed) =
                match timeout_at(self.deadline, call).await {
                    Ok(Err(payload)) => {
                        let message = format!("panicked: {}", panic_message(payload.as_ref()));
                        warn!(run_id = self.run_id, "Extractor {} {}", name, message);
                        let err = ElementError::backend(&name, message);
                        result.record_failure(&err, &tool, severity);
                        (0, 1)
                    }
                    Ok(Ok(Ok(outcomes))) => {
                        let mut recovered = 0;
                        let mut failed = 0;
                        for outcome in outcomes {
                            match outcome {
                                Ok(element) => {
                                    staged.push((element, tool.clone()));
                                    recovered += 1;
                                }
                                Err(e) => {
                                    warn!(run_id = self.run_id, "{}", e);
                                    result.record_failure(&e, &tool, severity);
                                    failed += 1;
                                }
                            }
                        }
                        (recovered, failed)
                    }
                    Ok(Ok(Err(e))) => {
                        warn!(run_id = self.run_id, "Extractor {} failed: {}", name, e);
                        result.record_failure(&e, &tool, severity);
                        (0, 1)
                    }
                    Err(_) => {
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        warn!(
                            run_id = self.run_id,
                            "Extractor {} abandoned at run deadline after {}ms", name, elapsed_ms
                        );
                        let err = ElementError::Timeout {
                            extractor: name.clone(),
                            elapsed_ms,
                        };
                        result.record_failure(&err, &tool, severity);
                        (0, 1)
                    }
                };

            info!(
                run_id = self.run_id,
                "Extractor {}: {} element(s), {} failure(s)", name, recovered, failed
            );
            self.notify(&name, recovered, failed);
        }

        staged.sort_by(|a, b| reading_order(&a.0, &b.0));
        for (element, tool) in staged {
            if !result.push_element(element, &tool) {
                debug!(run_id = self.run_id, "Dropped blank element from {}", tool);
            }
        }
        result
    }

    fn notify(&self, extractor: &str, recovered: usize, failed: usize) {
        if let Some(observer) = self.observer {
            observer.on_extractor_complete(self.run_id, extractor, recovered, failed);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Page ascending, then top edge descending (PDF y grows upwards), then left
/// edge ascending.
fn reading_order(a: &ExtractedElement, b: &ExtractedElement) -> Ordering {
    a.page
        .cmp(&b.page)
        .then_with(|| b.bbox.y1.total_cmp(&a.bbox.y1))
        .then_with(|| a.bbox.x0.total_cmp(&b.bbox.x0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundingBox, DocumentKind, ElementContent, ElementType, Severity};
    use crate::pipeline::input::{acquire, DocumentSource};
    use crate::pipeline::route::RouteRule;
    use std::time::Duration;

    struct Fixed {
        name: &'static str,
        outcomes: Vec<ElementOutcome>,
    }

    impl Extractor for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn version(&self) -> &str {
            "1.0"
        }
        fn extract<'a>(
            &'a self,
            _document: Arc<SourceDocument>,
            _context: &'a ExtractionContext,
        ) -> ExtractorFuture<'a> {
            let outcomes = self.outcomes.clone();
            Box::pin(async move { Ok(outcomes) })
        }
    }

    struct Broken;

    impl Extractor for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn version(&self) -> &str {
            "0.0"
        }
        fn extract<'a>(
            &'a self,
            _document: Arc<SourceDocument>,
            _context: &'a ExtractionContext,
        ) -> ExtractorFuture<'a> {
            Box::pin(async { Err(ElementError::backend("broken", "segfault in backend")) })
        }
    }

    struct Slow;

    impl Extractor for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn version(&self) -> &str {
            "0.1"
        }
        fn extract<'a>(
            &'a self,
            _document: Arc<SourceDocument>,
            _context: &'a ExtractionContext,
        ) -> ExtractorFuture<'a> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Vec::new())
            })
        }
    }

    /// Panics before handing back a future.
    struct PanicsEagerly;

    impl Extractor for PanicsEagerly {
        fn name(&self) -> &str {
            "eager"
        }
        fn version(&self) -> &str {
            "0.2"
        }
        fn extract<'a>(
            &'a self,
            _document: Arc<SourceDocument>,
            _context: &'a ExtractionContext,
        ) -> ExtractorFuture<'a> {
            panic!("index out of bounds in glyph table")
        }
    }

    /// Panics on first poll.
    struct PanicsWhenPolled;

    impl Extractor for PanicsWhenPolled {
        fn name(&self) -> &str {
            "lazy"
        }
        fn version(&self) -> &str {
            "0.2"
        }
        fn extract<'a>(
            &'a self,
            _document: Arc<SourceDocument>,
            _context: &'a ExtractionContext,
        ) -> ExtractorFuture<'a> {
            Box::pin(async {
                let cells: Vec<u32> = Vec::new();
                if cells.is_empty() {
                    panic!("table grid has {} columns", cells.len());
                }
                Ok(Vec::new())
            })
        }
    }

    fn at(page: u32, top: f32, left: f32, text: &str) -> ElementOutcome {
        Ok(ExtractedElement::new(
            page,
            BoundingBox::new(left, top - 10.0, left + 100.0, top),
            0.9,
            ElementContent::Paragraph(text.into()),
        ))
    }

    fn plan(ids: &[ExtractorId]) -> RoutePlan {
        RoutePlan {
            extractors: ids.to_vec(),
            rule: RouteRule::Standard,
            defects: Vec::new(),
        }
    }

    async fn doc() -> Arc<SourceDocument> {
        let source = DocumentSource::bytes(b"%PDF-1.4\n%fake\n".to_vec(), "fake.pdf");
        let d = acquire(&source).await.unwrap();
        assert_eq!(d.kind(), DocumentKind::Pdf);
        Arc::new(d)
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn merge_is_page_then_position_not_invocation_order() {
        let registry = ExtractorRegistry::new()
            .with(
                ExtractorId::NativeText,
                Arc::new(Fixed {
                    name: "text",
                    outcomes: vec![at(2, 700.0, 72.0, "p2 top"), at(1, 500.0, 72.0, "p1 lower")],
                }),
            )
            .with(
                ExtractorId::Math,
                Arc::new(Fixed {
                    name: "math",
                    outcomes: vec![at(1, 700.0, 72.0, "p1 top")],
                }),
            );
        let r = Orchestrator::new(&registry, far_deadline())
            .extract(doc().await, &plan(&[ExtractorId::NativeText, ExtractorId::Math]))
            .await;
        let texts: Vec<&str> = r.text_blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, vec!["p1 top", "p1 lower", "p2 top"]);
        assert_eq!(r.provenance.len(), 3);
        assert_eq!(r.provenance[0].tool, "math@1.0");
        assert_eq!(r.tool_versions.get("text").map(String::as_str), Some("1.0"));
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let registry = ExtractorRegistry::new()
            .with(ExtractorId::Table, Arc::new(Broken))
            .with(
                ExtractorId::NativeText,
                Arc::new(Fixed {
                    name: "text",
                    outcomes: vec![
                        at(1, 700.0, 72.0, "kept"),
                        Err(ElementError::failed("text", 1, ElementType::Image, "bad xobject")),
                    ],
                }),
            );
        let r = Orchestrator::new(&registry, far_deadline())
            .extract(doc().await, &plan(&[ExtractorId::Table, ExtractorId::NativeText]))
            .await;
        assert_eq!(r.text_content(), "kept");
        assert_eq!(r.defects.len(), 2);
        assert_eq!(r.defects[0].severity, Severity::Medium);
        assert_eq!(r.defects[1].severity, Severity::Low);
        assert!(r.defects.iter().all(|d| d.description.starts_with("ExtractorFailure")));
    }

    #[tokio::test]
    async fn panics_become_backend_defects() {
        let registry = ExtractorRegistry::new()
            .with(
                ExtractorId::NativeText,
                Arc::new(Fixed {
                    name: "text",
                    outcomes: vec![at(1, 700.0, 72.0, "survives")],
                }),
            )
            .with(ExtractorId::Table, Arc::new(PanicsEagerly))
            .with(ExtractorId::Math, Arc::new(PanicsWhenPolled));
        let r = Orchestrator::new(&registry, far_deadline())
            .extract(
                doc().await,
                &plan(&[ExtractorId::NativeText, ExtractorId::Table, ExtractorId::Math]),
            )
            .await;

        assert_eq!(r.text_content(), "survives");
        assert_eq!(r.defects.len(), 2, "{:?}", r.defects);
        let eager = r.defects.iter().find(|d| d.tool_used == "eager@0.2").unwrap();
        assert!(eager.description.contains("panicked: index out of bounds"));
        let lazy = r.defects.iter().find(|d| d.tool_used == "lazy@0.2").unwrap();
        assert!(lazy.description.contains("panicked: table grid has 0 columns"));
        assert!(r.defects.iter().all(|d| d.severity == Severity::Medium));
    }

    #[tokio::test]
    async fn missing_registration_is_a_defect() {
        let registry = ExtractorRegistry::new();
        let r = Orchestrator::new(&registry, far_deadline())
            .extract(doc().await, &plan(&[ExtractorId::NativeText]))
            .await;
        assert!(r.is_empty());
        assert_eq!(r.defects.len(), 1);
        assert_eq!(r.defects[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn deadline_keeps_partial_result() {
        let registry = ExtractorRegistry::new()
            .with(
                ExtractorId::NativeText,
                Arc::new(Fixed {
                    name: "text",
                    outcomes: vec![at(1, 700.0, 72.0, "before the deadline")],
                }),
            )
            .with(ExtractorId::Math, Arc::new(Slow))
            .with(ExtractorId::Table, Arc::new(Broken));
        let document = doc().await;
        let deadline = Instant::now() + Duration::from_millis(200);
        let r = Orchestrator::new(&registry, deadline)
            .extract(
                document,
                &plan(&[ExtractorId::NativeText, ExtractorId::Math, ExtractorId::Table]),
            )
            .await;
        assert_eq!(r.text_content(), "before the deadline");
        let timeouts: Vec<_> = r
            .defects
            .iter()
            .filter(|d| d.description.contains("deadline"))
            .collect();
        assert_eq!(timeouts.len(), 2, "{:?}", r.defects);
        assert!(timeouts.iter().all(|d| d.severity == Severity::Medium));
    }

    #[tokio::test]
    async fn plan_defects_are_carried() {
        let registry = ExtractorRegistry::new().with(
            ExtractorId::NativeText,
            Arc::new(Fixed {
                name: "text",
                outcomes: vec![at(1, 700.0, 72.0, "x")],
            }),
        );
        let mut p = plan(&[ExtractorId::NativeText]);
        p.defects.push(crate::model::ProcessingDefect::new(
            0,
            "document",
            "unknown type",
            Severity::Medium,
            "router",
        ));
        let r = Orchestrator::new(&registry, far_deadline()).extract(doc().await, &p).await;
        assert_eq!(r.defects.len(), 1);
        assert_eq!(r.defects[0].tool_used, "router");
    }

    #[test]
    fn context_reports_plan_membership() {
        let c = ExtractionContext::new(vec![ExtractorId::NativeText, ExtractorId::Table]);
        assert!(c.includes(ExtractorId::Table));
        assert!(!c.includes(ExtractorId::Math));
    }
}
