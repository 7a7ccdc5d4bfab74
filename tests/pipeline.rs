//! Pipeline integration tests.
//!
//! DOCX fixtures are built in memory and go through the real Word
//! extractors. PDF runs use complete hints (so nothing is sampled) and
//! scripted extractors in place of pdfium, so none of these tests need a
//! pdfium library or an API key.

mod common;

use common::*;
use docrip::pipeline::compliance;
use docrip::pipeline::markdown::parse_marker;
use docrip::pipeline::route::route;
use docrip::{
    Classification, CollisionPolicy, ConversionConfig, ConversionRequest, ConversionResult,
    Converter, DocumentCharacteristics, DocumentKind, DocumentSource, ElementContent,
    ExtractorId, FolderProcessor, PipelineObserver, RoutingThresholds, RunMode, RunState,
    Severity, TableCell,
};
use std::path::Path;
use std::sync::Arc;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn converter() -> Converter {
    Converter::new(ConversionConfig::default())
}

fn pdf_converter(entries: Vec<(ExtractorId, Arc<dyn docrip::Extractor>)>) -> Converter {
    Converter::with_registry(ConversionConfig::default(), registry_with(entries))
}

fn pdf_request(name: &str) -> ConversionRequest {
    ConversionRequest::new(DocumentSource::bytes(fake_pdf(), name)).hints(born_digital_hints())
}

fn docx_request(bytes: Vec<u8>, name: &str) -> ConversionRequest {
    ConversionRequest::new(DocumentSource::bytes(bytes, name))
}

fn blocking_defects(result: &ConversionResult) -> usize {
    result
        .run_report
        .defects
        .iter()
        .filter(|d| d.severity >= Severity::High)
        .count()
}

/// Success holds exactly when there is content and nothing high or critical.
fn assert_success_rule(result: &ConversionResult) {
    let report = &result.run_report;
    if report.success() {
        assert!(!result.markdown_content.trim().is_empty());
        assert_eq!(blocking_defects(result), 0, "{}", report.defect_summary());
    }
    if result.markdown_content.trim().is_empty() {
        assert!(!report.success());
    }
    assert_eq!(
        report.final_state,
        if report.success() {
            RunState::Accepted
        } else {
            RunState::Rejected
        }
    );
}

fn marker_count(markdown: &str) -> usize {
    markdown.lines().filter(|l| parse_marker(l).is_some()).count()
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn born_digital_docx_paragraphs_in_order() {
    let out = tempfile::tempdir().unwrap();
    let request = docx_request(three_paragraph_docx(), "doc.docx");
    let result = converter().convert(&request, out.path()).await.unwrap();

    assert!(result.success(), "{}", result.run_report.defect_summary());
    let md = &result.markdown_content;
    let a = md.find("Alpha paragraph").unwrap();
    let b = md.find("Bravo paragraph").unwrap();
    let c = md.find("Charlie paragraph").unwrap();
    assert!(a < b && b < c);
    assert_eq!(result.provenance_records.len(), 3);

    let paths = result.output_file_paths.as_ref().unwrap();
    assert_eq!(paths.markdown.as_deref(), Some(out.path().join("doc/doc.md").as_path()));
    assert_eq!(std::fs::read_to_string(out.path().join("doc/doc.md")).unwrap(), *md);

    let report = &result.run_report;
    assert_eq!(report.document_kind, Some(DocumentKind::Docx));
    assert!(report.tool_versions.contains_key("docx-text"));
    assert_eq!(report.quality_metrics.provenance_coverage, Some(1.0));
    assert_success_rule(&result);
}

#[tokio::test]
async fn born_digital_pdf_through_scripted_extractor() {
    let converter = pdf_converter(vec![(ExtractorId::NativeText, native_text())]);
    let result = converter.process(&pdf_request("doc.pdf")).await;

    assert!(result.success(), "{}", result.run_report.defect_summary());
    let md = &result.markdown_content;
    assert!(md.find("First line").unwrap() < md.find("Second line").unwrap());
    assert!(md.find("Second line").unwrap() < md.find("Third line").unwrap());
    assert_eq!(result.provenance_records.len(), 3);
    assert!(result.provenance_records.iter().all(|p| p.tool == "mock-text@test-1"));
    assert_eq!(
        result.run_report.route.as_ref().unwrap().extractors,
        vec![ExtractorId::NativeText]
    );
    assert!(result.output_file_paths.is_none());
}

#[tokio::test]
async fn zero_byte_input_writes_rejected_report() {
    let out = tempfile::tempdir().unwrap();
    let request = ConversionRequest::new(DocumentSource::bytes(Vec::new(), "doc.pdf"));
    let result = converter().convert(&request, out.path()).await.unwrap();

    assert!(!result.success());
    assert!(result.markdown_content.is_empty());
    let report_path = out.path().join("doc/run_report.json");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["success"], false);
    assert_eq!(report["markdown_written"], false);
    assert_eq!(report["final_state"], "REJECTED");
    assert!(report["error_message"].as_str().unwrap().contains("unreadable"));
    assert!(!out.path().join("doc/doc.md").exists());
    assert_success_rule(&result);
}

#[tokio::test]
async fn every_element_failing_yields_one_high_defect_each() {
    let converter = pdf_converter(vec![(ExtractorId::NativeText, failing_text(3))]);
    let result = converter.process(&pdf_request("doc.pdf")).await;

    assert!(!result.success());
    assert_eq!(result.markdown_content, "");
    let failures: Vec<_> = result
        .run_report
        .defects
        .iter()
        .filter(|d| d.description.starts_with("ExtractorFailure"))
        .collect();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|d| d.severity == Severity::High));
    assert_eq!(
        failures.iter().map(|d| d.page).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(result
        .run_report
        .defects
        .iter()
        .any(|d| d.description.starts_with("EmptyContentDefect")));
    assert_success_rule(&result);
}

#[tokio::test]
async fn repeated_word_paragraphs_all_survive() {
    let out = tempfile::tempdir().unwrap();
    let body = format!(
        "{}{}{}{}",
        para("Signed:"),
        para("Alice"),
        para("Signed:"),
        para("Bob")
    );
    let result = converter()
        .convert(&docx_request(docx(&body), "signatures.docx"), out.path())
        .await
        .unwrap();

    assert!(result.success(), "{}", result.run_report.defect_summary());
    assert_eq!(result.markdown_content.matches("Signed:").count(), 2);
    assert_eq!(result.provenance_records.len(), 4);
    assert_eq!(marker_count(&result.markdown_content), 4);
    assert_eq!(result.run_report.quality_metrics.provenance_coverage, Some(1.0));

    let jsonl = std::fs::read_to_string(out.path().join("signatures/provenance.jsonl")).unwrap();
    assert_eq!(jsonl.lines().count(), 4);
}

#[tokio::test]
async fn uniform_word_table_renders_as_pipe_table() {
    let body = table(&[
        &["Name", "Qty", "Price"],
        &["Apple", "3", "1.20"],
        &["Pear", "5", "0.80"],
    ]);
    let config = ConversionConfig::builder()
        .inline_provenance(false)
        .build()
        .unwrap();
    let result = Converter::new(config)
        .process(&docx_request(docx(&body), "prices.docx"))
        .await;

    let md = &result.markdown_content;
    assert!(md.contains("| Name | Qty | Price |\n| --- | --- | --- |\n"), "{md}");
    assert!(md.contains("| Apple | 3 | 1.20 |"));
    assert!(md.contains("| Pear | 5 | 0.80 |"));
    assert!(!md.contains("<table>"));
    assert!(result.run_report.route.as_ref().unwrap().includes(ExtractorId::WordTable));
    assert!(result.success(), "{}", result.run_report.defect_summary());
    assert_eq!(result.run_report.quality_metrics.table_structure_score, Some(1.0));
}

#[tokio::test]
async fn same_document_twice_gives_identical_markdown() {
    let body = format!(
        "{}{}{}",
        heading(1, "Overview"),
        para("Body text for the determinism check."),
        table(&[&["k", "v"], &["a", "1"]])
    );
    let bytes = docx(&body);
    let hints = born_digital_hints().contains_tables(true);
    let converter = converter();

    let first = converter
        .process(&docx_request(bytes.clone(), "same.docx").hints(hints.clone()))
        .await;
    let second = converter
        .process(&docx_request(bytes, "same.docx").hints(hints))
        .await;
    assert_eq!(first.markdown_content, second.markdown_content);
    assert_eq!(first.provenance_records, second.provenance_records);
    assert_ne!(first.run_report.run_id, second.run_report.run_id);
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn images_alone_are_not_content() {
    let only_image = Scripted::new(
        "mock-text",
        vec![Ok(element(
            1,
            700.0,
            ElementContent::Image {
                target: "figure1.png".into(),
                alt: Some("Figure".into()),
            },
        ))],
    );
    let converter = pdf_converter(vec![(ExtractorId::NativeText, only_image)]);
    let result = converter.process(&pdf_request("figure.pdf")).await;

    assert!(!result.markdown_content.is_empty());
    assert!(!result.success());
    assert!(result
        .run_report
        .defects
        .iter()
        .any(|d| d.description.starts_with("EmptyContentDefect") && d.severity == Severity::High));
}

#[tokio::test]
async fn successful_runs_have_one_marker_per_record() {
    for result in [
        converter()
            .process(&docx_request(three_paragraph_docx(), "doc.docx"))
            .await,
        pdf_converter(vec![(ExtractorId::NativeText, native_text())])
            .process(&pdf_request("doc.pdf"))
            .await,
    ] {
        assert!(result.success());
        assert_eq!(result.run_report.quality_metrics.provenance_coverage, Some(1.0));
        assert_eq!(
            marker_count(&result.markdown_content),
            result.provenance_records.len()
        );
    }
}

#[tokio::test]
async fn artifacts_share_one_directory_named_after_the_document() {
    let out = tempfile::tempdir().unwrap();
    let converter = converter();
    let request = docx_request(three_paragraph_docx(), "Q3 Report - Final Draft.docx");

    let first = converter.convert(&request, out.path()).await.unwrap();
    let second = converter.convert(&request, out.path()).await.unwrap();

    for result in [&first, &second] {
        let paths = result.output_file_paths.as_ref().unwrap();
        assert_eq!(
            paths.markdown.as_ref().unwrap().file_name().unwrap(),
            "Q3 Report - Final Draft.md"
        );
        for file in paths.files() {
            assert_eq!(file.parent().unwrap(), paths.directory);
        }
    }
    let names = entries(out.path());
    assert_eq!(names.len(), 2);
    assert_eq!(names[0], "Q3 Report - Final Draft");
    assert!(names[1].starts_with("Q3 Report - Final Draft_"));
    assert!(names.iter().all(|n| !n.ends_with(".md")));
    assert!(out.path().join(&names[1]).is_dir());
}

#[tokio::test]
async fn overwrite_policy_reuses_the_directory() {
    let out = tempfile::tempdir().unwrap();
    let config = ConversionConfig::builder()
        .collision(CollisionPolicy::Overwrite)
        .build()
        .unwrap();
    let converter = Converter::new(config);
    let request = docx_request(three_paragraph_docx(), "MixedCase-Name.docx");
    converter.convert(&request, out.path()).await.unwrap();
    converter.convert(&request, out.path()).await.unwrap();

    assert_eq!(entries(out.path()), vec!["MixedCase-Name".to_string()]);
    assert_eq!(
        entries(&out.path().join("MixedCase-Name")),
        vec!["MixedCase-Name.md", "provenance.jsonl", "run_report.json"]
    );
}

#[tokio::test]
async fn redaction_and_banner_are_idempotent() {
    let body = format!(
        "{}{}",
        para("Contact jane.doe@example.com or call (555) 123-4567."),
        para("Server 192.168.10.20 hosts https://intranet.example.com/path today.")
    );
    let policy_config = ConversionConfig::builder()
        .pii_redaction(true)
        .classification(Classification::Confidential)
        .build()
        .unwrap();
    let policy = policy_config.compliance;
    let result = Converter::new(policy_config)
        .process(&docx_request(docx(&body), "memo.docx"))
        .await;

    let md = &result.markdown_content;
    assert!(md.starts_with("**CLASSIFICATION: CONFIDENTIAL**\n\n"));
    assert!(md.contains("[REDACTED_EMAIL]"));
    assert!(md.contains("[REDACTED_IP]"));
    assert!(md.contains("[REDACTED_URL]"));
    assert!(!md.contains("jane.doe"));
    assert!(result.run_report.redactions >= 3);
    assert!(result
        .provenance_records
        .iter()
        .all(|p| !p.content_preview.contains("jane.doe")));

    let again = compliance::apply(md, &result.provenance_records, &policy);
    assert_eq!(&again.markdown, md);
    assert_eq!(again.provenance, result.provenance_records);
    assert!(again.redactions.is_empty());
}

#[test]
fn routing_is_deterministic() {
    let thresholds = RoutingThresholds::default();
    let mut c = DocumentCharacteristics::born_digital(DocumentKind::Pdf);
    c.math_signal_strength = 12;
    c.table_density = 0.8;
    let first = route(&c, &thresholds);
    let second = route(&c, &thresholds);
    assert_eq!(first.extractors, second.extractors);
    assert_eq!(first.rule, second.rule);
}

#[tokio::test]
async fn secondary_extractor_crash_keeps_primary_content() {
    let converter = pdf_converter(vec![
        (ExtractorId::NativeText, native_text()),
        (ExtractorId::Table, Arc::new(Crashing("mock-table"))),
    ]);
    let request = ConversionRequest::new(DocumentSource::bytes(fake_pdf(), "mixed.pdf"))
        .hints(born_digital_hints().contains_tables(true));
    let result = converter.process(&request).await;

    assert!(result.markdown_content.contains("Second line of text."));
    let crash = result
        .run_report
        .defects
        .iter()
        .find(|d| d.tool_used == "mock-table@test-1")
        .unwrap();
    assert_eq!(crash.severity, Severity::Medium);
    assert!(crash.description.contains("backend crashed"));
    assert!(result.success());
}

#[tokio::test]
async fn panicking_secondary_extractor_is_isolated() {
    let converter = pdf_converter(vec![
        (ExtractorId::NativeText, native_text()),
        (ExtractorId::Table, Arc::new(Panicking("mock-table"))),
    ]);
    let request = ConversionRequest::new(DocumentSource::bytes(fake_pdf(), "mixed.pdf"))
        .hints(born_digital_hints().contains_tables(true));

    let result = tokio::spawn(async move { converter.process(&request).await })
        .await
        .expect("the run must not unwind");

    assert!(result.markdown_content.contains("First line of text."));
    let defect = result
        .run_report
        .defects
        .iter()
        .find(|d| d.tool_used == "mock-table@test-1")
        .unwrap();
    assert_eq!(defect.severity, Severity::Medium);
    assert!(defect.description.contains("panicked: backend bug"));
    assert!(result.success(), "{}", result.run_report.defect_summary());
    assert_success_rule(&result);
}

#[tokio::test]
async fn primary_extractor_crash_keeps_secondary_content() {
    let tables = Scripted::new(
        "mock-table",
        vec![Ok(element(
            1,
            400.0,
            ElementContent::Table(vec![
                vec![TableCell::new("a"), TableCell::new("b")],
                vec![TableCell::new("1"), TableCell::new("2")],
            ]),
        ))],
    );
    let converter = pdf_converter(vec![
        (ExtractorId::NativeText, Arc::new(Crashing("mock-text"))),
        (ExtractorId::Table, tables),
    ]);
    let request = ConversionRequest::new(DocumentSource::bytes(fake_pdf(), "mixed.pdf"))
        .hints(born_digital_hints().contains_tables(true));
    let result = converter.process(&request).await;

    assert!(result.markdown_content.contains("| a | b |"));
    assert!(!result.success());
    assert!(result
        .run_report
        .defects
        .iter()
        .any(|d| d.tool_used == "mock-text@test-1" && d.severity == Severity::High));
    assert_success_rule(&result);
}

#[tokio::test]
async fn scanned_pdf_without_vision_provider_is_rejected() {
    let request = ConversionRequest::new(DocumentSource::bytes(fake_pdf(), "scan.pdf")).hints(
        born_digital_hints().scanned(true),
    );
    let result = converter().process(&request).await;

    assert!(!result.success());
    assert_eq!(result.run_report.route.as_ref().unwrap().extractors, vec![ExtractorId::Ocr]);
    assert!(result
        .run_report
        .defects
        .iter()
        .any(|d| d.description.contains("no vision provider")));
}

#[tokio::test]
async fn unregistered_extractor_is_a_defect() {
    let mut registry = docrip::ExtractorRegistry::new();
    registry.register(ExtractorId::NativeText, native_text());
    let converter = Converter::with_registry(ConversionConfig::default(), registry);
    let request = ConversionRequest::new(DocumentSource::bytes(fake_pdf(), "doc.pdf"))
        .hints(born_digital_hints().contains_math(true));
    let result = converter.process(&request).await;

    assert!(result.markdown_content.contains("First line of text."));
    assert!(result
        .run_report
        .defects
        .iter()
        .any(|d| d.description.contains("no extractor registered for 'math'")));
}

// ── Observer & evaluation mode ───────────────────────────────────────────────

#[tokio::test]
async fn observer_sees_every_state_in_order() {
    let log = Arc::new(StateLog::default());
    let config = ConversionConfig::builder()
        .observer(log.clone() as Arc<dyn PipelineObserver>)
        .build()
        .unwrap();
    let converter = Converter::new(config);

    converter
        .process(&docx_request(three_paragraph_docx(), "doc.docx"))
        .await;
    assert_eq!(
        *log.states.lock().unwrap(),
        vec![
            RunState::Pending,
            RunState::Detecting,
            RunState::Routing,
            RunState::Extracting,
            RunState::Rendering,
            RunState::Evaluating,
            RunState::Accepted,
        ]
    );
    assert_eq!(
        *log.extractors.lock().unwrap(),
        vec![("docx-text".to_string(), 3, 0)]
    );

    log.states.lock().unwrap().clear();
    converter
        .process(&ConversionRequest::new(DocumentSource::bytes(Vec::new(), "x.pdf")))
        .await;
    assert_eq!(
        *log.states.lock().unwrap(),
        vec![RunState::Pending, RunState::Detecting, RunState::Rejected]
    );
}

#[tokio::test]
async fn evaluation_mode_scores_against_reference_text() {
    let config = ConversionConfig::builder()
        .mode(RunMode::Evaluation)
        .build()
        .unwrap();
    let reference = "Alpha paragraph opens the report.\n\n\
                     Bravo paragraph carries the middle.\n\n\
                     Charlie paragraph closes it.";
    let request =
        docx_request(three_paragraph_docx(), "doc.docx").reference_text(reference);
    let result = Converter::new(config).process(&request).await;

    let metrics = &result.run_report.quality_metrics;
    assert_eq!(metrics.character_error_rate, Some(0.0));
    assert_eq!(metrics.word_error_rate, Some(0.0));
    assert_eq!(result.run_report.run_mode, RunMode::Evaluation);
    assert!(result.success(), "{}", result.run_report.defect_summary());
}

#[tokio::test]
async fn evaluation_mode_flags_a_poor_transcript() {
    let config = ConversionConfig::builder()
        .mode(RunMode::Evaluation)
        .build()
        .unwrap();
    let request = docx_request(three_paragraph_docx(), "doc.docx")
        .reference_text("Something else entirely was in the source document.");
    let result = Converter::new(config).process(&request).await;

    let miss = result
        .run_report
        .defects
        .iter()
        .find(|d| d.description.starts_with("QualityThreshold"))
        .unwrap();
    assert_eq!(miss.severity, Severity::Medium);
    assert!(result.success());
}

#[tokio::test]
async fn vision_cross_check_only_looks_at_pdfs() {
    let provider = edgequake_llm::MockProvider::new();
    provider
        .add_response(r#"{"content_completeness": 0.1, "issues": [{"description": "x"}]}"#)
        .await;
    let config = ConversionConfig::builder()
        .mode(RunMode::Evaluation)
        .vision_provider(Arc::new(provider))
        .vision_validation(true)
        .build()
        .unwrap();
    let request = docx_request(three_paragraph_docx(), "doc.docx");
    let result = Converter::new(config).process(&request).await;

    let report = &result.run_report;
    assert!(result.success(), "{}", report.defect_summary());
    assert!(!report.tool_versions.contains_key("vision-validate"));
    assert_eq!(report.quality_metrics.content_completeness, None);
    assert!(!report
        .defects
        .iter()
        .any(|d| d.description.starts_with("VisionValidation")));
}

#[test]
fn blocking_wrapper_writes_artifacts() {
    let out = tempfile::tempdir().unwrap();
    let request = docx_request(three_paragraph_docx(), "sync.docx");
    let result = docrip::convert_sync(&request, out.path(), &ConversionConfig::default()).unwrap();
    assert!(result.success());
    assert!(out.path().join("sync/sync.md").exists());
    assert!(out.path().join("sync/provenance.jsonl").exists());
}

// ── Folder collaborator ──────────────────────────────────────────────────────

#[tokio::test]
async fn folder_batch_routes_originals_by_verdict() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("inbox");
    let processed = root.path().join("processed");
    let output = root.path().join("out");
    std::fs::create_dir_all(&input).unwrap();
    std::fs::write(input.join("good.docx"), three_paragraph_docx()).unwrap();
    std::fs::write(input.join("bad.PDF"), b"").unwrap();
    std::fs::write(input.join("notes.txt"), b"not a document").unwrap();

    let processor = FolderProcessor::new(converter(), &input, &processed, &output);
    assert_eq!(processor.pending_files().unwrap().len(), 2);

    let stats = processor.process_all().await.unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 1);
    assert!(stats.errors.is_empty());

    let ok = entries(&processed.join("success"));
    assert_eq!(ok.len(), 1);
    assert!(ok[0].starts_with("good_") && ok[0].ends_with(".docx"));
    let failed = entries(&processed.join("failed"));
    assert_eq!(failed.len(), 1);
    assert!(failed[0].starts_with("bad_") && failed[0].ends_with(".PDF"));

    assert_eq!(entries(&input), vec!["notes.txt".to_string()]);
    assert!(output.join("good/good.md").exists());
    assert!(output.join("bad/run_report.json").exists());
    assert!(!output.join("bad/bad.md").exists());
}
