//! Pipeline tests against a scripted extractor.
//!
//! Every test builds its PDF in memory with lopdf and substitutes the
//! Document AI client with [`FakeExtractor`], so the whole suite runs
//! offline and deterministically:
//!
//!   cargo test --test pipeline

use async_trait::async_trait;
use docai_extract::{
    aggregate, extract_from_bytes, CancellationToken, Document, EntityExtractor, EntityResult,
    ExtractionConfig, ExtractionProgressCallback, JobError, JobStatus, MemoryStore,
    PageErrorKind, PageExtraction, PageOrchestrator, PageStatus, PageUnit, ServiceError,
    SplitError,
};
use docai_extract::pipeline::aggregate::NO_ENTITIES_MARKER;
use lopdf::{dictionary, Document as PdfDocument, Object, Stream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// In-memory PDF whose page `n` draws the text `Page n`.
fn sample_pdf(pages: usize) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let mut kids: Vec<Object> = Vec::new();
    for n in 1..=pages {
        let content = format!("BT /F1 24 Tf 72 720 Td (Page {n}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("sample pdf should serialise");
    buf
}

/// The `Page n` label drawn on a single-page unit.
fn page_label(bytes: &[u8]) -> String {
    let doc = PdfDocument::load_mem(bytes).expect("unit must be a valid PDF");
    let pages = doc.get_pages();
    assert_eq!(pages.len(), 1, "unit must hold exactly one page");
    let id = *pages.values().next().unwrap();
    let content = String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned();
    let start = content.find('(').unwrap() + 1;
    let end = content.find(')').unwrap();
    content[start..end].to_string()
}

type Behaviour = dyn Fn(usize, u32) -> Result<Vec<EntityResult>, ServiceError> + Send + Sync;

/// Answers per (page index, call number for that page).
///
/// By default each page yields one `page_label` entity read from the unit's
/// own bytes, which proves that the right page reached the extractor. The
/// page text is always that label.
struct FakeExtractor {
    behaviour: Box<Behaviour>,
    delay_ms: Box<dyn Fn(usize) -> u64 + Send + Sync>,
    calls: Mutex<HashMap<usize, u32>>,
    total_calls: AtomicU32,
    cancel_on_call: Option<(u32, CancellationToken)>,
    label: bool,
}

impl FakeExtractor {
    fn new(
        behaviour: impl Fn(usize, u32) -> Result<Vec<EntityResult>, ServiceError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            behaviour: Box::new(behaviour),
            delay_ms: Box::new(|_| 0),
            calls: Mutex::new(HashMap::new()),
            total_calls: AtomicU32::new(0),
            cancel_on_call: None,
            label: true,
        }
    }

    fn labelling() -> Self {
        Self::new(|_, _| Ok(Vec::new()))
    }

    fn with_delay(mut self, delay_ms: impl Fn(usize) -> u64 + Send + Sync + 'static) -> Self {
        self.delay_ms = Box::new(delay_ms);
        self
    }

    /// Cancel `token` during the `n`-th call overall; that call still succeeds.
    fn cancelling_on(mut self, n: u32, token: CancellationToken) -> Self {
        self.cancel_on_call = Some((n, token));
        self
    }

    /// Return only what the behaviour produces.
    fn without_label(mut self) -> Self {
        self.label = false;
        self
    }

    fn total_calls(&self) -> u32 {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityExtractor for FakeExtractor {
    async fn extract(&self, page: &PageUnit) -> Result<PageExtraction, ServiceError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let c = calls.entry(page.index).or_insert(0);
            *c += 1;
            *c
        };
        let overall = self.total_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, token)) = &self.cancel_on_call {
            if overall == *n {
                token.cancel();
            }
        }

        let delay = (self.delay_ms)(page.index);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let mut entities = (self.behaviour)(page.index, call)?;
        let label = page_label(&page.bytes);
        if self.label {
            entities.insert(0, EntityResult::new("page_label", label.clone(), 1.0));
        }
        Ok(PageExtraction::new(entities, label))
    }
}

fn config_with(extractor: Arc<FakeExtractor>, concurrency: usize) -> ExtractionConfig {
    ExtractionConfig::builder()
        .extractor(extractor)
        .concurrency(concurrency)
        .retry_backoff_ms(1)
        .max_backoff_ms(4)
        .build()
        .unwrap()
}

fn document(pages: usize) -> Document {
    Document::from_bytes("sample.pdf", sample_pdf(pages)).unwrap()
}

fn unavailable() -> ServiceError {
    ServiceError::Unavailable {
        status: 503,
        detail: "backend busy".into(),
    }
}

// ── Ordering and totality ────────────────────────────────────────────────────

#[tokio::test]
async fn outcomes_cover_every_page_in_order_at_any_concurrency() {
    for concurrency in [1, 3, 8] {
        // Later pages answer first so completion order is reversed.
        let fake = Arc::new(FakeExtractor::labelling().with_delay(|i| (7 - i as u64) * 3));
        let orchestrator = PageOrchestrator::new(config_with(fake.clone(), concurrency)).unwrap();
        let job = orchestrator.run(&document(7)).await.unwrap();

        assert_eq!(job.report.outcomes.len(), 7, "concurrency {concurrency}");
        for (i, outcome) in job.report.outcomes.iter().enumerate() {
            assert_eq!(outcome.index, i);
            assert_eq!(outcome.status, PageStatus::Success);
            assert_eq!(outcome.entities[0].mention_text, format!("Page {}", i + 1));
        }
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(fake.total_calls(), 7);
    }
}

#[tokio::test]
async fn partial_failure_is_not_fatal() {
    let fake = Arc::new(FakeExtractor::new(|index, call| match (index, call) {
        (1, 1) => Err(unavailable()),
        (2, _) => Err(ServiceError::MalformedInput("corrupt page".into())),
        _ => Ok(vec![EntityResult::new("total", "$10.00", 0.9)]),
    }));
    let orchestrator = PageOrchestrator::new(config_with(fake.clone(), 3)).unwrap();
    let job = assert_ok!(orchestrator.run(&document(3)).await);

    let statuses: Vec<PageStatus> = job.report.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![PageStatus::Success, PageStatus::Success, PageStatus::Failed]
    );
    let attempts: Vec<u32> = job.report.outcomes.iter().map(|o| o.attempts).collect();
    assert_eq!(attempts, vec![1, 2, 1]);
    assert_eq!(
        job.report.outcomes[2].error_kind(),
        Some(PageErrorKind::PermanentServiceError)
    );
    assert_eq!(job.status, JobStatus::CompletedWithFailures);
    assert_eq!(job.stats.failed_pages, 1);
    assert_eq!(job.stats.total_attempts, 4);

    // Failed pages carry no text and are left out of the joined text.
    assert_eq!(job.report.outcomes[1].text, "Page 2");
    assert!(job.report.outcomes[2].text.is_empty());
    assert_eq!(job.report.full_text(), "Page 1\nPage 2\n");
    assert_eq!(job.text, job.report.full_text());
}

#[tokio::test]
async fn transient_failures_stop_at_max_attempts() {
    let fake = Arc::new(FakeExtractor::new(|_, _| Err(unavailable())));
    let config = ExtractionConfig::builder()
        .extractor(fake.clone())
        .max_attempts(4)
        .retry_backoff_ms(1)
        .max_backoff_ms(2)
        .build()
        .unwrap();
    let job = PageOrchestrator::new(config)
        .unwrap()
        .run(&document(1))
        .await
        .unwrap();

    let outcome = &job.report.outcomes[0];
    assert_eq!(outcome.error_kind(), Some(PageErrorKind::TransientServiceError));
    assert_eq!(outcome.attempts, 4);
    assert_eq!(fake.total_calls(), 4);
}

#[tokio::test]
async fn oversized_pages_are_never_sent() {
    let fake = Arc::new(FakeExtractor::labelling());
    let config = ExtractionConfig::builder()
        .extractor(fake.clone())
        .max_page_bytes(16)
        .build()
        .unwrap();
    let job = PageOrchestrator::new(config)
        .unwrap()
        .run(&document(2))
        .await
        .unwrap();

    for outcome in &job.report.outcomes {
        assert_eq!(outcome.error_kind(), Some(PageErrorKind::PayloadTooLarge));
        assert_eq!(outcome.attempts, 0);
    }
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn panicking_extractor_fails_only_its_page() {
    let fake = Arc::new(FakeExtractor::new(|index, _| {
        if index == 1 {
            panic!("extractor bug");
        }
        Ok(Vec::new())
    }));
    let job = PageOrchestrator::new(config_with(fake, 2))
        .unwrap()
        .run(&document(3))
        .await
        .unwrap();

    assert!(job.report.outcomes[0].is_success());
    assert_eq!(
        job.report.outcomes[1].error_kind(),
        Some(PageErrorKind::PermanentServiceError)
    );
    assert!(job.report.outcomes[2].is_success());
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancellation_after_two_pages_cancels_the_rest() {
    let token = CancellationToken::new();
    let fake = Arc::new(FakeExtractor::labelling().cancelling_on(2, token.clone()));
    let orchestrator = PageOrchestrator::new(config_with(fake.clone(), 1))
        .unwrap()
        .with_cancellation(token);

    let job = orchestrator.run(&document(5)).await.unwrap();

    let kinds: Vec<Option<PageErrorKind>> =
        job.report.outcomes.iter().map(|o| o.error_kind()).collect();
    assert_eq!(
        kinds,
        vec![
            None,
            None,
            Some(PageErrorKind::Cancelled),
            Some(PageErrorKind::Cancelled),
            Some(PageErrorKind::Cancelled),
        ]
    );
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.stats.cancelled_pages, 3);
    assert_eq!(fake.total_calls(), 2);
}

#[tokio::test]
async fn cancelled_backoff_ends_the_page() {
    let token = CancellationToken::new();
    let fake = Arc::new(
        FakeExtractor::new(|_, _| Err(unavailable())).cancelling_on(1, token.clone()),
    );
    let config = ExtractionConfig::builder()
        .extractor(fake.clone())
        .retry_backoff_ms(10_000)
        .max_backoff_ms(10_000)
        .build()
        .unwrap();
    let orchestrator = PageOrchestrator::new(config)
        .unwrap()
        .with_cancellation(token);

    let job = tokio::time::timeout(Duration::from_secs(5), orchestrator.run(&document(1)))
        .await
        .expect("cancellation must interrupt the backoff sleep")
        .unwrap();
    let outcome = &job.report.outcomes[0];
    assert_eq!(outcome.error_kind(), Some(PageErrorKind::Cancelled));
    assert_eq!(outcome.attempts, 1);
}

// ── Fatal errors ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn unreadable_document_fails_before_any_call() {
    let fake = Arc::new(FakeExtractor::labelling());
    let config = config_with(fake.clone(), 4);

    let err = assert_err!(extract_from_bytes("junk.pdf", b"not a pdf".to_vec(), &config).await);
    assert!(
        matches!(
            err,
            JobError::Split {
                source: SplitError::Unreadable { .. },
                ..
            }
        ),
        "got {err:?}"
    );
    assert_eq!(fake.total_calls(), 0);
}

#[tokio::test]
async fn gapped_units_are_rejected() {
    let fake = Arc::new(FakeExtractor::new(|_, _| Ok(Vec::new())));
    let orchestrator = PageOrchestrator::new(config_with(fake.clone(), 2)).unwrap();
    let units = vec![
        PageUnit {
            index: 0,
            bytes: sample_pdf(1),
        },
        PageUnit {
            index: 2,
            bytes: sample_pdf(1),
        },
    ];
    let err = orchestrator.run_units("gap.pdf", units).await.unwrap_err();
    assert!(matches!(err, JobError::Aggregation { .. }));
    assert_eq!(fake.total_calls(), 0);
}

// ── Report rows ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn page_without_entities_gets_one_marker_row() {
    let fake = Arc::new(
        FakeExtractor::new(|index, _| match index {
            1 => Ok(Vec::new()),
            _ => Ok(vec![EntityResult::new("total", "$3.50", 0.75)]),
        })
        .without_label(),
    );
    let job = PageOrchestrator::new(config_with(fake, 2))
        .unwrap()
        .run(&document(3))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let rows = aggregate(&job.report);
    let page_two: Vec<_> = rows.page_details.iter().filter(|r| r.page == 2).collect();
    assert_eq!(page_two.len(), 1);
    assert_eq!(page_two[0].mention_text, NO_ENTITIES_MARKER);
    assert_eq!(page_two[0].status, PageStatus::Success);
    assert_eq!(page_two[0].confidence, None);

    let pages: Vec<usize> = rows.consolidated.iter().map(|r| r.page).collect();
    assert_eq!(pages, vec![1, 3]);
}

#[tokio::test]
async fn rows_are_deterministic_across_runs() {
    let make = || {
        Arc::new(
            FakeExtractor::new(|index, _| {
                Ok(vec![
                    EntityResult::new("name", format!("Person {index}"), 0.8),
                    EntityResult::new("date", "2024-01-31", 0.7).with_normalized_value("2024-01-31"),
                ])
            })
            .with_delay(|i| (i as u64 % 3) * 2),
        )
    };
    let doc = document(6);

    let a = PageOrchestrator::new(config_with(make(), 4))
        .unwrap()
        .run(&doc)
        .await
        .unwrap();
    let b = PageOrchestrator::new(config_with(make(), 2))
        .unwrap()
        .run(&doc)
        .await
        .unwrap();

    assert_eq!(aggregate(&a.report), aggregate(&b.report));
    let types: Vec<&String> = a.report.consolidated.keys().collect();
    assert_eq!(types, vec!["page_label", "name", "date"]);
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ExtractionProgressCallback for Recorder {
    fn on_job_start(&self, total_pages: usize) {
        self.events.lock().unwrap().push(format!("start {total_pages}"));
    }

    fn on_page_retry(&self, index: usize, attempt: u32, _error: &str) {
        self.events
            .lock()
            .unwrap()
            .push(format!("retry {index} {attempt}"));
    }

    fn on_page_resolved(&self, _index: usize, resolved: usize, total: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("resolved {resolved}/{total}"));
    }

    fn on_job_complete(&self, total_pages: usize, succeeded: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("complete {succeeded}/{total_pages}"));
    }
}

#[tokio::test]
async fn progress_is_monotonic_and_complete() {
    let recorder = Arc::new(Recorder::default());
    let fake = Arc::new(
        FakeExtractor::new(|index, call| match (index, call) {
            (0, 1) => Err(unavailable()),
            (3, _) => Err(ServiceError::Unsupported("handwriting".into())),
            _ => Ok(Vec::new()),
        })
        .with_delay(|i| (i as u64 % 2) * 5),
    );
    let config = ExtractionConfig::builder()
        .extractor(fake)
        .concurrency(3)
        .retry_backoff_ms(1)
        .max_backoff_ms(2)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    PageOrchestrator::new(config)
        .unwrap()
        .run(&document(4))
        .await
        .unwrap();

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("start 4"));
    assert_eq!(events.last().map(String::as_str), Some("complete 3/4"));
    assert!(events.contains(&"retry 0 1".to_string()));

    let resolved: Vec<&String> = events.iter().filter(|e| e.starts_with("resolved")).collect();
    assert_eq!(
        resolved,
        vec!["resolved 1/4", "resolved 2/4", "resolved 3/4", "resolved 4/4"]
    );
}

// ── Storage ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn run_and_store_writes_three_artifacts() {
    let fake = Arc::new(FakeExtractor::labelling());
    let orchestrator = PageOrchestrator::new(config_with(fake, 2)).unwrap();
    let store = MemoryStore::new();
    let doc = Document::from_bytes("Claim Form.pdf", sample_pdf(2)).unwrap();

    let stored = orchestrator.run_and_store(&doc, &store).await.unwrap();

    let keys = store.keys();
    assert_eq!(keys.len(), 3, "got {keys:?}");
    assert!(keys[0].starts_with("input/Claim_Form_") && keys[0].ends_with(".pdf"));
    assert!(keys.iter().any(|k| k.starts_with("output/") && k.ends_with(".xlsx")));
    assert!(keys.iter().any(|k| k.starts_with("output/") && k.ends_with(".json")));

    assert_eq!(store.get(&keys[0]).unwrap(), doc.bytes());
    let workbook_key = stored.workbook_location.trim_start_matches("memory://");
    assert_eq!(&store.get(workbook_key).unwrap()[..2], b"PK");

    let json_key = stored.json_location.trim_start_matches("memory://");
    let value: serde_json::Value = serde_json::from_slice(&store.get(json_key).unwrap()).unwrap();
    assert_eq!(value["stats"]["total_pages"], 2);
    assert_eq!(value["status"], "Completed");
    assert_eq!(value["text"], "Page 1\nPage 2\n");
    assert_eq!(value["report"]["outcomes"][1]["text"], "Page 2");
}
