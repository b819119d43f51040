//! Ingestion lifecycle integration tests.
//!
//! These tests drive complete runs through the orchestrator against mock
//! providers and resolvers, writing into a temporary output tree:
//! idle -> paging -> draining -> ... -> completed | failed | cancelled

use std::sync::Arc;

use tempfile::TempDir;

use harvester_core::{
    testing::{fixtures, MockProviderAdapter, MockSourceResolver},
    CanonicalRecord, FailureClass, FsSink, IngestConfig, IngestionOrchestrator, PageCursor,
    ProviderError, ProviderKind, RetryPolicy, RunHandle, RunPhase, RunReport,
};

/// Test helper owning the output tree and the mocks.
struct TestHarness {
    resolver: MockSourceResolver,
    sink: Arc<FsSink>,
    _temp_dir: TempDir,
}

impl TestHarness {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let sink = Arc::new(FsSink::new(temp_dir.path(), "Test Collection"));
        let resolver = MockSourceResolver::new();
        resolver.serve_all(b"\x89PNG".to_vec()).await;

        Self {
            resolver,
            sink,
            _temp_dir: temp_dir,
        }
    }

    fn orchestrator(&self, adapter: &MockProviderAdapter) -> IngestionOrchestrator {
        IngestionOrchestrator::new(
            IngestConfig::default(),
            Arc::new(adapter.clone()),
            Arc::new(self.resolver.clone()),
            Arc::clone(&self.sink),
        )
        .with_retry_policy(RetryPolicy::fast(3))
    }

    async fn run(&self, adapter: &MockProviderAdapter, provider: ProviderKind) -> RunReport {
        self.orchestrator(adapter)
            .run(&fixtures::descriptor(provider), &RunHandle::new())
            .await
    }

    async fn on_disk(&self, ids: &[&str]) -> bool {
        for id in ids {
            if !self.sink.has_media(id, ".png").await || !self.sink.has_metadata(id).await {
                return false;
            }
        }
        true
    }
}

/// Three pages of two records; record 5 has no media sources.
fn pages_with_sourceless_record() -> Vec<Vec<CanonicalRecord>> {
    let mut pages = fixtures::numbered_pages(3, 2);
    pages[2][0] = fixtures::record("5", &[]).with_metadata(serde_json::json!({"name": "#5"}));
    pages
}

#[tokio::test]
async fn test_full_run_counts_missing_media() {
    let harness = TestHarness::new().await;
    let adapter = MockProviderAdapter::with_pages(pages_with_sourceless_record());

    let report = harness.run(&adapter, ProviderKind::AlchemyContract).await;

    assert_eq!(report.state, RunPhase::Completed);
    assert_eq!(report.records_processed, 6);
    assert_eq!(report.media_failures, 1);
    assert_eq!(report.metadata_failures, 0);
    assert_eq!(report.failed_ids, vec!["5".to_string()]);
    assert_eq!(report.pages, 3);
    assert!(report.failure.is_none());
    assert!(report.finished_at.is_some());

    assert!(harness.on_disk(&["1", "2", "3", "4", "6"]).await);
    assert!(!harness.sink.has_media("5", ".png").await);
    assert!(harness.sink.has_metadata("5").await);
}

#[tokio::test]
async fn test_protocol_error_on_second_page() {
    let harness = TestHarness::new().await;
    let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(3, 2));
    adapter
        .fail_page(1, ProviderError::Protocol("unexpected top-level shape".into()))
        .await;

    let report = harness.run(&adapter, ProviderKind::AlchemyContract).await;

    assert_eq!(report.state, RunPhase::Failed);
    let failure = report.failure.expect("failed run carries its error");
    assert_eq!(failure.class, FailureClass::Protocol);
    assert_eq!(
        report.last_committed_cursor,
        Some(PageCursor::Token("1".into()))
    );
    assert_eq!(report.records_processed, 2);
    assert!(harness.on_disk(&["1", "2"]).await);
    assert!(!harness.sink.has_media("3", ".png").await);

    // Protocol errors are not retried.
    assert_eq!(adapter.fetch_count().await, 2);

    let progress = harness.sink.load_progress().await.unwrap().unwrap();
    assert_eq!(progress.shards[0].cursor, PageCursor::Token("1".into()));
    assert!(!progress.is_complete());
}

#[tokio::test]
async fn test_second_run_makes_no_resolver_calls() {
    let harness = TestHarness::new().await;
    let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(2, 3));

    let first = harness.run(&adapter, ProviderKind::AlchemyContract).await;
    assert_eq!(first.state, RunPhase::Completed);
    assert_eq!(first.media_written, 6);
    assert_eq!(harness.resolver.calls().await.len(), 6);

    harness.resolver.clear_calls().await;
    let second = harness.run(&adapter, ProviderKind::AlchemyContract).await;

    assert_eq!(second.state, RunPhase::Completed);
    assert_eq!(second.media_already_present, 6);
    assert_eq!(second.media_written, 0);
    assert!(harness.resolver.calls().await.is_empty());
}

#[tokio::test]
async fn test_resume_from_committed_cursor() {
    let harness = TestHarness::new().await;
    let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(3, 2));
    adapter
        .fail_page_times(2, ProviderError::Protocol("maintenance page".into()), 1)
        .await;

    let first = harness.run(&adapter, ProviderKind::AlchemyContract).await;
    assert_eq!(first.state, RunPhase::Failed);
    assert_eq!(
        first.last_committed_cursor,
        Some(PageCursor::Token("2".into()))
    );

    let second = harness.run(&adapter, ProviderKind::AlchemyContract).await;
    assert_eq!(second.state, RunPhase::Completed);
    assert_eq!(second.records_processed, 2);
    assert!(harness.on_disk(&["1", "2", "3", "4", "5", "6"]).await);

    // First run: pages 0, 1, failed 2. Second run starts at page 2.
    let cursors = adapter.requested_cursors().await;
    assert_eq!(cursors.len(), 4);
    assert_eq!(cursors[3], PageCursor::Token("2".into()));

    let progress = harness.sink.load_progress().await.unwrap().unwrap();
    assert!(progress.is_complete());
    assert_eq!(progress.records_fetched, 6);
}

#[tokio::test]
async fn test_resume_disabled_starts_over() {
    let harness = TestHarness::new().await;
    let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(2, 1));
    adapter
        .fail_page_times(1, ProviderError::Protocol("bad".into()), 1)
        .await;
    assert_eq!(
        harness.run(&adapter, ProviderKind::AlchemyContract).await.state,
        RunPhase::Failed
    );

    let orchestrator = IngestionOrchestrator::new(
        IngestConfig::default().with_resume(false),
        Arc::new(adapter.clone()),
        Arc::new(harness.resolver.clone()),
        Arc::clone(&harness.sink),
    );
    let report = orchestrator
        .run(
            &fixtures::descriptor(ProviderKind::AlchemyContract),
            &RunHandle::new(),
        )
        .await;

    assert_eq!(report.state, RunPhase::Completed);
    assert_eq!(report.records_processed, 2);
    assert_eq!(report.media_already_present, 1);
}

#[tokio::test]
async fn test_cancellation_stops_paging() {
    let harness = TestHarness::new().await;
    let handle = RunHandle::new();
    let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(5, 2))
        .with_cancel_after(2, handle.token().clone());

    let report = harness
        .orchestrator(&adapter)
        .run(
            &fixtures::descriptor(ProviderKind::AlchemyContract),
            &handle,
        )
        .await;

    assert_eq!(report.state, RunPhase::Cancelled);
    assert!(report.failure.is_none());
    // The second page was fetched after cancellation was requested, so none
    // of its records start and it is never committed.
    assert_eq!(adapter.fetch_count().await, 2);
    assert_eq!(report.pages, 1);
    assert_eq!(report.records_processed, 2);
    assert_eq!(
        report.last_committed_cursor,
        Some(PageCursor::Token("1".into()))
    );
    assert!(!harness.sink.has_media("3", ".png").await);
    assert_eq!(handle.snapshot().phase, RunPhase::Cancelled);
}

#[tokio::test]
async fn test_sharded_offset_run() {
    let harness = TestHarness::new().await;
    let adapter = MockProviderAdapter::with_offset_pages(fixtures::numbered_pages(5, 2));
    let descriptor = fixtures::descriptor(ProviderKind::AlchemyBatch).with_page_workers(2);

    let report = harness
        .orchestrator(&adapter)
        .run(&descriptor, &RunHandle::new())
        .await;

    assert_eq!(report.state, RunPhase::Completed);
    assert_eq!(report.records_processed, 10);
    assert_eq!(report.pages, 5);
    assert!(harness.on_disk(&["1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]).await);

    let mut cursors = adapter.requested_cursors().await;
    cursors.sort_by_key(|c| match c {
        PageCursor::Offset(n) => *n,
        PageCursor::Token(_) => u64::MAX,
    });
    assert_eq!(
        cursors,
        (0..5).map(|p| PageCursor::Offset(p * 2)).collect::<Vec<_>>()
    );

    let progress = harness.sink.load_progress().await.unwrap().unwrap();
    assert_eq!(progress.shards.len(), 2);
    assert!(progress.is_complete());
}

#[tokio::test]
async fn test_failing_shard_stops_siblings() {
    let harness = TestHarness::new().await;
    let adapter = MockProviderAdapter::with_offset_pages(fixtures::numbered_pages(4, 1));
    adapter
        .fail_page(0, ProviderError::Api {
            status: 401,
            message: "invalid api key".into(),
        })
        .await;
    let descriptor = fixtures::descriptor(ProviderKind::NftscanBatch).with_page_workers(2);

    let report = harness
        .orchestrator(&adapter)
        .run(&descriptor, &RunHandle::new())
        .await;

    assert_eq!(report.state, RunPhase::Failed);
    assert_eq!(report.failure.unwrap().class, FailureClass::Protocol);
    assert_eq!(report.last_committed_cursor, Some(PageCursor::Offset(0)));
    assert!(!harness.sink.has_media("1", ".png").await);
}
