//! Ingestion orchestrator implementation.

use std::sync::Arc;

use chrono::Utc;
use futures::future::{join_all, ready};
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collection::{CanonicalRecord, CollectionDescriptor, PageCursor};
use crate::metrics;
use crate::provider::ProviderAdapter;
use crate::resolver::SourceResolver;
use crate::retry::{retry_with_policy, RetryClass, RetryPolicy, Retryable};
use crate::sink::{FsSink, RunProgress};
use crate::worker::{FetchWorker, MediaOutcome, RecordOutcome};

use super::config::IngestConfig;
use super::handle::RunHandle;
use super::shard::plan_shards;
use super::types::{OrchestratorError, RunFailure, RunPhase, RunReport};

/// State shared by the shards of one run.
struct RunState {
    progress: RunProgress,
    report: RunReport,
}

/// How a shard loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShardExit {
    Finished,
    Stopped,
}

/// Drives one collection from its starting cursor to a terminal report.
pub struct IngestionOrchestrator {
    config: IngestConfig,
    adapter: Arc<dyn ProviderAdapter>,
    sink: Arc<FsSink>,
    worker: FetchWorker,
    retry: RetryPolicy,
}

impl IngestionOrchestrator {
    pub fn new(
        config: IngestConfig,
        adapter: Arc<dyn ProviderAdapter>,
        resolver: Arc<dyn SourceResolver>,
        sink: Arc<FsSink>,
    ) -> Self {
        Self {
            config,
            adapter,
            worker: FetchWorker::new(resolver, Arc::clone(&sink)),
            sink,
            retry: RetryPolicy::default(),
        }
    }

    /// Policy for page fetches.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run the collection to a terminal state. Never panics on upstream
    /// failures; they end up in the report.
    pub async fn run(&self, descriptor: &CollectionDescriptor, handle: &RunHandle) -> RunReport {
        let mut report = RunReport::new(&descriptor.name, self.adapter.name());
        handle.publish(report.snapshot(RunPhase::Idle));

        info!(
            collection = %descriptor.name,
            contract = %descriptor.contract,
            provider = self.adapter.name(),
            "Starting ingestion run"
        );

        if let Err(e) = self.sink.prepare().await {
            let err = OrchestratorError::from(e);
            report.last_committed_cursor = Some(descriptor.initial_cursor());
            return self.finish(report, Some(err), handle);
        }

        let progress = self.initial_progress(descriptor).await;
        let shard_count = progress.shards.len();
        let state = Mutex::new(RunState { progress, report });

        // Child token: a failing shard stops its siblings without touching
        // the caller's handle.
        let stop = handle.token().child_token();
        let (stop, state_ref) = (&stop, &state);

        let shard_runs = (0..shard_count).map(|index| async move {
            let result = self
                .run_shard(index, descriptor, handle, stop, state_ref)
                .await;
            if result.is_err() {
                stop.cancel();
            }
            result
        });
        let results = join_all(shard_runs).await;

        let RunState {
            progress,
            mut report,
        } = state.into_inner();
        report.last_committed_cursor = progress
            .shards
            .iter()
            .find(|s| !s.done)
            .map(|s| s.cursor.clone());

        let mut first_error = None;
        let mut all_finished = true;
        for result in results {
            match result {
                Ok(ShardExit::Finished) => {}
                Ok(ShardExit::Stopped) => all_finished = false,
                Err(e) => {
                    all_finished = false;
                    first_error.get_or_insert(e);
                }
            }
        }

        if first_error.is_none() && !all_finished {
            report.state = RunPhase::Cancelled;
        }
        self.finish(report, first_error, handle)
    }

    fn finish(
        &self,
        mut report: RunReport,
        error: Option<OrchestratorError>,
        handle: &RunHandle,
    ) -> RunReport {
        match &error {
            Some(e) => {
                report.state = RunPhase::Failed;
                report.failure = Some(RunFailure::from(e));
                error!(
                    collection = %report.collection,
                    error = %e,
                    last_committed_cursor = ?report.last_committed_cursor,
                    "Ingestion run failed"
                );
            }
            None if report.state == RunPhase::Cancelled => {
                warn!(
                    collection = %report.collection,
                    processed = report.records_processed,
                    last_committed_cursor = ?report.last_committed_cursor,
                    "Ingestion run cancelled"
                );
            }
            None => {
                report.state = RunPhase::Completed;
                info!(
                    collection = %report.collection,
                    processed = report.records_processed,
                    media_failures = report.media_failures,
                    metadata_failures = report.metadata_failures,
                    skipped = report.records_skipped,
                    "Ingestion run completed"
                );
            }
        }

        report.finished_at = Some(Utc::now());
        metrics::RUNS_TOTAL
            .with_label_values(&[report.state.as_str()])
            .inc();
        handle.publish(report.snapshot(report.state));
        report
    }

    /// Fresh shards, or the persisted ones when resuming the same catalog.
    async fn initial_progress(&self, descriptor: &CollectionDescriptor) -> RunProgress {
        if self.config.resume {
            match self.sink.load_progress().await {
                Ok(Some(progress))
                    if progress.matches(&descriptor.contract, descriptor.provider)
                        && !progress.is_complete() =>
                {
                    info!(
                        collection = %descriptor.name,
                        shards = progress.shards.len(),
                        fetched = progress.records_fetched,
                        "Resuming from saved progress"
                    );
                    return progress;
                }
                Ok(Some(_)) => debug!("Saved progress is finished or for another catalog, starting fresh"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Ignoring unreadable progress file"),
            }
        }

        let shards = plan_shards(
            self.adapter.pagination(),
            &descriptor.initial_cursor(),
            descriptor.page_workers,
        );
        RunProgress::new(&descriptor.contract, descriptor.provider, shards)
    }

    async fn run_shard(
        &self,
        index: usize,
        descriptor: &CollectionDescriptor,
        handle: &RunHandle,
        stop: &CancellationToken,
        state: &Mutex<RunState>,
    ) -> Result<ShardExit, OrchestratorError> {
        loop {
            let (cursor, end) = {
                let mut s = state.lock().await;
                let shard = &s.progress.shards[index];
                if shard.done {
                    return Ok(ShardExit::Finished);
                }
                let next = (shard.cursor.clone(), shard.end);
                s.report.final_cursor = Some(next.0.clone());
                next
            };

            if stop.is_cancelled() {
                return Ok(ShardExit::Stopped);
            }

            handle.set_phase(RunPhase::Paging);
            debug!(shard = index, cursor = %cursor, "Fetching page");

            let page = match retry_with_policy(&self.retry, "page_fetch", Some(stop), || {
                self.adapter.fetch_page(&cursor)
            })
            .await
            {
                Ok(page) => page,
                Err(e) if stop.is_cancelled() && e.retry_class() != RetryClass::Fatal => {
                    return Ok(ShardExit::Stopped)
                }
                Err(e) => return Err(e.into()),
            };

            if page.skipped > 0 {
                warn!(shard = index, cursor = %cursor, skipped = page.skipped, "Skipped malformed items");
                metrics::RECORDS_SKIPPED
                    .with_label_values(&[self.adapter.name()])
                    .inc_by(page.skipped as u64);
            }

            handle.set_phase(RunPhase::Draining);
            let expected = page.records.len();
            let outcomes = self
                .drain(page.records, descriptor.item_workers, stop, handle, state)
                .await;
            {
                let mut s = state.lock().await;
                s.report.records_skipped += page.skipped as u64;
            }
            if outcomes.len() < expected {
                debug!(shard = index, cursor = %cursor, "Page not fully drained, not committing");
                return Ok(ShardExit::Stopped);
            }

            let next = match (page.next_cursor, end) {
                (Some(PageCursor::Offset(n)), Some(end)) if n >= end => None,
                (next, _) => next,
            };
            self.commit(index, next, &outcomes, handle, state).await?;
        }
    }

    /// Run the page's records through the item pool. Records not yet started
    /// when `stop` fires are left out of the result.
    async fn drain(
        &self,
        records: Vec<CanonicalRecord>,
        item_workers: usize,
        stop: &CancellationToken,
        handle: &RunHandle,
        state: &Mutex<RunState>,
    ) -> Vec<RecordOutcome> {
        stream::iter(records)
            .map(|record| async move {
                if stop.is_cancelled() {
                    return None;
                }
                let outcome = self.worker.process(&record).await;
                self.tally(&outcome, handle, state).await;
                Some(outcome)
            })
            .buffer_unordered(item_workers.max(1))
            .filter_map(ready)
            .collect()
            .await
    }

    /// Live counters. Committed progress is updated separately.
    async fn tally(&self, outcome: &RecordOutcome, handle: &RunHandle, state: &Mutex<RunState>) {
        let mut s = state.lock().await;
        let report = &mut s.report;
        report.records_processed += 1;
        match outcome.media {
            MediaOutcome::Written { .. } => report.media_written += 1,
            MediaOutcome::AlreadyPresent => report.media_already_present += 1,
            MediaOutcome::Unavailable { .. } => report.media_failures += 1,
        }
        if outcome.metadata.is_failure() {
            report.metadata_failures += 1;
        }
        if outcome.is_failure() && !report.failed_ids.contains(&outcome.id) {
            report.failed_ids.push(outcome.id.clone());
        }
        handle.publish(report.snapshot(RunPhase::Draining));
    }

    async fn commit(
        &self,
        index: usize,
        next: Option<PageCursor>,
        outcomes: &[RecordOutcome],
        handle: &RunHandle,
        state: &Mutex<RunState>,
    ) -> Result<(), OrchestratorError> {
        let mut s = state.lock().await;
        let mut progress = s.progress.clone();

        match next {
            Some(cursor) => progress.shards[index].cursor = cursor,
            None => progress.shards[index].done = true,
        }
        progress.records_fetched += outcomes.len() as u64;
        for outcome in outcomes {
            if outcome.media.is_failure() {
                progress.media_failures += 1;
            }
            if outcome.metadata.is_failure() {
                progress.metadata_failures += 1;
            }
            if outcome.is_failure() {
                progress.record_failure(&outcome.id);
            }
        }
        progress.updated_at = Utc::now();

        // In-memory progress only advances once the file is written.
        if self.config.persist_progress {
            self.sink.save_progress(&progress).await?;
        }
        s.progress = progress;

        s.report.pages += 1;
        debug!(
            shard = index,
            cursor = %s.progress.shards[index].cursor,
            done = s.progress.shards[index].done,
            "Committed page"
        );
        handle.publish(s.report.snapshot(RunPhase::Paging));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ProviderKind;
    use crate::orchestrator::FailureClass;
    use crate::provider::ProviderError;
    use crate::testing::{fixtures, MockProviderAdapter, MockSourceResolver};
    use tempfile::TempDir;

    async fn orchestrator(
        adapter: &MockProviderAdapter,
        resolver: &MockSourceResolver,
        dir: &TempDir,
    ) -> (IngestionOrchestrator, Arc<FsSink>) {
        let sink = Arc::new(FsSink::new(dir.path(), "Test Collection"));
        let orchestrator = IngestionOrchestrator::new(
            IngestConfig::default(),
            Arc::new(adapter.clone()),
            Arc::new(resolver.clone()),
            Arc::clone(&sink),
        )
        .with_retry_policy(RetryPolicy::fast(3));
        (orchestrator, sink)
    }

    #[tokio::test]
    async fn test_pagination_terminates() {
        let dir = TempDir::new().unwrap();
        let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(4, 3));
        let resolver = MockSourceResolver::new();
        resolver.serve_all(b"png".to_vec()).await;
        let (orch, _) = orchestrator(&adapter, &resolver, &dir).await;

        let report = orch
            .run(&fixtures::descriptor(ProviderKind::AlchemyContract), &RunHandle::new())
            .await;

        assert_eq!(report.state, RunPhase::Completed);
        assert_eq!(report.records_processed, 12);
        assert_eq!(report.pages, 4);
        assert_eq!(adapter.fetch_count().await, 4);
        assert_eq!(report.last_committed_cursor, None);
        assert_eq!(report.final_cursor, Some(PageCursor::Token("3".into())));
    }

    #[tokio::test]
    async fn test_transient_page_error_is_retried() {
        let dir = TempDir::new().unwrap();
        let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(2, 1));
        adapter
            .fail_page_times(1, ProviderError::Transient("reset".into()), 2)
            .await;
        let resolver = MockSourceResolver::new();
        resolver.serve_all(b"png".to_vec()).await;
        let (orch, _) = orchestrator(&adapter, &resolver, &dir).await;

        let report = orch
            .run(&fixtures::descriptor(ProviderKind::AlchemyContract), &RunHandle::new())
            .await;

        assert_eq!(report.state, RunPhase::Completed);
        assert_eq!(adapter.fetch_count().await, 4);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_run() {
        let dir = TempDir::new().unwrap();
        let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(2, 1));
        adapter
            .fail_page(0, ProviderError::Transient("timeout".into()))
            .await;
        let resolver = MockSourceResolver::new();
        let (orch, _) = orchestrator(&adapter, &resolver, &dir).await;

        let report = orch
            .run(&fixtures::descriptor(ProviderKind::AlchemyContract), &RunHandle::new())
            .await;

        assert_eq!(report.state, RunPhase::Failed);
        let failure = report.failure.unwrap();
        assert_eq!(failure.class, FailureClass::TransientNetwork);
        assert_eq!(report.last_committed_cursor, Some(PageCursor::Offset(0)));
        assert_eq!(adapter.fetch_count().await, 3);
    }

    #[tokio::test]
    async fn test_progress_snapshot_published() {
        let dir = TempDir::new().unwrap();
        let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(1, 2));
        let resolver = MockSourceResolver::new();
        resolver.serve_all(b"png".to_vec()).await;
        let (orch, sink) = orchestrator(&adapter, &resolver, &dir).await;
        let handle = RunHandle::new();

        orch.run(&fixtures::descriptor(ProviderKind::AlchemyContract), &handle)
            .await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.phase, RunPhase::Completed);
        assert_eq!(snapshot.records_processed, 2);
        assert_eq!(snapshot.pages, 1);

        let progress = sink.load_progress().await.unwrap().unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.records_fetched, 2);
    }

    #[tokio::test]
    async fn test_progress_write_failure_keeps_committed_cursor() {
        let dir = TempDir::new().unwrap();
        let adapter = MockProviderAdapter::with_pages(fixtures::numbered_pages(1, 2));
        let resolver = MockSourceResolver::new();
        resolver.serve_all(b"png".to_vec()).await;
        let (orch, sink) = orchestrator(&adapter, &resolver, &dir).await;

        // A non-empty directory where the progress file belongs cannot be
        // renamed over.
        std::fs::create_dir_all(sink.progress_path().join("blocker")).unwrap();

        let report = orch
            .run(&fixtures::descriptor(ProviderKind::AlchemyContract), &RunHandle::new())
            .await;

        assert_eq!(report.state, RunPhase::Failed);
        assert_eq!(report.failure.unwrap().class, FailureClass::Io);
        assert_eq!(report.last_committed_cursor, Some(PageCursor::Offset(0)));
        assert_eq!(report.pages, 0);
    }
}
