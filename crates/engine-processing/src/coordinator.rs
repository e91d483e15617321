use crate::error::CoordinatorError;
use chrono::Utc;
use connectors::{error::StoreError, store::ObjectStore};
use engine_config::settings::Settings;
use engine_core::{
    connectors::lister::RemoteLister,
    filter::AdmissionFilter,
    metrics::Metrics,
    observer::StepObserver,
    staging::{StagingArea, regular_files},
    state::{
        batch_state::{BatchState, BatchStateStore, PendingCursor},
        ledger::{Attempt, LedgerStore, ProgressLedger},
        report::ProgressReport,
    },
};
use futures::{StreamExt, stream};
use model::{
    core::naming::remote_key,
    events::{StepStatus, fields},
    pagination::{cursor::Cursor, page::ListPage},
    records::batch::{StagedBatch, StagedObject},
};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};

/// Knobs of the coordinator that come from settings.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub batch_size: usize,
    pub fetch_concurrency: usize,
    pub stop_on_short_page: bool,
    pub max_key_attempts: u32,
    pub output_prefix: String,
    pub metadata_prefix: String,
    pub metadata_dir: PathBuf,
}

impl CoordinatorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            batch_size: settings.batch_size,
            fetch_concurrency: settings.fetch_concurrency,
            stop_on_short_page: settings.stop_on_short_page,
            max_key_attempts: settings.max_key_attempts,
            output_prefix: settings.output_prefix.clone(),
            metadata_prefix: settings.metadata_prefix.clone(),
            metadata_dir: settings.dirs.metadata.clone(),
        }
    }
}

/// Outcome of pushing a directory of files to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub batch_id: Option<String>,
    pub uploaded: usize,
    pub failed: usize,
    pub exhausted: bool,
}

/// Outcome of closing a cycle whose processing failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbandonReport {
    pub batch_id: Option<String>,
    pub requeued: usize,
    pub skipped: usize,
    pub exhausted: bool,
}

/// How far one listing page was worked through.
enum PageOutcome {
    /// Every admissible entry was fetched or queued for retry.
    Consumed,
    /// The budget ran out with entries left on the page.
    Partial,
}

/// Drives the fetch and publish halves of a batch cycle.
///
/// The driver contract is `while has_next() { next_batch(); process; upload() }`.
/// `next_batch` stages the advanced cursor as pending and `upload` commits it
/// after the ledger is flushed, so a crash at any point re-fetches at most the
/// keys the ledger does not record.
///
/// A cycle whose processing fails is closed with `abandon` instead: its keys
/// go to the reprocess queue and are restaged alone, one per cycle, until
/// they publish or run out of attempts.
pub struct BatchCoordinator {
    store: Arc<dyn ObjectStore>,
    lister: RemoteLister,
    filter: AdmissionFilter,
    staging: StagingArea,
    state_store: BatchStateStore,
    ledger_store: LedgerStore,
    observer: Arc<dyn StepObserver>,
    metrics: Metrics,
    config: CoordinatorConfig,

    state: BatchState,
    ledger: ProgressLedger,
    in_flight: Vec<String>,
}

impl BatchCoordinator {
    /// Loads the persisted state so `has_next` and `upload` are meaningful
    /// before the first `next_batch`.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        lister: RemoteLister,
        filter: AdmissionFilter,
        staging: StagingArea,
        config: CoordinatorConfig,
        observer: Arc<dyn StepObserver>,
        metrics: Metrics,
    ) -> Result<Self, CoordinatorError> {
        let state_store = BatchStateStore::new(&config.metadata_dir);
        let ledger_store = LedgerStore::new(&config.metadata_dir);
        let mut state = state_store.load().await?;
        let ledger = ledger_store.load().await?;

        if let Some(stale) = state.discard_pending() {
            info!(
                batch_id = %stale.batch_id,
                "Found an uncommitted cursor from an interrupted cycle, it will be re-listed"
            );
        }

        info!(
            store = store.name(),
            cursor = %state.cursor(),
            completed = state.completed,
            downloaded = ledger.downloaded_count(),
            batches = ledger.batch_count,
            "Batch coordinator ready"
        );

        Ok(Self {
            store,
            lister,
            filter,
            staging,
            state_store,
            ledger_store,
            observer,
            metrics,
            config,
            state,
            ledger,
            in_flight: Vec::new(),
        })
    }

    pub fn has_next(&self) -> bool {
        !self.state.completed
    }

    /// Keys waiting in a retry queue. They are still served by `next_batch`
    /// once the listing is exhausted.
    pub fn has_queued_work(&self) -> bool {
        self.ledger.has_queued_work()
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub fn state(&self) -> &BatchState {
        &self.state
    }

    pub fn report(&self) -> ProgressReport {
        ProgressReport::new(&self.ledger, self.state.completed)
    }

    /// Stages up to `batch_size` new admissible objects in the inbound dir.
    pub async fn next_batch(&mut self) -> Result<StagedBatch, CoordinatorError> {
        self.observer.on_step_start("fetch");
        match self.acquire().await {
            Ok(batch) => {
                self.observer.on_step_update(&fields([
                    ("batch_id", serde_json::json!(batch.id)),
                    ("staged", serde_json::json!(batch.len())),
                    ("bytes", serde_json::json!(batch.size_bytes())),
                ]));
                self.observer.on_step_end(&StepStatus::Succeeded);
                Ok(batch)
            }
            Err(e) => {
                self.observer.on_step_end(&StepStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn acquire(&mut self) -> Result<StagedBatch, CoordinatorError> {
        self.staging.reset().await?;
        self.ledger = self.ledger_store.load().await?;
        self.state = self.state_store.load().await?;

        if let Some(stale) = self.state.discard_pending() {
            warn!(
                batch_id = %stale.batch_id,
                staged_at = %stale.staged_at,
                "Discarding uncommitted cursor from an interrupted cycle"
            );
        }

        let batch_size = self.config.batch_size;
        let mut taken = HashSet::new();
        let mut staged = Vec::with_capacity(batch_size);
        self.in_flight.clear();

        let mut cursor = self.state.cursor();
        let mut completed = self.state.completed;
        let mut pages = 0usize;

        if !self.restage_reprocess(&mut staged, &mut taken).await? {
            self.retry_failed(&mut staged, &mut taken).await?;

            while staged.len() < batch_size && !completed {
                let page = match self.lister.list_page(&cursor).await {
                    Ok(page) => page,
                    Err(source) if staged.is_empty() => {
                        return Err(CoordinatorError::Listing { cursor, source });
                    }
                    Err(e) => {
                        warn!(cursor = %cursor, error = %e, "Listing failed, continuing with what is staged");
                        break;
                    }
                };
                pages += 1;

                match self.consume_page(&page, &mut staged, &mut taken).await? {
                    PageOutcome::Partial => break,
                    PageOutcome::Consumed => match page.next_token.clone() {
                        Some(token) => {
                            cursor = Cursor::Token(token);
                            if self.config.stop_on_short_page
                                && page.len() < self.lister.page_size()
                            {
                                debug!(cursor = %cursor, listed = page.len(), "Short page, ending the batch early");
                                break;
                            }
                        }
                        None => completed = true,
                    },
                }
            }
        }
        self.in_flight = staged.iter().map(|o| o.key.clone()).collect();

        let number = self.ledger.batch_count + 1;
        let batch_id = make_batch_id(number, &cursor);
        self.state.stage_pending(PendingCursor {
            token: cursor.clone().into_token(),
            completed,
            batch_id: batch_id.clone(),
            staged_at: Utc::now(),
        });
        self.state_store.save(&self.state).await?;

        info!(
            batch_no = number,
            batch_id = %batch_id,
            staged = staged.len(),
            pages,
            cursor = %cursor,
            exhausted = completed,
            queued_failures = self.ledger.failed_keys.len(),
            queued_reprocess = self.ledger.reprocess_keys.len(),
            "Fetched batch."
        );

        Ok(StagedBatch {
            id: batch_id,
            number,
            inbound: self.staging.inbound().to_path_buf(),
            outbound: self.staging.outbound().to_path_buf(),
            objects: staged,
            ts: Utc::now(),
        })
    }

    /// Restages the head of the reprocess queue as a batch of its own, so a
    /// key that breaks processing cannot hold back the keys listed with it.
    /// Returns whether a key was staged.
    async fn restage_reprocess(
        &mut self,
        staged: &mut Vec<StagedObject>,
        taken: &mut HashSet<String>,
    ) -> Result<bool, CoordinatorError> {
        let Some(key) = self.ledger.reprocess_keys.first().cloned() else {
            return Ok(false);
        };

        info!(
            key = %key,
            attempts = self.ledger.attempts.get(&key).copied().unwrap_or(0),
            queued = self.ledger.reprocess_keys.len(),
            "Restaging key whose processing failed"
        );
        let path = self.staging.allocate(&key, taken);
        match self.store.get_object(&key, &path).await {
            Ok(size) => {
                self.metrics.record_fetch(size);
                staged.push(StagedObject {
                    key,
                    local_path: path,
                    size,
                });
                Ok(true)
            }
            Err(source) if source.is_local() => {
                Err(CoordinatorError::LocalTransfer { key, source })
            }
            Err(e) => {
                self.metrics.increment_fetch_failures(1);
                remove_partial(&path).await?;
                if is_vanished(&e) {
                    warn!(key = %key, "Object vanished before it could be reprocessed, skipped");
                    self.ledger.skip(&key);
                } else {
                    warn!(key = %key, error = %e, "Refetch for reprocessing failed");
                    let attempt = self.ledger.queue_reprocess(&key, self.config.max_key_attempts);
                    self.log_attempt(&key, attempt);
                }
                Ok(false)
            }
        }
    }

    /// Retries keys whose fetch failed in an earlier cycle. Only successes
    /// count against the batch budget.
    async fn retry_failed(
        &mut self,
        staged: &mut Vec<StagedObject>,
        taken: &mut HashSet<String>,
    ) -> Result<(), CoordinatorError> {
        let queued: Vec<String> = self
            .ledger
            .failed_keys
            .iter()
            .filter(|k| !self.ledger.is_downloaded(k))
            .take(self.config.batch_size)
            .cloned()
            .collect();
        if queued.is_empty() {
            return Ok(());
        }

        info!(queued = queued.len(), "Retrying previously failed fetches");
        let recovered = self.fetch_into(queued, staged, taken).await?;
        debug!(recovered, "Retry queue processed");
        Ok(())
    }

    async fn consume_page(
        &mut self,
        page: &ListPage,
        staged: &mut Vec<StagedObject>,
        taken: &mut HashSet<String>,
    ) -> Result<PageOutcome, CoordinatorError> {
        let mut candidates = page
            .entries
            .iter()
            .filter(|e| self.filter.admits(&e.key))
            .filter(|e| !self.ledger.is_tracked(&e.key))
            .filter(|e| !staged.iter().any(|s| s.key == e.key))
            .map(|e| e.key.clone())
            .collect::<Vec<_>>()
            .into_iter();

        debug!(
            listed = page.len(),
            candidates = candidates.len(),
            last = page.is_last(),
            "Consuming page"
        );

        loop {
            let remaining = self.config.batch_size.saturating_sub(staged.len());
            if candidates.len() == 0 {
                return Ok(PageOutcome::Consumed);
            }
            if remaining == 0 {
                return Ok(PageOutcome::Partial);
            }

            let chunk: Vec<String> = candidates.by_ref().take(remaining).collect();
            self.fetch_into(chunk, staged, taken).await?;
        }
    }

    /// Fetches `keys` concurrently into the inbound dir. Successes are
    /// appended to the ledger in key order, failures are queued for retry.
    /// Returns how many keys were staged.
    async fn fetch_into(
        &mut self,
        keys: Vec<String>,
        staged: &mut Vec<StagedObject>,
        taken: &mut HashSet<String>,
    ) -> Result<usize, CoordinatorError> {
        let jobs: Vec<(String, PathBuf)> = keys
            .into_iter()
            .map(|key| {
                let path = self.staging.allocate(&key, taken);
                (key, path)
            })
            .collect();

        let store = self.store.clone();
        let results: Vec<(String, PathBuf, Result<u64, StoreError>)> = stream::iter(jobs)
            .map(|(key, path)| {
                let store = store.clone();
                async move {
                    let res = store.get_object(&key, &path).await;
                    (key, path, res)
                }
            })
            .buffered(self.config.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut fetched = 0;
        for (key, path, res) in results {
            match res {
                Ok(size) => {
                    self.ledger.record_download(&key);
                    self.metrics.record_fetch(size);
                    staged.push(StagedObject {
                        key,
                        local_path: path,
                        size,
                    });
                    fetched += 1;
                }
                Err(source) if source.is_local() => {
                    return Err(CoordinatorError::LocalTransfer { key, source });
                }
                Err(e) if is_vanished(&e) => {
                    warn!(key = %key, "Object vanished after listing, skipped");
                    self.metrics.increment_fetch_failures(1);
                    self.ledger.skip(&key);
                    remove_partial(&path).await?;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Fetch failed");
                    self.metrics.increment_fetch_failures(1);
                    let attempt = self.ledger.queue_failed(&key, self.config.max_key_attempts);
                    self.log_attempt(&key, attempt);
                    remove_partial(&path).await?;
                }
            }
        }
        Ok(fetched)
    }

    fn log_attempt(&self, key: &str, attempt: Attempt) {
        match attempt {
            Attempt::Queued(attempts) => {
                debug!(key = %key, attempts, "Queued for another attempt");
            }
            Attempt::GaveUp(attempts) => {
                warn!(key = %key, attempts, "Out of attempts, key skipped");
            }
        }
    }

    /// Pushes every outbound file, flushes the ledger and commits the cursor.
    pub async fn upload(&mut self) -> Result<PublishReport, CoordinatorError> {
        self.observer.on_step_start("push");
        match self.publish().await {
            Ok(report) => {
                self.observer.on_step_update(&fields([
                    ("uploaded", report.uploaded),
                    ("failed", report.failed),
                    ("total_chunks", self.ledger.total_chunks as usize),
                ]));
                self.observer.on_step_end(&if report.failed == 0 {
                    StepStatus::Succeeded
                } else {
                    StepStatus::Failed(format!("{} pushes failed", report.failed))
                });
                Ok(report)
            }
            Err(e) => {
                self.observer.on_step_end(&StepStatus::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn publish(&mut self) -> Result<PublishReport, CoordinatorError> {
        let files = self.staging.outbound_files().await?;
        let prefix = self.config.output_prefix.clone();
        let (uploaded, failed) = self.push_outbound(&files, &prefix).await?;

        for key in std::mem::take(&mut self.in_flight) {
            self.ledger.settle(&key);
        }
        self.ledger.increment_batch();
        self.ledger_store.save(&self.ledger).await?;

        let committed = self.state.commit_pending();
        self.state_store.save(&self.state).await?;
        self.metrics.increment_cycles();

        let report = PublishReport {
            batch_id: committed.map(|p| p.batch_id),
            uploaded,
            failed,
            exhausted: self.state.completed,
        };

        info!(
            batch_no = self.ledger.batch_count,
            batch_id = report.batch_id.as_deref().unwrap_or("-"),
            uploaded,
            failed,
            total_chunks = self.ledger.total_chunks,
            exhausted = report.exhausted,
            "Published batch."
        );
        Ok(report)
    }

    /// Closes a cycle whose processing failed. Its keys are charged an
    /// attempt and queued for reprocessing, then the ledger is flushed and the
    /// cursor committed so the listing moves on. `batch_count` is not bumped.
    pub async fn abandon(&mut self, reason: &str) -> Result<AbandonReport, CoordinatorError> {
        let mut requeued = 0;
        let mut skipped = 0;
        for key in std::mem::take(&mut self.in_flight) {
            let attempt = self.ledger.queue_reprocess(&key, self.config.max_key_attempts);
            match attempt {
                Attempt::Queued(_) => requeued += 1,
                Attempt::GaveUp(_) => skipped += 1,
            }
            self.log_attempt(&key, attempt);
        }
        self.ledger_store.save(&self.ledger).await?;

        let committed = self.state.commit_pending();
        self.state_store.save(&self.state).await?;

        let report = AbandonReport {
            batch_id: committed.map(|p| p.batch_id),
            requeued,
            skipped,
            exhausted: self.state.completed,
        };
        warn!(
            batch_id = report.batch_id.as_deref().unwrap_or("-"),
            requeued,
            skipped,
            reason,
            "Abandoned batch after processing failed"
        );
        Ok(report)
    }

    /// Pushes every regular file in the metadata dir under the metadata prefix.
    pub async fn publish_metadata(&self) -> Result<PublishReport, CoordinatorError> {
        let files: Vec<PathBuf> = regular_files(&self.config.metadata_dir)
            .await?
            .into_iter()
            .filter(|p| p.extension().is_none_or(|ext| ext != "tmp"))
            .collect();

        let mut uploaded = 0;
        let mut failed = 0;
        for file in &files {
            let key = remote_key(&self.config.metadata_prefix, &file_name(file));
            match self.store.put_object(file, &key).await {
                Ok(()) => uploaded += 1,
                Err(source) if source.is_local() => {
                    return Err(CoordinatorError::LocalTransfer { key, source });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Metadata push failed");
                    failed += 1;
                }
            }
        }

        info!(
            prefix = %self.config.metadata_prefix,
            uploaded,
            failed,
            "Published metadata"
        );
        Ok(PublishReport {
            batch_id: None,
            uploaded,
            failed,
            exhausted: self.state.completed,
        })
    }

    /// Counts admissible remote objects and records the total in the ledger.
    /// Only allowed between cycles, because it flushes the ledger.
    pub async fn refresh_total_expected(&mut self) -> Result<u64, CoordinatorError> {
        if self.state.pending.is_some() {
            return Err(CoordinatorError::CycleInFlight);
        }

        let total = self
            .lister
            .count(&self.filter)
            .await
            .map_err(|source| CoordinatorError::Listing {
                cursor: Cursor::Start,
                source,
            })?;

        self.ledger = self.ledger_store.load().await?;
        self.ledger.total_expected = total;
        self.ledger_store.save(&self.ledger).await?;
        Ok(total)
    }

    /// Pushes `files` concurrently under `prefix`. Successes go into the
    /// ledger and are drained from the outbound dir.
    async fn push_outbound(
        &mut self,
        files: &[PathBuf],
        prefix: &str,
    ) -> Result<(usize, usize), CoordinatorError> {
        let store = self.store.clone();
        let results: Vec<(PathBuf, String, Result<(), StoreError>)> =
            stream::iter(files.iter().cloned())
                .map(|path| {
                    let store = store.clone();
                    let key = remote_key(prefix, &file_name(&path));
                    async move {
                        let res = store.put_object(&path, &key).await;
                        (path, key, res)
                    }
                })
                .buffered(self.config.fetch_concurrency.max(1))
                .collect()
                .await;

        let mut uploaded = 0;
        let mut failed = 0;
        for (path, key, res) in results {
            match res {
                Ok(()) => {
                    uploaded += 1;
                    self.metrics.record_push();
                    self.ledger.record_upload(&key);
                    tokio::fs::remove_file(&path).await.map_err(|e| {
                        CoordinatorError::LocalTransfer {
                            key: key.clone(),
                            source: StoreError::local(&path, e),
                        }
                    })?;
                }
                Err(source) if source.is_local() => {
                    return Err(CoordinatorError::LocalTransfer { key, source });
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Push failed");
                    self.metrics.increment_push_failures(1);
                    failed += 1;
                }
            }
        }
        Ok((uploaded, failed))
    }
}

/// Stable id of a cycle: the batch number and the cursor it ends on.
pub fn make_batch_id(number: u64, cursor: &Cursor) -> String {
    let mut h = blake3::Hasher::new();
    h.update(&number.to_le_bytes());
    h.update(cursor.to_string().as_bytes());
    h.finalize().to_hex()[..16].to_string()
}

/// The object is gone from the store, so retrying cannot help.
fn is_vanished(error: &StoreError) -> bool {
    matches!(error.root_cause(), StoreError::NotFound(_))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

async fn remove_partial(path: &Path) -> Result<(), CoordinatorError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CoordinatorError::LocalTransfer {
            key: path.display().to_string(),
            source: StoreError::local(path, e),
        }),
    }
}
