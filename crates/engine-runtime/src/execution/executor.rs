use crate::{error::RunError, execution::factory};
use engine_config::settings::{Settings, validator::SettingsValidator};
use engine_core::{
    metrics::{Metrics, MetricsSnapshot},
    observer::{StepObserver, TracingObserver},
};
use engine_processing::{
    coordinator::{AbandonReport, BatchCoordinator},
    step::ProcessingStep,
};
use model::events::StepStatus;
use serde::Serialize;
use std::{fmt, sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 3;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop after this many committed cycles.
    pub max_cycles: Option<u64>,
    /// Abort after this many listing outages in a row.
    pub max_consecutive_failures: usize,
    /// Push the metadata dir once the loop ends.
    pub publish_metadata: bool,
    pub count_on_start: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_cycles: None,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            publish_metadata: true,
            count_on_start: false,
        }
    }
}

impl RunOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            count_on_start: settings.count_on_start,
            ..Self::default()
        }
    }
}

/// What one invocation did. Durable totals are in the progress ledger.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    /// Keys sent back to the reprocess queue by failed processing.
    pub requeued: usize,
    /// Keys given up on during this run.
    pub skipped: usize,
    pub fetched: usize,
    pub uploaded: usize,
    pub push_failures: usize,
    pub chunks: usize,
    pub retries: u64,
    pub total_expected: Option<u64>,
    pub metadata_uploaded: Option<usize>,
    pub exhausted: bool,
    pub interrupted: bool,
    pub duration_secs: f64,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run Summary")?;
        writeln!(f, "-----------------------------")?;
        writeln!(f, "{:<18} {}", "Cycles", self.cycles)?;
        writeln!(f, "{:<18} {}", "Failed cycles", self.failed_cycles)?;
        if self.requeued + self.skipped > 0 {
            writeln!(
                f,
                "{:<18} {} requeued, {} skipped",
                "Failed keys", self.requeued, self.skipped
            )?;
        }
        writeln!(f, "{:<18} {}", "Fetched", self.fetched)?;
        writeln!(f, "{:<18} {}", "Chunks produced", self.chunks)?;
        writeln!(
            f,
            "{:<18} {} ({} failed)",
            "Uploaded", self.uploaded, self.push_failures
        )?;
        writeln!(f, "{:<18} {}", "Store retries", self.retries)?;
        if let Some(n) = self.metadata_uploaded {
            writeln!(f, "{:<18} {n}", "Metadata files")?;
        }
        let state = match (self.exhausted, self.interrupted) {
            (_, true) => "interrupted",
            (true, _) => "exhausted",
            _ => "more remaining",
        };
        writeln!(f, "{:<18} {state}", "Listing")?;
        write!(f, "{:<18} {:.2}s", "Duration", self.duration_secs)
    }
}

#[derive(Default)]
struct CycleOutcome {
    fetched: usize,
    chunks: usize,
    uploaded: usize,
    failed: usize,
    /// Set when processing failed and the cycle was closed by `abandon`.
    abandoned: Option<AbandonReport>,
}

/// Validates settings, wires the pipeline and drives it to exhaustion,
/// cancellation or `max_cycles`.
pub async fn run(
    settings: &Settings,
    options: RunOptions,
    cancel: CancellationToken,
) -> Result<RunSummary, RunError> {
    SettingsValidator::new(settings).validate()?;

    let metrics = Metrics::new();
    let observer: Arc<dyn StepObserver> = Arc::new(TracingObserver::new());
    let store = factory::create_store(settings, &metrics).await?;
    let step = factory::create_step(settings)?;
    let coordinator =
        factory::create_coordinator(settings, store, observer.clone(), metrics.clone()).await?;

    PipelineExecutor::new(coordinator, step, observer, metrics, options, cancel)
        .execute()
        .await
}

/// Runs `while has_next() { next_batch(); process; upload() }`, then keeps
/// cycling while keys wait in a retry queue.
///
/// A cycle whose step fails is closed with `abandon`: its keys are queued for
/// reprocessing and the listing moves on. A cycle that fails to list keeps its
/// cursor pending, and only a run of those aborts with `TooManyFailures`.
pub struct PipelineExecutor {
    coordinator: BatchCoordinator,
    step: Box<dyn ProcessingStep>,
    observer: Arc<dyn StepObserver>,
    metrics: Metrics,
    options: RunOptions,
    cancel: CancellationToken,
}

impl PipelineExecutor {
    pub fn new(
        coordinator: BatchCoordinator,
        step: Box<dyn ProcessingStep>,
        observer: Arc<dyn StepObserver>,
        metrics: Metrics,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            step,
            observer,
            metrics,
            options,
            cancel,
        }
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    pub async fn execute(mut self) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        if self.options.count_on_start {
            match self.coordinator.refresh_total_expected().await {
                Ok(total) => {
                    info!(total_expected = total, "Counted admissible objects");
                    summary.total_expected = Some(total);
                }
                Err(e) if !e.is_fatal() => warn!(error = %e, "Counting failed, continuing"),
                Err(e) => return Err(e.into()),
            }
        }

        let mut consecutive = 0usize;
        while self.coordinator.has_next() || self.coordinator.has_queued_work() {
            if self.cancel.is_cancelled() {
                warn!(cycles = summary.cycles, "Shutdown requested, stopping between cycles");
                summary.interrupted = true;
                break;
            }
            if self.options.max_cycles.is_some_and(|max| summary.cycles >= max) {
                info!(cycles = summary.cycles, "Cycle limit reached");
                break;
            }

            match self.cycle().await {
                Ok(outcome) => {
                    consecutive = 0;
                    summary.cycles += 1;
                    if let Some(abandoned) = &outcome.abandoned {
                        summary.failed_cycles += 1;
                        summary.requeued += abandoned.requeued;
                        summary.skipped += abandoned.skipped;
                    }
                    summary.fetched += outcome.fetched;
                    summary.chunks += outcome.chunks;
                    summary.uploaded += outcome.uploaded;
                    summary.push_failures += outcome.failed;
                }
                Err(e) if is_fatal(&e) => {
                    error!(error = %e, "Cycle failed fatally");
                    return Err(e);
                }
                Err(e) => {
                    consecutive += 1;
                    summary.failed_cycles += 1;
                    warn!(consecutive, error = %e, "Cycle failed");
                    if consecutive >= self.options.max_consecutive_failures.max(1) {
                        return Err(RunError::TooManyFailures {
                            consecutive,
                            last: e.to_string(),
                        });
                    }
                }
            }
        }

        if self.options.publish_metadata && !summary.interrupted {
            let report = self.coordinator.publish_metadata().await?;
            summary.metadata_uploaded = Some(report.uploaded);
        }

        let MetricsSnapshot { retry_count, .. } = self.metrics.snapshot();
        summary.retries = retry_count;
        summary.exhausted = !self.coordinator.has_next();
        summary.duration_secs = started.elapsed().as_secs_f64();

        info!(
            cycles = summary.cycles,
            failed_cycles = summary.failed_cycles,
            chunks = summary.chunks,
            exhausted = summary.exhausted,
            "Run finished"
        );
        info!("\n{}", self.coordinator.report());
        Ok(summary)
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, RunError> {
        let batch = self.coordinator.next_batch().await?;

        self.observer.on_step_start(self.step.name());
        let records = match self.step.process(&batch, self.observer.as_ref()).await {
            Ok(records) => {
                self.observer.on_step_end(&StepStatus::Succeeded);
                records
            }
            Err(e) => {
                self.observer.on_step_end(&StepStatus::Failed(e.to_string()));
                warn!(batch_id = %batch.id, error = %e, "Processing failed");
                let abandoned = self.coordinator.abandon(&e.to_string()).await?;
                return Ok(CycleOutcome {
                    fetched: batch.len(),
                    abandoned: Some(abandoned),
                    ..CycleOutcome::default()
                });
            }
        };

        let report = self.coordinator.upload().await?;
        Ok(CycleOutcome {
            fetched: batch.len(),
            chunks: records.len(),
            uploaded: report.uploaded,
            failed: report.failed,
            abandoned: None,
        })
    }
}

/// Listing outages end the cycle, everything else the run.
fn is_fatal(err: &RunError) -> bool {
    match err {
        RunError::Coordinator(e) => e.is_fatal(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engine_config::settings::StoreSettings;
    use engine_core::observer::NoopObserver;
    use engine_processing::error::ProcessingError;
    use model::records::{batch::StagedBatch, chunk::ChunkRecord};
    use std::path::Path;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    struct FailingStep;

    #[async_trait]
    impl ProcessingStep for FailingStep {
        fn name(&self) -> &str {
            "failing"
        }

        async fn process(
            &self,
            _: &StagedBatch,
            _: &dyn StepObserver,
        ) -> Result<Vec<ChunkRecord>, ProcessingError> {
            Err(ProcessingError::io(
                "/nowhere",
                std::io::Error::other("model crashed"),
            ))
        }
    }

    /// Copies every staged file to the outbound dir unchanged.
    struct CopyStep;

    #[async_trait]
    impl ProcessingStep for CopyStep {
        fn name(&self) -> &str {
            "copy"
        }

        async fn process(
            &self,
            batch: &StagedBatch,
            _: &dyn StepObserver,
        ) -> Result<Vec<ChunkRecord>, ProcessingError> {
            let mut out = Vec::new();
            for (index, obj) in batch.objects.iter().enumerate() {
                let dest = batch.outbound.join(obj.local_path.file_name().unwrap());
                tokio::fs::copy(&obj.local_path, &dest).await.unwrap();
                out.push(ChunkRecord {
                    source_key: Some(obj.key.clone()),
                    output_path: dest,
                    label_text: String::new(),
                    index,
                    start_secs: 0.0,
                    end_secs: 0.0,
                });
            }
            Ok(out)
        }
    }

    fn settings(root: &Path) -> Settings {
        let bucket = root.join("bucket");
        for key in ["in/1.wav", "in/2.wav", "in/3.wav"] {
            let path = bucket.join(key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, key).unwrap();
        }
        let mut settings = Settings {
            store: StoreSettings::Local { root: bucket },
            batch_size: 2,
            page_size: 10,
            ..Settings::default()
        };
        settings.dirs.inbound = root.join("data");
        settings.dirs.outbound = root.join("processed");
        settings.dirs.metadata = root.join("metadata");
        settings.retry.max_attempts = 1;
        settings
    }

    async fn executor(
        settings: &Settings,
        step: Box<dyn ProcessingStep>,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> PipelineExecutor {
        let metrics = Metrics::new();
        let observer: Arc<dyn StepObserver> = Arc::new(NoopObserver);
        let store = factory::create_store(settings, &metrics).await.unwrap();
        let coordinator =
            factory::create_coordinator(settings, store, observer.clone(), metrics.clone())
                .await
                .unwrap();
        PipelineExecutor::new(coordinator, step, observer, metrics, options, cancel)
    }

    #[tokio::test]
    async fn runs_until_exhausted_and_publishes_metadata() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let exec = executor(
            &settings,
            Box::new(CopyStep),
            RunOptions::default(),
            CancellationToken::new(),
        )
        .await;

        let summary = exec.execute().await.unwrap();
        assert!(summary.exhausted);
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.uploaded, 3);
        assert_eq!(summary.metadata_uploaded, Some(2));

        let published = dir.path().join("bucket/processed/in_1.wav");
        assert!(published.exists());
        assert!(dir.path().join("bucket/metadata/progress.json").exists());
    }

    #[tokio::test]
    async fn max_cycles_stops_early() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let options = RunOptions {
            max_cycles: Some(1),
            publish_metadata: false,
            ..RunOptions::default()
        };
        let exec = executor(&settings, Box::new(CopyStep), options, CancellationToken::new()).await;

        let summary = exec.execute().await.unwrap();
        assert_eq!(summary.cycles, 1);
        assert!(!summary.exhausted);
        assert_eq!(summary.metadata_uploaded, None);
    }

    #[tokio::test]
    #[traced_test]
    async fn cancelled_run_does_no_cycles() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let exec = executor(&settings, Box::new(CopyStep), RunOptions::default(), cancel).await;

        let summary = exec.execute().await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.cycles, 0);
        assert_eq!(summary.metadata_uploaded, None);
        assert!(logs_contain("Shutdown requested"));
    }

    // Scenario: the step fails on every batch.
    // Expected Outcome: the run does not abort; each key is restaged alone until
    // it runs out of attempts, then the run ends with every key skipped.
    #[tokio::test]
    #[traced_test]
    async fn step_failures_skip_keys_instead_of_aborting() {
        let dir = tempdir().unwrap();
        let settings = settings(dir.path());
        let options = RunOptions {
            publish_metadata: false,
            ..RunOptions::default()
        };
        let exec = executor(&settings, Box::new(FailingStep), options, CancellationToken::new()).await;

        let summary = exec.execute().await.unwrap();
        assert!(summary.exhausted);
        // [1, 2], 1, 1, 2, 2, [3], 3, 3 with three attempts per key.
        assert_eq!(summary.cycles, 8);
        assert_eq!(summary.failed_cycles, 8);
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.uploaded, 0);

        let ledger = std::fs::read_to_string(dir.path().join("metadata/progress.json")).unwrap();
        let ledger: serde_json::Value = serde_json::from_str(&ledger).unwrap();
        assert_eq!(
            ledger["skipped_keys"],
            serde_json::json!(["in/1.wav", "in/2.wav", "in/3.wav"])
        );
        assert_eq!(ledger["batch_count"], 0);
        assert!(ledger.get("reprocess_keys").is_none());
        assert!(logs_contain("Out of attempts"));
    }
}
