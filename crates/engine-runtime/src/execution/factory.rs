use crate::error::RunError;
use connectors::{local::LocalObjectStore, store::ObjectStore};
use engine_config::settings::{Settings, StoreSettings};
use engine_core::{
    connectors::{lister::RemoteLister, retrying::RetryingStore},
    filter::AdmissionFilter,
    metrics::Metrics,
    observer::StepObserver,
    retry::RetryPolicy,
    staging::StagingArea,
};
use engine_processing::{
    asr::{CommandAsrEngine, TranscriptionService},
    coordinator::{BatchCoordinator, CoordinatorConfig},
    manifest::ManifestWriter,
    normalize::NumberWordsNormalizer,
    step::{ProcessingStep, command::CommandStep, splitter::AlignmentSplitter},
};
use std::sync::Arc;
use tracing::info;

pub fn retry_policy(settings: &Settings) -> RetryPolicy {
    RetryPolicy::new(
        settings.retry.max_attempts,
        settings.retry.base_delay(),
        settings.retry.max_delay(),
    )
}

/// Opens the configured backend behind the retrying decorator.
pub async fn create_store(
    settings: &Settings,
    metrics: &Metrics,
) -> Result<Arc<dyn ObjectStore>, RunError> {
    let policy = retry_policy(settings);
    let timeout = settings.retry.call_timeout();

    let store: Arc<dyn ObjectStore> = match &settings.store {
        StoreSettings::Local { root } => Arc::new(
            RetryingStore::new(LocalObjectStore::new(root), policy)
                .with_timeout(timeout)
                .with_metrics(metrics.clone()),
        ),
        #[cfg(feature = "s3")]
        StoreSettings::S3 { bucket, region } => {
            let s3 = connectors::s3::S3ObjectStore::connect(bucket, region.as_deref()).await?;
            Arc::new(
                RetryingStore::new(s3, policy)
                    .with_timeout(timeout)
                    .with_metrics(metrics.clone()),
            )
        }
        #[cfg(not(feature = "s3"))]
        StoreSettings::S3 { bucket, .. } => {
            return Err(RunError::Initialization(format!(
                "bucket `{bucket}` needs the `s3` feature, rebuild with --features s3"
            )));
        }
    };

    info!(store = %settings.store.describe(), "Object store opened");
    Ok(store)
}

pub fn create_filter(settings: &Settings) -> AdmissionFilter {
    AdmissionFilter::new(settings.extensions.clone(), settings.reserved_prefixes())
}

pub fn create_lister(settings: &Settings, store: Arc<dyn ObjectStore>) -> RemoteLister {
    RemoteLister::new(store, settings.source_prefix.clone(), settings.page_size)
}

pub async fn create_coordinator(
    settings: &Settings,
    store: Arc<dyn ObjectStore>,
    observer: Arc<dyn StepObserver>,
    metrics: Metrics,
) -> Result<BatchCoordinator, RunError> {
    let lister = create_lister(settings, store.clone());
    let staging = StagingArea::new(&settings.dirs.inbound, &settings.dirs.outbound);

    let coordinator = BatchCoordinator::open(
        store,
        lister,
        create_filter(settings),
        staging,
        CoordinatorConfig::from_settings(settings),
        observer,
        metrics,
    )
    .await?;
    Ok(coordinator)
}

/// The external step command wins over the in-process splitter.
pub fn create_step(settings: &Settings) -> Result<Box<dyn ProcessingStep>, RunError> {
    let p = &settings.processing;

    if let Some(argv) = &p.command {
        let step = CommandStep::from_argv(argv, &settings.dirs.metadata, &p.language)
            .ok_or_else(|| RunError::Initialization("processing.command is empty".into()))?;
        info!(program = step.name(), "Using external step command");
        return Ok(Box::new(step));
    }

    if let Some(argv) = &p.asr_command {
        let engine = CommandAsrEngine::from_argv(argv)
            .ok_or_else(|| RunError::Initialization("processing.asr_command is empty".into()))?;
        let splitter = AlignmentSplitter::new(
            Arc::new(TranscriptionService::new(engine)),
            Box::new(NumberWordsNormalizer),
            ManifestWriter::new(&settings.dirs.metadata, p.metadata_csv.clone()),
            p.language.clone(),
        )
        .with_min_chunk_secs(p.min_chunk_secs);
        info!(language = %p.language, "Using in-process alignment splitter");
        return Ok(Box::new(splitter));
    }

    Err(RunError::Initialization(
        "no processing step configured, set processing.command or processing.asr_command"
            .into(),
    ))
}
