use crate::{
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use commands::{Commands, ConfigArgs};
use engine_config::settings::{Settings, validator::SettingsValidator};
use engine_core::{
    metrics::Metrics,
    observer::{StepObserver, TracingObserver},
    state::{batch_state::BatchStateStore, ledger::LedgerStore, report::ProgressReport},
};
use engine_runtime::execution::{
    executor::{self, RunOptions},
    factory,
};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod env;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "voxbatch",
    version = "0.1.0",
    about = "Resumable batch processing of audio objects in a bucket"
)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[arg(long, global = true, help = "Load environment overrides from this file")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let exit = match dispatch(cli, &shutdown).await {
        Ok(()) => ExitCode::Success,
        Err(CliError::ShutdownRequested) => {
            info!("Run interrupted, progress is saved");
            ExitCode::ShutdownRequested
        }
        Err(e) => {
            error!(error = %e, "voxbatch failed");
            ExitCode::GeneralError
        }
    };

    std::process::exit(exit.as_i32());
}

async fn dispatch(cli: Cli, shutdown: &ShutdownCoordinator) -> Result<(), CliError> {
    let mut env = EnvManager::new();
    if let Some(path) = &cli.env_file {
        env.load_from_file(path)?;
    }
    for (key, value) in env.overrides() {
        debug!(%key, %value, "Environment override");
    }

    match cli.command {
        Commands::Run {
            config,
            max_cycles,
            step_cmd,
            skip_metadata,
            count,
            json,
        } => {
            let mut settings = load_settings(&config, &env)?;
            if !step_cmd.is_empty() {
                settings.processing.command = Some(step_cmd);
            }
            settings.count_on_start |= count;

            let options = RunOptions {
                max_cycles,
                publish_metadata: !skip_metadata,
                ..RunOptions::from_settings(&settings)
            };

            let summary = executor::run(&settings, options, shutdown.cancel_token()).await?;
            output::print_report(&summary, json)?;

            if summary.interrupted || shutdown.is_shutdown_requested() {
                return Err(CliError::ShutdownRequested);
            }
        }
        Commands::Progress { config, json } => {
            let settings = load_settings(&config, &env)?;
            let ledger = LedgerStore::new(&settings.dirs.metadata).load().await?;
            let state = BatchStateStore::new(&settings.dirs.metadata).load().await?;

            let report = ProgressReport::new(&ledger, state.completed);
            output::print_report(&report, json)?;
        }
        Commands::Count { config } => {
            let settings = load_settings(&config, &env)?;
            let mut coordinator = open_coordinator(&settings).await?;

            let total = coordinator.refresh_total_expected().await?;
            println!("{total} admissible objects under `{}`", settings.source_prefix);
        }
        Commands::Reset { config } => {
            let settings = load_settings(&config, &env)?;
            let store = BatchStateStore::new(&settings.dirs.metadata);

            if store.delete().await? {
                info!(path = %store.path().display(), "Listing cursor removed");
            } else {
                info!("No listing cursor to remove");
            }
        }
        Commands::PublishMetadata { config } => {
            let settings = load_settings(&config, &env)?;
            let coordinator = open_coordinator(&settings).await?;

            let report = coordinator.publish_metadata().await?;
            info!(
                uploaded = report.uploaded,
                failed = report.failed,
                "Metadata published"
            );
        }
    }

    Ok(())
}

fn load_settings(args: &ConfigArgs, env: &EnvManager) -> Result<Settings, CliError> {
    let path = args.config.clone().or_else(default_config_path);
    if let Some(path) = &path {
        if !path.exists() {
            return Err(CliError::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
    }

    let settings = Settings::load(path.as_deref(), |key| env.get(key))?;
    Ok(settings)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("voxbatch").join("config.json"))
        .filter(|path| path.is_file())
}

/// Validates `settings` before anything touches the store or the state files.
async fn open_coordinator(
    settings: &Settings,
) -> Result<engine_processing::coordinator::BatchCoordinator, CliError> {
    SettingsValidator::new(settings).validate()?;
    let metrics = Metrics::new();
    let observer: Arc<dyn StepObserver> = Arc::new(TracingObserver::new());
    let store = factory::create_store(settings, &metrics).await?;
    let coordinator = factory::create_coordinator(settings, store, observer, metrics).await?;
    Ok(coordinator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::settings::StoreSettings;
    use tempfile::tempdir;

    // Scenario: `count` or `publish-metadata` is run with a zero batch size.
    // Expected Outcome: the settings are rejected before any state file is written.
    #[tokio::test]
    async fn invalid_settings_never_open_a_coordinator() {
        let dir = tempdir().unwrap();
        let mut settings = Settings {
            store: StoreSettings::Local {
                root: dir.path().join("bucket"),
            },
            batch_size: 0,
            ..Settings::default()
        };
        settings.dirs.metadata = dir.path().join("metadata");

        let result = open_coordinator(&settings).await;
        assert!(matches!(result, Err(CliError::Settings(_))));
        assert!(!settings.dirs.metadata.exists());
    }
}
