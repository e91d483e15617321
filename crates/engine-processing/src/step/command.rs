use crate::{
    error::ProcessingError,
    step::{ProcessingStep, attribute_source, chunk_index},
};
use async_trait::async_trait;
use engine_core::{observer::StepObserver, staging::regular_files};
use model::{
    events::fields,
    records::{batch::StagedBatch, chunk::ChunkRecord},
};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

const STDERR_TAIL_LINES: usize = 20;

/// Runs an external program over the whole inbound dir, e.g. a transcription
/// script that writes chunks into the outbound dir.
///
/// `{inbound}`, `{outbound}`, `{metadata}` and `{language}` in the arguments
/// are replaced before the program starts.
#[derive(Debug, Clone)]
pub struct CommandStep {
    program: String,
    args: Vec<String>,
    metadata_dir: PathBuf,
    language: String,
}

impl CommandStep {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        metadata_dir: impl Into<PathBuf>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            metadata_dir: metadata_dir.into(),
            language: language.into(),
        }
    }

    /// Builds a step from `[program, args...]`. `None` when `argv` is empty.
    pub fn from_argv(argv: &[String], metadata_dir: &Path, language: &str) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(
            program.clone(),
            args.to_vec(),
            metadata_dir,
            language,
        ))
    }

    fn expand(&self, arg: &str, batch: &StagedBatch) -> String {
        arg.replace("{inbound}", &batch.inbound.to_string_lossy())
            .replace("{outbound}", &batch.outbound.to_string_lossy())
            .replace("{metadata}", &self.metadata_dir.to_string_lossy())
            .replace("{language}", &self.language)
    }
}

#[async_trait]
impl ProcessingStep for CommandStep {
    fn name(&self) -> &str {
        &self.program
    }

    async fn process(
        &self,
        batch: &StagedBatch,
        observer: &dyn StepObserver,
    ) -> Result<Vec<ChunkRecord>, ProcessingError> {
        if batch.is_empty() {
            debug!(batch_id = %batch.id, "Nothing staged, command not started");
            return Ok(Vec::new());
        }

        let args: Vec<String> = self.args.iter().map(|a| self.expand(a, batch)).collect();
        observer.on_step_update(&fields([
            ("program", serde_json::json!(self.program)),
            ("objects", serde_json::json!(batch.len())),
        ]));

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ProcessingError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!(program = %self.program, "{line}");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(ProcessingError::CommandFailed {
                program: self.program.clone(),
                status: output.status,
                stderr: tail,
            });
        }

        let files = regular_files(&batch.outbound).await?;
        let records: Vec<ChunkRecord> = files
            .into_iter()
            .enumerate()
            .map(|(pos, path)| ChunkRecord {
                source_key: attribute_source(batch, &path).map(str::to_string),
                index: chunk_index(&path).unwrap_or(pos),
                output_path: path,
                label_text: String::new(),
                start_secs: 0.0,
                end_secs: 0.0,
            })
            .collect();

        let unattributed = records.iter().filter(|r| r.source_key.is_none()).count();
        info!(
            program = %self.program,
            batch_id = %batch.id,
            outputs = records.len(),
            unattributed,
            "Step command finished"
        );

        Ok(records)
    }
}
