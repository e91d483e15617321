//! Transcription and alignment seam.
//!
//! The speech engines themselves live outside this crate. `AsrEngine` is the
//! boundary they plug into and `TranscriptionService` owns one engine plus the
//! aligners it has loaded, keyed by language code.

use crate::error::AsrError;
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{process::Command, sync::Mutex};
use tracing::{debug, info, warn};

/// A timed span of recognised speech.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Transcript {
    /// Language the engine detected, when it reports one.
    #[serde(default)]
    pub language: Option<String>,
    pub segments: Vec<Segment>,
}

/// Refines segment timing against the audio.
#[async_trait]
pub trait Aligner: Send + Sync + 'static {
    async fn align(&self, audio: &Path, transcript: &Transcript) -> Result<Vec<Segment>, AsrError>;
}

#[async_trait]
pub trait AsrEngine: Send + Sync + 'static {
    type Aligner: Aligner;

    async fn transcribe(&self, audio: &Path, language: &str) -> Result<Transcript, AsrError>;

    /// Loads the aligner for `language`. Called at most once per language by
    /// `TranscriptionService`.
    async fn load_aligner(&self, language: &str) -> Result<Self::Aligner, AsrError>;
}

/// Caller-owned engine plus a per-language aligner cache.
///
/// A language whose aligner failed to load is cached as unavailable, so the
/// load is not retried for every file.
pub struct TranscriptionService<E: AsrEngine> {
    engine: E,
    aligners: Mutex<HashMap<String, Option<Arc<E::Aligner>>>>,
}

impl<E: AsrEngine> TranscriptionService<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            aligners: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub async fn aligner(&self, language: &str) -> Option<Arc<E::Aligner>> {
        let mut cache = self.aligners.lock().await;
        if let Some(entry) = cache.get(language) {
            return entry.clone();
        }

        let loaded = match self.engine.load_aligner(language).await {
            Ok(aligner) => {
                info!(language, "Alignment model loaded");
                Some(Arc::new(aligner))
            }
            Err(e) => {
                warn!(language, error = %e, "Alignment model unavailable, using segment timing");
                None
            }
        };
        cache.insert(language.to_string(), loaded.clone());
        loaded
    }

    pub async fn cached_languages(&self) -> Vec<String> {
        let mut langs: Vec<String> = self.aligners.lock().await.keys().cloned().collect();
        langs.sort();
        langs
    }

    /// Transcribes `audio` and aligns it when an aligner for the detected (or
    /// requested) language is available. Alignment failures fall back to the
    /// engine's own segment timing.
    pub async fn transcribe_aligned(
        &self,
        audio: &Path,
        language: &str,
    ) -> Result<(String, Vec<Segment>), AsrError> {
        let transcript = self.engine.transcribe(audio, language).await?;
        let detected = transcript
            .language
            .clone()
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| language.to_string());

        if transcript.segments.is_empty() {
            debug!(audio = %audio.display(), "No segments found");
            return Ok((detected, Vec::new()));
        }

        let segments = match self.aligner(&detected).await {
            Some(aligner) => match aligner.align(audio, &transcript).await {
                Ok(aligned) => aligned,
                Err(e) => {
                    warn!(audio = %audio.display(), error = %e, "Alignment failed, using segment timing");
                    transcript.segments
                }
            },
            None => transcript.segments,
        };

        Ok((detected, segments))
    }
}

/// Aligner of engines that have none. Loading it always fails.
#[derive(Debug)]
pub struct NoAligner;

#[async_trait]
impl Aligner for NoAligner {
    async fn align(&self, _audio: &Path, _t: &Transcript) -> Result<Vec<Segment>, AsrError> {
        Err(AsrError::Alignment("no aligner".to_string()))
    }
}

/// Runs an external transcriber per file and reads a JSON transcript
/// (`{"language": "pt", "segments": [{"start", "end", "text"}]}`) from its
/// stdout. `{audio}` and `{language}` in the arguments are substituted.
#[derive(Debug, Clone)]
pub struct CommandAsrEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandAsrEngine {
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: PathBuf::from(program),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl AsrEngine for CommandAsrEngine {
    type Aligner = NoAligner;

    async fn transcribe(&self, audio: &Path, language: &str) -> Result<Transcript, AsrError> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace("{audio}", &audio.to_string_lossy())
                    .replace("{language}", language)
            })
            .collect();

        let output = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(AsrError::Transcription {
                path: audio.to_path_buf(),
                message: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn load_aligner(&self, language: &str) -> Result<NoAligner, AsrError> {
        Err(AsrError::AlignerUnavailable(language.to_string()))
    }
}
