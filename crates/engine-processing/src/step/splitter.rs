use crate::{
    asr::{AsrEngine, Segment, TranscriptionService},
    audio::WavClip,
    error::{AudioError, ProcessingError},
    manifest::{ManifestEntry, ManifestWriter},
    normalize::TextNormalizer,
    step::ProcessingStep,
};
use async_trait::async_trait;
use engine_core::observer::StepObserver;
use model::{
    core::naming::chunk_id,
    events::fields,
    records::{
        batch::{StagedBatch, StagedObject},
        chunk::ChunkRecord,
    },
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};

/// Transcribes each staged file, aligns and normalises the segments and cuts
/// one WAV chunk per segment into the outbound dir.
pub struct AlignmentSplitter<E: AsrEngine> {
    service: Arc<TranscriptionService<E>>,
    normalizer: Box<dyn TextNormalizer>,
    manifest: ManifestWriter,
    language: String,
    min_chunk_secs: f64,
}

struct Cut {
    records: Vec<ChunkRecord>,
    entries: Vec<ManifestEntry>,
}

impl<E: AsrEngine> AlignmentSplitter<E> {
    pub fn new(
        service: Arc<TranscriptionService<E>>,
        normalizer: Box<dyn TextNormalizer>,
        manifest: ManifestWriter,
        language: impl Into<String>,
    ) -> Self {
        Self {
            service,
            normalizer,
            manifest,
            language: language.into(),
            min_chunk_secs: 0.1,
        }
    }

    pub fn with_min_chunk_secs(mut self, secs: f64) -> Self {
        self.min_chunk_secs = secs.max(0.0);
        self
    }

    async fn split_one(
        &self,
        object: &StagedObject,
        outbound: PathBuf,
    ) -> Result<Cut, ProcessingError> {
        let (language, segments) = self
            .service
            .transcribe_aligned(&object.local_path, &self.language)
            .await?;

        let segments: Vec<Segment> = segments
            .into_iter()
            .map(|s| Segment {
                text: self.normalizer.normalize(&s.text, &language),
                ..s
            })
            .collect();

        let source = object.local_path.clone();
        let key = object.key.clone();
        let min_secs = self.min_chunk_secs;

        let cut = tokio::task::spawn_blocking(move || -> Result<Cut, AudioError> {
            let clip = WavClip::open(&source)?;
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let mut cut = Cut {
                records: Vec::new(),
                entries: Vec::new(),
            };
            for seg in segments {
                if seg.text.is_empty() || seg.end - seg.start < min_secs {
                    debug!(key = %key, start = seg.start, end = seg.end, "Chunk skipped");
                    continue;
                }

                let index = cut.records.len();
                let id = chunk_id(&name, index);
                let file_name = format!("{id}.wav");
                let dest = outbound.join(&file_name);
                let Some(duration) = clip.write_span(seg.start, seg.end, &dest)? else {
                    continue;
                };
                if duration < min_secs {
                    discard_chunk(&dest)?;
                    continue;
                }

                cut.entries.push(ManifestEntry {
                    id,
                    file_name,
                    text: seg.text.clone(),
                    language: language.clone(),
                    source_key: key.clone(),
                    start: seg.start,
                    end: seg.start + duration,
                    duration,
                });
                cut.records.push(ChunkRecord {
                    source_key: Some(key.clone()),
                    output_path: dest,
                    label_text: seg.text,
                    index,
                    start_secs: seg.start,
                    end_secs: seg.start + duration,
                });
            }
            Ok(cut)
        })
        .await??;

        Ok(cut)
    }
}

#[async_trait]
impl<E: AsrEngine> ProcessingStep for AlignmentSplitter<E> {
    fn name(&self) -> &str {
        "alignment-splitter"
    }

    async fn process(
        &self,
        batch: &StagedBatch,
        observer: &dyn StepObserver,
    ) -> Result<Vec<ChunkRecord>, ProcessingError> {
        let mut records = Vec::new();
        let mut skipped = 0usize;

        for object in &batch.objects {
            match self.split_one(object, batch.outbound.clone()).await {
                Ok(cut) => {
                    observer.on_step_update(&fields([
                        ("key", serde_json::json!(object.key)),
                        ("chunks", serde_json::json!(cut.records.len())),
                    ]));

                    let writer = self.manifest.clone();
                    let entries = cut.entries;
                    tokio::task::spawn_blocking(move || writer.append(&entries)).await??;
                    records.extend(cut.records);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(key = %object.key, error = %e, "File skipped by splitter");
                }
            }
        }

        info!(
            batch_id = %batch.id,
            files = batch.len(),
            skipped,
            chunks = records.len(),
            "Splitting finished"
        );
        Ok(records)
    }
}

/// Removes a chunk written too short to keep. It must not reach the outbound
/// push without a manifest line.
fn discard_chunk(path: &Path) -> Result<(), AudioError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(AudioError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
