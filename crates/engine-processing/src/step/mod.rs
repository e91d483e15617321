use crate::error::ProcessingError;
use async_trait::async_trait;
use engine_core::observer::StepObserver;
use model::{
    core::naming::clean_name,
    records::{batch::StagedBatch, chunk::ChunkRecord},
};
use std::path::Path;

pub mod command;
pub mod splitter;

/// Turns the staged inbound objects of a cycle into artefacts in the outbound
/// dir. The returned records are only used for counting and logging.
#[async_trait]
pub trait ProcessingStep: Send + Sync {
    fn name(&self) -> &str;

    async fn process(
        &self,
        batch: &StagedBatch,
        observer: &dyn StepObserver,
    ) -> Result<Vec<ChunkRecord>, ProcessingError>;
}

/// Finds the staged object an output file was cut from, using the
/// `<clean_name>_chunk-<NNNN>` naming convention. The longest matching stem
/// wins so `a_wav` never claims output of `a_wav_2_wav`.
pub fn attribute_source<'a>(batch: &'a StagedBatch, output: &Path) -> Option<&'a str> {
    let stem = output.file_stem()?.to_string_lossy().to_lowercase();
    batch
        .objects
        .iter()
        .filter_map(|obj| {
            let local = obj.local_path.file_name()?.to_string_lossy().into_owned();
            let clean = clean_name(&local);
            stem.starts_with(&clean).then_some((clean.len(), obj.key.as_str()))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, key)| key)
}

/// Chunk index encoded in `..._chunk-0007.wav`, if any.
pub fn chunk_index(output: &Path) -> Option<usize> {
    let stem = output.file_stem()?.to_string_lossy().into_owned();
    let (_, index) = stem.rsplit_once("_chunk-")?;
    index.parse().ok()
}
