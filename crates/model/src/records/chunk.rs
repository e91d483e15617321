use serde::Serialize;
use std::path::PathBuf;

/// A labelled audio chunk produced by a processing step.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Remote key of the source object, when the step can attribute it.
    pub source_key: Option<String>,
    pub output_path: PathBuf,
    pub label_text: String,
    pub index: usize,
    pub start_secs: f64,
    pub end_secs: f64,
}

impl ChunkRecord {
    pub fn duration_secs(&self) -> f64 {
        (self.end_secs - self.start_secs).max(0.0)
    }
}
