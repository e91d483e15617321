use std::path::PathBuf;

/// A remote object fetched into the inbound staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    pub key: String,
    pub local_path: PathBuf,
    pub size: u64,
}

/// Everything a processing step needs to work on one cycle.
#[derive(Debug, Clone)]
pub struct StagedBatch {
    pub id: String,
    pub number: u64,
    pub inbound: PathBuf,
    pub outbound: PathBuf,
    pub objects: Vec<StagedObject>,
    pub ts: chrono::DateTime<chrono::Utc>,
}

impl StagedBatch {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn size_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.size).sum()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.objects.iter().map(|o| o.key.as_str())
    }
}
