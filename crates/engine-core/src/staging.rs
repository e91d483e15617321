use crate::error::StagingError;
use model::core::naming::staged_file_name;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;

/// The inbound and outbound scratch directories of one cycle.
///
/// Contents are only trusted within the cycle that populated them: `reset`
/// wipes both directories before every fetch.
#[derive(Debug, Clone)]
pub struct StagingArea {
    inbound: PathBuf,
    outbound: PathBuf,
}

impl StagingArea {
    pub fn new(inbound: impl Into<PathBuf>, outbound: impl Into<PathBuf>) -> Self {
        Self {
            inbound: inbound.into(),
            outbound: outbound.into(),
        }
    }

    pub fn inbound(&self) -> &Path {
        &self.inbound
    }

    pub fn outbound(&self) -> &Path {
        &self.outbound
    }

    /// Deletes and recreates both directories.
    pub async fn reset(&self) -> Result<(), StagingError> {
        for dir in [&self.inbound, &self.outbound] {
            match fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StagingError::io(dir, e)),
            }
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StagingError::io(dir, e))?;
        }
        debug!(inbound = %self.inbound.display(), outbound = %self.outbound.display(), "Staging reset");
        Ok(())
    }

    /// Picks an inbound path for `key` that no other key of this cycle uses.
    pub fn allocate(&self, key: &str, taken: &mut HashSet<String>) -> PathBuf {
        let base = staged_file_name(key);
        let mut name = base.clone();
        let mut n = 1;
        while !taken.insert(name.clone()) {
            name = match base.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{n}.{ext}"),
                _ => format!("{base}-{n}"),
            };
            n += 1;
        }
        self.inbound.join(name)
    }

    /// Regular files in the outbound directory, sorted by name.
    pub async fn outbound_files(&self) -> Result<Vec<PathBuf>, StagingError> {
        regular_files(&self.outbound).await
    }
}

/// Regular files directly inside `dir`, sorted by name. A missing directory
/// yields an empty list.
pub async fn regular_files(dir: &Path) -> Result<Vec<PathBuf>, StagingError> {
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StagingError::io(dir, e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| StagingError::io(dir, e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| StagingError::io(entry.path(), e))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
