use crate::{
    error::StateError,
    state::{BATCH_STATE_FILE, file},
};
use chrono::{DateTime, Utc};
use model::pagination::cursor::Cursor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Cursor advance staged by `next_batch` and not yet committed by `upload`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PendingCursor {
    pub token: Option<String>,
    pub completed: bool,
    pub batch_id: String,
    pub staged_at: DateTime<Utc>,
}

/// Durable listing position plus the one-way exhaustion flag.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchState {
    pub token: Option<String>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingCursor>,
}

/// Which of the two cursor stages a state is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStage {
    Read,
    Committed,
}

impl CursorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorStage::Read => "read",
            CursorStage::Committed => "committed",
        }
    }
}

impl BatchState {
    /// The committed position listing resumes from.
    pub fn cursor(&self) -> Cursor {
        Cursor::from_token(self.token.clone())
    }

    pub fn stage(&self) -> CursorStage {
        if self.pending.is_some() {
            CursorStage::Read
        } else {
            CursorStage::Committed
        }
    }

    pub fn stage_pending(&mut self, pending: PendingCursor) {
        self.pending = Some(pending);
    }

    /// Drops an advance that never reached `upload`.
    pub fn discard_pending(&mut self) -> Option<PendingCursor> {
        self.pending.take()
    }

    /// Promotes the staged advance. Exhaustion is never reverted.
    pub fn commit_pending(&mut self) -> Option<PendingCursor> {
        let pending = self.pending.take()?;
        self.token = pending.token.clone();
        self.completed = self.completed || pending.completed;
        Some(pending)
    }
}

/// Reads and writes `batcher_state.json` in the metadata directory.
#[derive(Debug, Clone)]
pub struct BatchStateStore {
    path: PathBuf,
}

impl BatchStateStore {
    pub fn new(metadata_dir: &Path) -> Self {
        Self {
            path: metadata_dir.join(BATCH_STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<BatchState, StateError> {
        Ok(file::read_json(&self.path).await?.unwrap_or_default())
    }

    pub async fn save(&self, state: &BatchState) -> Result<(), StateError> {
        file::write_json_atomic(&self.path, state).await
    }

    /// Explicit reset. The next run starts from the beginning of the listing.
    pub async fn delete(&self) -> Result<bool, StateError> {
        file::remove(&self.path).await
    }
}
