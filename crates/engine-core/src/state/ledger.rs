use crate::{
    error::StateError,
    state::{PROGRESS_FILE, file},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
};
use tracing::warn;

/// Durable record of what has been fetched and pushed.
///
/// `downloaded_keys` is append-only and holds each key at most once.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProgressLedger {
    #[serde(default)]
    pub downloaded_keys: Vec<String>,
    #[serde(default)]
    pub uploaded_keys: Vec<String>,
    #[serde(default)]
    pub total_expected: u64,
    #[serde(default)]
    pub total_chunks: u64,
    #[serde(default)]
    pub batch_count: u64,
    #[serde(default)]
    pub before_process_count: u64,
    #[serde(default)]
    pub after_process_count: u64,
    /// Keys whose fetch exhausted its retries, retried first next cycle.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_keys: Vec<String>,
    /// Downloaded keys whose processing failed, restaged one per cycle.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reprocess_keys: Vec<String>,
    /// Failed attempts so far for every queued key.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attempts: BTreeMap<String, u32>,
    /// Keys given up on: vanished objects and keys out of attempts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_keys: Vec<String>,

    #[serde(skip)]
    index: HashSet<String>,
}

impl ProgressLedger {
    pub fn is_downloaded(&self, key: &str) -> bool {
        self.index.contains(key)
    }

    /// Appends `key` unless it is already recorded. Returns whether it was new.
    pub fn record_download(&mut self, key: &str) -> bool {
        if !self.index.insert(key.to_string()) {
            return false;
        }
        self.downloaded_keys.push(key.to_string());
        if self.failed_keys.iter().any(|k| k == key) {
            self.failed_keys.retain(|k| k != key);
            self.attempts.remove(key);
        }
        true
    }

    pub fn record_upload(&mut self, remote_key: &str) {
        self.uploaded_keys.push(remote_key.to_string());
        self.total_chunks += 1;
    }

    /// Downloaded, skipped, or waiting in one of the retry queues.
    pub fn is_tracked(&self, key: &str) -> bool {
        self.is_downloaded(key)
            || self.failed_keys.iter().any(|k| k == key)
            || self.skipped_keys.iter().any(|k| k == key)
    }

    /// Charges a failed fetch to `key` and queues it for the next cycle until
    /// `max_attempts` is reached.
    pub fn queue_failed(&mut self, key: &str, max_attempts: u32) -> Attempt {
        if self.is_downloaded(key) {
            return Attempt::Queued(0);
        }
        let attempt = self.charge(key, max_attempts);
        match attempt {
            Attempt::Queued(_) => push_once(&mut self.failed_keys, key),
            Attempt::GaveUp(_) => self.skip(key),
        }
        attempt
    }

    /// Charges a failed processing run to `key` and queues it for restaging
    /// until `max_attempts` is reached.
    pub fn queue_reprocess(&mut self, key: &str, max_attempts: u32) -> Attempt {
        let attempt = self.charge(key, max_attempts);
        match attempt {
            Attempt::Queued(_) => push_once(&mut self.reprocess_keys, key),
            Attempt::GaveUp(_) => self.skip(key),
        }
        attempt
    }

    /// Drops `key` from every retry queue and remembers it as skipped.
    pub fn skip(&mut self, key: &str) {
        self.failed_keys.retain(|k| k != key);
        self.reprocess_keys.retain(|k| k != key);
        self.attempts.remove(key);
        push_once(&mut self.skipped_keys, key);
    }

    /// Clears the retry bookkeeping of a key whose batch was published.
    pub fn settle(&mut self, key: &str) {
        self.reprocess_keys.retain(|k| k != key);
        self.attempts.remove(key);
    }

    pub fn has_queued_work(&self) -> bool {
        !self.failed_keys.is_empty() || !self.reprocess_keys.is_empty()
    }

    fn charge(&mut self, key: &str, max_attempts: u32) -> Attempt {
        let count = self.attempts.entry(key.to_string()).or_insert(0);
        *count += 1;
        if *count >= max_attempts {
            Attempt::GaveUp(*count)
        } else {
            Attempt::Queued(*count)
        }
    }

    /// Closes a cycle: bumps `batch_count` and snapshots the list lengths.
    pub fn increment_batch(&mut self) {
        self.batch_count += 1;
        self.before_process_count = self.downloaded_keys.len() as u64;
        self.after_process_count = self.uploaded_keys.len() as u64;
    }

    pub fn downloaded_count(&self) -> usize {
        self.downloaded_keys.len()
    }

    pub fn uploaded_count(&self) -> usize {
        self.uploaded_keys.len()
    }

    /// Rebuilds the membership index, dropping duplicates a hand edit may have
    /// introduced.
    fn reindex(&mut self) {
        self.index.clear();
        let before = self.downloaded_keys.len();
        let index = &mut self.index;
        self.downloaded_keys.retain(|k| index.insert(k.clone()));
        let dropped = before - self.downloaded_keys.len();
        if dropped > 0 {
            warn!(dropped, "Ignoring duplicate keys in progress ledger");
        }
        let index = &self.index;
        self.failed_keys.retain(|k| !index.contains(k));
        self.reprocess_keys.retain(|k| index.contains(k));

        let skipped = &self.skipped_keys;
        self.failed_keys.retain(|k| !skipped.contains(k));
        self.reprocess_keys.retain(|k| !skipped.contains(k));
    }
}

/// Outcome of charging a failure to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Queued again, with the attempts used so far.
    Queued(u32),
    /// Out of attempts; the key moved to `skipped_keys`.
    GaveUp(u32),
}

fn push_once(list: &mut Vec<String>, key: &str) {
    if !list.iter().any(|k| k == key) {
        list.push(key.to_string());
    }
}

/// Reads and writes `progress.json` in the metadata directory.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(metadata_dir: &Path) -> Self {
        Self {
            path: metadata_dir.join(PROGRESS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<ProgressLedger, StateError> {
        let mut ledger: ProgressLedger = file::read_json(&self.path).await?.unwrap_or_default();
        ledger.reindex();
        Ok(ledger)
    }

    pub async fn save(&self, ledger: &ProgressLedger) -> Result<(), StateError> {
        file::write_json_atomic(&self.path, ledger).await
    }
}
