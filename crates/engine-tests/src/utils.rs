use async_trait::async_trait;
use connectors::{error::StoreError, store::ObjectStore};
use engine_config::settings::Settings;
use engine_core::{
    connectors::{lister::RemoteLister, retrying::RetryingStore},
    filter::AdmissionFilter,
    metrics::Metrics,
    observer::StepObserver,
    retry::RetryPolicy,
    staging::StagingArea,
    state::{
        BATCH_STATE_FILE, PROGRESS_FILE, batch_state::BatchState, ledger::ProgressLedger,
    },
};
use engine_processing::coordinator::{BatchCoordinator, CoordinatorConfig};
use model::{
    core::naming::chunk_id,
    events::{StepFields, StepStatus},
    pagination::{
        cursor::Cursor,
        page::{ListPage, ObjectEntry},
    },
    records::batch::StagedBatch,
};
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

const TOKEN_PREFIX: &str = "after:";

/// In-memory bucket with start-after pagination and failure injection.
#[derive(Default)]
pub struct MockStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    get_failures: Mutex<HashMap<String, usize>>,
    put_failures: Mutex<HashSet<String>>,
    list_failures: AtomicUsize,
    get_calls: Mutex<HashMap<String, usize>>,
    list_calls: AtomicUsize,
    vanished: Mutex<HashSet<String>>,
    page_limits: Mutex<VecDeque<usize>>,
    overlap: AtomicUsize,
}

impl MockStore {
    pub fn with_keys(keys: &[&str]) -> Self {
        let store = Self::default();
        for key in keys {
            store.insert(key, key.as_bytes());
        }
        store
    }

    pub fn insert(&self, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), body.to_vec());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys_under(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// The next `times` gets of `key` fail with a transient error.
    pub fn fail_get(&self, key: &str, times: usize) {
        self.get_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), times);
    }

    /// Every put of `key` fails with a transient error.
    pub fn fail_put(&self, key: &str) {
        self.put_failures.lock().unwrap().insert(key.to_string());
    }

    /// `key` stays listed but every get answers NotFound.
    pub fn vanish(&self, key: &str) {
        self.vanished.lock().unwrap().insert(key.to_string());
    }

    /// The next pages hold at most these many entries, shorter than asked.
    pub fn limit_next_pages(&self, limits: &[usize]) {
        self.page_limits.lock().unwrap().extend(limits);
    }

    /// Every page after the first restarts `n` keys before its token, the
    /// way an eventually consistent listing can repeat entries.
    pub fn overlap_pages(&self, n: usize) {
        self.overlap.store(n, Ordering::SeqCst);
    }

    pub fn fail_list(&self, times: usize) {
        self.list_failures.store(times, Ordering::SeqCst);
    }

    pub fn get_calls(&self, key: &str) -> usize {
        self.get_calls
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn take_failure(map: &Mutex<HashMap<String, usize>>, key: &str) -> bool {
        let mut map = map.lock().unwrap();
        match map.get_mut(key) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_page(
        &self,
        prefix: &str,
        cursor: &Cursor,
        max_keys: usize,
    ) -> Result<ListPage, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .list_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Transient("injected list failure".into()));
        }

        let after = match cursor {
            Cursor::Start => None,
            Cursor::Token(t) => Some(
                t.strip_prefix(TOKEN_PREFIX)
                    .ok_or_else(|| StoreError::Other(format!("foreign token {t}")))?
                    .to_string(),
            ),
        };

        let limit = self
            .page_limits
            .lock()
            .unwrap()
            .pop_front()
            .map_or(max_keys, |l| l.min(max_keys))
            .max(1);

        let objects = self.objects.lock().unwrap();
        let matching: Vec<(&String, &Vec<u8>)> = objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();
        let first_new = matching
            .iter()
            .position(|(k, _)| after.as_ref().is_none_or(|a| k.as_str() > a.as_str()))
            .unwrap_or(matching.len());
        let start = if after.is_some() {
            first_new.saturating_sub(self.overlap.load(Ordering::SeqCst))
        } else {
            first_new
        };
        let end = (start + limit).min(matching.len());

        let entries: Vec<ObjectEntry> = matching[start..end]
            .iter()
            .map(|(k, v)| ObjectEntry::new((*k).clone(), v.len() as u64))
            .collect();
        let more = end < matching.len();

        let next_token = match entries.last() {
            Some(last) if more => Some(format!("{TOKEN_PREFIX}{}", last.key)),
            _ => None,
        };
        Ok(ListPage {
            entries,
            next_token,
        })
    }

    async fn get_object(&self, key: &str, dest: &Path) -> Result<u64, StoreError> {
        *self
            .get_calls
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default() += 1;

        if Self::take_failure(&self.get_failures, key) {
            return Err(StoreError::Transient(format!("injected get failure for {key}")));
        }
        if self.vanished.lock().unwrap().contains(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }

        let body = self
            .object(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        tokio::fs::write(dest, &body)
            .await
            .map_err(|e| StoreError::local(dest, e))?;
        Ok(body.len() as u64)
    }

    async fn put_object(&self, src: &Path, key: &str) -> Result<(), StoreError> {
        if self.put_failures.lock().unwrap().contains(key) {
            return Err(StoreError::Transient(format!("injected put failure for {key}")));
        }
        let body = tokio::fs::read(src)
            .await
            .map_err(|e| StoreError::local(src, e))?;
        self.insert(key, &body);
        Ok(())
    }
}

/// Keeps every step event as a line such as `start:fetch` or `end:push:succeeded`.
#[derive(Default)]
pub struct RecordingObserver {
    current: Mutex<String>,
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| e.as_str() == event).count()
    }
}

impl StepObserver for RecordingObserver {
    fn on_step_start(&self, name: &str) {
        *self.current.lock().unwrap() = name.to_string();
        self.events.lock().unwrap().push(format!("start:{name}"));
    }

    fn on_step_update(&self, fields: &StepFields) {
        let name = self.current.lock().unwrap().clone();
        let keys: Vec<&str> = fields.keys().map(String::as_str).collect();
        self.events
            .lock()
            .unwrap()
            .push(format!("update:{name}:{}", keys.join(",")));
    }

    fn on_step_end(&self, status: &StepStatus) {
        let name = self.current.lock().unwrap().clone();
        let status = match status {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Skipped(_) => "skipped",
            StepStatus::Failed(_) => "failed",
        };
        self.events
            .lock()
            .unwrap()
            .push(format!("end:{name}:{status}"));
    }
}

/// A bucket, three staging dirs and settings pointing at them.
pub struct TestEnv {
    pub dir: TempDir,
    pub store: Arc<MockStore>,
    pub settings: Settings,
    pub observer: Arc<RecordingObserver>,
    pub metrics: Metrics,
}

impl TestEnv {
    /// `batch_size` 2, reserved prefixes `out/` and `metadata/`.
    pub fn new(keys: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings {
            output_prefix: "out".into(),
            metadata_prefix: "metadata".into(),
            batch_size: 2,
            ..Settings::default()
        };
        settings.dirs.inbound = dir.path().join("data");
        settings.dirs.outbound = dir.path().join("processed");
        settings.dirs.metadata = dir.path().join("metadata");
        settings.retry.max_attempts = 2;
        settings.retry.base_delay_ms = 1;
        settings.retry.max_delay_ms = 1;

        Self {
            dir,
            store: Arc::new(MockStore::with_keys(keys)),
            settings,
            observer: Arc::new(RecordingObserver::default()),
            metrics: Metrics::new(),
        }
    }

    pub fn with(mut self, f: impl FnOnce(&mut Settings)) -> Self {
        f(&mut self.settings);
        self
    }

    /// The mock store behind the same retry decorator the runtime uses.
    pub fn object_store(&self) -> Arc<dyn ObjectStore> {
        let policy = RetryPolicy::new(
            self.settings.retry.max_attempts,
            Duration::from_millis(self.settings.retry.base_delay_ms),
            Duration::from_millis(self.settings.retry.max_delay_ms),
        );
        Arc::new(RetryingStore::new(self.store.clone(), policy).with_metrics(self.metrics.clone()))
    }

    /// Opens a fresh coordinator on the persisted state, as a restarted
    /// process would.
    pub async fn coordinator(&self) -> BatchCoordinator {
        let s = &self.settings;
        let store = self.object_store();
        BatchCoordinator::open(
            store.clone(),
            RemoteLister::new(store, s.source_prefix.clone(), s.page_size),
            AdmissionFilter::new(s.extensions.clone(), s.reserved_prefixes()),
            StagingArea::new(&s.dirs.inbound, &s.dirs.outbound),
            CoordinatorConfig::from_settings(s),
            self.observer.clone(),
            self.metrics.clone(),
        )
        .await
        .unwrap()
    }

    pub fn ledger_on_disk(&self) -> Option<ProgressLedger> {
        let raw = std::fs::read_to_string(self.settings.dirs.metadata.join(PROGRESS_FILE)).ok()?;
        Some(serde_json::from_str(&raw).unwrap())
    }

    pub fn state_on_disk(&self) -> Option<BatchState> {
        let raw =
            std::fs::read_to_string(self.settings.dirs.metadata.join(BATCH_STATE_FILE)).ok()?;
        Some(serde_json::from_str(&raw).unwrap())
    }
}

/// Stands in for a processing step: writes `per_object` chunk files for each
/// staged object and returns how many were written.
pub async fn emit_chunks(batch: &StagedBatch, per_object: usize) -> usize {
    let mut written = 0;
    for obj in &batch.objects {
        let name = obj.local_path.file_name().unwrap().to_string_lossy();
        for i in 0..per_object {
            let dest = batch.outbound.join(format!("{}.wav", chunk_id(&name, i)));
            tokio::fs::write(dest, obj.key.as_bytes()).await.unwrap();
            written += 1;
        }
    }
    written
}

pub fn staged_keys(batch: &StagedBatch) -> Vec<String> {
    batch.objects.iter().map(|o| o.key.clone()).collect()
}

/// A 16-bit mono PCM WAV at 8 kHz.
pub fn wav_bytes(secs: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for i in 0..(spec.sample_rate * secs) {
        writer.write_sample(((i % 50) as i16) * 200).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}
