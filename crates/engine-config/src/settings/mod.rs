use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

pub mod error;
pub mod loader;
pub mod validator;

pub const DEFAULT_INBOUND_DIR: &str = "./data";
pub const DEFAULT_OUTBOUND_DIR: &str = "./processed";
pub const DEFAULT_METADATA_DIR: &str = "./metadata";
pub const DEFAULT_LANGUAGE: &str = "pt";
pub const DEFAULT_OUTPUT_PREFIX: &str = "processed";
pub const DEFAULT_METADATA_PREFIX: &str = "metadata";
pub const DEFAULT_METADATA_CSV: &str = "metadata.csv";
pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_MAX_KEY_ATTEMPTS: u32 = 3;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Where remote objects live.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreSettings {
    /// A local directory used as the bucket.
    Local { root: PathBuf },
    /// An S3 bucket reached through the default AWS credential chain.
    S3 {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings::Local {
            root: PathBuf::from("./bucket"),
        }
    }
}

impl StoreSettings {
    pub fn describe(&self) -> String {
        match self {
            StoreSettings::Local { root } => format!("local:{}", root.display()),
            StoreSettings::S3 { bucket, .. } => format!("s3://{bucket}"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DirSettings {
    pub inbound: PathBuf,
    pub outbound: PathBuf,
    pub metadata: PathBuf,
}

impl Default for DirSettings {
    fn default() -> Self {
        Self {
            inbound: PathBuf::from(DEFAULT_INBOUND_DIR),
            outbound: PathBuf::from(DEFAULT_OUTBOUND_DIR),
            metadata: PathBuf::from(DEFAULT_METADATA_DIR),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Deadline of a single store call. Zero disables it.
    pub call_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 20_000,
            call_timeout_secs: 120,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProcessingSettings {
    pub language: String,
    /// Chunks shorter than this are dropped.
    pub min_chunk_secs: f64,
    /// External step program and arguments. `{inbound}`, `{outbound}`,
    /// `{metadata}` and `{language}` are substituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    /// External transcriber for the in-process splitter, used when `command`
    /// is unset. `{audio}` and `{language}` are substituted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asr_command: Option<Vec<String>>,
    pub metadata_csv: String,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            min_chunk_secs: 0.1,
            command: None,
            asr_command: None,
            metadata_csv: DEFAULT_METADATA_CSV.to_string(),
        }
    }
}

/// Complete configuration of one pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    /// Only keys under this prefix are listed.
    pub source_prefix: String,
    pub output_prefix: String,
    pub metadata_prefix: String,
    pub extensions: Vec<String>,
    pub batch_size: usize,
    pub page_size: usize,
    pub fetch_concurrency: usize,
    /// Treat a page shorter than `page_size` as the end of the listing.
    pub stop_on_short_page: bool,
    /// Failed fetches or processing runs a key gets before it is skipped.
    pub max_key_attempts: u32,
    /// Walk the whole listing at startup to fill `total_expected`.
    pub count_on_start: bool,
    pub dirs: DirSettings,
    pub retry: RetrySettings,
    pub processing: ProcessingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            source_prefix: String::new(),
            output_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            metadata_prefix: DEFAULT_METADATA_PREFIX.to_string(),
            extensions: vec![".wav".to_string()],
            batch_size: DEFAULT_BATCH_SIZE,
            page_size: MAX_PAGE_SIZE,
            fetch_concurrency: 4,
            stop_on_short_page: false,
            max_key_attempts: DEFAULT_MAX_KEY_ATTEMPTS,
            count_on_start: false,
            dirs: DirSettings::default(),
            retry: RetrySettings::default(),
            processing: ProcessingSettings::default(),
        }
    }
}

impl Settings {
    /// Prefixes the pipeline writes to and must never read back as input.
    pub fn reserved_prefixes(&self) -> Vec<String> {
        vec![self.output_prefix.clone(), self.metadata_prefix.clone()]
    }

    pub fn metadata_csv_path(&self) -> PathBuf {
        self.dirs.metadata.join(&self.processing.metadata_csv)
    }
}
