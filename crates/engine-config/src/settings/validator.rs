use crate::{
    report::finding::{Finding, FindingKind},
    settings::{MAX_PAGE_SIZE, Settings, StoreSettings, error::SettingsError},
};
use std::path::Path;
use tracing::{info, warn};

const CODE_BATCH_SIZE: &str = "BATCH_SIZE";
const CODE_PAGE_SIZE: &str = "PAGE_SIZE";
const CODE_CONCURRENCY: &str = "FETCH_CONCURRENCY";
const CODE_ATTEMPTS: &str = "MAX_KEY_ATTEMPTS";
const CODE_EXTENSIONS: &str = "EXTENSIONS";
const CODE_SOURCE_RESERVED: &str = "SOURCE_UNDER_RESERVED_PREFIX";
const CODE_BUCKET: &str = "BUCKET";
const CODE_DIRS: &str = "STAGING_DIRS";
const CODE_RETRY: &str = "RETRY";
const CODE_LANGUAGE: &str = "LANGUAGE";
const CODE_MIN_CHUNK: &str = "MIN_CHUNK_SECS";
const CODE_STEP_COMMAND: &str = "STEP_COMMAND";

/// Checks settings before any state is touched.
pub struct SettingsValidator<'a> {
    settings: &'a Settings,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Every finding, errors and warnings alike.
    pub fn findings(&self) -> Vec<Finding> {
        let mut findings = Vec::new();
        self.validate_batching(&mut findings);
        self.validate_listing(&mut findings);
        self.validate_store(&mut findings);
        self.validate_dirs(&mut findings);
        self.validate_retry(&mut findings);
        self.validate_processing(&mut findings);
        findings
    }

    /// Fails on any error finding, logs and returns the warnings.
    pub fn validate(&self) -> Result<Vec<Finding>, SettingsError> {
        let (errors, warnings): (Vec<_>, Vec<_>) =
            self.findings().into_iter().partition(Finding::is_error);

        for w in &warnings {
            warn!(code = %w.code, "{}", w.message);
        }
        if !errors.is_empty() {
            return Err(SettingsError::ValidationFailed(
                errors.iter().map(ToString::to_string).collect(),
            ));
        }

        info!(
            store = %self.settings.store.describe(),
            batch_size = self.settings.batch_size,
            page_size = self.settings.page_size,
            "Settings validation completed successfully"
        );
        Ok(warnings)
    }

    fn validate_batching(&self, out: &mut Vec<Finding>) {
        let s = self.settings;
        if s.batch_size == 0 {
            out.push(
                Finding::error(CODE_BATCH_SIZE, "batch_size must be positive", FindingKind::Batching)
                    .with_suggestion("Use a batch size between 1 and 1000."),
            );
        } else if s.batch_size > 1000 {
            out.push(Finding::warning(
                CODE_BATCH_SIZE,
                &format!(
                    "batch_size {} is very large, staging may need a lot of disk",
                    s.batch_size
                ),
                FindingKind::Batching,
            ));
        }

        if s.fetch_concurrency == 0 {
            out.push(Finding::error(
                CODE_CONCURRENCY,
                "fetch_concurrency must be positive",
                FindingKind::Batching,
            ));
        } else if s.fetch_concurrency > 32 {
            out.push(Finding::warning(
                CODE_CONCURRENCY,
                &format!(
                    "fetch_concurrency {} may trigger store throttling",
                    s.fetch_concurrency
                ),
                FindingKind::Batching,
            ));
        }

        if s.max_key_attempts == 0 {
            out.push(
                Finding::error(CODE_ATTEMPTS, "max_key_attempts must be positive", FindingKind::Batching)
                    .with_suggestion("Use 1 to skip a key on its first failure."),
            );
        }
    }

    fn validate_listing(&self, out: &mut Vec<Finding>) {
        let s = self.settings;
        if s.page_size == 0 || s.page_size > MAX_PAGE_SIZE {
            out.push(Finding::error(
                CODE_PAGE_SIZE,
                &format!("page_size must be within 1..={MAX_PAGE_SIZE}, got {}", s.page_size),
                FindingKind::Listing,
            ));
        }

        if s.extensions.is_empty() {
            out.push(
                Finding::error(CODE_EXTENSIONS, "no file extensions configured", FindingKind::Listing)
                    .with_suggestion("Set extensions, e.g. [\".wav\"]."),
            );
        }
        for ext in &s.extensions {
            if !ext.starts_with('.') || ext.len() < 2 {
                out.push(Finding::error(
                    CODE_EXTENSIONS,
                    &format!("extension `{ext}` must start with a dot"),
                    FindingKind::Listing,
                ));
            }
        }

        let source = normalized(&s.source_prefix);
        for reserved in s.reserved_prefixes() {
            let reserved = normalized(&reserved);
            if !reserved.is_empty() && !source.is_empty() && source.starts_with(&reserved) {
                out.push(
                    Finding::error(
                        CODE_SOURCE_RESERVED,
                        &format!(
                            "source prefix `{}` lies under reserved prefix `{reserved}`, nothing would be admitted",
                            s.source_prefix
                        ),
                        FindingKind::Listing,
                    )
                    .with_suggestion("Point output_prefix and metadata_prefix outside the source prefix."),
                );
            }
        }
    }

    fn validate_store(&self, out: &mut Vec<Finding>) {
        match &self.settings.store {
            StoreSettings::S3 { bucket, .. } => {
                if bucket.trim().is_empty() || bucket.chars().any(char::is_whitespace) {
                    out.push(Finding::error(
                        CODE_BUCKET,
                        &format!("invalid bucket name `{bucket}`"),
                        FindingKind::Store,
                    ));
                }
            }
            StoreSettings::Local { root } => {
                if root.as_os_str().is_empty() {
                    out.push(Finding::error(
                        CODE_BUCKET,
                        "local store root is empty",
                        FindingKind::Store,
                    ));
                }
            }
        }
    }

    fn validate_dirs(&self, out: &mut Vec<Finding>) {
        let dirs = &self.settings.dirs;
        let pairs: [(&str, &Path, &str, &Path); 3] = [
            ("inbound", &dirs.inbound, "outbound", &dirs.outbound),
            ("metadata", &dirs.metadata, "inbound", &dirs.inbound),
            ("metadata", &dirs.metadata, "outbound", &dirs.outbound),
        ];

        for (a_name, a, b_name, b) in pairs {
            if a == b || a.starts_with(b) || b.starts_with(a) {
                out.push(
                    Finding::error(
                        CODE_DIRS,
                        &format!(
                            "{a_name} dir {} overlaps {b_name} dir {}, staging resets would destroy it",
                            a.display(),
                            b.display()
                        ),
                        FindingKind::Staging,
                    )
                    .with_suggestion("Use three separate directories."),
                );
            }
        }
    }

    fn validate_retry(&self, out: &mut Vec<Finding>) {
        let retry = &self.settings.retry;
        if retry.max_attempts == 0 {
            out.push(Finding::error(
                CODE_RETRY,
                "retry.max_attempts must be at least 1",
                FindingKind::Store,
            ));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            out.push(Finding::warning(
                CODE_RETRY,
                "retry.max_delay_ms is below base_delay_ms, every backoff will be capped",
                FindingKind::Store,
            ));
        }
    }

    fn validate_processing(&self, out: &mut Vec<Finding>) {
        let p = &self.settings.processing;
        if p.language.trim().is_empty() {
            out.push(Finding::error(
                CODE_LANGUAGE,
                "processing.language is empty",
                FindingKind::Processing,
            ));
        }
        if !p.min_chunk_secs.is_finite() || p.min_chunk_secs < 0.0 {
            out.push(Finding::error(
                CODE_MIN_CHUNK,
                "processing.min_chunk_secs must be a non-negative number",
                FindingKind::Processing,
            ));
        }
        for (field, cmd) in [("command", &p.command), ("asr_command", &p.asr_command)] {
            if let Some(cmd) = cmd {
                if cmd.first().is_none_or(|program| program.trim().is_empty()) {
                    out.push(Finding::error(
                        CODE_STEP_COMMAND,
                        &format!("processing.{field} is set but names no program"),
                        FindingKind::Processing,
                    ));
                }
            }
        }
    }
}

fn normalized(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}
