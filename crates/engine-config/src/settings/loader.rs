use crate::settings::{Settings, StoreSettings, error::SettingsError};
use std::{path::Path, path::PathBuf, str::FromStr};
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "VOXBATCH_";

impl Settings {
    /// Reads settings from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let settings = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(config = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Loads the file when given, falls back to defaults otherwise, then
    /// applies `VOXBATCH_*` overrides from `lookup`.
    pub fn load<F>(path: Option<&Path>, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(lookup)?;
        Ok(settings)
    }

    /// Applies environment overrides. Setting `VOXBATCH_BUCKET` switches the
    /// backend to S3.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            let var = format!("{ENV_PREFIX}{name}");
            lookup(&var)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (var, v))
        };

        if let Some((_, bucket)) = get("BUCKET") {
            let region = match &self.store {
                StoreSettings::S3 { region, .. } => region.clone(),
                StoreSettings::Local { .. } => None,
            };
            self.store = StoreSettings::S3 { bucket, region };
        }
        if let Some((_, value)) = get("REGION") {
            if let StoreSettings::S3 { region, .. } = &mut self.store {
                *region = Some(value);
            }
        }
        if let Some((_, root)) = get("STORE_ROOT") {
            self.store = StoreSettings::Local {
                root: PathBuf::from(root),
            };
        }

        if let Some((_, v)) = get("SOURCE_PREFIX") {
            self.source_prefix = v;
        }
        if let Some((_, v)) = get("OUTPUT_PREFIX") {
            self.output_prefix = v;
        }
        if let Some((_, v)) = get("METADATA_PREFIX") {
            self.metadata_prefix = v;
        }
        if let Some((_, v)) = get("LANGUAGE") {
            self.processing.language = v;
        }
        if let Some((_, v)) = get("INBOUND_DIR") {
            self.dirs.inbound = PathBuf::from(v);
        }
        if let Some((_, v)) = get("OUTBOUND_DIR") {
            self.dirs.outbound = PathBuf::from(v);
        }
        if let Some((_, v)) = get("METADATA_DIR") {
            self.dirs.metadata = PathBuf::from(v);
        }
        if let Some((var, v)) = get("BATCH_SIZE") {
            self.batch_size = parse(&var, &v)?;
        }
        if let Some((var, v)) = get("PAGE_SIZE") {
            self.page_size = parse(&var, &v)?;
        }
        if let Some((var, v)) = get("FETCH_CONCURRENCY") {
            self.fetch_concurrency = parse(&var, &v)?;
        }
        if let Some((var, v)) = get("MAX_KEY_ATTEMPTS") {
            self.max_key_attempts = parse(&var, &v)?;
        }

        debug!(store = %self.store.describe(), "Applied environment overrides");
        Ok(())
    }
}

fn parse<T: FromStr>(var: &str, value: &str) -> Result<T, SettingsError> {
    value.trim().parse().map_err(|_| SettingsError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}
