/// Decides which remote keys are worth fetching.
///
/// A key is admissible when its lowercased form ends with one of the
/// configured extensions and it does not live under a reserved prefix (the
/// pipeline's own output and metadata prefixes).
#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    extensions: Vec<String>,
    reserved_prefixes: Vec<String>,
}

impl AdmissionFilter {
    pub fn new<E, P>(extensions: E, reserved_prefixes: P) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        let reserved_prefixes = reserved_prefixes
            .into_iter()
            .filter_map(|p| normalize_prefix(p.as_ref()))
            .collect();

        Self {
            extensions,
            reserved_prefixes,
        }
    }

    pub fn admits(&self, key: &str) -> bool {
        let lowered = key.to_lowercase();
        let has_extension = self.extensions.iter().any(|ext| lowered.ends_with(ext));
        let key = key.trim_start_matches('/');
        has_extension && !self.reserved_prefixes.iter().any(|p| key.starts_with(p))
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn reserved_prefixes(&self) -> &[String] {
        &self.reserved_prefixes
    }
}

/// `processed` and `/processed/` both become `processed/`, so a reserved
/// prefix never swallows a sibling such as `processed_old.wav`.
fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("{trimmed}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> AdmissionFilter {
        AdmissionFilter::new([".wav"], ["out", "metadata/"])
    }

    #[test]
    fn accepts_and_rejects_by_extension_and_prefix() {
        let f = filter();
        assert!(f.admits("in/a.wav"));
        assert!(!f.admits("out/a.wav"));
        assert!(!f.admits("in/a.txt"));
        assert!(!f.admits("metadata/progress.wav"));
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(filter().admits("in/LOUD.WAV"));
    }

    #[test]
    fn reserved_prefix_does_not_swallow_siblings() {
        let f = filter();
        assert!(f.admits("out_old/a.wav"));
        assert!(f.admits("outtakes.wav"));
    }

    #[test]
    fn empty_prefixes_are_ignored() {
        let f = AdmissionFilter::new([".wav"], ["", "/"]);
        assert!(f.reserved_prefixes().is_empty());
        assert!(f.admits("a.wav"));
    }
}
