//! File naming shared by the staging area and processing steps.

/// Flattens a remote key into a single safe file name.
///
/// `in/sub/Take 1.wav` becomes `in_sub_Take_1.wav`.
pub fn staged_file_name(key: &str) -> String {
    let name: String = key
        .trim_start_matches('/')
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if name.is_empty() || name.chars().all(|c| c == '.') {
        "object".to_string()
    } else {
        name
    }
}

/// Lowercased identifier used as the stem of chunk ids.
///
/// Every character outside `[a-z0-9]` becomes `_`, so `In_1.WAV` gives `in_1_wav`.
pub fn clean_name(file_name: &str) -> String {
    file_name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Identifier of the `index`-th chunk cut from `file_name`.
pub fn chunk_id(file_name: &str, index: usize) -> String {
    format!("{}_chunk-{index:04}", clean_name(file_name))
}

/// Joins a store prefix and a file name into a remote key.
pub fn remote_key(prefix: &str, file_name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{prefix}/{file_name}")
    }
}
