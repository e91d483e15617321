use crate::error::ProcessingError;
use serde::Serialize;
use std::{
    collections::HashSet,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};

pub const TEXT_FILE: &str = "text";
pub const WAV_SCP_FILE: &str = "wav.scp";
pub const TIMING_FILE: &str = "timing";

/// One labelled chunk as it appears in every manifest.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub id: String,
    pub file_name: String,
    pub text: String,
    pub language: String,
    pub source_key: String,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

/// Appends Kaldi-style `text`, `wav.scp` and `timing` files and a CSV table to
/// the metadata dir. Files are reopened on each append so a crashed run leaves
/// whole lines behind.
///
/// Chunk ids already present in a file are not written again, so a batch that
/// is processed twice leaves one line per chunk.
#[derive(Debug, Clone)]
pub struct ManifestWriter {
    dir: PathBuf,
    csv_name: String,
}

impl ManifestWriter {
    pub fn new(dir: impl Into<PathBuf>, csv_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            csv_name: csv_name.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn csv_path(&self) -> PathBuf {
        self.dir.join(&self.csv_name)
    }

    pub fn append(&self, entries: &[ManifestEntry]) -> Result<(), ProcessingError> {
        if entries.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| ProcessingError::io(&self.dir, e))?;

        self.append_lines(TEXT_FILE, entries, |e| format!("{} {}", e.id, e.text))?;
        // File names, not absolute paths: the chunks are published next to
        // the manifests.
        self.append_lines(WAV_SCP_FILE, entries, |e| format!("{} {}", e.id, e.file_name))?;
        self.append_lines(TIMING_FILE, entries, |e| {
            format!("{} {:.3} {:.3}", e.id, e.start, e.end)
        })?;
        self.append_csv(entries)
    }

    fn open_append(&self, path: &Path) -> Result<File, ProcessingError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProcessingError::io(path, e))
    }

    fn append_lines(
        &self,
        name: &str,
        entries: &[ManifestEntry],
        line: impl Fn(&ManifestEntry) -> String,
    ) -> Result<(), ProcessingError> {
        let path = self.dir.join(name);
        let known = line_ids(&path)?;
        let mut out = BufWriter::new(self.open_append(&path)?);
        for entry in entries.iter().filter(|e| !known.contains(&e.id)) {
            writeln!(out, "{}", line(entry)).map_err(|e| ProcessingError::io(&path, e))?;
        }
        out.flush().map_err(|e| ProcessingError::io(&path, e))
    }

    fn append_csv(&self, entries: &[ManifestEntry]) -> Result<(), ProcessingError> {
        let path = self.csv_path();
        let is_new = std::fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);
        let known = if is_new { HashSet::new() } else { csv_ids(&path)? };
        let file = self.open_append(&path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(is_new)
            .from_writer(file);
        for entry in entries.iter().filter(|e| !known.contains(&e.id)) {
            writer.serialize(entry)?;
        }
        writer.flush().map_err(|e| ProcessingError::io(&path, e))
    }
}

/// First token of every line, the chunk id in Kaldi manifests.
fn line_ids(path: &Path) -> Result<HashSet<String>, ProcessingError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(ProcessingError::io(path, e)),
    };

    let mut ids = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ProcessingError::io(path, e))?;
        if let Some(id) = line.split_whitespace().next() {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

/// The `id` column of an existing CSV table.
fn csv_ids(path: &Path) -> Result<HashSet<String>, ProcessingError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut ids = HashSet::new();
    for record in reader.records() {
        if let Some(id) = record?.get(0) {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(i: usize) -> ManifestEntry {
        ManifestEntry {
            id: format!("in_a_wav_chunk-{i:04}"),
            file_name: format!("in_a_wav_chunk-{i:04}.wav"),
            text: "bom dia".into(),
            language: "pt".into(),
            source_key: "in/a.wav".into(),
            start: i as f64,
            end: i as f64 + 0.5,
            duration: 0.5,
        }
    }

    #[test]
    fn appends_every_manifest() {
        let dir = tempdir().unwrap();
        let writer = ManifestWriter::new(dir.path().join("meta"), "metadata.csv");

        writer.append(&[entry(0)]).unwrap();
        writer.append(&[entry(1)]).unwrap();

        let text = std::fs::read_to_string(writer.dir().join(TEXT_FILE)).unwrap();
        assert_eq!(text, "in_a_wav_chunk-0000 bom dia\nin_a_wav_chunk-0001 bom dia\n");

        let scp = std::fs::read_to_string(writer.dir().join(WAV_SCP_FILE)).unwrap();
        assert!(scp.starts_with("in_a_wav_chunk-0000 in_a_wav_chunk-0000.wav\n"));

        let timing = std::fs::read_to_string(writer.dir().join(TIMING_FILE)).unwrap();
        assert!(timing.ends_with("in_a_wav_chunk-0001 1.000 1.500\n"));

        let csv = std::fs::read_to_string(writer.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("id,file_name,text"));
    }

    // Scenario: the same batch is appended twice, as when a failed cycle is
    // processed again, and the second time it carries one new chunk.
    // Expected Outcome: every manifest holds each chunk id exactly once.
    #[test]
    fn reappending_a_batch_skips_known_ids() {
        let dir = tempdir().unwrap();
        let writer = ManifestWriter::new(dir.path().join("meta"), "metadata.csv");

        writer.append(&[entry(0), entry(1)]).unwrap();
        writer.append(&[entry(0), entry(1), entry(2)]).unwrap();

        for name in [TEXT_FILE, WAV_SCP_FILE, TIMING_FILE] {
            let body = std::fs::read_to_string(writer.dir().join(name)).unwrap();
            let ids: Vec<&str> = body
                .lines()
                .filter_map(|l| l.split_whitespace().next())
                .collect();
            assert_eq!(
                ids,
                ["in_a_wav_chunk-0000", "in_a_wav_chunk-0001", "in_a_wav_chunk-0002"],
                "{name}"
            );
        }

        let mut reader = csv::Reader::from_path(writer.csv_path()).unwrap();
        let ids: Vec<String> = reader
            .records()
            .map(|r| r.unwrap()[0].to_string())
            .collect();
        assert_eq!(
            ids,
            ["in_a_wav_chunk-0000", "in_a_wav_chunk-0001", "in_a_wav_chunk-0002"]
        );
    }

    #[test]
    fn empty_append_creates_nothing() {
        let dir = tempdir().unwrap();
        let writer = ManifestWriter::new(dir.path().join("meta"), "metadata.csv");
        writer.append(&[]).unwrap();
        assert!(!writer.dir().exists());
    }
}
