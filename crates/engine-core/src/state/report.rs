use crate::state::ledger::ProgressLedger;
use serde::Serialize;
use std::fmt;

/// Read-only view of the ledger for the `progress` command and end-of-run logs.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub batches: u64,
    pub downloaded: u64,
    pub uploaded: u64,
    pub total_chunks: u64,
    pub before_process: u64,
    pub after_process: u64,
    pub pending_failures: u64,
    pub skipped: u64,
    pub total_expected: u64,
    pub percent_downloaded: Option<f64>,
    pub exhausted: bool,
}

impl ProgressReport {
    pub fn new(ledger: &ProgressLedger, exhausted: bool) -> Self {
        let downloaded = ledger.downloaded_count() as u64;
        let percent_downloaded = (ledger.total_expected > 0)
            .then(|| (downloaded as f64 / ledger.total_expected as f64 * 100.0).min(100.0));

        Self {
            batches: ledger.batch_count,
            downloaded,
            uploaded: ledger.uploaded_count() as u64,
            total_chunks: ledger.total_chunks,
            before_process: ledger.before_process_count,
            after_process: ledger.after_process_count,
            pending_failures: (ledger.failed_keys.len() + ledger.reprocess_keys.len()) as u64,
            skipped: ledger.skipped_keys.len() as u64,
            total_expected: ledger.total_expected,
            percent_downloaded,
            exhausted,
        }
    }

    /// Uploads exceeding downloads is expected (one source yields many
    /// chunks). The reverse only means some sources produced nothing.
    pub fn upload_ratio(&self) -> Option<f64> {
        (self.downloaded > 0).then(|| self.uploaded as f64 / self.downloaded as f64)
    }
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Batches processed", self.batches.to_string()),
            (
                "Files downloaded",
                format!("{} ({})", self.downloaded, human_count(self.downloaded)),
            ),
            (
                "Files uploaded",
                format!("{} ({})", self.uploaded, human_count(self.uploaded)),
            ),
            (
                "Total chunks",
                format!("{} ({})", self.total_chunks, human_count(self.total_chunks)),
            ),
            (
                "Uploads per download",
                self.upload_ratio()
                    .map_or_else(|| "-".to_string(), |r| format!("{r:.2}")),
            ),
            ("Files before processing", self.before_process.to_string()),
            ("Files after processing", self.after_process.to_string()),
            ("Queued retries", self.pending_failures.to_string()),
            ("Skipped keys", self.skipped.to_string()),
            (
                "Expected total",
                match self.percent_downloaded {
                    Some(pct) => format!("{} ({pct:.1}% downloaded)", self.total_expected),
                    None => "unknown".to_string(),
                },
            ),
            (
                "Listing",
                if self.exhausted { "exhausted" } else { "active" }.to_string(),
            ),
        ];

        let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        writeln!(f, "Progress Report")?;
        writeln!(f, "{:-<1$}", "", width + 24)?;
        for (metric, value) in rows {
            writeln!(f, "{metric:<width$}  {value}")?;
        }
        Ok(())
    }
}

/// Short form of a count: `950`, `1.5K`, `2.3M`.
pub fn human_count(n: u64) -> String {
    const UNITS: [&str; 5] = ["K", "M", "B", "T", "P"];
    if n < 1000 {
        return n.to_string();
    }

    let mut value = n as f64;
    let mut unit = UNITS[0];
    for u in UNITS {
        value /= 1000.0;
        unit = u;
        if value < 999.95 {
            break;
        }
    }

    let text = format!("{value:.1}");
    let text = text.strip_suffix(".0").unwrap_or(&text);
    format!("{text}{unit}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_count_formats() {
        assert_eq!(human_count(0), "0");
        assert_eq!(human_count(999), "999");
        assert_eq!(human_count(1000), "1K");
        assert_eq!(human_count(1500), "1.5K");
        assert_eq!(human_count(2_345_678), "2.3M");
        assert_eq!(human_count(999_999), "1M");
    }

    #[test]
    fn report_includes_percent_when_total_known() {
        let mut ledger = ProgressLedger::default();
        ledger.total_expected = 4;
        ledger.record_download("a.wav");
        let report = ProgressReport::new(&ledger, false);

        assert_eq!(report.percent_downloaded, Some(25.0));
        let rendered = report.to_string();
        assert!(rendered.contains("Files downloaded"));
        assert!(rendered.contains("25.0% downloaded"));
    }

    #[test]
    fn report_without_total_says_unknown() {
        let report = ProgressReport::new(&ProgressLedger::default(), true);
        assert!(report.percent_downloaded.is_none());
        assert!(report.to_string().contains("unknown"));
        assert!(report.to_string().contains("exhausted"));
    }

    #[test]
    fn report_counts_both_retry_queues() {
        let mut ledger = ProgressLedger::default();
        ledger.queue_failed("a.wav", 3);
        ledger.record_download("b.wav");
        ledger.queue_reprocess("b.wav", 3);
        ledger.skip("c.wav");

        let report = ProgressReport::new(&ledger, false);
        assert_eq!(report.pending_failures, 2);
        assert_eq!(report.skipped, 1);
        assert!(report.to_string().contains("Skipped keys"));
    }
}
