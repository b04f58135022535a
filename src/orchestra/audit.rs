use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    path::Path,
};

use log::warn;
use parking_lot::Mutex;

/// Receives the campaign events worth keeping a record of.
///
/// Every method defaults to doing nothing, so implementors only pick what they need.
pub trait CampaignObserver: Send + Sync {
    /// The campaign is about to start its rounds.
    fn campaign_started(&self, _rounds: u64, _active: usize) {}

    /// The membership methodology in use.
    fn methodology(&self, _label: &str) {}

    /// The elimination threshold in use.
    fn threshold(&self, _threshold: f64) {}

    /// The contribution scores of a round, keyed by each worker's reporting index.
    fn scores(&self, _round: u64, _scores: &[(usize, f64)]) {}
}

/// An observer that ignores every event.
pub struct NoopObserver;

impl CampaignObserver for NoopObserver {}

/// Appends the campaign's events to a plain text file, one line each.
pub struct AuditLog {
    file: Mutex<File>,
}

impl AuditLog {
    /// Opens the audit log at `path`, creating it if needed.
    ///
    /// Existing contents are kept, a new campaign is appended after them.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    fn write_line(&self, line: String) {
        let mut file = self.file.lock();

        if let Err(e) = writeln!(file, "{line}") {
            warn!("failed to write to the audit log: {e}");
        }
    }
}

impl CampaignObserver for AuditLog {
    fn campaign_started(&self, rounds: u64, active: usize) {
        self.write_line(format!(
            "Start campaign with {rounds} rounds and {active} workers"
        ));
    }

    fn methodology(&self, label: &str) {
        self.write_line(format!("Methodology is: {label}"));
    }

    fn threshold(&self, threshold: f64) {
        self.write_line(format!("Threshold is: {threshold}"));
    }

    fn scores(&self, round: u64, scores: &[(usize, f64)]) {
        self.write_line(format!("Contribution scores round {round}: {scores:?}"));
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf, process};

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("audit-{}-{name}.txt", process::id()));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_writes_one_line_per_event() {
        let path = scratch("lines");
        let log = AuditLog::open(&path).unwrap();

        log.campaign_started(3, 4);
        log.methodology("delete-one");
        log.threshold(0.1);
        log.scores(1, &[(0, 0.05), (1, 0.2)]);
        drop(log);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Start campaign with 3 rounds and 4 workers");
        assert_eq!(lines[1], "Methodology is: delete-one");
        assert_eq!(lines[2], "Threshold is: 0.1");
        assert_eq!(lines[3], "Contribution scores round 1: [(0, 0.05), (1, 0.2)]");

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_appends_across_campaigns() {
        let path = scratch("append");

        AuditLog::open(&path).unwrap().threshold(0.1);
        AuditLog::open(&path).unwrap().threshold(0.2);

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);

        fs::remove_file(path).unwrap();
    }
}
