//! Per-tick log recording and CSV export.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use sonic_core::{Error, Result, Timestamp};

use crate::buffer::BoundedBuffer;

/// Header row of every exported log
pub const EXPORT_HEADER: [&str; 6] = [
    "timestamp",
    "distance",
    "velocity",
    "gesture",
    "breathMode",
    "breathRate",
];

/// One logged tick
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: Timestamp,
    /// Filtered distance
    pub distance: f64,
    /// Smoothed velocity as seen by the classifier (sign-flipped if inverted)
    pub velocity: f64,
    pub gesture: &'static str,
    pub breath_mode: bool,
    pub breath_rate: f64,
}

impl LogRecord {
    /// Formatted CSV fields
    pub fn fields(&self) -> [String; 6] {
        [
            format!("{:.3}", self.timestamp.as_secs_f64()),
            format!("{:.6}", self.distance),
            format!("{:.6}", self.velocity),
            self.gesture.to_string(),
            if self.breath_mode { "1" } else { "0" }.to_string(),
            format!("{:.3}", self.breath_rate),
        ]
    }
}

/// Bounded, toggleable recorder of [`LogRecord`]s
#[derive(Debug, Clone)]
pub struct LogRecorder {
    enabled: bool,
    records: BoundedBuffer<LogRecord>,
}

impl LogRecorder {
    pub fn new(capacity: usize, enabled: bool) -> Self {
        Self {
            enabled,
            records: BoundedBuffer::new(capacity),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Append `record` if recording is enabled
    pub fn record(&mut self, record: LogRecord) {
        if self.enabled {
            self.records.push(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl ExactSizeIterator<Item = &LogRecord> + '_ {
        self.records.iter()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Write the header and every record as CSV into `writer`
    pub fn write_csv<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(EXPORT_HEADER).map_err(csv_error)?;
        for record in self.records.iter() {
            wtr.write_record(record.fields()).map_err(csv_error)?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Render the log as CSV text
    pub fn render_csv(&self) -> Result<String> {
        let mut out = Vec::new();
        self.write_csv(&mut out)?;
        String::from_utf8(out).map_err(|e| Error::Export(e.to_string()))
    }

    /// Export into a new, uniquely named file inside `dir`.
    ///
    /// Returns the path of the written file. On failure nothing is returned
    /// and a partially written file is removed.
    pub fn export(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(export_file_name(Timestamp::now()));
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;

        if let Err(e) = self.write_csv(std::io::BufWriter::new(file)) {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }

        tracing::info!("Exported {} log records to {}", self.len(), path.display());
        Ok(path)
    }
}

/// `sonic-log-<UTC timestamp>-<random suffix>.csv`
pub fn export_file_name(now: Timestamp) -> String {
    let stamp = now.to_datetime().format("%Y%m%d-%H%M%S%.3f");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("sonic-log-{}-{}.csv", stamp, &suffix[..8])
}

fn csv_error(e: csv::Error) -> Error {
    Error::Export(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(i: usize) -> LogRecord {
        LogRecord {
            timestamp: Timestamp::from_secs_f64(1_700_000_000.0 + i as f64 * 0.02),
            distance: 0.25 + i as f64 * 1e-3,
            velocity: -0.0012345678,
            gesture: "Moving Closer",
            breath_mode: i % 2 == 1,
            breath_rate: 14.98765,
        }
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sonic-export-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_record_formatting() {
        let fields = record(1).fields();
        assert_eq!(fields[0], "1700000000.020");
        assert_eq!(fields[1], "0.251000");
        assert_eq!(fields[2], "-0.001235");
        assert_eq!(fields[3], "Moving Closer");
        assert_eq!(fields[4], "1");
        assert_eq!(fields[5], "14.988");
    }

    #[test]
    fn test_disabled_recorder_ignores_records() {
        let mut recorder = LogRecorder::new(10, false);
        recorder.record(record(0));
        assert!(recorder.is_empty());
        recorder.set_enabled(true);
        recorder.record(record(0));
        assert_eq!(recorder.len(), 1);
    }

    #[test]
    fn test_capacity_and_header() {
        let mut recorder = LogRecorder::new(5000, true);
        for i in 0..5200 {
            recorder.record(record(i));
            assert!(recorder.len() <= 5000);
        }

        let csv = recorder.render_csv().unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("timestamp,distance,velocity,gesture,breathMode,breathRate")
        );
        assert_eq!(lines.count(), 5000);
        // oldest 200 evicted
        assert_eq!(recorder.records().next(), Some(&record(200)));
    }

    #[test]
    fn test_export_writes_unique_files() {
        let dir = temp_dir();
        let mut recorder = LogRecorder::new(100, true);
        for i in 0..3 {
            recorder.record(record(i));
        }

        let first = recorder.export(&dir).unwrap();
        let second = recorder.export(&dir).unwrap();
        assert_ne!(first, second);

        let text = std::fs::read_to_string(&first).unwrap();
        assert_eq!(text.lines().count(), 4);
        assert!(first
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("sonic-log-") && n.ends_with(".csv")));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_export_failure_is_reported() {
        let recorder = LogRecorder::new(10, true);
        let missing = temp_dir().join("does").join("not").join("exist");
        assert!(matches!(recorder.export(&missing), Err(Error::Io(_))));
    }
}
