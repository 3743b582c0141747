//! Periodic campaign metrics, appended as CSV rows at a configurable cadence.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to write metrics: {0}")]
    Io(#[from] std::io::Error),
}

/// How often a metrics row is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportCadence {
    EveryCalls(u64),
    EverySecs(u64),
}

/// One metrics sample, taken at an iteration boundary.
#[derive(Debug, Clone)]
pub struct MetricsRow {
    pub lines_covered: usize,
    /// Fraction of the backend-reported line count, in [0, 1].
    pub coverage: f64,
    pub covered_paths: usize,
    pub transitions: usize,
    pub rejected_calls: u64,
    pub call_count: u64,
    pub elapsed_secs: f64,
}

const HEADER: &str =
    "lines_covered,coverage,covered_paths,transitions,rejected_calls,call_count,elapsed_secs";

/// Append-only CSV writer gated by a cadence. The control loop offers a row
/// every iteration; the writer decides whether it is due.
pub struct MetricsWriter {
    file: File,
    cadence: ReportCadence,
    last_call_count: u64,
    last_emitted_at: Instant,
}

impl MetricsWriter {
    pub fn create(path: &Path, cadence: ReportCadence) -> Result<Self, ReportError> {
        let mut file = File::create(path)?;
        writeln!(file, "{HEADER}")?;
        Ok(Self {
            file,
            cadence,
            last_call_count: 0,
            last_emitted_at: Instant::now(),
        })
    }

    fn due(&self, call_count: u64) -> bool {
        match self.cadence {
            ReportCadence::EveryCalls(n) => call_count >= self.last_call_count + n.max(1),
            ReportCadence::EverySecs(n) => {
                self.last_emitted_at.elapsed() >= Duration::from_secs(n.max(1))
            }
        }
    }

    /// Emits the row if the cadence says one is due; returns whether a row
    /// was written.
    pub fn offer(&mut self, row: &MetricsRow) -> Result<bool, ReportError> {
        if !self.due(row.call_count) {
            return Ok(false);
        }
        self.emit(row)?;
        Ok(true)
    }

    /// Unconditionally writes one row, e.g. the final sample at campaign end.
    pub fn emit(&mut self, row: &MetricsRow) -> Result<(), ReportError> {
        writeln!(
            self.file,
            "{},{:.4},{},{},{},{},{:.2}",
            row.lines_covered,
            row.coverage,
            row.covered_paths,
            row.transitions,
            row.rejected_calls,
            row.call_count,
            row.elapsed_secs
        )?;
        self.file.flush()?;
        self.last_call_count = row.call_count;
        self.last_emitted_at = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(call_count: u64) -> MetricsRow {
        MetricsRow {
            lines_covered: 12,
            coverage: 0.24,
            covered_paths: 3,
            transitions: 2,
            rejected_calls: 1,
            call_count,
            elapsed_secs: 1.5,
        }
    }

    #[test]
    fn writes_header_and_gates_on_call_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let mut writer = MetricsWriter::create(&path, ReportCadence::EveryCalls(10)).unwrap();

        assert!(!writer.offer(&row(5)).unwrap());
        assert!(writer.offer(&row(10)).unwrap());
        assert!(!writer.offer(&row(15)).unwrap());
        assert!(writer.offer(&row(20)).unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "12,0.2400,3,2,1,10,1.50");
        assert_eq!(lines[2], "12,0.2400,3,2,1,20,1.50");
    }

    #[test]
    fn final_emit_bypasses_the_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let mut writer = MetricsWriter::create(&path, ReportCadence::EverySecs(3600)).unwrap();

        assert!(!writer.offer(&row(100)).unwrap());
        writer.emit(&row(100)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
