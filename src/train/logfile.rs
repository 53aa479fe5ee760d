//! Per-run `logs.json`: a JSON array with one record per epoch, written
//! incrementally so an interrupted run still leaves every finished epoch on disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::error::Result;
use crate::metrics::MetricMap;

/// Metrics of one epoch for both agents.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub sender: MetricMap,
    pub recver: MetricMap,
}

impl EpochRecord {
    /// `sender.test_l1_error + recver.test_l1_error`
    pub fn summed(&self, metric: &str) -> f32 {
        self.sender.get(metric).copied().unwrap_or(0.0) + self.recver.get(metric).copied().unwrap_or(0.0)
    }

    /// Like [`summed`](Self::summed), but `None` unless both agents logged `metric`.
    pub fn summed_strict(&self, metric: &str) -> Option<f32> {
        Some(self.sender.get(metric)? + self.recver.get(metric)?)
    }
}

pub struct LogWriter {
    out: BufWriter<File>,
    records: usize,
}

impl LogWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(b"[ \n")?;
        Ok(LogWriter { out, records: 0 })
    }

    pub fn append(&mut self, record: &EpochRecord) -> Result<()> {
        if self.records > 0 {
            self.out.write_all(b",\n")?;
        }
        serde_json::to_writer_pretty(&mut self.out, record)?;
        self.out.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Close the array and flush.
    pub fn finish(mut self) -> Result<()> {
        self.out.write_all(b"\n]")?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, value: f32) -> EpochRecord {
        let mut sender = MetricMap::new();
        sender.insert("test_l1_error".to_string(), value);
        EpochRecord {
            epoch,
            sender: sender.clone(),
            recver: sender,
        }
    }

    #[test]
    fn test_log_is_a_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        let mut writer = LogWriter::create(&path).unwrap();
        writer.append(&record(0, 1.0)).unwrap();
        writer.append(&record(1, 0.5)).unwrap();
        writer.finish().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let records: Vec<EpochRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(records, vec![record(0, 1.0), record(1, 0.5)]);
        assert_eq!(records[1].summed("test_l1_error"), 1.0);
    }

    #[test]
    fn test_empty_log_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.json");
        LogWriter::create(&path).unwrap().finish().unwrap();
        let records: Vec<EpochRecord> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(records.is_empty());
    }
}
