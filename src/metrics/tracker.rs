use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

/// Named scalar metrics for one batch or one epoch, ordered by name.
pub type MetricMap = BTreeMap<String, f32>;

/// Append-only per-agent history of named scalars.
///
/// Each learning update appends one value to each metric it reports; nothing
/// is ever removed, so the log holds one entry per episode for the whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricLog {
    values: BTreeMap<String, Vec<f32>>,
}

impl MetricLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value under `name`
    pub fn record(&mut self, name: &str, value: f32) {
        self.values.entry(name.to_string()).or_default().push(value);
    }

    /// Record every entry of a metric map
    pub fn record_all(&mut self, metrics: &MetricMap) {
        for (name, &value) in metrics {
            self.record(name, value);
        }
    }

    /// Most recent value of `name`, or `0.0` if it was never recorded
    pub fn last(&self, name: &str) -> f32 {
        self.values
            .get(name)
            .and_then(|values| values.last().copied())
            .unwrap_or(0.0)
    }

    /// Full history of `name`
    pub fn history(&self, name: &str) -> &[f32] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Key-wise sum; keys missing on one side count as zero.
pub fn add_metrics(a: &MetricMap, b: &MetricMap) -> MetricMap {
    let mut result = a.clone();
    for (name, &value) in b {
        *result.entry(name.clone()).or_insert(0.0) += value;
    }
    result
}

/// Divide every entry by `n`.
pub fn div_metrics(metrics: &MetricMap, n: usize) -> MetricMap {
    metrics
        .iter()
        .map(|(name, &value)| (name.clone(), value / n as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_defaults_to_zero() {
        let mut log = MetricLog::new();
        assert_eq!(log.last("loss"), 0.0);
        log.record("loss", 1.5);
        log.record("loss", 0.5);
        assert_eq!(log.last("loss"), 0.5);
        assert_eq!(log.history("loss"), &[1.5, 0.5]);
    }

    #[test]
    fn test_add_and_div() {
        let mut a = MetricMap::new();
        a.insert("loss".to_string(), 1.0);
        let mut b = MetricMap::new();
        b.insert("loss".to_string(), 3.0);
        b.insert("error".to_string(), 2.0);

        let sum = add_metrics(&a, &b);
        let avg = div_metrics(&sum, 2);
        assert_eq!(avg["loss"], 2.0);
        assert_eq!(avg["error"], 1.0);
    }
}
