//! # Result aggregation
//!
//! Sweeps are laid out as
//!
//! ```text
//! <results root>/<experiment>-...bias<N>/<run>/<seed>/logs.json
//! ```
//!
//! A run's score is the mean summed `test_error` over the last 10 epochs,
//! pooled across its seeds. For every experiment directory the best (lowest)
//! run is selected; [`generate_results_csv`] writes one row per bias and
//! [`generate_results_folder`] also copies the winning runs next to it.
//!
//! Unreadable logs never abort a sweep: the run is recorded under
//! `errors` and skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{SelfishError, Result};
use crate::train::{EpochRecord, FITNESS_WINDOW};

/// Best run of one experiment directory, plus the runs that were skipped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    /// `(score, run directory name)` of the lowest-scoring run
    pub best: Option<(f64, String)>,
    /// Runs without any `logs.json`
    pub empty: Vec<String>,
    /// Runs with an unreadable or malformed `logs.json`
    pub errors: Vec<String>,
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_log(path: &Path) -> Result<Vec<EpochRecord>> {
    let malformed = |reason: String| SelfishError::MalformedLog {
        path: path.display().to_string(),
        reason,
    };
    let text = fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| malformed(e.to_string()))
}

/// Score of one run: every `<seeds_dir>/*/logs.json` pooled, summed
/// `test_error` averaged per epoch, then over the last 10 epochs.
///
/// `Ok(None)` when no seed directory holds a log.
pub fn metric<P: AsRef<Path>>(seeds_dir: P) -> Result<Option<f64>> {
    let mut per_epoch: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    let mut found = false;

    for seed_dir in sorted_subdirs(seeds_dir.as_ref())? {
        let path = seed_dir.join("logs.json");
        if !path.is_file() {
            continue;
        }
        found = true;
        tracing::debug!("reading {}", path.display());
        for record in read_log(&path)? {
            let summed = record.summed_strict("test_error").ok_or_else(|| SelfishError::MalformedLog {
                path: path.display().to_string(),
                reason: format!("epoch {} has no test_error for both agents", record.epoch),
            })?;
            let entry = per_epoch.entry(record.epoch).or_insert((0.0, 0));
            entry.0 += summed as f64;
            entry.1 += 1;
        }
    }

    if !found {
        return Ok(None);
    }
    let means: Vec<f64> = per_epoch.values().map(|&(sum, count)| sum / count as f64).collect();
    let window = &means[means.len().saturating_sub(FITNESS_WINDOW)..];
    if window.is_empty() {
        return Ok(None);
    }
    Ok(Some(window.iter().sum::<f64>() / window.len() as f64))
}

/// Score every run directory under `dir` and keep the best.
pub fn metric_over_runs<P: AsRef<Path>>(dir: P) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    for run_dir in sorted_subdirs(dir.as_ref())? {
        let name = dir_name(&run_dir);
        match metric(&run_dir) {
            Ok(Some(score)) => {
                if summary.best.as_ref().map_or(true, |(best, _)| score < *best) {
                    summary.best = Some((score, name));
                }
            }
            Ok(None) => summary.empty.push(name),
            Err(e @ SelfishError::MalformedLog { .. }) => {
                tracing::warn!("skipping {}: {}", name, e);
                summary.errors.push(name);
            }
            Err(e) => return Err(e),
        }
    }

    if !summary.empty.is_empty() {
        tracing::info!("Empty dirs {:?}", summary.empty);
    }
    if !summary.errors.is_empty() {
        tracing::info!("Error dirs {:?}", summary.errors);
    }
    Ok(summary)
}

#[derive(Debug, Serialize)]
struct ResultRow {
    bias: i64,
    error: f64,
    id: String,
}

/// The integer after the first `bias` in an experiment directory name.
fn parse_bias(name: &str) -> Option<i64> {
    let start = name.find("bias")? + "bias".len();
    name[start..].parse().ok()
}

/// Write `<output_dir>/results.csv` (`bias,error,id`, sorted by bias) with the
/// best run of every `<experiment>-*` directory under `results_root`, and
/// return the paths of those runs.
pub fn generate_results_csv<P: AsRef<Path>, Q: AsRef<Path>>(
    experiment: &str,
    results_root: P,
    output_dir: Q,
) -> Result<Vec<PathBuf>> {
    let root = results_root.as_ref();
    if !root.exists() {
        return Err(SelfishError::MissingResults(format!(
            "results path {} does not exist",
            root.display()
        )));
    }

    let prefix = format!("{}-", experiment);
    let mut rows = Vec::new();
    let mut run_paths = Vec::new();

    for exp_dir in sorted_subdirs(root)? {
        let exp_name = dir_name(&exp_dir);
        if !exp_name.starts_with(&prefix) {
            continue;
        }
        tracing::info!("running on {}", exp_name);

        let Some(bias) = parse_bias(&exp_name) else {
            tracing::warn!("no bias in directory name {}, skipping", exp_name);
            continue;
        };
        match metric_over_runs(&exp_dir)?.best {
            Some((error, run_name)) => {
                let id = run_name
                    .strip_prefix(&format!("{}-", exp_name))
                    .unwrap_or(&run_name)
                    .to_string();
                rows.push(ResultRow { bias, error, id });
                run_paths.push(exp_dir.join(&run_name));
            }
            None => tracing::warn!("no results in {}", exp_name),
        }
    }

    if run_paths.is_empty() {
        return Err(SelfishError::MissingResults(format!(
            "could not find any experiment {} in {}",
            experiment,
            root.display()
        )));
    }

    rows.sort_by(|a, b| {
        a.bias
            .cmp(&b.bias)
            .then(a.error.total_cmp(&b.error))
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut writer = csv::Writer::from_path(output_dir.as_ref().join("results.csv"))?;
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(run_paths)
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

/// `<output_dir>/<experiment>/results.csv` plus a copy of every winning run.
pub fn generate_results_folder<P: AsRef<Path>, Q: AsRef<Path>>(
    experiment: &str,
    results_root: P,
    output_dir: Q,
) -> Result<PathBuf> {
    let folder = output_dir.as_ref().join(experiment);
    fs::create_dir_all(&folder)?;

    tracing::info!("generating results csv");
    let best_runs = generate_results_csv(experiment, results_root, &folder)?;

    tracing::info!("copying files");
    for run in best_runs {
        copy_dir(&run, &folder.join(dir_name(&run)))?;
    }
    Ok(folder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bias() {
        assert_eq!(parse_bias("pg-lola-bias3"), Some(3));
        assert_eq!(parse_bias("pg-bias12"), Some(12));
        assert_eq!(parse_bias("pg-nobias"), None);
    }

    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let result = generate_results_csv("pg", dir.path().join("absent"), dir.path());
        assert!(matches!(result, Err(SelfishError::MissingResults(_))));
    }

    #[test]
    fn test_run_without_logs_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("run-a").join("seed0")).unwrap();
        let summary = metric_over_runs(dir.path()).unwrap();
        assert_eq!(summary.empty, vec!["run-a".to_string()]);
        assert!(summary.best.is_none());
    }
}
