//! # Training loop
//!
//! A run goes `INIT → (train batches, evaluation batch, log) × num_epochs → FINALIZE`:
//!
//! - **INIT** seeds the run's RNG, builds the training and evaluation games
//!   and both agents, writes `config.json` and restores a checkpoint when
//!   `loaddir` points at one.
//! - **Train batch**: every round the sender acts, then the receiver; after
//!   the last round both agents compute their loss against the other's
//!   pre-update snapshot and step, sender first.
//! - **Evaluation batch**: the same round loop without feedback, reporting
//!   the training loss and the circular L1 error.
//! - **Log**: batch metrics are averaged over the epoch and appended to
//!   `logs.json`.
//! - **FINALIZE** closes the log, saves `models.save` and returns the fitness:
//!   the mean over the last (up to) 10 epochs of the summed sender and
//!   receiver `test_l1_error`.

pub mod checkpoint;
pub mod episode;
pub mod logfile;

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::agent::{Policy, Role};
use crate::builders::{build_policy, GameBuilder};
use crate::config::ExperimentConfig;
use crate::error::Result;
use crate::game::Game;
use crate::loss::{CircleL1, Loss};
use crate::metrics::{add_metrics, div_metrics, MetricMap};

pub use checkpoint::{Checkpoint, CHECKPOINT_FILE};
pub use episode::{learn, lookahead_blind, play_episode, RoundRules, StepLedger, Trajectory};
pub use logfile::{EpochRecord, LogWriter};

/// Number of trailing epochs the fitness averages over.
pub const FITNESS_WINDOW: usize = 10;

/// Mean of `sender.test_l1_error + recver.test_l1_error` over the last
/// `FITNESS_WINDOW` records (all of them if there are fewer).
pub fn fitness(records: &[EpochRecord]) -> f32 {
    let window = &records[records.len().saturating_sub(FITNESS_WINDOW)..];
    if window.is_empty() {
        return 0.0;
    }
    window.iter().map(|r| r.summed("test_l1_error")).sum::<f32>() / window.len() as f32
}

/// Where to look for a checkpoint: the path itself if it exists, otherwise
/// `results/<loaddir>`.
pub fn resolve_loaddir(loaddir: &Path) -> PathBuf {
    if loaddir.exists() {
        loaddir.to_path_buf()
    } else {
        Path::new("results").join(loaddir)
    }
}

/// Result of a finished run.
#[derive(Clone, Debug)]
pub struct TrainSummary {
    pub fitness: f32,
    pub records: Vec<EpochRecord>,
}

/// One training run: the two agents, both games and the run's RNG.
pub struct Trainer {
    pub config: ExperimentConfig,
    pub sender: Box<dyn Policy>,
    pub recver: Box<dyn Policy>,
    game: Game,
    test_game: Game,
    loss: Box<dyn Loss>,
    l1: CircleL1,
    rng: StdRng,
}

impl Trainer {
    pub fn new(config: ExperimentConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let game = GameBuilder::training(&config).seed(rng.gen()).build()?;
        let test_game = GameBuilder::evaluation(&config).seed(rng.gen()).build()?;
        let sender = build_policy(&config.sender, Role::Sender, config.num_points, config.bias, &mut rng)?;
        let recver = build_policy(&config.recver, Role::Recver, config.num_points, config.bias, &mut rng)?;

        Ok(Trainer {
            loss: config.loss.build(config.num_points),
            l1: CircleL1::new(config.num_points),
            config,
            sender,
            recver,
            game,
            test_game,
            rng,
        })
    }

    /// Restore both agents from `<dir>/models.save`. Returns whether a
    /// checkpoint was found; a missing one leaves the fresh parameters.
    pub fn load_checkpoint(&mut self, dir: &Path) -> Result<bool> {
        let path = dir.join(CHECKPOINT_FILE);
        match Checkpoint::load(&path)? {
            Some(checkpoint) => {
                checkpoint.restore(self.sender.as_mut(), self.recver.as_mut())?;
                tracing::info!("loaded checkpoint {}", path.display());
                Ok(true)
            }
            None => {
                tracing::info!("no checkpoint at {}, starting from scratch", path.display());
                Ok(false)
            }
        }
    }

    pub fn save_checkpoint(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CHECKPOINT_FILE);
        Checkpoint::capture(self.sender.as_ref(), self.recver.as_ref()).save(&path)?;
        tracing::info!("saved checkpoint {}", path.display());
        Ok(())
    }

    /// All training batches of one epoch; metrics averaged over the batches.
    pub fn train_epoch(&mut self) -> Result<(MetricMap, MetricMap)> {
        let rules = RoundRules {
            loss: self.loss.as_ref(),
            grounded: self.config.grounded,
            report: None,
            learning: true,
        };
        let mut sender_logs = MetricMap::new();
        let mut recver_logs = MetricMap::new();
        let num_batches = self.game.num_batches;

        for (b, batch) in self.game.batches().enumerate() {
            let trajectory =
                play_episode(self.sender.as_mut(), self.recver.as_mut(), &batch, &rules, &mut self.rng)?;
            let (mut send, mut recv) = learn(self.sender.as_mut(), self.recver.as_mut())?;
            send.insert("error".to_string(), trajectory.sender_error());
            recv.insert("error".to_string(), trajectory.recver_error());
            tracing::debug!(batch = b, sender_error = send["error"], recver_error = recv["error"], "train batch");

            sender_logs = add_metrics(&sender_logs, &send);
            recver_logs = add_metrics(&recver_logs, &recv);
        }

        Ok((div_metrics(&sender_logs, num_batches), div_metrics(&recver_logs, num_batches)))
    }

    /// Play the held-out batch without learning. Adds `test_error` and
    /// `test_l1_error` for both agents.
    pub fn evaluate(&mut self, sender_logs: &mut MetricMap, recver_logs: &mut MetricMap) -> Result<()> {
        let rules = RoundRules {
            loss: self.loss.as_ref(),
            grounded: self.config.grounded,
            report: Some(&self.l1),
            learning: false,
        };
        let num_batches = self.test_game.num_batches as f32;
        let (mut send_test, mut recv_test, mut send_l1, mut recv_l1) = (0.0, 0.0, 0.0, 0.0);

        for batch in self.test_game.batches() {
            let trajectory =
                play_episode(self.sender.as_mut(), self.recver.as_mut(), &batch, &rules, &mut self.rng)?;
            send_test += trajectory.sender_error();
            recv_test += trajectory.recver_error();
            send_l1 += trajectory.sender_l1_error();
            recv_l1 += trajectory.recver_l1_error();
        }

        sender_logs.insert("test_error".to_string(), send_test / num_batches);
        recver_logs.insert("test_error".to_string(), recv_test / num_batches);
        sender_logs.insert("test_l1_error".to_string(), send_l1 / num_batches);
        recver_logs.insert("test_l1_error".to_string(), recv_l1 / num_batches);
        Ok(())
    }

    /// Run every epoch and finalize. Consumes the trainer.
    pub fn run(mut self) -> Result<TrainSummary> {
        let savedir = self.config.savedir.clone();
        let mut logfile = match &savedir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                self.config.save(dir.join("config.json"))?;
                Some(LogWriter::create(dir.join("logs.json"))?)
            }
            None => None,
        };

        if let Some(loaddir) = self.config.loaddir.clone() {
            self.load_checkpoint(&resolve_loaddir(&loaddir))?;
        }

        let mut records = Vec::with_capacity(self.config.num_epochs);
        for epoch in 0..self.config.num_epochs {
            let (mut sender_logs, mut recver_logs) = self.train_epoch()?;
            self.evaluate(&mut sender_logs, &mut recver_logs)?;

            let get = |logs: &MetricMap, name: &str| logs.get(name).copied().unwrap_or(0.0);
            tracing::info!("EPOCH {}", epoch);
            tracing::info!("ERROR {:2.2} {:2.2}", get(&sender_logs, "error"), get(&recver_logs, "error"));
            tracing::info!("LOSS  {:2.2} {:2.2}", get(&sender_logs, "loss"), get(&recver_logs, "loss"));
            tracing::info!("TEST  {:2.2} {:2.2}", get(&sender_logs, "test_error"), get(&recver_logs, "test_error"));
            tracing::info!(
                "L1    {:2.2} {:2.2}",
                get(&sender_logs, "test_l1_error"),
                get(&recver_logs, "test_l1_error")
            );

            let record = EpochRecord {
                epoch,
                sender: sender_logs,
                recver: recver_logs,
            };
            if let Some(writer) = logfile.as_mut() {
                writer.append(&record)?;
            }
            records.push(record);
        }

        if let Some(writer) = logfile.take() {
            writer.finish()?;
        }
        if let Some(dir) = &savedir {
            self.save_checkpoint(dir)?;
        }

        let fitness = fitness(&records);
        tracing::info!("Game Over: {:2.2}", fitness);
        Ok(TrainSummary { fitness, records })
    }
}

/// Build a trainer from `config`, run it, return the fitness.
pub fn train(config: ExperimentConfig) -> Result<f32> {
    Ok(Trainer::new(config)?.run()?.fitness)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(epoch: usize, l1: f32) -> EpochRecord {
        let mut sender = MetricMap::new();
        sender.insert("test_l1_error".to_string(), l1);
        let mut recver = MetricMap::new();
        recver.insert("test_l1_error".to_string(), 2.0 * l1);
        EpochRecord { epoch, sender, recver }
    }

    #[test]
    fn test_fitness_uses_last_ten() {
        let records: Vec<EpochRecord> = (0..12).map(|e| record(e, if e < 2 { 100.0 } else { 1.0 })).collect();
        assert!((fitness(&records) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_fitness_with_few_epochs() {
        let records = vec![record(0, 1.0), record(1, 2.0)];
        assert!((fitness(&records) - 4.5).abs() < 1e-6);
    }
}
