//! # The repeated signalling game
//!
//! A [`Game`] hands out batches of private targets. Every batch holds, for each
//! round of the episode, one target per batch element for the sender and one
//! for the receiver. With a non-zero `bias` the receiver's target is the
//! sender's target shifted around the circle, which is what makes the two
//! agents' incentives diverge.
//!
//! Iterating a game (`for batch in &mut game`) yields exactly `num_batches`
//! batches and then stops; iterating again starts over. A training game draws
//! fresh targets every time, an evaluation game replays the batches it drew
//! when it was built.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{SelfishError, Result};

/// Targets for one batch of episodes: `num_rounds` arrays of `batch_size` values per agent.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub sender_targets: Vec<Array1<f32>>,
    pub recver_targets: Vec<Array1<f32>>,
}

impl Batch {
    pub fn num_rounds(&self) -> usize {
        self.sender_targets.len()
    }

    pub fn batch_size(&self) -> usize {
        self.sender_targets.first().map(Array1::len).unwrap_or(0)
    }
}

pub struct Game {
    pub num_batches: usize,
    pub num_rounds: usize,
    pub batch_size: usize,
    pub num_points: usize,
    pub bias: f32,
    pub training: bool,
    rng: StdRng,
    fixed: Vec<Batch>,
}

impl Game {
    pub fn new(
        num_batches: usize,
        num_rounds: usize,
        batch_size: usize,
        num_points: usize,
        bias: f32,
        training: bool,
        seed: u64,
    ) -> Result<Self> {
        for (name, value) in [
            ("num_batches", num_batches),
            ("num_rounds", num_rounds),
            ("batch_size", batch_size),
            ("num_points", num_points),
        ] {
            if value == 0 {
                return Err(SelfishError::invalid_parameter(name, "must be at least 1"));
            }
        }

        let mut game = Game {
            num_batches,
            num_rounds,
            batch_size,
            num_points,
            bias,
            training,
            rng: StdRng::seed_from_u64(seed),
            fixed: Vec::new(),
        };

        if !training {
            game.fixed = (0..num_batches).map(|_| game.sample_batch()).collect();
        }

        Ok(game)
    }

    /// Draw a fresh batch: uniform integer targets in `[0, num_points)`.
    fn sample_batch(&mut self) -> Batch {
        let n = self.num_points as f32;
        let mut sender_targets = Vec::with_capacity(self.num_rounds);
        let mut recver_targets = Vec::with_capacity(self.num_rounds);

        for _ in 0..self.num_rounds {
            let send = Array1::from_shape_fn(self.batch_size, |_| {
                self.rng.gen_range(0..self.num_points) as f32
            });
            let recv = send.mapv(|t| (t + self.bias).rem_euclid(n));
            sender_targets.push(send);
            recver_targets.push(recv);
        }

        Batch {
            sender_targets,
            recver_targets,
        }
    }

    /// Batch number `index` of the current pass.
    pub fn next_batch(&mut self, index: usize) -> Batch {
        if self.training {
            self.sample_batch()
        } else {
            self.fixed[index % self.fixed.len()].clone()
        }
    }

    /// One pass over the game: exactly `num_batches` batches.
    pub fn batches(&mut self) -> Batches<'_> {
        Batches { game: self, index: 0 }
    }
}

pub struct Batches<'a> {
    game: &'a mut Game,
    index: usize,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.index >= self.game.num_batches {
            return None;
        }
        let batch = self.game.next_batch(self.index);
        self.index += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.game.num_batches - self.index;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}

impl<'a> IntoIterator for &'a mut Game {
    type Item = Batch;
    type IntoIter = Batches<'a>;

    fn into_iter(self) -> Batches<'a> {
        self.batches()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_is_finite_and_restartable() {
        let mut game = Game::new(3, 2, 4, 8, 0.0, true, 7).unwrap();
        assert_eq!((&mut game).into_iter().count(), 3);
        assert_eq!(game.batches().count(), 3);
    }

    #[test]
    fn test_batch_shapes_and_range() {
        let mut game = Game::new(1, 5, 16, 8, 0.0, true, 1).unwrap();
        let batch = game.batches().next().unwrap();
        assert_eq!(batch.num_rounds(), 5);
        assert_eq!(batch.batch_size(), 16);
        for round in &batch.sender_targets {
            assert!(round.iter().all(|&t| (0.0..8.0).contains(&t) && t.fract() == 0.0));
        }
        assert_eq!(batch.sender_targets, batch.recver_targets);
    }

    #[test]
    fn test_bias_shifts_receiver_targets() {
        let mut game = Game::new(1, 3, 10, 8, 3.0, true, 2).unwrap();
        let batch = game.batches().next().unwrap();
        for (send, recv) in batch.sender_targets.iter().zip(&batch.recver_targets) {
            for (&s, &r) in send.iter().zip(recv.iter()) {
                assert_eq!(r, (s + 3.0) % 8.0);
            }
        }
    }

    #[test]
    fn test_evaluation_game_replays_fixed_batches() {
        let mut game = Game::new(1, 2, 100, 36, 0.0, false, 3).unwrap();
        let first: Vec<Batch> = game.batches().collect();
        let second: Vec<Batch> = game.batches().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        assert!(Game::new(0, 2, 4, 8, 0.0, true, 0).is_err());
        assert!(Game::new(1, 2, 4, 0, 0.0, true, 0).is_err());
    }
}
