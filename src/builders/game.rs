use crate::config::ExperimentConfig;
use crate::error::Result;
use crate::game::Game;

/// Builder for [`Game`] with a fluent API
pub struct GameBuilder {
    num_batches: usize,
    num_rounds: usize,
    batch_size: usize,
    num_points: usize,
    bias: f32,
    training: bool,
    seed: u64,
}

impl GameBuilder {
    pub fn new(num_points: usize) -> Self {
        GameBuilder {
            num_batches: 1,
            num_rounds: 1,
            batch_size: 1,
            num_points,
            bias: 0.0,
            training: true,
            seed: 0,
        }
    }

    /// Training game of a run: `num_batches` fresh batches per pass.
    pub fn training(config: &ExperimentConfig) -> Self {
        GameBuilder::new(config.num_points)
            .num_batches(config.num_batches)
            .num_rounds(config.num_rounds)
            .batch_size(config.batch_size)
            .bias(config.bias)
    }

    /// Held-out game of a run: one fixed batch of `test_batch_size`.
    pub fn evaluation(config: &ExperimentConfig) -> Self {
        GameBuilder::new(config.num_points)
            .num_batches(1)
            .num_rounds(config.num_rounds)
            .batch_size(config.test_batch_size)
            .bias(config.bias)
            .training_mode(false)
    }

    pub fn num_batches(mut self, num_batches: usize) -> Self {
        self.num_batches = num_batches;
        self
    }

    pub fn num_rounds(mut self, num_rounds: usize) -> Self {
        self.num_rounds = num_rounds;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn bias(mut self, bias: f32) -> Self {
        self.bias = bias;
        self
    }

    pub fn training_mode(mut self, training: bool) -> Self {
        self.training = training;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn build(self) -> Result<Game> {
        Game::new(
            self.num_batches,
            self.num_rounds,
            self.batch_size,
            self.num_points,
            self.bias,
            self.training,
            self.seed,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_game_uses_test_batch_size() {
        let config = ExperimentConfig {
            batch_size: 4,
            test_batch_size: 50,
            ..ExperimentConfig::default()
        };
        let game = GameBuilder::evaluation(&config).build().unwrap();
        assert_eq!(game.batch_size, 50);
        assert_eq!(game.num_batches, 1);
        assert!(!game.training);

        let game = GameBuilder::training(&config).build().unwrap();
        assert_eq!(game.batch_size, 4);
        assert_eq!(game.num_batches, config.num_batches);
    }

    #[test]
    fn test_training_mode_toggle() {
        let game = GameBuilder::new(8).training_mode(false).build().unwrap();
        assert!(!game.training);
        let game = GameBuilder::new(8).training_mode(false).training_mode(true).build().unwrap();
        assert!(game.training);
    }
}
