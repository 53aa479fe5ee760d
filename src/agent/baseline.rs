use ndarray::Array1;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Uniform};
use serde::{Serialize, Deserialize};

use super::traits::{
    Feedback, Observation, OpponentSnapshot, Parameters, PendingUpdate, Policy, PolicyBase, Role, Step,
    UpdateKind,
};
use crate::error::{SelfishError, Result};
use crate::metrics::{MetricLog, MetricMap};

/// What a no-communication agent emits.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoCommOutput {
    /// The same value for every element, regardless of input
    Fixed(f32),
    /// Echo the input unchanged
    Identity,
}

impl Default for NoCommOutput {
    fn default() -> Self {
        NoCommOutput::Fixed(1.0)
    }
}

/// Baseline without learnable parameters.
pub struct NoComm {
    base: PolicyBase,
    output: NoCommOutput,
    last_batch: usize,
}

impl NoComm {
    pub fn new(role: Role, output: NoCommOutput) -> Self {
        NoComm {
            base: PolicyBase::new(role, 1.0),
            output,
            last_batch: 0,
        }
    }
}

/// Shared `loss` for agents that never learn: validate the episode, log it, change nothing.
fn frozen_update(base: &mut PolicyBase) -> Result<PendingUpdate> {
    let rounds = base.rewards.len();
    base.check_episode(rounds)?;
    base.log_episode();
    let mut metrics = MetricMap::new();
    metrics.insert("loss".to_string(), 0.0);
    Ok(PendingUpdate::frozen(metrics))
}

fn frozen_step(update: PendingUpdate) -> Result<()> {
    match update.kind {
        UpdateKind::Frozen => Ok(()),
        _ => Err(SelfishError::invariant("agent without parameters received a parameter update")),
    }
}

fn frozen_load(parameters: Parameters) -> Result<()> {
    match parameters {
        Parameters::Empty => Ok(()),
        _ => Err(SelfishError::invalid_parameter("parameters", "agent has no learnable parameters")),
    }
}

impl Policy for NoComm {
    fn role(&self) -> Role {
        self.base.role
    }

    fn name(&self) -> &'static str {
        "no_comm"
    }

    fn act(&mut self, observation: &Observation, _rng: &mut StdRng) -> Result<Step> {
        self.base.begin_round();
        self.last_batch = observation.batch_size();
        let action = match self.output {
            NoCommOutput::Fixed(value) => Array1::from_elem(observation.batch_size(), value),
            NoCommOutput::Identity => observation.input.clone(),
        };
        Ok(Step::deterministic(action))
    }

    fn input_sensitivity(&self) -> Option<Array1<f32>> {
        match self.output {
            NoCommOutput::Fixed(_) => None,
            NoCommOutput::Identity => Some(Array1::ones(self.last_batch)),
        }
    }

    fn record(&mut self, feedback: Feedback) -> Result<()> {
        self.base.record(feedback)
    }

    fn snapshot(&self) -> Result<OpponentSnapshot> {
        Ok(OpponentSnapshot {
            scores: None,
            returns: self.base.episode_returns(self.last_batch),
        })
    }

    fn loss(&mut self, _opponent: &OpponentSnapshot) -> Result<PendingUpdate> {
        frozen_update(&mut self.base)
    }

    fn step(&mut self, update: PendingUpdate) -> Result<()> {
        frozen_step(update)
    }

    fn reset(&mut self) {
        self.base.reset();
    }

    fn log(&self) -> &MetricLog {
        &self.base.log
    }

    fn log_mut(&mut self) -> &mut MetricLog {
        &mut self.base.log
    }

    fn parameters(&self) -> Parameters {
        Parameters::Empty
    }

    fn load_parameters(&mut self, parameters: Parameters) -> Result<()> {
        frozen_load(parameters)
    }
}

/// Reports its input plus uniform noise in `[0, bias)`, wrapped onto the circle.
/// One noise draw per round, shared by the whole batch.
pub struct UniformBias {
    base: PolicyBase,
    num_actions: usize,
    noise: Option<Uniform<f32>>,
    last_batch: usize,
}

impl UniformBias {
    pub fn new(role: Role, num_actions: usize, bias: f32) -> Self {
        UniformBias {
            base: PolicyBase::new(role, 1.0),
            num_actions,
            noise: (bias > 0.0).then(|| Uniform::new(0.0, bias)),
            last_batch: 0,
        }
    }
}

impl Policy for UniformBias {
    fn role(&self) -> Role {
        self.base.role
    }

    fn name(&self) -> &'static str {
        "uniform_bias"
    }

    fn act(&mut self, observation: &Observation, rng: &mut StdRng) -> Result<Step> {
        self.base.begin_round();
        self.last_batch = observation.batch_size();
        let n = self.num_actions as f32;
        let shift = self.noise.as_ref().map_or(0.0, |noise| noise.sample(rng));
        let action = observation.input.mapv(|x| (x + shift).rem_euclid(n));
        Ok(Step::deterministic(action))
    }

    fn input_sensitivity(&self) -> Option<Array1<f32>> {
        Some(Array1::ones(self.last_batch))
    }

    fn record(&mut self, feedback: Feedback) -> Result<()> {
        self.base.record(feedback)
    }

    fn snapshot(&self) -> Result<OpponentSnapshot> {
        Ok(OpponentSnapshot {
            scores: None,
            returns: self.base.episode_returns(self.last_batch),
        })
    }

    fn loss(&mut self, _opponent: &OpponentSnapshot) -> Result<PendingUpdate> {
        frozen_update(&mut self.base)
    }

    fn step(&mut self, update: PendingUpdate) -> Result<()> {
        frozen_step(update)
    }

    fn reset(&mut self) {
        self.base.reset();
    }

    fn log(&self) -> &MetricLog {
        &self.base.log
    }

    fn log_mut(&mut self) -> &mut MetricLog {
        &mut self.base.log
    }

    fn parameters(&self) -> Parameters {
        Parameters::Empty
    }

    fn load_parameters(&mut self, parameters: Parameters) -> Result<()> {
        frozen_load(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    #[test]
    fn test_no_comm_fixed_and_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let obs = Observation::first(array![3.0, 5.0]);

        let mut fixed = NoComm::new(Role::Sender, NoCommOutput::default());
        assert_eq!(fixed.act(&obs, &mut rng).unwrap().action, array![1.0, 1.0]);
        assert!(fixed.input_sensitivity().is_none());

        let mut identity = NoComm::new(Role::Recver, NoCommOutput::Identity);
        assert_eq!(identity.act(&obs, &mut rng).unwrap().action, array![3.0, 5.0]);
    }

    #[test]
    fn test_uniform_bias_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut agent = UniformBias::new(Role::Sender, 8, 3.0);
        let obs = Observation::first(array![0.0, 6.0, 7.0]);
        for _ in 0..20 {
            let step = agent.act(&obs, &mut rng).unwrap();
            for (&a, &x) in step.action.iter().zip(obs.input.iter()) {
                assert!((0.0..8.0).contains(&a));
                let shift = (a - x).rem_euclid(8.0);
                assert!(shift < 3.0 + 1e-5);
            }
        }
    }

    #[test]
    fn test_uniform_bias_shares_noise_across_batch() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut agent = UniformBias::new(Role::Sender, 100, 5.0);
        let obs = Observation::first(array![0.0, 10.0, 20.0, 30.0]);
        for _ in 0..10 {
            let step = agent.act(&obs, &mut rng).unwrap();
            let shifts: Vec<f32> = step.action.iter().zip(obs.input.iter()).map(|(&a, &x)| a - x).collect();
            for shift in &shifts {
                assert!((shift - shifts[0]).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_update_without_rounds_fails() {
        let mut agent = NoComm::new(Role::Sender, NoCommOutput::Identity);
        let snapshot = OpponentSnapshot { scores: None, returns: array![] };
        assert!(matches!(agent.update(&snapshot), Err(SelfishError::EmptyBuffer(_))));
    }

    #[test]
    fn test_feedback_without_action_fails() {
        let mut agent = NoComm::new(Role::Recver, NoCommOutput::Identity);
        let feedback = Feedback { error: array![1.0], error_grad: array![0.0] };
        assert!(matches!(agent.record(feedback), Err(SelfishError::InvariantViolation(_))));
    }
}
