use ndarray::{concatenate, Array1, Array2, Axis};
use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::algorithms::discount_return;
use crate::error::{SelfishError, Result};
use crate::metrics::{MetricLog, MetricMap};
use crate::network::{Gradients, NeuralNetwork};

/// Number of columns in [`Observation::features`].
pub const FEATURES: usize = 6;

/// Which side of the game an agent plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Recver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Recver => "recver",
        }
    }
}

/// What an agent sees at the start of a round, one entry per batch element.
///
/// `input` is the private target for the sender and the sender's message for
/// the receiver; `prev_input` is the same quantity one round earlier. In the
/// first round every `prev_*` array is zero and `first_round` is set.
#[derive(Clone, Debug)]
pub struct Observation {
    pub input: Array1<f32>,
    pub prev_input: Array1<f32>,
    pub prev_message: Array1<f32>,
    pub prev_action: Array1<f32>,
    pub prev_error: Array1<f32>,
    pub first_round: bool,
}

impl Observation {
    /// Observation for round 0: nothing has happened yet.
    pub fn first(input: Array1<f32>) -> Self {
        let zeros = Array1::zeros(input.len());
        Observation {
            prev_input: zeros.clone(),
            prev_message: zeros.clone(),
            prev_action: zeros.clone(),
            prev_error: zeros,
            input,
            first_round: true,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.input.len()
    }

    /// `[batch_size, FEATURES]` matrix fed to parametric policies.
    pub fn features(&self) -> Array2<f32> {
        let first = if self.first_round { 1.0 } else { 0.0 };
        let columns = [
            self.input.view(),
            self.prev_input.view(),
            self.prev_message.view(),
            self.prev_action.view(),
            self.prev_error.view(),
        ];
        let mut features = Array2::from_elem((self.batch_size(), FEATURES), first);
        for (j, column) in columns.iter().enumerate() {
            features.column_mut(j).assign(column);
        }
        features
    }
}

/// Output of one `act` call.
#[derive(Clone, Debug)]
pub struct Step {
    pub action: Array1<f32>,
    pub log_prob: Array1<f32>,
    pub entropy: Array1<f32>,
}

impl Step {
    /// A step with no distribution behind it: zero log-probability and entropy.
    pub fn deterministic(action: Array1<f32>) -> Self {
        let zeros = Array1::zeros(action.len());
        Step {
            action,
            log_prob: zeros.clone(),
            entropy: zeros,
        }
    }
}

/// Per-round outcome handed back to an agent after both players moved.
#[derive(Clone, Debug)]
pub struct Feedback {
    /// The agent's error this round (its reward is the negation)
    pub error: Array1<f32>,
    /// d error / d (this agent's own output), for pathwise-gradient agents
    pub error_grad: Array1<f32>,
}

/// What an agent exposes to an opponent-aware peer before either of them steps.
#[derive(Clone, Debug)]
pub struct OpponentSnapshot {
    /// Per batch element, Σ_t ∇θ log π(a_t | x_t) under the current parameters.
    /// `None` for agents without a score function.
    pub scores: Option<Array2<f32>>,
    /// Per batch element discounted episode return G_0.
    pub returns: Array1<f32>,
}

/// The parameter change an agent computed in `loss`, applied later in `step`.
#[derive(Clone, Debug)]
pub enum UpdateKind {
    /// Nothing to apply
    Frozen,
    /// One gradient set per owned network, in the agent's network order
    Networks(Vec<Gradients>),
    /// Tabular transitions `(state, action, reward, next_state)` to apply in order
    Table(Vec<(usize, usize, f32, Option<usize>)>),
}

#[derive(Clone, Debug)]
pub struct PendingUpdate {
    pub loss: f32,
    pub metrics: MetricMap,
    pub kind: UpdateKind,
}

impl PendingUpdate {
    pub fn frozen(metrics: MetricMap) -> Self {
        PendingUpdate {
            loss: 0.0,
            metrics,
            kind: UpdateKind::Frozen,
        }
    }

    /// All network gradients concatenated in network order, if this is a gradient update.
    pub fn flat_gradient(&self) -> Option<Array1<f32>> {
        match &self.kind {
            UpdateKind::Networks(gradients) => {
                let parts: Vec<Array1<f32>> = gradients.iter().map(Gradients::flatten).collect();
                let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
                concatenate(Axis(0), &views).ok()
            }
            _ => None,
        }
    }

    /// Add `delta` (laid out as in `flat_gradient`) to the gradients.
    pub fn add_flat(&mut self, delta: &Array1<f32>) -> Result<()> {
        let UpdateKind::Networks(gradients) = &mut self.kind else {
            return Err(SelfishError::invariant("only gradient updates can be adjusted"));
        };
        let total: usize = gradients.iter().map(Gradients::len).sum();
        if total != delta.len() {
            return Err(SelfishError::dimension_mismatch(
                format!("{} parameters", total),
                format!("{}", delta.len()),
            ));
        }
        let mut offset = 0;
        for grads in gradients.iter_mut() {
            let n = grads.len();
            let part = grads.unflatten_like(&delta.slice(ndarray::s![offset..offset + n]).to_owned())?;
            grads.add_assign(&part);
            offset += n;
        }
        Ok(())
    }
}

/// Learned state of an agent, as stored in a checkpoint.
#[derive(Clone, Serialize, Deserialize)]
pub enum Parameters {
    Empty,
    Networks(Vec<NeuralNetwork>),
    Table(Array2<f32>),
}

/// Common interface of every sender and receiver.
///
/// One episode is: `act`/`record` once per round, then `loss` (which computes
/// but does not apply the parameter change), then `step`, then `reset`.
/// `update` chains the last three for callers that do not need to interleave
/// two agents.
pub trait Policy {
    fn role(&self) -> Role;

    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    /// Choose this round's output for every batch element
    fn act(&mut self, observation: &Observation, rng: &mut StdRng) -> Result<Step>;

    /// d output / d input of the last `act`, if the output depends
    /// differentiably on the input
    fn input_sensitivity(&self) -> Option<Array1<f32>> {
        None
    }

    /// Accumulate this round's outcome
    fn record(&mut self, feedback: Feedback) -> Result<()>;

    /// Score functions and returns under the current (pre-step) parameters
    fn snapshot(&self) -> Result<OpponentSnapshot>;

    /// Whether `loss` looks at the opponent snapshot
    fn is_opponent_aware(&self) -> bool {
        false
    }

    /// Compute the episode loss and the parameter change, without applying it
    fn loss(&mut self, opponent: &OpponentSnapshot) -> Result<PendingUpdate>;

    /// Apply a change computed by `loss`: exactly one optimizer step
    fn step(&mut self, update: PendingUpdate) -> Result<()>;

    /// Clear every per-episode buffer
    fn reset(&mut self);

    fn log(&self) -> &MetricLog;

    fn log_mut(&mut self) -> &mut MetricLog;

    fn parameters(&self) -> Parameters;

    fn load_parameters(&mut self, parameters: Parameters) -> Result<()>;

    fn update(&mut self, opponent: &OpponentSnapshot) -> Result<(f32, MetricMap)> {
        let update = self.loss(opponent)?;
        let result = (update.loss, update.metrics.clone());
        self.step(update)?;
        self.reset();
        Ok(result)
    }
}

/// Per-episode bookkeeping every policy shares: rewards, pathwise error
/// gradients, the number of rounds acted and the metric log.
#[derive(Clone, Debug)]
pub struct PolicyBase {
    pub role: Role,
    pub gamma: f32,
    pub rewards: Vec<Array1<f32>>,
    pub error_grads: Vec<Array1<f32>>,
    rounds_acted: usize,
    pub log: MetricLog,
}

impl PolicyBase {
    pub fn new(role: Role, gamma: f32) -> Self {
        PolicyBase {
            role,
            gamma,
            rewards: Vec::new(),
            error_grads: Vec::new(),
            rounds_acted: 0,
            log: MetricLog::new(),
        }
    }

    pub fn begin_round(&mut self) {
        self.rounds_acted += 1;
    }

    pub fn rounds_acted(&self) -> usize {
        self.rounds_acted
    }

    pub fn record(&mut self, feedback: Feedback) -> Result<()> {
        if self.rewards.len() >= self.rounds_acted {
            return Err(SelfishError::invariant(format!(
                "{} received feedback for round {} but acted {} times",
                self.role.as_str(),
                self.rewards.len(),
                self.rounds_acted
            )));
        }
        if feedback.error.len() != feedback.error_grad.len() {
            return Err(SelfishError::dimension_mismatch(
                format!("{} error gradients", feedback.error.len()),
                format!("{}", feedback.error_grad.len()),
            ));
        }
        self.rewards.push(-&feedback.error);
        self.error_grads.push(feedback.error_grad);
        Ok(())
    }

    /// Check the episode is complete and every per-round list has `rounds` entries.
    pub fn check_episode(&self, cached_rounds: usize) -> Result<usize> {
        if self.rewards.is_empty() {
            return Err(SelfishError::EmptyBuffer(format!(
                "{} update called with no recorded rounds",
                self.role.as_str()
            )));
        }
        let rounds = self.rewards.len();
        if rounds != self.rounds_acted || rounds != cached_rounds || rounds != self.error_grads.len() {
            return Err(SelfishError::dimension_mismatch(
                format!("{} rounds in every per-round buffer", rounds),
                format!(
                    "acted {}, cached {}, error gradients {}",
                    self.rounds_acted,
                    cached_rounds,
                    self.error_grads.len()
                ),
            ));
        }
        let batch_size = self.rewards[0].len();
        if self.rewards.iter().any(|r| r.len() != batch_size) {
            return Err(SelfishError::invariant("rounds with different batch sizes"));
        }
        Ok(rounds)
    }

    /// Discounted returns aligned with the recorded rounds
    pub fn returns(&self) -> Vec<Array1<f32>> {
        discount_return(&self.rewards, self.gamma)
    }

    /// Per batch element G_0; zeros (of `batch_size`) before any round was recorded
    pub fn episode_returns(&self, batch_size: usize) -> Array1<f32> {
        self.returns()
            .into_iter()
            .next()
            .unwrap_or_else(|| Array1::zeros(batch_size))
    }

    /// Mean per-round error of the episode
    pub fn mean_error(&self) -> f32 {
        let total: f32 = self.rewards.iter().map(|r| -r.sum()).sum();
        let count: usize = self.rewards.iter().map(Array1::len).sum();
        if count == 0 {
            0.0
        } else {
            total / count as f32
        }
    }

    /// Append episode reward summaries to the log
    pub fn log_episode(&mut self) {
        let per_round: Vec<f32> = self
            .rewards
            .iter()
            .map(|r| r.mean().unwrap_or(0.0))
            .collect();
        let mean = per_round.iter().sum::<f32>() / per_round.len().max(1) as f32;
        self.log.record("ep_reward", mean);
        for (t, value) in per_round.into_iter().enumerate() {
            self.log.record(&format!("round_reward/{}", t), value);
        }
    }

    pub fn reset(&mut self) {
        self.rewards.clear();
        self.error_grads.clear();
        self.rounds_acted = 0;
    }
}
