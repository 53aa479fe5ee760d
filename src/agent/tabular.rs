use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::Rng;

use super::traits::{
    Feedback, Observation, OpponentSnapshot, Parameters, PendingUpdate, Policy, PolicyBase, Role, Step,
    UpdateKind,
};
use crate::error::{SelfishError, Result};
use crate::metrics::{MetricLog, MetricMap};

/// How the table is indexed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateMemory {
    /// `(input, prev_message, prev_action)`: `num_actions³ + 1` states
    Episodic,
    /// Current input only: `num_actions + 1` states
    OneShot,
}

impl StateMemory {
    pub fn num_states(&self, num_actions: usize) -> usize {
        match self {
            StateMemory::Episodic => num_actions.pow(3) + 1,
            StateMemory::OneShot => num_actions + 1,
        }
    }
}

/// Epsilon-greedy tabular Q-learning.
///
/// State 0 is the "unknown" state: the first round of an episode (episodic
/// memory) or any observation with a negative component. Every other state
/// is `1 +` the mixed-radix index of the discretised components.
pub struct QLearning {
    base: PolicyBase,
    pub table: Array2<f32>,
    pub alpha: f32,
    pub epsilon: f32,
    num_actions: usize,
    memory: StateMemory,
    states: Vec<Array1<usize>>,
    actions: Vec<Array1<usize>>,
}

impl QLearning {
    fn slot(&self, value: f32) -> usize {
        (value.round() as i64).rem_euclid(self.num_actions as i64) as usize
    }

    /// Table row for batch element `i` of `observation`.
    pub fn state_index(&self, observation: &Observation, i: usize) -> usize {
        let n = self.num_actions;
        let input = observation.input[i];
        match self.memory {
            StateMemory::OneShot => {
                if input < 0.0 {
                    0
                } else {
                    self.slot(input) + 1
                }
            }
            StateMemory::Episodic => {
                let message = observation.prev_message[i];
                let action = observation.prev_action[i];
                if observation.first_round || input < 0.0 || message < 0.0 || action < 0.0 {
                    0
                } else {
                    n * n * self.slot(input) + n * self.slot(message) + self.slot(action) + 1
                }
            }
        }
    }

    /// Index of the first maximal entry of row `state`.
    pub fn greedy_action(&self, state: usize) -> usize {
        self.table
            .row(state)
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |(best, max), (idx, &q)| {
                if q > max {
                    (idx, q)
                } else {
                    (best, max)
                }
            })
            .0
    }

    fn max_value(&self, state: usize) -> f32 {
        self.table.row(state).iter().fold(f32::NEG_INFINITY, |max, &q| max.max(q))
    }

    fn td_target(&self, reward: f32, next: Option<usize>) -> f32 {
        match next {
            Some(next) => reward + self.base.gamma * self.max_value(next),
            None => reward,
        }
    }

    /// One TD step: `Q[s,a] ← (1-α)Q[s,a] + α(r + γ·max Q[s'])`, bootstrap 0
    /// when `next` is terminal. Returns the TD error before the step.
    pub fn td_update(&mut self, state: usize, action: usize, reward: f32, next: Option<usize>) -> f32 {
        let td = self.td_target(reward, next) - self.table[[state, action]];
        self.table[[state, action]] += self.alpha * td;
        td
    }

    pub fn num_states(&self) -> usize {
        self.table.nrows()
    }
}

impl Policy for QLearning {
    fn role(&self) -> Role {
        self.base.role
    }

    fn name(&self) -> &'static str {
        match self.memory {
            StateMemory::Episodic => "naive_q",
            StateMemory::OneShot => "one_shot_q",
        }
    }

    fn act(&mut self, observation: &Observation, rng: &mut StdRng) -> Result<Step> {
        self.base.begin_round();
        let batch_size = observation.batch_size();
        let mut states = Array1::zeros(batch_size);
        let mut actions = Array1::zeros(batch_size);

        for i in 0..batch_size {
            let state = self.state_index(observation, i);
            let action = if rng.gen::<f32>() < self.epsilon {
                rng.gen_range(0..self.num_actions)
            } else {
                self.greedy_action(state)
            };
            states[i] = state;
            actions[i] = action;
        }

        let step = Step::deterministic(actions.mapv(|a| a as f32));
        self.states.push(states);
        self.actions.push(actions);
        Ok(step)
    }

    fn record(&mut self, feedback: Feedback) -> Result<()> {
        self.base.record(feedback)
    }

    fn snapshot(&self) -> Result<OpponentSnapshot> {
        let batch_size = self.states.first().map(Array1::len).unwrap_or(0);
        Ok(OpponentSnapshot {
            scores: None,
            returns: self.base.episode_returns(batch_size),
        })
    }

    fn loss(&mut self, _opponent: &OpponentSnapshot) -> Result<PendingUpdate> {
        let rounds = self.base.check_episode(self.states.len())?;
        let mut transitions = Vec::new();

        for t in 0..rounds {
            let reward = &self.base.rewards[t];
            for i in 0..reward.len() {
                let next = (t + 1 < rounds).then(|| self.states[t + 1][i]);
                transitions.push((self.states[t][i], self.actions[t][i], reward[i], next));
            }
        }

        let tds: Vec<f32> = transitions
            .iter()
            .map(|&(s, a, r, next)| self.td_target(r, next) - self.table[[s, a]])
            .collect();
        let count = tds.len().max(1) as f32;
        let loss = tds.iter().map(|td| td * td).sum::<f32>() / count;
        let td_error = tds.iter().map(|td| td.abs()).sum::<f32>() / count;

        self.base.log_episode();
        self.base.log.record("td_error", td_error);

        let mut metrics = MetricMap::new();
        metrics.insert("loss".to_string(), loss);
        metrics.insert("td_error".to_string(), td_error);
        Ok(PendingUpdate {
            loss,
            metrics,
            kind: UpdateKind::Table(transitions),
        })
    }

    fn step(&mut self, update: PendingUpdate) -> Result<()> {
        match update.kind {
            UpdateKind::Table(transitions) => {
                for (state, action, reward, next) in transitions {
                    self.td_update(state, action, reward, next);
                }
                Ok(())
            }
            _ => Err(SelfishError::invariant("Q-learning expects a table update")),
        }
    }

    fn reset(&mut self) {
        self.base.reset();
        self.states.clear();
        self.actions.clear();
    }

    fn log(&self) -> &MetricLog {
        &self.base.log
    }

    fn log_mut(&mut self) -> &mut MetricLog {
        &mut self.base.log
    }

    fn parameters(&self) -> Parameters {
        Parameters::Table(self.table.clone())
    }

    fn load_parameters(&mut self, parameters: Parameters) -> Result<()> {
        match parameters {
            Parameters::Table(table) if table.dim() == self.table.dim() => {
                self.table = table;
                Ok(())
            }
            Parameters::Table(table) => Err(SelfishError::dimension_mismatch(
                format!("{:?}", self.table.dim()),
                format!("{:?}", table.dim()),
            )),
            _ => Err(SelfishError::invalid_parameter("parameters", "expected a Q-table")),
        }
    }
}

/// Builder pattern for QLearning
pub struct QLearningBuilder {
    role: Role,
    num_actions: usize,
    memory: StateMemory,
    alpha: f32,
    gamma: f32,
    epsilon: f32,
}

impl QLearningBuilder {
    pub fn new(role: Role, num_actions: usize) -> Self {
        QLearningBuilder {
            role,
            num_actions,
            memory: StateMemory::Episodic,
            alpha: 0.1,
            gamma: 0.9,
            epsilon: 0.1,
        }
    }

    pub fn memory(mut self, memory: StateMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn epsilon(mut self, epsilon: f32) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn build(self, rng: &mut StdRng) -> Result<QLearning> {
        if self.num_actions == 0 {
            return Err(SelfishError::invalid_parameter("num_points", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.epsilon) {
            return Err(SelfishError::invalid_parameter("epsilon", "must lie in [0, 1]"));
        }
        if self.alpha <= 0.0 || self.alpha > 1.0 {
            return Err(SelfishError::invalid_parameter("alpha", "must lie in (0, 1]"));
        }

        let num_states = self.memory.num_states(self.num_actions);
        let table = Array2::random_using((num_states, self.num_actions), Uniform::new(0.0, 1.0), rng);

        Ok(QLearning {
            base: PolicyBase::new(self.role, self.gamma),
            table,
            alpha: self.alpha,
            epsilon: self.epsilon,
            num_actions: self.num_actions,
            memory: self.memory,
            states: Vec::new(),
            actions: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;

    fn agent(memory: StateMemory) -> QLearning {
        let mut rng = StdRng::seed_from_u64(0);
        QLearningBuilder::new(Role::Sender, 4)
            .memory(memory)
            .alpha(0.5)
            .gamma(0.9)
            .epsilon(0.0)
            .build(&mut rng)
            .unwrap()
    }

    #[test]
    fn test_state_index() {
        let q = agent(StateMemory::Episodic);
        let first = Observation::first(array![2.0]);
        assert_eq!(q.state_index(&first, 0), 0);

        let mut later = first.clone();
        later.first_round = false;
        later.prev_message = array![1.0];
        later.prev_action = array![3.0];
        assert_eq!(q.state_index(&later, 0), 16 * 2 + 4 + 3 + 1);

        later.prev_action = array![-1.0];
        assert_eq!(q.state_index(&later, 0), 0);

        let one_shot = agent(StateMemory::OneShot);
        assert_eq!(one_shot.num_states(), 5);
        assert_eq!(one_shot.state_index(&first, 0), 3);
    }

    #[test]
    fn test_greedy_picks_first_max() {
        let mut q = agent(StateMemory::OneShot);
        q.table.row_mut(1).assign(&array![0.2, 0.7, 0.7, 0.1]);
        assert_eq!(q.greedy_action(1), 1);
    }

    #[test]
    fn test_invalid_epsilon_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(QLearningBuilder::new(Role::Recver, 4).epsilon(1.5).build(&mut rng).is_err());
    }

    #[test]
    fn test_wrong_update_kind_rejected() {
        let mut q = agent(StateMemory::OneShot);
        assert!(q.step(PendingUpdate::frozen(MetricMap::new())).is_err());
    }
}
