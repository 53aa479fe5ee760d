use ndarray::{concatenate, Array1, Array2, Axis};
use rand::rngs::StdRng;

use crate::agent::gradient::{
    check_shape, gaussian_network, linear_network, mean_entropy, network_gradients, reinforce_output_grad,
    summed_scores, validate_common, RoundRecord,
};
use crate::agent::{
    Feedback, GaussianHead, Observation, OpponentSnapshot, Parameters, PendingUpdate, Policy, PolicyBase, Role, Step,
    UpdateKind,
};
use crate::error::{SelfishError, Result};
use crate::metrics::{MetricLog, MetricMap};
use crate::network::NeuralNetwork;
use crate::optimizer::OptimizerWrapper;

/// Actor-Critic Agent implementing the A2C algorithm
///
/// The actor is a Gaussian head on the joint features (own input plus the
/// previous round's message and action); the critic is a linear value
/// estimate on the same features. The advantage `G_t - V(x_t)` weights the
/// actor's score and is treated as a constant there.
pub struct A2CAgent {
    base: PolicyBase,
    /// Actor network that outputs the action distribution
    pub actor: NeuralNetwork,
    /// Critic network that estimates state values
    pub critic: NeuralNetwork,
    pub head: GaussianHead,
    pub lr: f32,
    /// Entropy coefficient for exploration
    pub ent_reg: f32,
    /// Value loss coefficient
    pub value_coeff: f32,
    rounds: Vec<RoundRecord<Array1<f32>>>,
}

impl A2CAgent {
    fn values(&self, features: &Array2<f32>) -> Array1<f32> {
        self.critic.predict(features.view()).column(0).to_owned()
    }

    /// Per round under the current actor: (d log p / d output, d H / d output, log p, H)
    fn actor_terms(&self) -> Vec<(Array2<f32>, Array2<f32>, Array1<f32>, Array1<f32>)> {
        self.rounds
            .iter()
            .map(|round| {
                let params = self.head.params(self.actor.predict(round.features.view()).view());
                (
                    self.head.log_prob_grad(&params, &round.taken),
                    self.head.entropy_grad(&params),
                    self.head.log_prob(&params, &round.taken),
                    self.head.entropy(&params),
                )
            })
            .collect()
    }

    fn critic_size(&self) -> usize {
        self.critic.layers.iter().map(|l| l.weights.len() + l.biases.len()).sum()
    }
}

impl Policy for A2CAgent {
    fn role(&self) -> Role {
        self.base.role
    }

    fn name(&self) -> &'static str {
        "actor_critic"
    }

    fn act(&mut self, observation: &Observation, rng: &mut StdRng) -> Result<Step> {
        self.base.begin_round();
        let features = observation.features();
        let params = self.head.params(self.actor.predict(features.view()).view());
        let samples = self.head.sample(&params, rng)?;

        let step = Step {
            action: self.head.action(&samples),
            log_prob: self.head.log_prob(&params, &samples),
            entropy: self.head.entropy(&params),
        };
        self.rounds.push(RoundRecord {
            features,
            taken: samples,
            entropy: step.entropy.clone(),
        });
        Ok(step)
    }

    fn record(&mut self, feedback: Feedback) -> Result<()> {
        self.base.record(feedback)
    }

    /// Actor scores followed by zeros for the critic, matching the layout of
    /// `PendingUpdate::flat_gradient`.
    fn snapshot(&self) -> Result<OpponentSnapshot> {
        let log_prob_grads: Vec<Array2<f32>> = self.actor_terms().into_iter().map(|(g, _, _, _)| g).collect();
        let batch_size = self.rounds.first().map(|r| r.features.nrows()).unwrap_or(0);
        let scores = match summed_scores(&self.rounds, &log_prob_grads) {
            Some(actor) => {
                let critic = Array2::zeros((actor.nrows(), self.critic_size()));
                Some(
                    concatenate(Axis(1), &[actor.view(), critic.view()])
                        .map_err(|e| SelfishError::dimension_mismatch("score rows", e.to_string()))?,
                )
            }
            None => None,
        };
        Ok(OpponentSnapshot {
            scores,
            returns: self.base.episode_returns(batch_size),
        })
    }

    fn loss(&mut self, _opponent: &OpponentSnapshot) -> Result<PendingUpdate> {
        let rounds = self.base.check_episode(self.rounds.len())?;
        let returns = self.base.returns();
        let scale = 1.0 / rounds as f32;

        let mut actor_loss = 0.0;
        let mut critic_loss = 0.0;
        let mut entropy_sum = 0.0;
        let mut actor_grads = Vec::with_capacity(rounds);
        let mut critic_grads = Vec::with_capacity(rounds);

        for ((round, (log_prob_grad, entropy_grad, log_prob, round_entropy)), g) in
            self.rounds.iter().zip(self.actor_terms()).zip(&returns)
        {
            let n = g.len() as f32;
            let advantage = g - &self.values(&round.features);

            actor_loss -= (&log_prob * &advantage).mean().unwrap_or(0.0) * scale;
            critic_loss += self.value_coeff * 0.5 * advantage.mapv(|a| a * a).mean().unwrap_or(0.0) * scale;
            entropy_sum += round_entropy.mean().unwrap_or(0.0);

            actor_grads.push(reinforce_output_grad(&log_prob_grad, &entropy_grad, &advantage, rounds, self.ent_reg));
            critic_grads.push(
                advantage
                    .mapv(|a| -self.value_coeff * a / (n * rounds as f32))
                    .insert_axis(Axis(1)),
            );
        }
        let loss = actor_loss + critic_loss - self.ent_reg * entropy_sum;

        let actor_gradients = network_gradients(&self.actor, &self.rounds, &actor_grads);
        let critic_gradients = network_gradients(&self.critic, &self.rounds, &critic_grads);
        let entropy = mean_entropy(&self.rounds);

        self.base.log_episode();
        let mut metrics = MetricMap::new();
        metrics.insert("loss".to_string(), loss);
        metrics.insert("actor_loss".to_string(), actor_loss);
        metrics.insert("critic_loss".to_string(), critic_loss);
        metrics.insert("entropy".to_string(), entropy);
        self.base.log.record_all(&metrics);

        Ok(PendingUpdate {
            loss,
            metrics,
            kind: UpdateKind::Networks(vec![actor_gradients, critic_gradients]),
        })
    }

    fn step(&mut self, update: PendingUpdate) -> Result<()> {
        match update.kind {
            UpdateKind::Networks(gradients) if gradients.len() == 2 => {
                self.actor.apply_gradients(&gradients[0], self.lr)?;
                self.critic.apply_gradients(&gradients[1], self.lr)
            }
            _ => Err(SelfishError::invariant("actor-critic expects actor and critic gradients")),
        }
    }

    fn reset(&mut self) {
        self.base.reset();
        self.rounds.clear();
    }

    fn log(&self) -> &MetricLog {
        &self.base.log
    }

    fn log_mut(&mut self) -> &mut MetricLog {
        &mut self.base.log
    }

    fn parameters(&self) -> Parameters {
        Parameters::Networks(vec![self.actor.clone(), self.critic.clone()])
    }

    fn load_parameters(&mut self, parameters: Parameters) -> Result<()> {
        match parameters {
            Parameters::Networks(networks) if networks.len() == 2 => {
                let mut networks = networks.into_iter();
                if let (Some(actor), Some(critic)) = (networks.next(), networks.next()) {
                    check_shape(&self.actor, &actor)?;
                    check_shape(&self.critic, &critic)?;
                    self.actor = actor;
                    self.critic = critic;
                }
                Ok(())
            }
            _ => Err(SelfishError::invalid_parameter("parameters", "expected actor and critic networks")),
        }
    }
}

/// Builder pattern for A2CAgent
pub struct A2CBuilder {
    role: Role,
    num_actions: usize,
    optimizer: Option<OptimizerWrapper>,
    lr: f32,
    gamma: f32,
    ent_reg: f32,
    value_coeff: f32,
    min_std: f32,
}

impl A2CBuilder {
    pub fn new(role: Role, num_actions: usize) -> Self {
        A2CBuilder {
            role,
            num_actions,
            optimizer: None,
            lr: 1e-3,
            gamma: 0.99,
            ent_reg: 0.01,
            value_coeff: 1.0,
            min_std: 0.1,
        }
    }

    pub fn optimizer(mut self, optimizer: OptimizerWrapper) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn lr(mut self, lr: f32) -> Self {
        self.lr = lr;
        self
    }

    pub fn gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn entropy_coeff(mut self, coeff: f32) -> Self {
        self.ent_reg = coeff;
        self
    }

    pub fn value_coeff(mut self, coeff: f32) -> Self {
        self.value_coeff = coeff;
        self
    }

    pub fn min_std(mut self, min_std: f32) -> Self {
        self.min_std = min_std;
        self
    }

    pub fn build(self, rng: &mut StdRng) -> Result<A2CAgent> {
        let optimizer = self.optimizer.ok_or_else(|| SelfishError::InvalidParameter {
            name: "optimizer".to_string(),
            reason: "Optimizer not specified".to_string(),
        })?;
        validate_common(self.lr, self.min_std)?;

        Ok(A2CAgent {
            base: PolicyBase::new(self.role, self.gamma),
            actor: gaussian_network(optimizer.clone(), rng),
            critic: linear_network(1, optimizer, rng),
            head: GaussianHead {
                num_actions: self.num_actions,
                min_std: self.min_std,
                clamp_mean: false,
            },
            lr: self.lr,
            ent_reg: self.ent_reg,
            value_coeff: self.value_coeff,
            rounds: Vec::new(),
        })
    }
}
