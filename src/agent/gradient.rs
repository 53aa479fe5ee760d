//! Score-function (REINFORCE) agents and the Gaussian head they share with
//! the actor-critic.
//!
//! Both policies are a single linear layer on [`Observation::features`]. All
//! gradients are analytic: for a linear layer the per-sample parameter
//! gradient of any scalar is the outer product of the features with the
//! derivative at the layer output, which is also what the score vectors
//! handed to an opponent-aware peer are built from.

use std::f32::consts::PI;

use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::traits::{
    Feedback, Observation, OpponentSnapshot, Parameters, PendingUpdate, Policy, PolicyBase, Role, Step,
    UpdateKind, FEATURES,
};
use crate::error::{SelfishError, Result};
use crate::metrics::{MetricLog, MetricMap};
use crate::network::{Activation, NeuralNetwork};
use crate::optimizer::OptimizerWrapper;

/// Per-sample flattened gradient of a linear layer.
///
/// Row `i` is laid out like [`Gradients::flatten`](crate::network::Gradients::flatten):
/// `features[i, f] * output_grad[i, k]` at `f * K + k`, then `output_grad[i, k]`
/// for the bias.
pub fn linear_scores(features: ArrayView2<f32>, output_grad: ArrayView2<f32>) -> Array2<f32> {
    let (batch_size, num_features) = features.dim();
    let num_outputs = output_grad.ncols();
    let mut scores = Array2::zeros((batch_size, num_features * num_outputs + num_outputs));
    for i in 0..batch_size {
        let mut row = scores.row_mut(i);
        for f in 0..num_features {
            for k in 0..num_outputs {
                row[f * num_outputs + k] = features[[i, f]] * output_grad[[i, k]];
            }
        }
        for k in 0..num_outputs {
            row[num_features * num_outputs + k] = output_grad[[i, k]];
        }
    }
    scores
}

pub(crate) fn linear_network(outputs: usize, optimizer: OptimizerWrapper, rng: &mut StdRng) -> NeuralNetwork {
    NeuralNetwork::new(&[FEATURES, outputs], &[Activation::Linear], optimizer, rng)
}

/// Linear `(mean, std)` layer whose std output starts at 1 instead of below the floor.
pub(crate) fn gaussian_network(optimizer: OptimizerWrapper, rng: &mut StdRng) -> NeuralNetwork {
    let mut network = linear_network(2, optimizer, rng);
    network.layers[0].biases[1] = 1.0;
    network
}

/// Normal distribution read off two raw outputs: a mean and a standard deviation.
#[derive(Clone, Copy, Debug)]
pub struct GaussianHead {
    pub num_actions: usize,
    pub min_std: f32,
    /// Clamp the mean to `[0, num_actions]`
    pub clamp_mean: bool,
}

/// Distribution parameters for one round, with the masks of the clamps.
pub struct GaussianParams {
    pub mean: Array1<f32>,
    pub std: Array1<f32>,
    mean_mask: Array1<f32>,
    std_mask: Array1<f32>,
}

impl GaussianHead {
    pub fn params(&self, raw: ArrayView2<f32>) -> GaussianParams {
        let upper = self.num_actions as f32;
        let raw_mean = raw.column(0);
        let raw_std = raw.column(1);

        let (mean, mean_mask) = if self.clamp_mean {
            (
                raw_mean.mapv(|m| m.clamp(0.0, upper)),
                raw_mean.mapv(|m| if (0.0..=upper).contains(&m) { 1.0 } else { 0.0 }),
            )
        } else {
            (raw_mean.to_owned(), Array1::ones(raw_mean.len()))
        };
        let std = raw_std.mapv(|s| s.max(self.min_std));
        let std_mask = raw_std.mapv(|s| if s > self.min_std { 1.0 } else { 0.0 });

        GaussianParams { mean, std, mean_mask, std_mask }
    }

    pub fn sample(&self, params: &GaussianParams, rng: &mut StdRng) -> Result<Array1<f32>> {
        let mut samples = Array1::zeros(params.mean.len());
        for (i, (&mean, &std)) in params.mean.iter().zip(params.std.iter()).enumerate() {
            let normal = Normal::new(mean, std)
                .map_err(|e| SelfishError::invalid_parameter("std", e.to_string()))?;
            samples[i] = normal.sample(rng);
        }
        Ok(samples)
    }

    /// Rounded and wrapped onto the circle
    pub fn action(&self, samples: &Array1<f32>) -> Array1<f32> {
        let n = self.num_actions as f32;
        samples.mapv(|x| x.round().rem_euclid(n))
    }

    pub fn log_prob(&self, params: &GaussianParams, samples: &Array1<f32>) -> Array1<f32> {
        let mut log_prob = Array1::zeros(samples.len());
        for i in 0..samples.len() {
            let (mean, std) = (params.mean[i], params.std[i]);
            log_prob[i] = -(samples[i] - mean).powi(2) / (2.0 * std * std) - std.ln() - 0.5 * (2.0 * PI).ln();
        }
        log_prob
    }

    pub fn entropy(&self, params: &GaussianParams) -> Array1<f32> {
        params.std.mapv(|std| 0.5 + 0.5 * (2.0 * PI).ln() + std.ln())
    }

    /// d log p / d raw output, `[batch_size, 2]`
    pub fn log_prob_grad(&self, params: &GaussianParams, samples: &Array1<f32>) -> Array2<f32> {
        let mut grad = Array2::zeros((samples.len(), 2));
        for i in 0..samples.len() {
            let (mean, std) = (params.mean[i], params.std[i]);
            let diff = samples[i] - mean;
            grad[[i, 0]] = diff / (std * std) * params.mean_mask[i];
            grad[[i, 1]] = (diff * diff - std * std) / std.powi(3) * params.std_mask[i];
        }
        grad
    }

    /// d entropy / d raw output, `[batch_size, 2]`
    pub fn entropy_grad(&self, params: &GaussianParams) -> Array2<f32> {
        let mut grad = Array2::zeros((params.std.len(), 2));
        for i in 0..params.std.len() {
            grad[[i, 1]] = params.std_mask[i] / params.std[i];
        }
        grad
    }
}

/// What every score-function agent remembers about a round.
#[derive(Clone, Debug)]
pub(crate) struct RoundRecord<A> {
    pub features: Array2<f32>,
    /// Sampled value (Gaussian) or chosen index (categorical)
    pub taken: A,
    pub entropy: Array1<f32>,
}

pub(crate) fn mean_entropy<A>(rounds: &[RoundRecord<A>]) -> f32 {
    let total: f32 = rounds.iter().map(|r| r.entropy.sum()).sum();
    let count: usize = rounds.iter().map(|r| r.entropy.len()).sum();
    total / count.max(1) as f32
}

/// REINFORCE loss `-(G·log p).mean() - ent_reg · mean_i Σ_t H` and its
/// derivative at the layer output, for one round.
pub(crate) fn reinforce_output_grad(
    log_prob_grad: &Array2<f32>,
    entropy_grad: &Array2<f32>,
    returns: &Array1<f32>,
    rounds: usize,
    ent_reg: f32,
) -> Array2<f32> {
    let n = returns.len() as f32;
    let weight = returns.mapv(|g| -g / (n * rounds as f32)).insert_axis(Axis(1));
    log_prob_grad * &weight - entropy_grad * (ent_reg / n)
}

/// Gaussian REINFORCE with discounted returns and an entropy bonus.
pub struct GaussianPolicyGradient {
    base: PolicyBase,
    pub network: NeuralNetwork,
    pub head: GaussianHead,
    pub lr: f32,
    pub ent_reg: f32,
    rounds: Vec<RoundRecord<Array1<f32>>>,
}

impl GaussianPolicyGradient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: Role,
        num_actions: usize,
        lr: f32,
        gamma: f32,
        ent_reg: f32,
        min_std: f32,
        optimizer: OptimizerWrapper,
        rng: &mut StdRng,
    ) -> Result<Self> {
        validate_common(lr, min_std)?;
        Ok(GaussianPolicyGradient {
            base: PolicyBase::new(role, gamma),
            network: gaussian_network(optimizer, rng),
            head: GaussianHead { num_actions, min_std, clamp_mean: true },
            lr,
            ent_reg,
            rounds: Vec::new(),
        })
    }

    /// (d log p / d output, d H / d output) per recorded round, under the current parameters
    fn output_grads(&self) -> Vec<(Array2<f32>, Array2<f32>)> {
        self.rounds
            .iter()
            .map(|round| {
                let params = self.head.params(self.network.predict(round.features.view()).view());
                (
                    self.head.log_prob_grad(&params, &round.taken),
                    self.head.entropy_grad(&params),
                )
            })
            .collect()
    }
}

pub(crate) fn validate_common(lr: f32, min_std: f32) -> Result<()> {
    if lr <= 0.0 {
        return Err(SelfishError::invalid_parameter("lr", "must be positive"));
    }
    if min_std <= 0.0 {
        return Err(SelfishError::invalid_parameter("min_std", "must be positive"));
    }
    Ok(())
}

/// Σ_t per-sample scores for a linear policy, `None` before any round.
pub(crate) fn summed_scores<A>(rounds: &[RoundRecord<A>], log_prob_grads: &[Array2<f32>]) -> Option<Array2<f32>> {
    rounds
        .iter()
        .zip(log_prob_grads)
        .map(|(round, grad)| linear_scores(round.features.view(), grad.view()))
        .reduce(|acc, s| acc + s)
}

impl Policy for GaussianPolicyGradient {
    fn role(&self) -> Role {
        self.base.role
    }

    fn name(&self) -> &'static str {
        "policy_gradient"
    }

    fn act(&mut self, observation: &Observation, rng: &mut StdRng) -> Result<Step> {
        self.base.begin_round();
        let features = observation.features();
        let params = self.head.params(self.network.predict(features.view()).view());
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

    fn snapshot(&self) -> Result<OpponentSnapshot> {
        let log_prob_grads: Vec<Array2<f32>> = self.output_grads().into_iter().map(|(g, _)| g).collect();
        let batch_size = self.rounds.first().map(|r| r.features.nrows()).unwrap_or(0);
        Ok(OpponentSnapshot {
            scores: summed_scores(&self.rounds, &log_prob_grads),
            returns: self.base.episode_returns(batch_size),
        })
    }

    fn loss(&mut self, _opponent: &OpponentSnapshot) -> Result<PendingUpdate> {
        let rounds = self.base.check_episode(self.rounds.len())?;
        let returns = self.base.returns();

        let mut policy_loss = 0.0;
        let mut entropy_sum = 0.0;
        let mut output_grads = Vec::with_capacity(rounds);
        for ((round, (log_prob_grad, entropy_grad)), g) in self.rounds.iter().zip(self.output_grads()).zip(&returns) {
            let params = self.head.params(self.network.predict(round.features.view()).view());
            let log_prob = self.head.log_prob(&params, &round.taken);
            policy_loss -= (g * &log_prob).mean().unwrap_or(0.0) / rounds as f32;
            entropy_sum += self.head.entropy(&params).mean().unwrap_or(0.0);
            output_grads.push(reinforce_output_grad(&log_prob_grad, &entropy_grad, g, rounds, self.ent_reg));
        }
        let loss = policy_loss - self.ent_reg * entropy_sum;

        let gradients = network_gradients(&self.network, &self.rounds, &output_grads);
        let grad = gradients.global_norm();
        let entropy = mean_entropy(&self.rounds);

        self.base.log_episode();
        self.base.log.record("loss", loss);
        self.base.log.record("grad", grad);
        self.base.log.record("entropy", entropy);

        let mut metrics = MetricMap::new();
        metrics.insert("loss".to_string(), loss);
        metrics.insert("grad".to_string(), grad);
        metrics.insert("entropy".to_string(), entropy);
        Ok(PendingUpdate {
            loss,
            metrics,
            kind: UpdateKind::Networks(vec![gradients]),
        })
    }

    fn step(&mut self, update: PendingUpdate) -> Result<()> {
        step_single(&mut self.network, self.lr, update)
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
        Parameters::Networks(vec![self.network.clone()])
    }

    fn load_parameters(&mut self, parameters: Parameters) -> Result<()> {
        load_single(&mut self.network, parameters)
    }
}

/// Sum over rounds of the backpropagated output gradients.
pub(crate) fn network_gradients<A>(
    network: &NeuralNetwork,
    rounds: &[RoundRecord<A>],
    output_grads: &[Array2<f32>],
) -> crate::network::Gradients {
    let mut gradients = crate::network::Gradients::zeros_like(network);
    for (round, output_grad) in rounds.iter().zip(output_grads) {
        let (_, cache) = network.forward_minibatch(round.features.view());
        let (round_grads, _) = network.backward_minibatch(&cache, output_grad.view());
        gradients.add_assign(&round_grads);
    }
    gradients
}

pub(crate) fn step_single(network: &mut NeuralNetwork, lr: f32, update: PendingUpdate) -> Result<()> {
    match update.kind {
        UpdateKind::Networks(gradients) if gradients.len() == 1 => network.apply_gradients(&gradients[0], lr),
        _ => Err(SelfishError::invariant("expected exactly one network gradient")),
    }
}

pub(crate) fn load_single(network: &mut NeuralNetwork, parameters: Parameters) -> Result<()> {
    match parameters {
        Parameters::Networks(mut networks) if networks.len() == 1 => {
            let loaded = networks.remove(0);
            check_shape(network, &loaded)?;
            *network = loaded;
            Ok(())
        }
        _ => Err(SelfishError::invalid_parameter("parameters", "expected one network")),
    }
}

pub(crate) fn check_shape(expected: &NeuralNetwork, actual: &NeuralNetwork) -> Result<()> {
    let shape = |net: &NeuralNetwork| net.layers.iter().map(|l| l.weights.dim()).collect::<Vec<_>>();
    if shape(expected) != shape(actual) {
        return Err(SelfishError::dimension_mismatch(
            format!("{:?}", shape(expected)),
            format!("{:?}", shape(actual)),
        ));
    }
    Ok(())
}

/// Categorical REINFORCE: one logit per action, softmax, sample an index.
pub struct CategoricalPolicyGradient {
    base: PolicyBase,
    pub network: NeuralNetwork,
    pub lr: f32,
    pub ent_reg: f32,
    num_actions: usize,
    rounds: Vec<RoundRecord<Vec<usize>>>,
}

fn softmax(logits: ArrayView2<f32>) -> Array2<f32> {
    let mut probs = logits.to_owned();
    for mut row in probs.rows_mut() {
        let max = row.iter().fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        row.mapv_inplace(|x| (x - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|x| x / sum);
    }
    probs
}

fn categorical_entropy(probs: &Array2<f32>) -> Array1<f32> {
    probs.map_axis(Axis(1), |row| -row.iter().filter(|&&p| p > 0.0).map(|&p| p * p.ln()).sum::<f32>())
}

impl CategoricalPolicyGradient {
    pub fn new(
        role: Role,
        num_actions: usize,
        lr: f32,
        gamma: f32,
        ent_reg: f32,
        optimizer: OptimizerWrapper,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if lr <= 0.0 {
            return Err(SelfishError::invalid_parameter("lr", "must be positive"));
        }
        Ok(CategoricalPolicyGradient {
            base: PolicyBase::new(role, gamma),
            network: linear_network(num_actions, optimizer, rng),
            lr,
            ent_reg,
            num_actions,
            rounds: Vec::new(),
        })
    }

    pub fn probabilities(&self, features: ArrayView2<f32>) -> Array2<f32> {
        softmax(self.network.predict(features).view())
    }

    /// (d log p / d logits, d H / d logits, log p) for one round
    fn round_grads(&self, round: &RoundRecord<Vec<usize>>) -> (Array2<f32>, Array2<f32>, Array1<f32>) {
        let probs = self.probabilities(round.features.view());
        let entropy = categorical_entropy(&probs);
        let mut log_prob_grad = -&probs;
        let mut entropy_grad = Array2::zeros(probs.dim());
        let mut log_prob = Array1::zeros(probs.nrows());
        for (i, &action) in round.taken.iter().enumerate() {
            log_prob_grad[[i, action]] += 1.0;
            log_prob[i] = probs[[i, action]].max(f32::MIN_POSITIVE).ln();
            for k in 0..self.num_actions {
                let p = probs[[i, k]];
                if p > 0.0 {
                    entropy_grad[[i, k]] = -p * (p.ln() + entropy[i]);
                }
            }
        }
        (log_prob_grad, entropy_grad, log_prob)
    }
}

impl Policy for CategoricalPolicyGradient {
    fn role(&self) -> Role {
        self.base.role
    }

    fn name(&self) -> &'static str {
        "categorical_pg"
    }

    fn act(&mut self, observation: &Observation, rng: &mut StdRng) -> Result<Step> {
        self.base.begin_round();
        let features = observation.features();
        let probs = self.probabilities(features.view());
        let entropy = categorical_entropy(&probs);

        let mut taken = Vec::with_capacity(probs.nrows());
        let mut log_prob = Array1::zeros(probs.nrows());
        for (i, row) in probs.rows().into_iter().enumerate() {
            let u: f32 = rng.gen();
            let mut cumulative = 0.0;
            let mut choice = self.num_actions - 1;
            for (k, &p) in row.iter().enumerate() {
                cumulative += p;
                if u < cumulative {
                    choice = k;
                    break;
                }
            }
            log_prob[i] = row[choice].max(f32::MIN_POSITIVE).ln();
            taken.push(choice);
        }

        let action = Array1::from_iter(taken.iter().map(|&k| k as f32));
        self.rounds.push(RoundRecord {
            features,
            taken,
            entropy: entropy.clone(),
        });
        Ok(Step { action, log_prob, entropy })
    }

    fn record(&mut self, feedback: Feedback) -> Result<()> {
        self.base.record(feedback)
    }

    fn snapshot(&self) -> Result<OpponentSnapshot> {
        let log_prob_grads: Vec<Array2<f32>> = self.rounds.iter().map(|r| self.round_grads(r).0).collect();
        let batch_size = self.rounds.first().map(|r| r.features.nrows()).unwrap_or(0);
        Ok(OpponentSnapshot {
            scores: summed_scores(&self.rounds, &log_prob_grads),
            returns: self.base.episode_returns(batch_size),
        })
    }

    fn loss(&mut self, _opponent: &OpponentSnapshot) -> Result<PendingUpdate> {
        let rounds = self.base.check_episode(self.rounds.len())?;
        let returns = self.base.returns();

        let mut policy_loss = 0.0;
        let mut entropy_sum = 0.0;
        let mut output_grads = Vec::with_capacity(rounds);
        for (round, g) in self.rounds.iter().zip(&returns) {
            let (log_prob_grad, entropy_grad, log_prob) = self.round_grads(round);
            policy_loss -= (g * &log_prob).mean().unwrap_or(0.0) / rounds as f32;
            entropy_sum += categorical_entropy(&self.probabilities(round.features.view())).mean().unwrap_or(0.0);
            output_grads.push(reinforce_output_grad(&log_prob_grad, &entropy_grad, g, rounds, self.ent_reg));
        }
        let loss = policy_loss - self.ent_reg * entropy_sum;

        let gradients = network_gradients(&self.network, &self.rounds, &output_grads);
        let grad = gradients.global_norm();
        let entropy = mean_entropy(&self.rounds);

        self.base.log_episode();
        self.base.log.record("loss", loss);
        self.base.log.record("grad", grad);
        self.base.log.record("entropy", entropy);

        let mut metrics = MetricMap::new();
        metrics.insert("loss".to_string(), loss);
        metrics.insert("grad".to_string(), grad);
        metrics.insert("entropy".to_string(), entropy);
        Ok(PendingUpdate {
            loss,
            metrics,
            kind: UpdateKind::Networks(vec![gradients]),
        })
    }

    fn step(&mut self, update: PendingUpdate) -> Result<()> {
        step_single(&mut self.network, self.lr, update)
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
        Parameters::Networks(vec![self.network.clone()])
    }

    fn load_parameters(&mut self, parameters: Parameters) -> Result<()> {
        load_single(&mut self.network, parameters)
    }
}
