use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;

use super::traits::{
    Feedback, Observation, OpponentSnapshot, Parameters, PendingUpdate, Policy, PolicyBase, Role, Step,
    UpdateKind, FEATURES,
};
use crate::error::{SelfishError, Result};
use crate::metrics::{MetricLog, MetricMap};
use crate::network::{Gradients, NeuralNetwork};
use crate::optimizer::OptimizerWrapper;

/// Default hidden layer sizes of the deterministic policy network.
pub const DEFAULT_HIDDEN: [usize; 3] = [20, 30, 15];

/// A feed-forward network mapping the observation straight to an action.
///
/// Learns by following the pathwise derivative of its own error, supplied
/// by the training loop in every [`Feedback`]. There is no distribution, so
/// log-probabilities and entropies are zero.
pub struct DeterministicGradient {
    base: PolicyBase,
    pub network: NeuralNetwork,
    pub lr: f32,
    num_actions: usize,
    features: Vec<Array2<f32>>,
    sensitivity: Option<Array1<f32>>,
}

impl DeterministicGradient {
    pub fn new(
        role: Role,
        num_actions: usize,
        hidden_sizes: &[usize],
        lr: f32,
        optimizer: OptimizerWrapper,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if lr <= 0.0 {
            return Err(SelfishError::invalid_parameter("lr", "must be positive"));
        }
        let mut sizes = vec![FEATURES];
        sizes.extend_from_slice(hidden_sizes);
        sizes.push(1);

        Ok(DeterministicGradient {
            base: PolicyBase::new(role, 1.0),
            network: NeuralNetwork::mlp(&sizes, optimizer, rng),
            lr,
            num_actions,
            features: Vec::new(),
            sensitivity: None,
        })
    }
}

impl Policy for DeterministicGradient {
    fn role(&self) -> Role {
        self.base.role
    }

    fn name(&self) -> &'static str {
        "deterministic_gradient"
    }

    fn act(&mut self, observation: &Observation, _rng: &mut StdRng) -> Result<Step> {
        self.base.begin_round();
        let features = observation.features();
        let (output, cache) = self.network.forward_minibatch(features.view());

        // d output / d input, read off the first feature column
        let ones = Array2::ones((features.nrows(), 1));
        let (_, input_errors) = self.network.backward_minibatch(&cache, ones.view());
        self.sensitivity = Some(input_errors.column(0).to_owned());

        let n = self.num_actions as f32;
        let action = output.column(0).mapv(|x| x.rem_euclid(n));
        self.features.push(features);
        Ok(Step::deterministic(action))
    }

    fn input_sensitivity(&self) -> Option<Array1<f32>> {
        self.sensitivity.clone()
    }

    fn record(&mut self, feedback: Feedback) -> Result<()> {
        self.base.record(feedback)
    }

    fn snapshot(&self) -> Result<OpponentSnapshot> {
        let batch_size = self.features.first().map(Array2::nrows).unwrap_or(0);
        Ok(OpponentSnapshot {
            scores: None,
            returns: self.base.episode_returns(batch_size),
        })
    }

    fn loss(&mut self, _opponent: &OpponentSnapshot) -> Result<PendingUpdate> {
        let rounds = self.base.check_episode(self.features.len())?;
        let loss = self.base.mean_error();

        let mut gradients = Gradients::zeros_like(&self.network);
        for (features, error_grad) in self.features.iter().zip(&self.base.error_grads) {
            let scale = 1.0 / (rounds * error_grad.len()) as f32;
            let (_, cache) = self.network.forward_minibatch(features.view());
            let output_errors = (error_grad * scale).insert_axis(Axis(1));
            let (round_grads, _) = self.network.backward_minibatch(&cache, output_errors.view());
            gradients.add_assign(&round_grads);
        }
        let weight_grad = gradients.global_norm();

        self.base.log_episode();
        self.base.log.record("loss", loss);
        self.base.log.record("weight_grad", weight_grad);

        let mut metrics = MetricMap::new();
        metrics.insert("loss".to_string(), loss);
        metrics.insert("weight_grad".to_string(), weight_grad);
        Ok(PendingUpdate {
            loss,
            metrics,
            kind: UpdateKind::Networks(vec![gradients]),
        })
    }

    fn step(&mut self, update: PendingUpdate) -> Result<()> {
        match update.kind {
            UpdateKind::Networks(gradients) if gradients.len() == 1 => {
                self.network.apply_gradients(&gradients[0], self.lr)
            }
            _ => Err(SelfishError::invariant("deterministic agent expects one network gradient")),
        }
    }

    fn reset(&mut self) {
        self.base.reset();
        self.features.clear();
        self.sensitivity = None;
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
        match parameters {
            Parameters::Networks(mut networks) if networks.len() == 1 => {
                let network = networks.remove(0);
                if network.input_size() != FEATURES || network.output_size() != 1 {
                    return Err(SelfishError::dimension_mismatch(
                        format!("network {} -> 1", FEATURES),
                        format!("{} -> {}", network.input_size(), network.output_size()),
                    ));
                }
                self.network = network;
                Ok(())
            }
            _ => Err(SelfishError::invalid_parameter("parameters", "expected one network")),
        }
    }
}
