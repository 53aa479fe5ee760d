//! Optimizers that turn per-layer gradients into parameter updates.
//!
//! Every learning agent owns exactly one optimizer (through its
//! [`NeuralNetwork`](crate::network::NeuralNetwork)); no optimizer state is
//! ever shared between the sender and the receiver.

use ndarray::{Array1, Array2};
use serde::{Serialize, Deserialize};

pub trait Optimizer {
    /// Update the weights of layer `index`.
    fn update_weights(&mut self, index: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32);

    /// Update the biases of layer `index`.
    fn update_biases(&mut self, index: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32);

    /// Called once after every layer of a network has been updated.
    fn end_step(&mut self) {}
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum OptimizerWrapper {
    SGD(SGD),
    Adam(Adam),
}

impl OptimizerWrapper {
    /// Adam with the usual defaults and the given L2 weight decay.
    pub fn adam(weight_decay: f32) -> Self {
        OptimizerWrapper::Adam(Adam::default().with_weight_decay(weight_decay))
    }

    /// Plain gradient descent with the given L2 weight decay.
    pub fn sgd(weight_decay: f32) -> Self {
        OptimizerWrapper::SGD(SGD::new().with_weight_decay(weight_decay))
    }
}

impl Optimizer for OptimizerWrapper {
    fn update_weights(&mut self, index: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update_weights(index, weights, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_weights(index, weights, gradients, learning_rate),
        }
    }

    fn update_biases(&mut self, index: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update_biases(index, biases, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_biases(index, biases, gradients, learning_rate),
        }
    }

    fn end_step(&mut self) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.end_step(),
            OptimizerWrapper::Adam(optimizer) => optimizer.end_step(),
        }
    }
}

/// Gradient descent with optional coupled L2 weight decay.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SGD {
    pub weight_decay: f32,
}

impl SGD {
    pub fn new() -> SGD {
        SGD { weight_decay: 0.0 }
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }
}

impl Default for SGD {
    fn default() -> Self {
        Self::new()
    }
}

impl Optimizer for SGD {
    fn update_weights(&mut self, _index: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        let decay = self.weight_decay;
        weights.zip_mut_with(gradients, |w, &g| *w -= learning_rate * (g + decay * *w));
    }

    fn update_biases(&mut self, _index: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        let decay = self.weight_decay;
        biases.zip_mut_with(gradients, |b, &g| *b -= learning_rate * (g + decay * *b));
    }
}

/// Adam with optional coupled L2 weight decay (added to the gradient before the moments).
///
/// Moment buffers are created lazily, one pair per layer index, the first
/// time that layer is updated.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    m_weights: Vec<Array2<f32>>,
    v_weights: Vec<Array2<f32>>,
    m_biases: Vec<Array1<f32>>,
    v_biases: Vec<Array1<f32>>,
    pub t: usize,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            beta1,
            beta2,
            epsilon,
            weight_decay: 0.0,
            m_weights: Vec::new(),
            v_weights: Vec::new(),
            m_biases: Vec::new(),
            v_biases: Vec::new(),
            t: 1,
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    fn weight_moments(&mut self, index: usize, dim: (usize, usize)) -> (&mut Array2<f32>, &mut Array2<f32>) {
        if self.m_weights.len() <= index {
            self.m_weights.resize(index + 1, Array2::zeros((0, 0)));
            self.v_weights.resize(index + 1, Array2::zeros((0, 0)));
        }
        if self.m_weights[index].dim() != dim {
            self.m_weights[index] = Array2::zeros(dim);
            self.v_weights[index] = Array2::zeros(dim);
        }
        (&mut self.m_weights[index], &mut self.v_weights[index])
    }

    fn bias_moments(&mut self, index: usize, dim: usize) -> (&mut Array1<f32>, &mut Array1<f32>) {
        if self.m_biases.len() <= index {
            self.m_biases.resize(index + 1, Array1::zeros(0));
            self.v_biases.resize(index + 1, Array1::zeros(0));
        }
        if self.m_biases[index].len() != dim {
            self.m_biases[index] = Array1::zeros(dim);
            self.v_biases[index] = Array1::zeros(dim);
        }
        (&mut self.m_biases[index], &mut self.v_biases[index])
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn update_weights(&mut self, index: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        let (beta1, beta2, epsilon, t) = (self.beta1, self.beta2, self.epsilon, self.t as i32);
        let gradients = gradients + &(&*weights * self.weight_decay);
        let (m, v) = self.weight_moments(index, weights.dim());

        m.zip_mut_with(&gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        v.zip_mut_with(&gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let m_hat = m.mapv(|x| x / (1.0 - beta1.powi(t)));
        let v_hat = v.mapv(|x| x / (1.0 - beta2.powi(t)));

        *weights -= &((&m_hat / (v_hat.mapv(f32::sqrt) + epsilon)) * learning_rate);
    }

    fn update_biases(&mut self, index: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        let (beta1, beta2, epsilon, t) = (self.beta1, self.beta2, self.epsilon, self.t as i32);
        let gradients = gradients + &(&*biases * self.weight_decay);
        let (m, v) = self.bias_moments(index, biases.len());

        m.zip_mut_with(&gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        v.zip_mut_with(&gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let m_hat = m.mapv(|x| x / (1.0 - beta1.powi(t)));
        let v_hat = v.mapv(|x| x / (1.0 - beta2.powi(t)));

        *biases -= &((&m_hat / (v_hat.mapv(f32::sqrt) + epsilon)) * learning_rate);
    }

    fn end_step(&mut self) {
        self.t += 1;
    }
}
