use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{SelfishError, Result};
use crate::optimizer::{Optimizer, OptimizerWrapper};

/// A Layer in a neural network, consisting of weights, biases, and an activation function.
/// This struct represents a fully connected layer within a neural network.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Layer {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
}

/// Values a layer saw during a forward pass, needed again by `backward_minibatch`.
#[derive(Clone, Debug)]
pub struct LayerCache {
    inputs: Array2<f32>,
    pre_activation_output: Array2<f32>,
}

/// Gradient of a scalar loss with respect to one layer's parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerGradient {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
}

impl Layer {
    /// Create a new layer with the given input size, output size, and activation function.
    /// The weights are initialized with random values from a uniform distribution
    /// between -0.1 and 0.1. The biases are initialized with zeros.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let weights = Array2::random_using((input_size, output_size), Uniform::new(-0.1, 0.1), rng);
        let biases = Array1::zeros(output_size);
        Layer {
            weights,
            biases,
            activation,
        }
    }

    pub fn with_weights(mut self, weights: Array2<f32>) -> Self {
        assert_eq!(weights.dim(), self.weights.dim());
        self.weights = weights;
        self
    }

    pub fn with_biases(mut self, biases: Array1<f32>) -> Self {
        assert_eq!(biases.dim(), self.biases.dim());
        self.biases = biases;
        self
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    /// Perform a forward pass for a batch of input vectors.
    /// Returns the activated outputs together with the cache `backward_minibatch` needs.
    pub fn forward_minibatch(&self, inputs: ArrayView2<f32>) -> (Array2<f32>, LayerCache) {
        let pre_activation_output = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        let mut outputs = pre_activation_output.clone();
        self.activation.apply_minibatch(&mut outputs);
        let cache = LayerCache {
            inputs: inputs.to_owned(),
            pre_activation_output,
        };
        (outputs, cache)
    }

    /// Compute gradients for the layer's weights and biases for a batch of output errors.
    /// Also returns the error with respect to the layer's inputs so it can be propagated further.
    pub fn backward_minibatch(
        &self,
        cache: &LayerCache,
        output_errors: ArrayView2<f32>,
    ) -> (Array2<f32>, LayerGradient) {
        let activation_deriv = self.activation.derivative_minibatch(cache.pre_activation_output.view());
        let adjusted_error = &output_errors * &activation_deriv;
        let weight_gradients = cache.inputs.t().dot(&adjusted_error);
        let bias_gradients = adjusted_error.sum_axis(Axis(0));
        let input_errors = adjusted_error.dot(&self.weights.t());
        (
            input_errors,
            LayerGradient {
                weights: weight_gradients,
                biases: bias_gradients,
            },
        )
    }
}

/// An enumeration of the possible activation functions that can be used in a neural network layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    Relu,
    Linear,
}

impl Activation {
    /// Apply the activation function to a batch of input arrays in-place.
    fn apply_minibatch(&self, inputs: &mut Array2<f32>) {
        match self {
            Activation::Relu => {
                inputs.mapv_inplace(|v| v.max(0.0));
            }
            Activation::Linear => {}
        }
    }

    /// Compute the derivative of the activation function for a batch of input arrays.
    fn derivative_minibatch(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        match self {
            Activation::Relu => {
                inputs.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
            }
            Activation::Linear => {
                // Derivative of linear activation is always 1
                Array2::ones(inputs.dim())
            }
        }
    }
}

/// Per-layer gradients for a whole network, in layer order.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradients(pub Vec<LayerGradient>);

impl Gradients {
    /// All-zero gradients shaped like `network`.
    pub fn zeros_like(network: &NeuralNetwork) -> Self {
        Gradients(
            network
                .layers
                .iter()
                .map(|layer| LayerGradient {
                    weights: Array2::zeros(layer.weights.dim()),
                    biases: Array1::zeros(layer.biases.dim()),
                })
                .collect(),
        )
    }

    pub fn add_assign(&mut self, other: &Gradients) {
        for (mine, theirs) in self.0.iter_mut().zip(other.0.iter()) {
            mine.weights += &theirs.weights;
            mine.biases += &theirs.biases;
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for grad in self.0.iter_mut() {
            grad.weights.mapv_inplace(|g| g * factor);
            grad.biases.mapv_inplace(|g| g * factor);
        }
    }

    /// Global L2 norm across every layer.
    pub fn global_norm(&self) -> f32 {
        self.0
            .iter()
            .map(|g| {
                g.weights.iter().map(|&x| x * x).sum::<f32>()
                    + g.biases.iter().map(|&x| x * x).sum::<f32>()
            })
            .sum::<f32>()
            .sqrt()
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|g| g.weights.len() + g.biases.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten into one vector: per layer, weights in row-major order then biases.
    pub fn flatten(&self) -> Array1<f32> {
        let mut flat = Vec::with_capacity(self.len());
        for grad in &self.0 {
            flat.extend(grad.weights.iter().copied());
            flat.extend(grad.biases.iter().copied());
        }
        Array1::from_vec(flat)
    }

    /// Inverse of `flatten`, using `self` for the layer shapes.
    pub fn unflatten_like(&self, flat: &Array1<f32>) -> Result<Gradients> {
        if flat.len() != self.len() {
            return Err(SelfishError::dimension_mismatch(
                format!("{} gradient entries", self.len()),
                format!("{}", flat.len()),
            ));
        }
        let mut offset = 0;
        let mut layers = Vec::with_capacity(self.0.len());
        for grad in &self.0 {
            let (rows, cols) = grad.weights.dim();
            let weights = Array2::from_shape_vec(
                (rows, cols),
                flat.slice(ndarray::s![offset..offset + rows * cols]).to_vec(),
            )
            .map_err(|e| SelfishError::dimension_mismatch(format!("({}, {})", rows, cols), e.to_string()))?;
            offset += rows * cols;
            let n = grad.biases.len();
            let biases = flat.slice(ndarray::s![offset..offset + n]).to_owned();
            offset += n;
            layers.push(LayerGradient { weights, biases });
        }
        Ok(Gradients(layers))
    }
}

/// Values every layer saw during a network forward pass.
#[derive(Clone, Debug)]
pub struct ForwardCache {
    layers: Vec<LayerCache>,
}

/// A Neural Network consisting of multiple layers and the optimizer that updates them.
#[derive(Clone, Serialize, Deserialize)]
pub struct NeuralNetwork {
    pub layers: Vec<Layer>,
    pub optimizer: OptimizerWrapper,
}

impl NeuralNetwork {
    /// Create a new neural network with the given layer sizes, activations, and optimizer.
    pub fn new<R: Rng + ?Sized>(
        layer_sizes: &[usize],
        activations: &[Activation],
        optimizer: OptimizerWrapper,
        rng: &mut R,
    ) -> Self {
        assert_eq!(layer_sizes.len() - 1, activations.len());

        let layers = layer_sizes
            .windows(2)
            .zip(activations.iter())
            .map(|(window, &activation)| Layer::new(window[0], window[1], activation, rng))
            .collect::<Vec<_>>();

        NeuralNetwork { layers, optimizer }
    }

    /// ReLU on every hidden layer, linear output.
    pub fn mlp<R: Rng + ?Sized>(layer_sizes: &[usize], optimizer: OptimizerWrapper, rng: &mut R) -> Self {
        assert!(layer_sizes.len() >= 2);
        let mut activations = vec![Activation::Relu; layer_sizes.len() - 2];
        activations.push(Activation::Linear);
        Self::new(layer_sizes, &activations, optimizer, rng)
    }

    pub fn with_layers(mut self, layers: Vec<Layer>) -> Self {
        self.layers = layers;
        self
    }

    pub fn input_size(&self) -> usize {
        self.layers.first().map(Layer::input_size).unwrap_or(0)
    }

    pub fn output_size(&self) -> usize {
        self.layers.last().map(Layer::output_size).unwrap_or(0)
    }

    /// Forward pass without keeping intermediate values.
    pub fn predict(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        let mut current_output = inputs.to_owned();
        for layer in &self.layers {
            current_output = layer.forward_minibatch(current_output.view()).0;
        }
        current_output
    }

    /// Perform a forward pass for a batch of input vectors.
    pub fn forward_minibatch(&self, inputs: ArrayView2<f32>) -> (Array2<f32>, ForwardCache) {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut current_output = inputs.to_owned();
        for layer in &self.layers {
            let (output, cache) = layer.forward_minibatch(current_output.view());
            caches.push(cache);
            current_output = output;
        }
        (current_output, ForwardCache { layers: caches })
    }

    /// Backpropagate `output_errors` (dLoss/dOutput) through the cached forward pass.
    /// Returns per-layer gradients and dLoss/dInput.
    pub fn backward_minibatch(
        &self,
        cache: &ForwardCache,
        output_errors: ArrayView2<f32>,
    ) -> (Gradients, Array2<f32>) {
        let mut gradients = Vec::with_capacity(self.layers.len());
        let mut current_error = output_errors.to_owned();

        for (layer, layer_cache) in self.layers.iter().zip(cache.layers.iter()).rev() {
            let (input_errors, gradient) = layer.backward_minibatch(layer_cache, current_error.view());
            gradients.push(gradient);
            current_error = input_errors;
        }

        gradients.reverse();
        (Gradients(gradients), current_error)
    }

    /// Apply one optimizer step with precomputed gradients of the loss.
    pub fn apply_gradients(&mut self, gradients: &Gradients, learning_rate: f32) -> Result<()> {
        if gradients.0.len() != self.layers.len() {
            return Err(SelfishError::dimension_mismatch(
                format!("{} layer gradients", self.layers.len()),
                format!("{}", gradients.0.len()),
            ));
        }
        for (index, (layer, gradient)) in self.layers.iter_mut().zip(gradients.0.iter()).enumerate() {
            self.optimizer.update_weights(index, &mut layer.weights, &gradient.weights, learning_rate);
            self.optimizer.update_biases(index, &mut layer.biases, &gradient.biases, learning_rate);
        }
        self.optimizer.end_step();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::SGD;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn linear_net() -> NeuralNetwork {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = Layer::new(2, 1, Activation::Linear, &mut rng)
            .with_weights(array![[2.0], [-1.0]])
            .with_biases(array![0.5]);
        NeuralNetwork::new(&[2, 1], &[Activation::Linear], OptimizerWrapper::SGD(SGD::new()), &mut rng)
            .with_layers(vec![layer])
    }

    #[test]
    fn test_linear_backward() {
        let net = linear_net();
        let inputs = array![[1.0, 2.0], [3.0, 4.0]];
        let (out, cache) = net.forward_minibatch(inputs.view());
        assert_eq!(out, array![[0.5], [2.5]]);

        let (grads, input_errors) = net.backward_minibatch(&cache, array![[1.0], [1.0]].view());
        assert_eq!(grads.0[0].weights, array![[4.0], [6.0]]);
        assert_eq!(grads.0[0].biases, array![2.0]);
        assert_eq!(input_errors, array![[2.0, -1.0], [2.0, -1.0]]);
    }

    #[test]
    fn test_flatten_roundtrip_shapes() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = NeuralNetwork::mlp(&[3, 4, 2], OptimizerWrapper::SGD(SGD::new()), &mut rng);
        let zeros = Gradients::zeros_like(&net);
        assert_eq!(zeros.len(), 3 * 4 + 4 + 4 * 2 + 2);
        let flat = Array1::from_iter((0..zeros.len()).map(|i| i as f32));
        let back = zeros.unflatten_like(&flat).unwrap();
        assert_eq!(back.flatten(), flat);
        assert!(zeros.unflatten_like(&Array1::zeros(3)).is_err());
    }

    #[test]
    fn test_apply_gradients_sgd() {
        let mut net = linear_net();
        let grads = Gradients(vec![LayerGradient {
            weights: array![[1.0], [1.0]],
            biases: array![1.0],
        }]);
        net.apply_gradients(&grads, 0.5).unwrap();
        assert_eq!(net.layers[0].weights, array![[1.5], [-1.5]]);
        assert_eq!(net.layers[0].biases, array![0.0]);
    }
}
