use ndarray::{array, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::network::{Activation, Gradients, LayerGradient, NeuralNetwork};
use crate::optimizer::{Adam, Optimizer, OptimizerWrapper, SGD};

fn close(a: &Array2<f32>, b: &Array2<f32>, tol: f32) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < tol)
}

#[test]
fn test_sgd_update_weights() {
    let mut sgd = SGD::new();
    let mut weights = array![[1.0, 1.0], [1.0, 1.0]];
    let gradients = array![[0.1, 0.2], [0.3, 0.4]];

    sgd.update_weights(0, &mut weights, &gradients, 0.01);

    assert!(close(&weights, &array![[0.999, 0.998], [0.997, 0.996]], 1e-6));
}

#[test]
fn test_sgd_update_biases() {
    let mut sgd = SGD::new();
    let mut biases = array![1.0, 1.0];
    let gradients = array![0.1, 0.2];

    sgd.update_biases(0, &mut biases, &gradients, 0.01);

    assert!((biases[0] - 0.999).abs() < 1e-6);
    assert!((biases[1] - 0.998).abs() < 1e-6);
}

#[test]
fn test_sgd_weight_decay() {
    let mut sgd = SGD::new().with_weight_decay(0.5);
    let mut weights = array![[2.0, -2.0]];
    let mut biases = array![1.0];

    sgd.update_weights(0, &mut weights, &array![[0.0, 0.0]], 0.1);
    sgd.update_biases(0, &mut biases, &array![1.0], 0.1);

    assert!(close(&weights, &array![[1.9, -1.9]], 1e-6));
    assert!((biases[0] - 0.85).abs() < 1e-6);
}

#[test]
fn test_sgd_config_keeps_weight_decay() {
    match crate::builders::optimizer_for(crate::config::OptimizerKind::Sgd, 0.25) {
        OptimizerWrapper::SGD(sgd) => assert_eq!(sgd.weight_decay, 0.25),
        OptimizerWrapper::Adam(_) => panic!("expected SGD"),
    }
}

#[test]
fn test_adam_new() {
    let adam = Adam::new(0.9, 0.999, 1e-8);
    assert_eq!(adam.beta1, 0.9);
    assert_eq!(adam.beta2, 0.999);
    assert_eq!(adam.epsilon, 1e-8);
    assert_eq!(adam.weight_decay, 0.0);
    assert_eq!(adam.t, 1);
}

#[test]
fn test_adam_first_steps_move_by_learning_rate() {
    let mut adam = Adam::default();
    let mut weights = array![[1.0, 1.0], [1.0, 1.0]];
    let gradients = array![[0.1, 0.2], [-0.3, 0.4]];

    adam.update_weights(0, &mut weights, &gradients, 0.01);
    adam.end_step();
    assert!(close(&weights, &array![[0.99, 0.99], [1.01, 0.99]], 1e-5));

    // bias correction keeps a constant gradient at the same step size
    adam.update_weights(0, &mut weights, &gradients, 0.01);
    adam.end_step();
    assert!(close(&weights, &array![[0.98, 0.98], [1.02, 0.98]], 1e-5));
    assert_eq!(adam.t, 3);
}

#[test]
fn test_adam_weight_decay_without_gradient() {
    let mut plain = Adam::default();
    let mut decayed = Adam::default().with_weight_decay(0.1);
    let zero = Array1::zeros(2);

    let mut a = array![1.0, 1.0];
    let mut b = array![1.0, 1.0];
    plain.update_biases(0, &mut a, &zero, 0.01);
    decayed.update_biases(0, &mut b, &zero, 0.01);

    assert_eq!(a, array![1.0, 1.0]);
    assert!(b.iter().all(|&x| (x - 0.99).abs() < 1e-5));
}

#[test]
fn test_adam_moments_are_per_layer() {
    let mut adam = Adam::default();
    let mut small = Array2::ones((2, 1));
    let mut large = Array2::ones((3, 4));

    adam.update_weights(0, &mut small, &Array2::from_elem((2, 1), 0.5), 0.1);
    adam.update_weights(1, &mut large, &Array2::from_elem((3, 4), -0.5), 0.1);
    adam.end_step();

    assert!(small.iter().all(|&x| (x - 0.9).abs() < 1e-5));
    assert!(large.iter().all(|&x| (x - 1.1).abs() < 1e-5));
    assert_eq!(adam.t, 2);
}

#[test]
fn test_network_step_advances_time_once() {
    let mut rng = StdRng::seed_from_u64(4);
    let mut net = NeuralNetwork::new(
        &[3, 4, 1],
        &[Activation::Relu, Activation::Linear],
        OptimizerWrapper::adam(0.0),
        &mut rng,
    );
    let grads = Gradients(
        net.layers
            .iter()
            .map(|l| LayerGradient {
                weights: Array2::from_elem(l.weights.dim(), 1.0),
                biases: Array1::from_elem(l.biases.len(), 1.0),
            })
            .collect(),
    );
    let before = net.layers[1].biases[0];

    net.apply_gradients(&grads, 0.01).unwrap();

    match &net.optimizer {
        OptimizerWrapper::Adam(adam) => assert_eq!(adam.t, 2),
        OptimizerWrapper::SGD(_) => panic!("expected Adam"),
    }
    assert!((net.layers[1].biases[0] - (before - 0.01)).abs() < 1e-5);
}
