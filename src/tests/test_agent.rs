use ndarray::{array, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::agent::{
    CategoricalPolicyGradient, Feedback, GaussianPolicyGradient, Observation, OpponentSnapshot, Policy,
    QLearning, QLearningBuilder, Role, StateMemory, FEATURES,
};
use crate::algorithms::{A2CAgent, A2CBuilder};
use crate::error::SelfishError;
use crate::network::NeuralNetwork;
use crate::optimizer::{OptimizerWrapper, SGD};

const STEP: f32 = 1e-2;

fn no_opponent(batch_size: usize) -> OpponentSnapshot {
    OpponentSnapshot {
        scores: None,
        returns: Array1::zeros(batch_size),
    }
}

fn one_shot_q() -> QLearning {
    let mut rng = StdRng::seed_from_u64(11);
    QLearningBuilder::new(Role::Recver, 4)
        .memory(StateMemory::OneShot)
        .alpha(0.5)
        .gamma(0.9)
        .epsilon(0.0)
        .build(&mut rng)
        .unwrap()
}

#[test]
fn test_td_update_moves_fraction_alpha_of_gap() {
    let mut q = one_shot_q();
    q.table.fill(0.0);
    q.table[[1, 2]] = 0.5;
    q.table[[3, 1]] = 2.0;

    // target = 1 + 0.9 * 2 = 2.8, Q_new = 0.5 * 0.5 + 0.5 * 2.8
    let td = q.td_update(1, 2, 1.0, Some(3));
    assert!((td - 2.3).abs() < 1e-6);
    assert!((q.table[[1, 2]] - 1.65).abs() < 1e-6);

    // terminal: no bootstrap
    q.td_update(1, 2, 1.0, None);
    assert!((q.table[[1, 2]] - 1.325).abs() < 1e-6);
}

#[test]
fn test_q_update_through_episode() {
    let mut q = one_shot_q();
    let mut rng = StdRng::seed_from_u64(0);
    q.table.row_mut(3).assign(&array![0.1, 0.9, 0.2, 0.0]);

    let obs = Observation::first(array![2.0]);
    let step = q.act(&obs, &mut rng).unwrap();
    assert_eq!(step.action, array![1.0]);
    q.record(Feedback { error: array![1.0], error_grad: array![0.0] }).unwrap();

    let (loss, metrics) = q.update(&no_opponent(1)).unwrap();
    // single terminal round: target is the reward -1
    assert!((metrics["td_error"] - 1.9).abs() < 1e-5);
    assert!((loss - 1.9 * 1.9).abs() < 1e-4);
    assert!((q.table[[3, 1]] - (0.9 + 0.5 * (-1.0 - 0.9))).abs() < 1e-6);

    // the greedy action follows the updated table
    let next = q.act(&obs, &mut rng).unwrap();
    assert_eq!(next.action, array![2.0]);
}

#[test]
fn test_greedy_q_is_repeatable() {
    let mut q = one_shot_q();
    let mut rng = StdRng::seed_from_u64(5);
    let obs = Observation::first(array![0.0, 1.0, 2.0, 3.0, 1.0]);

    let first = q.act(&obs, &mut rng).unwrap().action;
    for _ in 0..5 {
        assert_eq!(q.act(&obs, &mut rng).unwrap().action, first);
    }
    let expected: Vec<f32> = (0..5)
        .map(|i| q.greedy_action(q.state_index(&obs, i)) as f32)
        .collect();
    assert_eq!(first.to_vec(), expected);
}

#[test]
fn test_update_before_act_is_rejected() {
    let mut q = one_shot_q();
    assert!(matches!(q.update(&no_opponent(0)), Err(SelfishError::EmptyBuffer(_))));

    let mut rng = StdRng::seed_from_u64(0);
    let mut pg = GaussianPolicyGradient::new(
        Role::Sender,
        8,
        0.01,
        1.0,
        0.01,
        0.1,
        OptimizerWrapper::SGD(SGD::new()),
        &mut rng,
    )
    .unwrap();
    assert!(matches!(pg.loss(&no_opponent(0)), Err(SelfishError::EmptyBuffer(_))));
}

#[test]
fn test_acted_but_unrecorded_round_is_rejected() {
    let mut q = one_shot_q();
    let mut rng = StdRng::seed_from_u64(0);
    let obs = Observation::first(array![1.0]);
    q.act(&obs, &mut rng).unwrap();
    q.record(Feedback { error: array![1.0], error_grad: array![0.0] }).unwrap();
    q.act(&obs, &mut rng).unwrap();

    assert!(matches!(q.loss(&no_opponent(1)), Err(SelfishError::DimensionMismatch { .. })));
}

/// Two rounds on a batch of three, with fixed errors.
fn play_two_rounds(agent: &mut dyn Policy, rng: &mut StdRng) {
    let mut obs = Observation::first(array![1.0, 2.0, 3.0]);
    for t in 0..2 {
        let step = agent.act(&obs, rng).unwrap();
        let error = array![1.0, 0.5, 2.0] * (t + 1) as f32;
        agent
            .record(Feedback { error: error.clone(), error_grad: Array1::zeros(3) })
            .unwrap();
        obs = Observation {
            input: array![2.0, 0.0, 5.0],
            prev_input: obs.input.clone(),
            prev_message: obs.input.clone(),
            prev_action: step.action,
            prev_error: error,
            first_round: false,
        };
    }
}

/// Weights zero except a small input weight; the mean sits well inside
/// `(0, 8)` and the std at 1 so no clamp is active.
fn gaussian_weights(network: &mut NeuralNetwork) {
    let mut weights = Array2::zeros((FEATURES, 2));
    weights[[0, 0]] = 0.1;
    network.layers[0].weights = weights;
    network.layers[0].biases = array![4.0, 1.0];
}

fn nudge(network: &mut NeuralNetwork, index: usize, delta: f32) {
    let layer = &mut network.layers[0];
    let num_weights = layer.weights.len();
    if index < num_weights {
        let cols = layer.weights.ncols();
        layer.weights[[index / cols, index % cols]] += delta;
    } else {
        layer.biases[index - num_weights] += delta;
    }
}

fn assert_close(analytic: f32, numeric: f32, what: &str) {
    assert!(
        (analytic - numeric).abs() < 1e-2 * (1.0 + analytic.abs()),
        "{}: analytic {} vs numeric {}",
        what,
        analytic,
        numeric
    );
}

#[test]
fn test_gaussian_pg_gradient_matches_finite_difference() {
    let mut rng = StdRng::seed_from_u64(21);
    let mut agent = GaussianPolicyGradient::new(
        Role::Sender,
        8,
        0.01,
        0.9,
        0.05,
        0.1,
        OptimizerWrapper::SGD(SGD::new()),
        &mut rng,
    )
    .unwrap();
    gaussian_weights(&mut agent.network);
    play_two_rounds(&mut agent, &mut rng);

    let snapshot = no_opponent(3);
    let analytic = agent.loss(&snapshot).unwrap().flat_gradient().unwrap();
    assert_eq!(analytic.len(), FEATURES * 2 + 2);

    for index in 0..analytic.len() {
        nudge(&mut agent.network, index, STEP);
        let up = agent.loss(&snapshot).unwrap().loss;
        nudge(&mut agent.network, index, -2.0 * STEP);
        let down = agent.loss(&snapshot).unwrap().loss;
        nudge(&mut agent.network, index, STEP);

        assert_close(analytic[index], (up - down) / (2.0 * STEP), &format!("parameter {}", index));
    }
}

#[test]
fn test_categorical_pg_gradient_matches_finite_difference() {
    let mut rng = StdRng::seed_from_u64(22);
    let mut agent =
        CategoricalPolicyGradient::new(Role::Recver, 4, 0.1, 0.9, 0.05, OptimizerWrapper::SGD(SGD::new()), &mut rng)
            .unwrap();
    play_two_rounds(&mut agent, &mut rng);

    let snapshot = no_opponent(3);
    let analytic = agent.loss(&snapshot).unwrap().flat_gradient().unwrap();
    assert_eq!(analytic.len(), FEATURES * 4 + 4);

    for index in 0..analytic.len() {
        nudge(&mut agent.network, index, STEP);
        let up = agent.loss(&snapshot).unwrap().loss;
        nudge(&mut agent.network, index, -2.0 * STEP);
        let down = agent.loss(&snapshot).unwrap().loss;
        nudge(&mut agent.network, index, STEP);

        assert_close(analytic[index], (up - down) / (2.0 * STEP), &format!("logit parameter {}", index));
    }
}

fn a2c_agent(rng: &mut StdRng) -> A2CAgent {
    let mut agent = A2CBuilder::new(Role::Sender, 8)
        .optimizer(OptimizerWrapper::SGD(SGD::new()))
        .lr(0.01)
        .gamma(0.9)
        .entropy_coeff(0.05)
        .value_coeff(0.5)
        .build(rng)
        .unwrap();
    gaussian_weights(&mut agent.actor);
    agent
}

#[test]
fn test_a2c_actor_and_critic_gradients() {
    let mut rng = StdRng::seed_from_u64(23);
    let mut agent = a2c_agent(&mut rng);
    play_two_rounds(&mut agent, &mut rng);

    let snapshot = no_opponent(3);
    let analytic = agent.loss(&snapshot).unwrap().flat_gradient().unwrap();
    let actor_size = FEATURES * 2 + 2;
    assert_eq!(analytic.len(), actor_size + FEATURES + 1);

    // the critic does not enter the actor's terms, so the total loss works here
    for index in 0..actor_size {
        nudge(&mut agent.actor, index, STEP);
        let up = agent.loss(&snapshot).unwrap().loss;
        nudge(&mut agent.actor, index, -2.0 * STEP);
        let down = agent.loss(&snapshot).unwrap().loss;
        nudge(&mut agent.actor, index, STEP);

        assert_close(analytic[index], (up - down) / (2.0 * STEP), &format!("actor parameter {}", index));
    }

    // the advantage is a constant for the actor, so the critic follows its own loss only
    for index in 0..FEATURES + 1 {
        nudge(&mut agent.critic, index, STEP);
        let up = agent.loss(&snapshot).unwrap().metrics["critic_loss"];
        nudge(&mut agent.critic, index, -2.0 * STEP);
        let down = agent.loss(&snapshot).unwrap().metrics["critic_loss"];
        nudge(&mut agent.critic, index, STEP);

        assert_close(
            analytic[actor_size + index],
            (up - down) / (2.0 * STEP),
            &format!("critic parameter {}", index),
        );
    }
}

#[test]
fn test_pg_step_lowers_loss_on_same_episode() {
    let mut rng = StdRng::seed_from_u64(24);
    let mut agent = GaussianPolicyGradient::new(
        Role::Recver,
        8,
        1e-3,
        1.0,
        0.0,
        0.1,
        OptimizerWrapper::SGD(SGD::new()),
        &mut rng,
    )
    .unwrap();
    gaussian_weights(&mut agent.network);
    play_two_rounds(&mut agent, &mut rng);

    let snapshot = no_opponent(3);
    let update = agent.loss(&snapshot).unwrap();
    let before = update.loss;
    agent.step(update).unwrap();
    let after = agent.loss(&snapshot).unwrap().loss;
    assert!(after < before, "loss went from {} to {}", before, after);
}

#[test]
fn test_snapshot_scores_match_parameter_count() {
    let mut rng = StdRng::seed_from_u64(25);
    let mut agent =
        CategoricalPolicyGradient::new(Role::Sender, 6, 0.1, 1.0, 0.0, OptimizerWrapper::adam(0.0), &mut rng).unwrap();
    assert!(agent.snapshot().unwrap().scores.is_none());

    play_two_rounds(&mut agent, &mut rng);
    let snapshot = agent.snapshot().unwrap();
    let scores = snapshot.scores.unwrap();
    assert_eq!(scores.dim(), (3, FEATURES * 6 + 6));
    // G_0 with gamma 1 is the negated total error
    assert_eq!(snapshot.returns, array![-3.0, -1.5, -6.0]);
}
