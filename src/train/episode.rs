//! One batch of the repeated game: the round loop and the ordered update.

use ndarray::Array1;
use rand::rngs::StdRng;

use crate::agent::{Feedback, Observation, OpponentSnapshot, Policy, Role};
use crate::error::{SelfishError, Result};
use crate::game::Batch;
use crate::loss::Loss;
use crate::metrics::MetricMap;

/// Everything that happened in one batch, one entry per round.
#[derive(Clone, Debug, Default)]
pub struct Trajectory {
    pub messages: Vec<Array1<f32>>,
    pub actions: Vec<Array1<f32>>,
    pub sender_log_probs: Vec<Array1<f32>>,
    pub recver_log_probs: Vec<Array1<f32>>,
    pub sender_entropies: Vec<Array1<f32>>,
    pub recver_entropies: Vec<Array1<f32>>,
    pub sender_errors: Vec<Array1<f32>>,
    pub recver_errors: Vec<Array1<f32>>,
    /// Circular L1 errors, filled only when a reporting loss is given
    pub sender_l1_errors: Vec<Array1<f32>>,
    pub recver_l1_errors: Vec<Array1<f32>>,
}

fn mean_over_rounds(rounds: &[Array1<f32>]) -> f32 {
    let total: f32 = rounds.iter().map(|r| r.mean().unwrap_or(0.0)).sum();
    total / rounds.len().max(1) as f32
}

impl Trajectory {
    pub fn num_rounds(&self) -> usize {
        self.actions.len()
    }

    pub fn sender_error(&self) -> f32 {
        mean_over_rounds(&self.sender_errors)
    }

    pub fn recver_error(&self) -> f32 {
        mean_over_rounds(&self.recver_errors)
    }

    pub fn sender_l1_error(&self) -> f32 {
        mean_over_rounds(&self.sender_l1_errors)
    }

    pub fn recver_l1_error(&self) -> f32 {
        mean_over_rounds(&self.recver_l1_errors)
    }
}

/// Settings of the round loop that do not change during a run.
pub struct RoundRules<'a> {
    pub loss: &'a dyn Loss,
    pub grounded: bool,
    /// Extra loss reported alongside `loss` (evaluation only)
    pub report: Option<&'a dyn Loss>,
    /// Hand feedback to the agents (training) or not (evaluation)
    pub learning: bool,
}

/// Play every round of `batch`.
///
/// Round `r > 0` sees round `r - 1`'s message, action and error; round 0
/// sees zeros. When `rules.learning` is set each agent receives its error
/// and pathwise error gradient after every round; otherwise both agents are
/// reset at the end so nothing leaks into the next training episode.
pub fn play_episode(
    sender: &mut dyn Policy,
    recver: &mut dyn Policy,
    batch: &Batch,
    rules: &RoundRules<'_>,
    rng: &mut StdRng,
) -> Result<Trajectory> {
    if sender.role() != Role::Sender || recver.role() != Role::Recver {
        return Err(SelfishError::invariant("agents are seated in the wrong roles"));
    }
    let batch_size = batch.batch_size();
    let zeros = || Array1::<f32>::zeros(batch_size);
    let mut trajectory = Trajectory::default();

    let mut prev_send_target = zeros();
    let mut prev_message = zeros();
    let mut prev_action = zeros();
    let mut prev_sender_error = zeros();
    let mut prev_recver_error = zeros();

    for (round, (send_target, recv_target)) in batch.sender_targets.iter().zip(&batch.recver_targets).enumerate() {
        let first_round = round == 0;

        let send_obs = Observation {
            input: send_target.clone(),
            prev_input: prev_send_target.clone(),
            prev_message: prev_message.clone(),
            prev_action: prev_action.clone(),
            prev_error: prev_sender_error.clone(),
            first_round,
        };
        let send_step = sender.act(&send_obs, rng)?;
        let message = send_step.action;

        let recv_obs = Observation {
            input: message.clone(),
            prev_input: prev_message.clone(),
            prev_message: prev_message.clone(),
            prev_action: prev_action.clone(),
            prev_error: prev_recver_error.clone(),
            first_round,
        };
        let recv_step = recver.act(&recv_obs, rng)?;
        let action = if rules.grounded {
            &message + &recv_step.action
        } else {
            recv_step.action
        };

        let sender_error = rules.loss.compute_batch(action.view(), send_target.view());
        let recver_error = rules.loss.compute_batch(action.view(), recv_target.view());

        if rules.learning {
            // d action / d message through the receiver (and the grounding)
            let mut through = recver.input_sensitivity().unwrap_or_else(zeros);
            if rules.grounded {
                through += 1.0;
            }
            let sender_grad = rules.loss.gradient_batch(action.view(), send_target.view()) * &through;
            let recver_grad = rules.loss.gradient_batch(action.view(), recv_target.view());

            sender.record(Feedback {
                error: sender_error.clone(),
                error_grad: sender_grad,
            })?;
            recver.record(Feedback {
                error: recver_error.clone(),
                error_grad: recver_grad,
            })?;
        }

        if let Some(report) = rules.report {
            trajectory.sender_l1_errors.push(report.compute_batch(action.view(), send_target.view()));
            trajectory.recver_l1_errors.push(report.compute_batch(action.view(), recv_target.view()));
        }

        prev_send_target = send_target.clone();
        prev_message = message.clone();
        prev_action = action.clone();
        prev_sender_error = sender_error.clone();
        prev_recver_error = recver_error.clone();

        trajectory.messages.push(message);
        trajectory.actions.push(action);
        trajectory.sender_log_probs.push(send_step.log_prob);
        trajectory.recver_log_probs.push(recv_step.log_prob);
        trajectory.sender_entropies.push(send_step.entropy);
        trajectory.recver_entropies.push(recv_step.entropy);
        trajectory.sender_errors.push(sender_error);
        trajectory.recver_errors.push(recver_error);
    }

    if !rules.learning {
        sender.reset();
        recver.reset();
    }
    Ok(trajectory)
}

/// Records which agents have stepped in the current batch and refuses any
/// order other than sender, then receiver.
#[derive(Debug, Default)]
pub struct StepLedger {
    sender_done: bool,
    recver_done: bool,
}

impl StepLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&mut self, role: Role) -> Result<()> {
        match role {
            Role::Sender if self.sender_done => Err(SelfishError::invariant("sender stepped twice in one batch")),
            Role::Sender => {
                self.sender_done = true;
                Ok(())
            }
            Role::Recver if !self.sender_done => {
                Err(SelfishError::invariant("receiver step committed before sender step"))
            }
            Role::Recver if self.recver_done => Err(SelfishError::invariant("receiver stepped twice in one batch")),
            Role::Recver => {
                self.recver_done = true;
                Ok(())
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.sender_done && self.recver_done
    }
}

/// True when `agent` wants a lookahead but `opponent` exposes no score function to look through.
pub fn lookahead_blind(agent: &dyn Policy, opponent: &OpponentSnapshot) -> bool {
    agent.is_opponent_aware() && opponent.scores.is_none()
}

/// End-of-batch learning for both agents.
///
/// Both snapshots are taken before anyone learns, both losses are computed
/// against the other side's pre-update snapshot, then exactly one optimiser
/// step is committed per agent, sender first.
pub fn learn(sender: &mut dyn Policy, recver: &mut dyn Policy) -> Result<(MetricMap, MetricMap)> {
    let sender_snapshot = sender.snapshot()?;
    let recver_snapshot = recver.snapshot()?;
    for (agent, opponent) in [(&*sender, &recver_snapshot), (&*recver, &sender_snapshot)] {
        if lookahead_blind(agent, opponent) {
            tracing::debug!(agent = agent.name(), role = ?agent.role(), "opponent has no score function, lookahead is zero");
        }
    }

    let sender_update = sender.loss(&recver_snapshot)?;
    let recver_update = recver.loss(&sender_snapshot)?;
    let sender_metrics = sender_update.metrics.clone();
    let recver_metrics = recver_update.metrics.clone();

    let mut ledger = StepLedger::new();
    ledger.commit(sender.role())?;
    sender.step(sender_update)?;
    ledger.commit(recver.role())?;
    recver.step(recver_update)?;

    sender.reset();
    recver.reset();
    Ok((sender_metrics, recver_metrics))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_order() {
        let mut ledger = StepLedger::new();
        assert!(ledger.commit(Role::Recver).is_err());
        ledger.commit(Role::Sender).unwrap();
        assert!(ledger.commit(Role::Sender).is_err());
        ledger.commit(Role::Recver).unwrap();
        assert!(ledger.is_complete());
    }
}
