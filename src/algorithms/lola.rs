//! Learning with Opponent-Learning Awareness, score-function form.
//!
//! With `s` the summed score vectors and `R` the episode returns of each
//! batch element, the opponent's naive step is `Δθ_opp ∝ mean_i[s_opp,i R_opp,i]`.
//! Differentiating our value after that step adds
//!
//! ```text
//! lookahead_lr · mean_i[ R_opp,i · s_own,i · (s_opp,i · g) ],   g = mean_i[s_opp,i R_own,i]
//! ```
//!
//! to our ascent direction. Both snapshots must describe the parameters
//! *before* either agent steps, which is why the training loop collects them
//! first and commits the sender's step before the receiver's.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;

use crate::agent::{Feedback, Observation, OpponentSnapshot, Parameters, PendingUpdate, Policy, Role, Step};
use crate::error::{SelfishError, Result};
use crate::metrics::MetricLog;

pub struct LolaAgent {
    inner: Box<dyn Policy>,
    pub lookahead_lr: f32,
}

impl LolaAgent {
    /// Wrap `inner`, which must publish score vectors in its snapshots.
    pub fn new(inner: Box<dyn Policy>, lookahead_lr: f32) -> Self {
        LolaAgent { inner, lookahead_lr }
    }

    pub fn inner(&self) -> &dyn Policy {
        self.inner.as_ref()
    }

    /// The lookahead term in parameter space (ascent direction).
    pub fn correction(&self, own: &OpponentSnapshot, opponent: &OpponentSnapshot) -> Result<Array1<f32>> {
        let own_scores = own.scores.as_ref().ok_or_else(|| {
            SelfishError::invariant(format!("{} has no score function to differentiate", self.inner.name()))
        })?;
        let Some(opp_scores) = opponent.scores.as_ref() else {
            return Ok(Array1::zeros(own_scores.ncols()));
        };

        let n = own_scores.nrows();
        if opp_scores.nrows() != n || own.returns.len() != n || opponent.returns.len() != n {
            return Err(SelfishError::dimension_mismatch(
                format!("{} batch elements in both snapshots", n),
                format!(
                    "opponent scores {}, own returns {}, opponent returns {}",
                    opp_scores.nrows(),
                    own.returns.len(),
                    opponent.returns.len()
                ),
            ));
        }

        // gradient of our value w.r.t. the opponent's parameters
        let g = opp_scores.t().dot(&own.returns) / n as f32;
        let alignment = opp_scores.dot(&g);
        let weights = (&alignment * &opponent.returns).insert_axis(Axis(1));
        let correction: Array2<f32> = own_scores * &weights;
        Ok(correction.sum_axis(Axis(0)) * (self.lookahead_lr / n as f32))
    }
}

impl Policy for LolaAgent {
    fn role(&self) -> Role {
        self.inner.role()
    }

    fn name(&self) -> &'static str {
        "lola"
    }

    fn act(&mut self, observation: &Observation, rng: &mut StdRng) -> Result<Step> {
        self.inner.act(observation, rng)
    }

    fn input_sensitivity(&self) -> Option<Array1<f32>> {
        self.inner.input_sensitivity()
    }

    fn record(&mut self, feedback: Feedback) -> Result<()> {
        self.inner.record(feedback)
    }

    fn snapshot(&self) -> Result<OpponentSnapshot> {
        self.inner.snapshot()
    }

    fn is_opponent_aware(&self) -> bool {
        true
    }

    fn loss(&mut self, opponent: &OpponentSnapshot) -> Result<PendingUpdate> {
        let mut update = self.inner.loss(opponent)?;
        let own = self.inner.snapshot()?;
        let correction = self.correction(&own, opponent)?;

        // loss gradient = -(ascent direction)
        update.add_flat(&(-&correction))?;

        let norm = correction.dot(&correction).sqrt();
        update.metrics.insert("lola_correction".to_string(), norm);
        self.inner.log_mut().record("lola_correction", norm);
        Ok(update)
    }

    fn step(&mut self, update: PendingUpdate) -> Result<()> {
        self.inner.step(update)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn log(&self) -> &MetricLog {
        self.inner.log()
    }

    fn log_mut(&mut self) -> &mut MetricLog {
        self.inner.log_mut()
    }

    fn parameters(&self) -> Parameters {
        self.inner.parameters()
    }

    fn load_parameters(&mut self, parameters: Parameters) -> Result<()> {
        self.inner.load_parameters(parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::NoComm;
    use crate::agent::NoCommOutput;
    use ndarray::array;

    fn wrapper() -> LolaAgent {
        LolaAgent::new(Box::new(NoComm::new(Role::Sender, NoCommOutput::Identity)), 0.5)
    }

    #[test]
    fn test_correction_closed_form() {
        let agent = wrapper();
        let own = OpponentSnapshot {
            scores: Some(array![[1.0, 0.0], [0.0, 2.0]]),
            returns: array![1.0, -1.0],
        };
        let opponent = OpponentSnapshot {
            scores: Some(array![[1.0], [3.0]]),
            returns: array![2.0, 1.0],
        };
        // g = (1*1 + 3*-1)/2 = -1; alignment = [-1, -3]; weights = [-2, -3]
        // correction = 0.5/2 * ([-2, 0] + [0, -6]) = [-0.5, -1.5]
        let correction = agent.correction(&own, &opponent).unwrap();
        assert!((correction[0] + 0.5).abs() < 1e-6);
        assert!((correction[1] + 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_opponent_without_scores_gives_zero() {
        let agent = wrapper();
        let own = OpponentSnapshot { scores: Some(array![[1.0, 2.0]]), returns: array![1.0] };
        let opponent = OpponentSnapshot { scores: None, returns: array![1.0] };
        assert_eq!(agent.correction(&own, &opponent).unwrap(), array![0.0, 0.0]);
    }

    #[test]
    fn test_base_without_scores_is_rejected() {
        let agent = wrapper();
        let own = OpponentSnapshot { scores: None, returns: array![1.0] };
        let result = agent.correction(&own, &own.clone());
        assert!(matches!(result, Err(SelfishError::InvariantViolation(_))));
    }
}
