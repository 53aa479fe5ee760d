//! # Experiment configuration
//!
//! One [`ExperimentConfig`] describes a whole run. It is read from a JSON
//! file, optionally adjusted with `key.path=value` bindings, validated, and
//! written back next to the run's logs as `config.json`.
//!
//! ```json
//! {
//!   "sender": { "type": "policy_gradient", "lr": 0.01 },
//!   "recver": { "type": "lola", "lookahead_lr": 1.0, "base": { "type": "policy_gradient" } },
//!   "num_points": 36,
//!   "bias": 3.0
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::agent::NoCommOutput;
use crate::error::{SelfishError, Result};
use crate::loss::LossKind;

/// Optimiser owned by a learning agent.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

fn default_lr() -> f32 {
    1e-3
}

fn default_gamma() -> f32 {
    1.0
}

fn default_ent_reg() -> f32 {
    0.01
}

fn default_min_std() -> f32 {
    0.1
}

fn default_alpha() -> f32 {
    0.1
}

fn default_q_gamma() -> f32 {
    0.9
}

fn default_epsilon() -> f32 {
    0.1
}

fn default_value_coeff() -> f32 {
    1.0
}

fn default_hidden_sizes() -> Vec<usize> {
    crate::agent::deterministic::DEFAULT_HIDDEN.to_vec()
}

fn default_lookahead_lr() -> f32 {
    1.0
}

/// One agent kind with its hyperparameters, tagged by `"type"`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentConfig {
    NoComm {
        #[serde(default)]
        output: NoCommOutput,
    },
    UniformBias {
        /// Width of the noise; the game's bias when absent
        #[serde(default)]
        bias: Option<f32>,
    },
    NaiveQ {
        #[serde(default = "default_alpha")]
        alpha: f32,
        #[serde(default = "default_q_gamma")]
        gamma: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
    OneShotQ {
        #[serde(default = "default_alpha")]
        alpha: f32,
        #[serde(default = "default_q_gamma")]
        gamma: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
    DeterministicGradient {
        #[serde(default = "default_lr")]
        lr: f32,
        #[serde(default = "default_hidden_sizes")]
        hidden_sizes: Vec<usize>,
        #[serde(default)]
        weight_decay: f32,
        #[serde(default)]
        optimizer: OptimizerKind,
    },
    PolicyGradient {
        #[serde(default = "default_lr")]
        lr: f32,
        #[serde(default = "default_gamma")]
        gamma: f32,
        #[serde(default = "default_ent_reg")]
        ent_reg: f32,
        #[serde(default = "default_min_std")]
        min_std: f32,
        #[serde(default)]
        weight_decay: f32,
        #[serde(default)]
        optimizer: OptimizerKind,
    },
    CategoricalPg {
        #[serde(default = "default_lr")]
        lr: f32,
        #[serde(default = "default_gamma")]
        gamma: f32,
        #[serde(default = "default_ent_reg")]
        ent_reg: f32,
        #[serde(default)]
        weight_decay: f32,
        #[serde(default)]
        optimizer: OptimizerKind,
    },
    ActorCritic {
        #[serde(default = "default_lr")]
        lr: f32,
        #[serde(default = "default_gamma")]
        gamma: f32,
        #[serde(default = "default_ent_reg")]
        ent_reg: f32,
        #[serde(default = "default_min_std")]
        min_std: f32,
        #[serde(default = "default_value_coeff")]
        value_coeff: f32,
        #[serde(default)]
        weight_decay: f32,
        #[serde(default)]
        optimizer: OptimizerKind,
    },
    Lola {
        #[serde(default = "default_lookahead_lr")]
        lookahead_lr: f32,
        base: Box<AgentConfig>,
    },
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig::NoComm {
            output: NoCommOutput::default(),
        }
    }
}

impl AgentConfig {
    /// Whether the built agent publishes score vectors an opponent-aware peer can use.
    pub fn has_score_function(&self) -> bool {
        matches!(
            self,
            AgentConfig::PolicyGradient { .. } | AgentConfig::CategoricalPg { .. } | AgentConfig::ActorCritic { .. }
        ) || matches!(self, AgentConfig::Lola { base, .. } if base.has_score_function())
    }

    fn validate(&self, field: &str) -> Result<()> {
        let positive = |name: &str, value: f32| {
            if value > 0.0 {
                Ok(())
            } else {
                Err(SelfishError::invalid_parameter(format!("{}.{}", field, name), "must be positive"))
            }
        };

        match self {
            AgentConfig::NoComm { .. } | AgentConfig::UniformBias { .. } => Ok(()),
            AgentConfig::NaiveQ { alpha, epsilon, .. } | AgentConfig::OneShotQ { alpha, epsilon, .. } => {
                positive("alpha", *alpha)?;
                if !(0.0..=1.0).contains(epsilon) {
                    return Err(SelfishError::invalid_parameter(
                        format!("{}.epsilon", field),
                        "must lie in [0, 1]",
                    ));
                }
                Ok(())
            }
            AgentConfig::DeterministicGradient { lr, .. } | AgentConfig::CategoricalPg { lr, .. } => {
                positive("lr", *lr)
            }
            AgentConfig::PolicyGradient { lr, min_std, .. } | AgentConfig::ActorCritic { lr, min_std, .. } => {
                positive("lr", *lr)?;
                positive("min_std", *min_std)
            }
            AgentConfig::Lola { base, .. } => {
                if !base.has_score_function() {
                    return Err(SelfishError::invalid_parameter(
                        format!("{}.base", field),
                        "opponent-aware updates need a base agent with a score function",
                    ));
                }
                base.validate(&format!("{}.base", field))
            }
        }
    }
}

/// Everything one training run needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub sender: AgentConfig,
    pub recver: AgentConfig,
    /// Size of the circular action space, also the message vocabulary
    pub num_points: usize,
    pub num_epochs: usize,
    pub num_batches: usize,
    pub num_rounds: usize,
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub bias: f32,
    /// Receiver's action is the message plus its own output
    pub grounded: bool,
    pub loss: LossKind,
    pub random_seed: Option<u64>,
    pub savedir: Option<PathBuf>,
    pub loaddir: Option<PathBuf>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        ExperimentConfig {
            sender: AgentConfig::default(),
            recver: AgentConfig::default(),
            num_points: 36,
            num_epochs: 100,
            num_batches: 100,
            num_rounds: 5,
            batch_size: 64,
            test_batch_size: 100,
            bias: 0.0,
            grounded: false,
            loss: LossKind::default(),
            random_seed: None,
            savedir: None,
            loaddir: None,
        }
    }
}

impl ExperimentConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply `key.path=value` bindings in order. Values are parsed as JSON,
    /// anything that does not parse is taken as a string.
    pub fn apply_overrides<S: AsRef<str>>(self, bindings: &[S]) -> Result<Self> {
        let mut tree = serde_json::to_value(&self)?;

        for binding in bindings {
            let binding = binding.as_ref();
            let (key, raw) = binding
                .split_once('=')
                .ok_or_else(|| SelfishError::invalid_parameter(binding, "expected key=value"))?;
            let value = serde_json::from_str(raw.trim()).unwrap_or_else(|_| Value::String(raw.trim().to_string()));

            let mut node = &mut tree;
            let mut parts = key.trim().split('.').peekable();
            while let Some(part) = parts.next() {
                let object = node
                    .as_object_mut()
                    .ok_or_else(|| SelfishError::invalid_parameter(key, "path does not name an object field"))?;
                if parts.peek().is_none() {
                    object.insert(part.to_string(), value.clone());
                    break;
                }
                node = object
                    .get_mut(part)
                    .ok_or_else(|| SelfishError::invalid_parameter(key, format!("unknown field '{}'", part)))?;
            }
        }

        Ok(serde_json::from_value(tree)?)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("num_points", self.num_points),
            ("num_epochs", self.num_epochs),
            ("num_batches", self.num_batches),
            ("num_rounds", self.num_rounds),
            ("batch_size", self.batch_size),
            ("test_batch_size", self.test_batch_size),
        ] {
            if value == 0 {
                return Err(SelfishError::invalid_parameter(name, "must be at least 1"));
            }
        }
        self.sender.validate("sender")?;
        self.recver.validate("recver")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = ExperimentConfig::from_json(r#"{ "sender": { "type": "policy_gradient" }, "num_points": 8 }"#).unwrap();
        assert_eq!(config.num_points, 8);
        assert_eq!(config.test_batch_size, 100);
        match config.sender {
            AgentConfig::PolicyGradient { lr, min_std, .. } => {
                assert_eq!(lr, 1e-3);
                assert_eq!(min_std, 0.1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(config.recver, AgentConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = ExperimentConfig::from_json(r#"{ "sender": { "type": "policy_gradient" } }"#)
            .unwrap()
            .apply_overrides(&["sender.lr=0.5", "num_rounds=2", "savedir=results/run-1", "grounded=true"])
            .unwrap();
        assert_eq!(config.num_rounds, 2);
        assert!(config.grounded);
        assert_eq!(config.savedir, Some(PathBuf::from("results/run-1")));
        assert!(matches!(config.sender, AgentConfig::PolicyGradient { lr, .. } if lr == 0.5));

        let bad = ExperimentConfig::default().apply_overrides(&["nothing.here=1"]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_lola_needs_score_function() {
        let config = ExperimentConfig::from_json(
            r#"{ "recver": { "type": "lola", "base": { "type": "naive_q" } } }"#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config = ExperimentConfig::from_json(
            r#"{ "recver": { "type": "lola", "base": { "type": "actor_critic" } } }"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = ExperimentConfig {
            num_rounds: 0,
            ..ExperimentConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
