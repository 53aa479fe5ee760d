use rand::rngs::StdRng;

use crate::agent::{
    CategoricalPolicyGradient, DeterministicGradient, GaussianPolicyGradient, NoComm, Policy, QLearningBuilder,
    Role, StateMemory, UniformBias,
};
use crate::algorithms::{A2CBuilder, LolaAgent};
use crate::config::{AgentConfig, OptimizerKind};
use crate::error::Result;
use crate::optimizer::OptimizerWrapper;

pub fn optimizer_for(kind: OptimizerKind, weight_decay: f32) -> OptimizerWrapper {
    match kind {
        OptimizerKind::Adam => OptimizerWrapper::adam(weight_decay),
        OptimizerKind::Sgd => OptimizerWrapper::sgd(weight_decay),
    }
}

/// Build the agent described by `config` for one side of the game.
///
/// `bias` is the game's bias, used by a uniform-bias agent without its own.
pub fn build_policy(
    config: &AgentConfig,
    role: Role,
    num_points: usize,
    bias: f32,
    rng: &mut StdRng,
) -> Result<Box<dyn Policy>> {
    let policy: Box<dyn Policy> = match config {
        AgentConfig::NoComm { output } => Box::new(NoComm::new(role, *output)),
        AgentConfig::UniformBias { bias: own } => Box::new(UniformBias::new(role, num_points, own.unwrap_or(bias))),
        AgentConfig::NaiveQ { alpha, gamma, epsilon } | AgentConfig::OneShotQ { alpha, gamma, epsilon } => {
            let memory = if matches!(config, AgentConfig::NaiveQ { .. }) {
                StateMemory::Episodic
            } else {
                StateMemory::OneShot
            };
            Box::new(
                QLearningBuilder::new(role, num_points)
                    .memory(memory)
                    .alpha(*alpha)
                    .gamma(*gamma)
                    .epsilon(*epsilon)
                    .build(rng)?,
            )
        }
        AgentConfig::DeterministicGradient { lr, hidden_sizes, weight_decay, optimizer } => Box::new(
            DeterministicGradient::new(role, num_points, hidden_sizes, *lr, optimizer_for(*optimizer, *weight_decay), rng)?,
        ),
        AgentConfig::PolicyGradient { lr, gamma, ent_reg, min_std, weight_decay, optimizer } => {
            Box::new(GaussianPolicyGradient::new(
                role,
                num_points,
                *lr,
                *gamma,
                *ent_reg,
                *min_std,
                optimizer_for(*optimizer, *weight_decay),
                rng,
            )?)
        }
        AgentConfig::CategoricalPg { lr, gamma, ent_reg, weight_decay, optimizer } => {
            Box::new(CategoricalPolicyGradient::new(
                role,
                num_points,
                *lr,
                *gamma,
                *ent_reg,
                optimizer_for(*optimizer, *weight_decay),
                rng,
            )?)
        }
        AgentConfig::ActorCritic { lr, gamma, ent_reg, min_std, value_coeff, weight_decay, optimizer } => Box::new(
            A2CBuilder::new(role, num_points)
                .optimizer(optimizer_for(*optimizer, *weight_decay))
                .lr(*lr)
                .gamma(*gamma)
                .entropy_coeff(*ent_reg)
                .min_std(*min_std)
                .value_coeff(*value_coeff)
                .build(rng)?,
        ),
        AgentConfig::Lola { lookahead_lr, base } => {
            let inner = build_policy(base, role, num_points, bias, rng)?;
            Box::new(LolaAgent::new(inner, *lookahead_lr))
        }
    };
    Ok(policy)
}
