//! # Sender and Receiver Agents
//!
//! Every agent implements [`Policy`]. The same concrete type plays either
//! side of the game; the [`Role`] tag only matters to the training loop,
//! which builds each side's [`Observation`] and routes errors back.
//!
//! ## Available Agents
//!
//! | Agent | Action | Learns |
//! |-------|--------|--------|
//! | [`NoComm`] | fixed value or identity | no |
//! | [`UniformBias`] | input plus bounded uniform noise | no |
//! | [`QLearning`] | epsilon-greedy over a Q-table | one-step TD |
//! | [`DeterministicGradient`] | MLP output, wrapped | pathwise gradient of its error |
//! | [`GaussianPolicyGradient`] | rounded Normal sample | REINFORCE + entropy bonus |
//! | [`CategoricalPolicyGradient`] | softmax sample | REINFORCE + entropy bonus |
//!
//! The actor-critic and the opponent-aware wrapper live in
//! [`algorithms`](crate::algorithms).
//!
//! ## Episode lifecycle
//!
//! ```text
//! act -> record   (once per round)
//! snapshot        (both agents, before anyone learns)
//! loss -> step    (sender first, then receiver)
//! reset
//! ```
//!
//! Calling `loss` with no recorded round, or with per-round buffers of
//! different lengths, returns an error instead of producing an update.

pub mod baseline;
pub mod deterministic;
pub mod gradient;
pub mod tabular;
pub mod traits;

pub use baseline::{NoComm, NoCommOutput, UniformBias};
pub use deterministic::DeterministicGradient;
pub use gradient::{linear_scores, CategoricalPolicyGradient, GaussianHead, GaussianPolicyGradient};
pub use tabular::{QLearning, QLearningBuilder, StateMemory};
pub use traits::{
    Feedback, Observation, OpponentSnapshot, Parameters, PendingUpdate, Policy, PolicyBase, Role, Step,
    UpdateKind, FEATURES,
};
