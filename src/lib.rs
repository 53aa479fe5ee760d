//! # emergent-selfish - Communication Between Self-Interested Agents
//!
//! A sender privately observes a target on a circle of `num_points`
//! positions and emits a message; a receiver sees only the message and
//! chooses an action. Each is scored by the circular distance between the
//! action and its own target. With a non-zero bias the two targets differ,
//! so the agents' interests conflict and whatever communication emerges
//! is strategic.
//!
//! ## Key Features
//!
//! - **Repeated game**: episodes of several rounds, each round seeing the
//!   previous round's message, action and error
//! - **Agents**: baselines, tabular Q-learning, a deterministic gradient
//!   agent, Gaussian and categorical policy gradient, advantage
//!   actor-critic and opponent-aware (LOLA) updates
//! - **Ordered learning**: both agents learn from each other's pre-update
//!   snapshot and the sender always steps before the receiver
//! - **Runs and sweeps**: JSON configs, per-epoch JSON logs, bincode
//!   checkpoints and best-run aggregation across a sweep
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use emergent_selfish::config::ExperimentConfig;
//! use emergent_selfish::train::train;
//!
//! let config = ExperimentConfig::from_json(
//!     r#"{ "sender": { "type": "policy_gradient" }, "recver": { "type": "policy_gradient" }, "bias": 3.0 }"#,
//! )?;
//! let fitness = train(config)?;
//! println!("mean L1 error over the last epochs: {}", fitness);
//! # Ok::<(), emergent_selfish::error::SelfishError>(())
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - The `Policy` interface, baselines, Q-learning, gradient agents
//! - [`algorithms`] - Discounted returns, A2C, LOLA
//! - [`builders`] - Games and agents from configuration
//! - [`config`] - Experiment configuration
//! - [`error`] - Error types and result handling
//! - [`game`] - Batches of per-round targets
//! - [`loss`] - Circular error functions
//! - [`metrics`] - Per-agent metric logs
//! - [`network`] - Dense layers with analytic backpropagation
//! - [`optimizer`] - SGD and Adam
//! - [`results`] - Sweep aggregation
//! - [`train`] - The training loop

pub mod agent;
pub mod algorithms;
pub mod builders;
pub mod config;
pub mod error;
pub mod game;
pub mod loss;
pub mod metrics;
pub mod network;
pub mod optimizer;
pub mod results;
pub mod train;

#[cfg(test)]
mod tests;
