//! Turn configuration values into live games and agents.

pub mod agent;
pub mod game;

pub use agent::{build_policy, optimizer_for};
pub use game::GameBuilder;
