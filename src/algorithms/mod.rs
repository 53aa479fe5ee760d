//! # Learning rules beyond plain policy gradient
//!
//! - **Discounted returns** shared by every return-based agent
//! - **A2C (Advantage Actor-Critic)**: a Gaussian actor and a linear critic on
//!   the same features; the advantage `G_t - V(x_t)` replaces the raw return
//! - **LOLA (Learning with Opponent-Learning Awareness)**: wraps any agent
//!   with a score function and adds the effect of its own policy on the
//!   opponent's next learning step
//!
//! ## Choosing an Algorithm
//!
//! | Algorithm | Action Space | Uses Opponent | Variance |
//! |-----------|--------------|---------------|----------|
//! | PG        | Both         | No            | High     |
//! | A2C       | Continuous   | No            | Medium   |
//! | LOLA      | Base policy  | Yes           | High     |

pub mod a2c;
pub mod lola;
pub mod returns;

pub use a2c::{A2CAgent, A2CBuilder};
pub use lola::LolaAgent;
pub use returns::discount_return;
