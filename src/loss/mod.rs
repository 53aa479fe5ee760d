//! # Error functions on the circular action space
//!
//! Actions and targets live on a circle of `num_points` positions, so every
//! error here wraps around at `num_points`: `0` and `num_points - 1` are
//! neighbours. All functions are pointwise; batch helpers simply map them over
//! aligned arrays.

pub mod functions;

pub use functions::{circle_distance, CircleL1, CircleL2, CosineLoss, Loss, LossKind};
