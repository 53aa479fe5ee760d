use std::f32::consts::PI;

use ndarray::{Array1, ArrayView1, Zip};
use serde::{Deserialize, Serialize};

/// Trait defining the interface for pointwise error functions
pub trait Loss: Send + Sync {
    /// Size of the circular space the error is measured on
    fn num_points(&self) -> f32;

    /// Error of a single action against a single target
    fn compute(&self, action: f32, target: f32) -> f32;

    /// Derivative of `compute` with respect to `action`
    fn derivative(&self, action: f32, target: f32) -> f32;

    /// Compute the error for aligned batches of actions and targets
    fn compute_batch(&self, actions: ArrayView1<f32>, targets: ArrayView1<f32>) -> Array1<f32> {
        Zip::from(&actions)
            .and(&targets)
            .map_collect(|&a, &t| self.compute(a, t))
    }

    /// Compute the derivative for aligned batches of actions and targets
    fn gradient_batch(&self, actions: ArrayView1<f32>, targets: ArrayView1<f32>) -> Array1<f32> {
        Zip::from(&actions)
            .and(&targets)
            .map_collect(|&a, &t| self.derivative(a, t))
    }
}

/// Shortest distance between `a` and `b` on a circle of `n` points, and the
/// sign of its derivative with respect to `a` (`0.0` when they coincide).
pub fn circle_distance(a: f32, b: f32, n: f32) -> (f32, f32) {
    let forward = (a - b).rem_euclid(n);
    if forward == 0.0 {
        (0.0, 0.0)
    } else if forward <= n / 2.0 {
        (forward, 1.0)
    } else {
        (n - forward, -1.0)
    }
}

/// L1 distance on the circle
#[derive(Clone, Copy, Debug)]
pub struct CircleL1 {
    pub num_points: f32,
}

impl CircleL1 {
    pub fn new(num_points: usize) -> Self {
        CircleL1 { num_points: num_points as f32 }
    }
}

impl Loss for CircleL1 {
    fn num_points(&self) -> f32 {
        self.num_points
    }

    fn compute(&self, action: f32, target: f32) -> f32 {
        circle_distance(action, target, self.num_points).0
    }

    fn derivative(&self, action: f32, target: f32) -> f32 {
        circle_distance(action, target, self.num_points).1
    }
}

/// Squared circular distance
#[derive(Clone, Copy, Debug)]
pub struct CircleL2 {
    pub num_points: f32,
}

impl CircleL2 {
    pub fn new(num_points: usize) -> Self {
        CircleL2 { num_points: num_points as f32 }
    }
}

impl Loss for CircleL2 {
    fn num_points(&self) -> f32 {
        self.num_points
    }

    fn compute(&self, action: f32, target: f32) -> f32 {
        let (distance, _) = circle_distance(action, target, self.num_points);
        distance * distance
    }

    fn derivative(&self, action: f32, target: f32) -> f32 {
        let (distance, sign) = circle_distance(action, target, self.num_points);
        2.0 * distance * sign
    }
}

/// Cosine distance, treating positions as angles `2π·x / num_points`.
/// Ranges over `[0, 2]`.
#[derive(Clone, Copy, Debug)]
pub struct CosineLoss {
    pub num_points: f32,
}

impl CosineLoss {
    pub fn new(num_points: usize) -> Self {
        CosineLoss { num_points: num_points as f32 }
    }

    fn angle(&self, action: f32, target: f32) -> f32 {
        2.0 * PI * (action - target) / self.num_points
    }
}

impl Loss for CosineLoss {
    fn num_points(&self) -> f32 {
        self.num_points
    }

    fn compute(&self, action: f32, target: f32) -> f32 {
        1.0 - self.angle(action, target).cos()
    }

    fn derivative(&self, action: f32, target: f32) -> f32 {
        2.0 * PI / self.num_points * self.angle(action, target).sin()
    }
}

/// Which error function a run trains against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    CircleL1,
    CircleL2,
    Cosine,
}

impl LossKind {
    pub fn build(self, num_points: usize) -> Box<dyn Loss> {
        match self {
            LossKind::CircleL1 => Box::new(CircleL1::new(num_points)),
            LossKind::CircleL2 => Box::new(CircleL2::new(num_points)),
            LossKind::Cosine => Box::new(CosineLoss::new(num_points)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_circle_l1_wraps() {
        let loss = CircleL1::new(8);
        assert_eq!(loss.compute(0.0, 7.0), 1.0);
        assert_eq!(loss.compute(7.0, 0.0), 1.0);
        assert_eq!(loss.compute(3.0, 3.0), 0.0);
        assert_eq!(loss.compute(0.0, 4.0), 4.0);
        assert_eq!(loss.derivative(0.0, 7.0), 1.0);
        assert_eq!(loss.derivative(7.0, 0.0), -1.0);
    }

    #[test]
    fn test_circle_l2_squares() {
        let loss = CircleL2::new(10);
        assert_eq!(loss.compute(1.0, 8.0), 9.0);
        assert_eq!(loss.derivative(1.0, 8.0), 6.0);
    }

    #[test]
    fn test_cosine_opposite_points() {
        let loss = CosineLoss::new(8);
        assert!((loss.compute(0.0, 4.0) - 2.0).abs() < 1e-6);
        assert!(loss.compute(2.0, 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_batch_helpers() {
        let loss = LossKind::CircleL1.build(8);
        let errors = loss.compute_batch(array![0.0, 1.0, 6.0].view(), array![7.0, 1.0, 2.0].view());
        assert_eq!(errors, array![1.0, 0.0, 4.0]);
    }
}
