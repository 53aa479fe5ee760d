#[cfg(test)]
mod property_tests {
    use emergent_selfish::algorithms::discount_return;
    use emergent_selfish::loss::{CircleL1, CircleL2, Loss};
    use ndarray::Array1;
    use proptest::prelude::*;

    // Strategy for a circle size and two points on it
    fn points_strategy() -> impl Strategy<Value = (usize, u32, u32)> {
        (2usize..=64).prop_flat_map(|n| (Just(n), 0..n as u32, 0..n as u32))
    }

    fn rewards_strategy() -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-10.0f32..10.0, 1..8)
    }

    proptest! {
        #[test]
        fn test_l1_identity((n, a, _b) in points_strategy()) {
            let loss = CircleL1::new(n);
            prop_assert_eq!(loss.compute(a as f32, a as f32), 0.0);
            prop_assert_eq!(loss.derivative(a as f32, a as f32), 0.0);
        }

        #[test]
        fn test_l1_symmetric_and_bounded((n, a, b) in points_strategy()) {
            let loss = CircleL1::new(n);
            let (a, b) = (a as f32, b as f32);
            prop_assert_eq!(loss.compute(a, b), loss.compute(b, a));
            prop_assert!(loss.compute(a, b) <= n as f32 / 2.0);
            prop_assert!(loss.compute(a, b) >= 0.0);
        }

        #[test]
        fn test_l1_wraps_around(n in 2usize..=64) {
            let loss = CircleL1::new(n);
            let last = (n - 1) as f32;
            prop_assert_eq!(loss.compute(0.0, last), 1.0);
            prop_assert_eq!(loss.compute(last, 0.0), 1.0);
        }

        #[test]
        fn test_l1_shift_invariant((n, a, b) in points_strategy(), turns in -3i32..3) {
            let loss = CircleL1::new(n);
            let shift = (turns * n as i32) as f32;
            prop_assert_eq!(loss.compute(a as f32 + shift, b as f32), loss.compute(a as f32, b as f32));
        }

        #[test]
        fn test_l1_bounded_for_real_actions(n in 2usize..=64, a in -100.0f32..100.0, b in 0.0f32..64.0) {
            let loss = CircleL1::new(n);
            let value = loss.compute(a, b);
            prop_assert!(value >= 0.0);
            prop_assert!(value <= n as f32 / 2.0 + 1e-3);
        }

        #[test]
        fn test_l2_is_squared_l1((n, a, b) in points_strategy()) {
            let l1 = CircleL1::new(n).compute(a as f32, b as f32);
            let l2 = CircleL2::new(n).compute(a as f32, b as f32);
            prop_assert!((l2 - l1 * l1).abs() < 1e-3);
        }

        #[test]
        fn test_discount_recurrence(rewards in rewards_strategy(), gamma in 0.0f32..=1.0) {
            let per_round: Vec<Array1<f32>> = rewards.iter().map(|&r| Array1::from_elem(2, r)).collect();
            let returns = discount_return(&per_round, gamma);

            prop_assert_eq!(returns.len(), rewards.len());
            let last = rewards.len() - 1;
            prop_assert_eq!(returns[last][0], rewards[last]);
            for t in 0..last {
                let expected = rewards[t] + gamma * returns[t + 1][0];
                prop_assert!((returns[t][0] - expected).abs() < 1e-4);
                prop_assert_eq!(returns[t][0], returns[t][1]);
            }
        }
    }
}
