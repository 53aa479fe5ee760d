use ndarray::Array1;

/// Discounted returns for a sequence of per-round rewards.
///
/// Each entry of `rewards` holds one round's reward for every batch element.
/// The result is aligned with the input: `G_t = r_t + gamma * G_{t+1}` and the
/// last return equals the last reward.
pub fn discount_return(rewards: &[Array1<f32>], gamma: f32) -> Vec<Array1<f32>> {
    let mut returns: Vec<Array1<f32>> = Vec::with_capacity(rewards.len());
    let mut running: Option<Array1<f32>> = None;

    for reward in rewards.iter().rev() {
        let current = match running {
            Some(next) => reward + &(next * gamma),
            None => reward.clone(),
        };
        returns.push(current.clone());
        running = Some(current);
    }

    returns.reverse();
    returns
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_three_rounds() {
        let rewards = vec![array![1.0], array![2.0], array![4.0]];
        let returns = discount_return(&rewards, 0.5);
        assert_eq!(returns, vec![array![1.0 + 0.5 * 2.0 + 0.25 * 4.0], array![2.0 + 0.5 * 4.0], array![4.0]]);
    }

    #[test]
    fn test_per_element() {
        let rewards = vec![array![1.0, -1.0], array![1.0, 3.0]];
        let returns = discount_return(&rewards, 1.0);
        assert_eq!(returns[0], array![2.0, 2.0]);
        assert_eq!(returns[1], array![1.0, 3.0]);
    }

    #[test]
    fn test_empty() {
        assert!(discount_return(&[], 0.9).is_empty());
    }
}
