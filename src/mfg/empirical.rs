//! Exact distribution of other agents' state counts.
//!
//! With `n` other agents each independently in state `s'` with probability
//! `p[s']`, the vector of counts is multinomial. The deviation benchmark needs
//! every possible count vector together with its probability.

use serde::{Deserialize, Serialize};

use crate::mfg::env::validate_distribution;
use crate::mfg::error::Result;

/// One possible configuration of the other agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalNode {
    /// Number of other agents in each state; sums to `n`.
    pub counts: Vec<usize>,
    /// Exact probability of this configuration.
    pub prob: f64,
}

/// Source of the exact count distribution.
///
/// Closures with the matching signature implement this trait, which makes it
/// easy to plug in cached or pruned enumerations.
pub trait EmpiricalDistribution {
    /// All count vectors of `n` agents distributed by `p`, with probabilities.
    fn enumerate(&self, n: usize, p: &[f64]) -> Result<Vec<EmpiricalNode>>;
}

impl<F> EmpiricalDistribution for F
where
    F: Fn(usize, &[f64]) -> Result<Vec<EmpiricalNode>>,
{
    fn enumerate(&self, n: usize, p: &[f64]) -> Result<Vec<EmpiricalNode>> {
        self(n, p)
    }
}

/// Exhaustive multinomial enumeration.
///
/// Visits every composition of `n` over the support of `p`; states with zero
/// probability always get a zero count. The number of nodes is
/// `C(n + k - 1, k - 1)` for a support of size `k`, so this grows quickly
/// with both the population and the number of occupied states.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultinomialEnumerator;

impl MultinomialEnumerator {
    /// Create a new enumerator.
    pub fn new() -> Self {
        Self
    }
}

impl EmpiricalDistribution for MultinomialEnumerator {
    fn enumerate(&self, n: usize, p: &[f64]) -> Result<Vec<EmpiricalNode>> {
        validate_distribution(p, p.len(), "empirical distribution weights")?;

        let support: Vec<usize> = (0..p.len()).filter(|&s| p[s] > 0.0).collect();
        let ln_factorial: Vec<f64> = (0..=n)
            .scan(0.0, |acc, k| {
                if k > 0 {
                    *acc += (k as f64).ln();
                }
                Some(*acc)
            })
            .collect();

        let mut nodes = Vec::new();
        let mut counts = vec![0; p.len()];
        compose(&support, 0, n, &mut counts, &mut |counts: &[usize]| {
            let ln_prob = ln_factorial[n]
                + support
                    .iter()
                    .map(|&s| counts[s] as f64 * p[s].ln() - ln_factorial[counts[s]])
                    .sum::<f64>();
            nodes.push(EmpiricalNode {
                counts: counts.to_vec(),
                prob: ln_prob.exp(),
            });
        });
        Ok(nodes)
    }
}

/// Visit every way to spread `remaining` agents over `support[idx..]`.
fn compose<F: FnMut(&[usize])>(
    support: &[usize],
    idx: usize,
    remaining: usize,
    counts: &mut [usize],
    visit: &mut F,
) {
    let state = support[idx];
    if idx + 1 == support.len() {
        counts[state] = remaining;
        visit(counts);
        counts[state] = 0;
        return;
    }
    for k in (0..=remaining).rev() {
        counts[state] = k;
        compose(support, idx + 1, remaining - k, counts, visit);
    }
    counts[state] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mfg::error::MfgError;

    #[test]
    fn test_single_other_agent() {
        let nodes = MultinomialEnumerator::new().enumerate(1, &[0.5, 0.5]).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].counts, vec![1, 0]);
        assert_eq!(nodes[1].counts, vec![0, 1]);
        assert!((nodes[0].prob - 0.5).abs() < 1e-12);
        assert!((nodes[1].prob - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_no_other_agents() {
        let nodes = MultinomialEnumerator::new().enumerate(0, &[0.2, 0.8]).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].counts, vec![0, 0]);
        assert!((nodes[0].prob - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_node_count_and_total_probability() {
        let p = [0.1, 0.2, 0.3, 0.4];
        let nodes = MultinomialEnumerator::new().enumerate(5, &p).unwrap();

        // C(5 + 3, 3)
        assert_eq!(nodes.len(), 56);
        let total: f64 = nodes.iter().map(|node| node.prob).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(nodes.iter().all(|node| node.counts.iter().sum::<usize>() == 5));
    }

    #[test]
    fn test_zero_probability_states_stay_empty() {
        let nodes = MultinomialEnumerator::new()
            .enumerate(3, &[0.0, 0.25, 0.0, 0.75])
            .unwrap();
        assert_eq!(nodes.len(), 4);
        assert!(nodes.iter().all(|node| node.counts[0] == 0 && node.counts[2] == 0));

        let all_in_three = nodes.iter().find(|node| node.counts[3] == 3).unwrap();
        assert!((all_in_three.prob - 0.75f64.powi(3)).abs() < 1e-12);
    }

    #[test]
    fn test_binomial_probabilities() {
        let nodes = MultinomialEnumerator::new().enumerate(4, &[0.3, 0.7]).unwrap();
        let two_two = nodes.iter().find(|node| node.counts == vec![2, 2]).unwrap();
        assert!((two_two.prob - 6.0 * 0.09 * 0.49).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_non_distribution() {
        let err = MultinomialEnumerator::new().enumerate(2, &[0.5, 0.6]).unwrap_err();
        assert!(matches!(err, MfgError::InvalidDistribution { .. }));
    }

    #[test]
    fn test_closure_oracle() {
        let oracle = |n: usize, p: &[f64]| -> Result<Vec<EmpiricalNode>> {
            let mut counts = vec![0; p.len()];
            counts[0] = n;
            Ok(vec![EmpiricalNode { counts, prob: 1.0 }])
        };
        let nodes = oracle.enumerate(3, &[1.0, 0.0]).unwrap();
        assert_eq!(nodes[0].counts, vec![3, 0]);
    }
}
