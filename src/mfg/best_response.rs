//! Finite-horizon best response by backward induction.
//!
//! Given an [`InducedModel`] (the MDP an agent faces once the population
//! flow is frozen), this computes the optimal policy and value flow. Two
//! variants are supported:
//!
//! - **Greedy**: `V = max_a Q`, one-hot policy on a maximizer chosen by the
//!   configured [`TieBreak`].
//! - **Entropy-regularized**: a prior-tilted soft-max policy with a soft value.
//!
//! # Regularized update
//!
//! With inverse temperature `beta` and prior `rho`:
//!
//! ```text
//! pi(a) = rho(a) * exp(beta * (Q(a) - Q*)) / Z
//! V     = Q* + ln( sum_a exp(beta * (Q(a) - Q*)) ) / beta
//! ```
//!
//! where `Q* = max_a Q(a)`. As `beta` grows the policy concentrates on the
//! maximizers and `V` collapses to `Q*`; as `beta` shrinks the policy returns
//! to `rho`. `V` is never below `Q*` and exceeds it by at most
//! `ln(n_actions) / beta`. With a uniform prior the pair is exactly the
//! max-entropy soft Bellman operator.

use log::debug;

use crate::mfg::config::{BestResponseConfig, TieBreak};
use crate::mfg::env::{EntropyRegularization, PolicyFlow, PolicyStep, ValueFlow};
use crate::mfg::error::{MfgError, Result};
use crate::mfg::model::InducedModel;
use crate::mfg::propagation::flow_l1;

/// Policy and value flow returned by a best-response solve.
#[derive(Debug, Clone, PartialEq)]
pub struct BestResponse {
    /// Optimal policy `[t][s][a]`.
    pub policy: PolicyFlow,
    /// Value flow `[t][s]`.
    pub value: ValueFlow,
    /// Number of backward-induction passes performed.
    pub passes: usize,
}

/// Backward-induction solver over a frozen model.
#[derive(Debug, Clone)]
pub struct BestResponseSolver<'a> {
    model: &'a InducedModel,
    config: BestResponseConfig,
}

impl<'a> BestResponseSolver<'a> {
    /// Create a solver for `model`.
    pub fn new(model: &'a InducedModel, config: BestResponseConfig) -> Self {
        Self { model, config }
    }

    /// Solve the model, greedily or with entropy regularization.
    ///
    /// Repeats backward induction until the L1 change of the value flow
    /// drops below `eps` or `n_ittr` passes have run. Plain backward
    /// induction is exact after one pass, so the second pass normally
    /// reports zero change and stops.
    pub fn solve(&self, regularization: Option<&EntropyRegularization>) -> Result<BestResponse> {
        self.config.validate()?;
        if let Some(reg) = regularization {
            reg.validate(self.model.n_actions(), self.model.horizon())?;
        }

        let mut value = self.zero_value();
        let mut policy = Vec::new();
        let mut passes = 0;

        for _ in 0..self.config.n_ittr {
            let (policy_, value_) = self.backward_pass(regularization)?;
            let diff = flow_l1(&value, &value_);
            policy = policy_;
            value = value_;
            passes += 1;

            if diff < self.config.eps {
                debug!("best response settled after {} passes", passes);
                break;
            }
        }

        Ok(BestResponse {
            policy,
            value,
            passes,
        })
    }

    /// Q-values of every valid action at `(t, s)` given the next value step.
    ///
    /// `next_value` is ignored at the terminal step.
    pub fn q_values(&self, t: usize, s: usize, next_value: &[f64]) -> Result<Vec<f64>> {
        let mut q = self.model.rewards_at(t, s)?.to_vec();
        if q.is_empty() {
            return Err(MfgError::NoActions { state: s });
        }
        if t < self.model.horizon() {
            let gamma = self.model.gamma();
            for (a, q_a) in q.iter_mut().enumerate() {
                let row = self.model.transition_row(t, s, a)?;
                let continuation: f64 = row
                    .iter()
                    .zip(next_value.iter())
                    .filter(|(p, _)| **p > 0.0)
                    .map(|(&p, &v)| p * v)
                    .sum();
                *q_a += gamma * continuation;
            }
        }
        Ok(q)
    }

    fn backward_pass(
        &self,
        regularization: Option<&EntropyRegularization>,
    ) -> Result<(PolicyFlow, ValueFlow)> {
        let horizon = self.model.horizon();
        let n_states = self.model.n_states();
        let mut value = self.zero_value();
        let mut policy: PolicyFlow = vec![Vec::new(); horizon + 1];

        for t in (0..=horizon).rev() {
            let mut pi_t: PolicyStep = Vec::with_capacity(n_states);
            for s in 0..n_states {
                let q = if t < horizon {
                    self.q_values(t, s, &value[t + 1])?
                } else {
                    self.q_values(t, s, &[])?
                };
                let (pi_s, v_s) = match regularization {
                    Some(reg) => soft_max(&q, reg.prior_at(t, s), reg.beta),
                    None => greedy(&q, self.config.tie_break),
                };
                value[t][s] = v_s;
                pi_t.push(pi_s);
            }
            policy[t] = pi_t;
        }

        Ok((policy, value))
    }

    fn zero_value(&self) -> ValueFlow {
        vec![vec![0.0; self.model.n_states()]; self.model.horizon() + 1]
    }
}

/// One-hot policy on a maximizer of `q`, and the maximal value.
fn greedy(q: &[f64], tie_break: TieBreak) -> (Vec<f64>, f64) {
    let mut best = 0;
    for (a, &q_a) in q.iter().enumerate().skip(1) {
        let better = match tie_break {
            TieBreak::LowestIndex => q_a > q[best],
            TieBreak::HighestIndex => q_a >= q[best],
        };
        if better {
            best = a;
        }
    }
    let mut pi = vec![0.0; q.len()];
    pi[best] = 1.0;
    (pi, q[best])
}

/// Prior-tilted soft-max policy and soft value (see module docs).
fn soft_max(q: &[f64], prior: &[f64], beta: f64) -> (Vec<f64>, f64) {
    let q_max = q.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let tilts: Vec<f64> = q.iter().map(|&q_a| (beta * (q_a - q_max)).exp()).collect();

    let weights: Vec<f64> = tilts.iter().zip(prior).map(|(&w, &p)| w * p).collect();
    let z: f64 = weights.iter().sum();
    let pi = weights.iter().map(|&w| w / z).collect();

    let value = q_max + tilts.iter().sum::<f64>().ln() / beta;
    (pi, value)
}

/// Expected return of a fixed policy on `model`.
///
/// `V[t][s] = sum_a pi(a) * (r(t, s, a) + gamma * sum_s' P(s' | s, a) * V[t+1][s'])`.
pub fn evaluate_policy(model: &InducedModel, policy: &[PolicyStep]) -> Result<ValueFlow> {
    let horizon = model.horizon();
    model.layout().check_policy_flow(policy, horizon)?;

    let solver = BestResponseSolver::new(model, BestResponseConfig::default());
    let mut value = solver.zero_value();
    for t in (0..=horizon).rev() {
        for s in 0..model.n_states() {
            let q = if t < horizon {
                solver.q_values(t, s, &value[t + 1])?
            } else {
                solver.q_values(t, s, &[])?
            };
            value[t][s] = q.iter().zip(&policy[t][s]).map(|(&q_a, &p)| q_a * p).sum();
        }
    }
    Ok(value)
}
