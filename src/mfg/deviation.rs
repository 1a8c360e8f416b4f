//! Finite-population deviation benchmark.
//!
//! A mean-field equilibrium is only an approximation for a finite population.
//! This module fixes the equilibrium policy for `N - 1` agents and asks what
//! a single remaining agent gains by deviating. The other agents' states are
//! not sampled: their exact count distribution under `mu_t` comes from an
//! [`EmpiricalDistribution`] oracle, and the deviator's reward is the exact
//! expectation
//!
//! ```text
//! r_dev(s, a, t) = sum_nodes p(node) * theta(L(s, a, t, node), t)
//! L(s, a, t, node) = sum_s' pairwise(s, a, s', t) * (count'(s') / N)
//! ```
//!
//! where `count'` adds the deviator itself to its own state.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::mfg::best_response::{evaluate_policy, BestResponseSolver};
use crate::mfg::config::BestResponseConfig;
use crate::mfg::empirical::{EmpiricalDistribution, EmpiricalNode};
use crate::mfg::env::{
    check_action, checked_pairwise_reward, checked_transition, MeanFieldEnv, PolicyFlow,
    PolicyStep, ValueFlow, DISTRIBUTION_TOLERANCE, TRANSITION_TOLERANCE,
};
use crate::mfg::error::{MfgError, Result};
use crate::mfg::model::InducedModel;
use crate::mfg::propagation::MeanFieldPropagator;

/// Outcome of a deviation check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationReport {
    /// Population size including the deviator.
    pub n_agents: usize,
    /// The deviator's greedy best response.
    pub best_response_policy: PolicyFlow,
    /// Value of the best response.
    pub best_response_value: ValueFlow,
    /// Value of following the mean-field policy in the finite population.
    pub mean_field_value: ValueFlow,
    /// Per-state gain from deviating at `t = 0`.
    pub gains: Vec<f64>,
    /// Gain weighted by `mu_0`.
    pub exploitability: f64,
    /// `(t, s)` pairs with positive mass where the mean-field policy's
    /// preferred action is strictly worse than the best response.
    pub suboptimal_steps: Vec<(usize, usize)>,
}

impl DeviationReport {
    /// Whether the mean-field policy is still a best response for one agent.
    pub fn remains_optimal(&self) -> bool {
        self.suboptimal_steps.is_empty()
    }
}

/// The deviated MDP faced by one agent among `N`.
#[derive(Debug)]
pub struct DeviationBenchmark<'a, E: MeanFieldEnv + ?Sized> {
    env: &'a E,
    n_agents: usize,
    policy: PolicyFlow,
    mean_field_flow: Vec<Vec<f64>>,
    empirical_flow: Vec<Option<Vec<EmpiricalNode>>>,
    model: InducedModel,
}

impl<'a, E: MeanFieldEnv + ?Sized> DeviationBenchmark<'a, E> {
    /// Build the benchmark for `policy` and a population of `n_agents`.
    ///
    /// Recomputes the mean-field flow under `policy`, asks `oracle` for the
    /// other agents' count distribution at every step that carries reward,
    /// and assembles the deviated reward table.
    pub fn new<O: EmpiricalDistribution + ?Sized>(
        env: &'a E,
        policy: &[PolicyStep],
        n_agents: usize,
        oracle: &O,
    ) -> Result<Self> {
        if n_agents == 0 {
            return Err(MfgError::InvalidParameter {
                name: "n_agents",
                value: 0.0,
                message: "the population must contain the deviating agent".to_string(),
            });
        }

        let horizon = env.horizon();
        let propagator = MeanFieldPropagator::new(env)?;
        let mean_field_flow = propagator.flow(policy)?.mu;

        let mut empirical_flow = Vec::with_capacity(horizon + 1);
        for (t, mu_t) in mean_field_flow.iter().enumerate() {
            if env.terminal_reward_only() && t < horizon {
                empirical_flow.push(None);
                continue;
            }
            let weights = normalized_weights(mu_t, t)?;
            let nodes = oracle.enumerate(n_agents - 1, &weights)?;
            check_nodes(&nodes, n_agents - 1, env.n_states())?;
            debug!("t={}: {} empirical nodes", t, nodes.len());
            empirical_flow.push(Some(nodes));
        }
        if let Some(Some(last)) = empirical_flow.last() {
            info!(
                "total {} nodes expanded for empirical distribution (N = {})",
                last.len(),
                n_agents
            );
        }

        let layout = propagator.layout();
        let mut rewards = Vec::with_capacity(horizon + 1);
        let mut transitions = Vec::with_capacity(horizon);
        for t in 0..=horizon {
            let nodes = empirical_flow[t].as_deref();
            let mut reward_t = Vec::with_capacity(layout.n_states());
            let mut trans_t = Vec::with_capacity(layout.n_states());
            for s in 0..layout.n_states() {
                let n = layout.n_actions()[s];
                let mut reward_s = Vec::with_capacity(n);
                let mut trans_s = Vec::with_capacity(n);
                for a in 0..n {
                    reward_s.push(deviated_reward(env, n_agents, nodes, s, a, t)?);
                    if t < horizon {
                        trans_s.push(checked_transition(env, s, a, &mean_field_flow[t])?);
                    }
                }
                reward_t.push(reward_s);
                trans_t.push(trans_s);
            }
            rewards.push(reward_t);
            if t < horizon {
                transitions.push(trans_t);
            }
        }
        let model = InducedModel::new(layout.n_actions(), horizon, env.gamma(), rewards, transitions)?;

        Ok(Self {
            env,
            n_agents,
            policy: policy.to_vec(),
            mean_field_flow,
            empirical_flow,
            model,
        })
    }

    /// Population size including the deviator.
    pub fn n_agents(&self) -> usize {
        self.n_agents
    }

    /// State flow of the other agents.
    pub fn mean_field_flow(&self) -> &[Vec<f64>] {
        &self.mean_field_flow
    }

    /// Count distributions per step; `None` where rewards are identically zero.
    pub fn empirical_flow(&self) -> &[Option<Vec<EmpiricalNode>>] {
        &self.empirical_flow
    }

    /// The deviated MDP.
    pub fn model(&self) -> &InducedModel {
        &self.model
    }

    /// Exact expected reward of deviating agent at `(s, a, t)`.
    pub fn deviated_reward(&self, s: usize, a: usize, t: usize) -> Result<f64> {
        if t > self.env.horizon() {
            return Err(MfgError::TimeOutOfRange {
                t,
                horizon: self.env.horizon(),
            });
        }
        let nodes = self.empirical_flow[t].as_deref();
        deviated_reward(self.env, self.n_agents, nodes, s, a, t)
    }

    /// Solve the deviated MDP and compare against the mean-field policy.
    pub fn check(&self, config: &BestResponseConfig) -> Result<DeviationReport> {
        let solver = BestResponseSolver::new(&self.model, config.clone());
        let br = solver.solve(None)?;
        let mean_field_value = evaluate_policy(&self.model, &self.policy)?;

        let gains: Vec<f64> = br.value[0]
            .iter()
            .zip(&mean_field_value[0])
            .map(|(&v_br, &v_mf)| v_br - v_mf)
            .collect();
        let exploitability: f64 = self
            .env
            .mu0()
            .iter()
            .zip(&gains)
            .map(|(&mass, &gain)| mass * gain)
            .sum();

        let horizon = self.model.horizon();
        let mut suboptimal_steps = Vec::new();
        for t in 0..=horizon {
            for s in 0..self.model.n_states() {
                if self.mean_field_flow[t][s] <= 0.0 {
                    continue;
                }
                let q = if t < horizon {
                    solver.q_values(t, s, &br.value[t + 1])?
                } else {
                    solver.q_values(t, s, &[])?
                };
                let q_best = q.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let preferred = preferred_action(&self.policy[t][s]);
                if q[preferred] < q_best - SUBOPTIMALITY_TOLERANCE {
                    suboptimal_steps.push((t, s));
                }
            }
        }

        info!(
            "N = {}: exploitability {:.6}, {} suboptimal steps",
            self.n_agents,
            exploitability,
            suboptimal_steps.len()
        );

        Ok(DeviationReport {
            n_agents: self.n_agents,
            best_response_policy: br.policy,
            best_response_value: br.value,
            mean_field_value,
            gains,
            exploitability,
            suboptimal_steps,
        })
    }
}

const SUBOPTIMALITY_TOLERANCE: f64 = 1e-9;

/// Most likely action of a policy row; the first one on ties.
fn preferred_action(row: &[f64]) -> usize {
    let mut best = 0;
    for (a, &p) in row.iter().enumerate() {
        if p > row[best] {
            best = a;
        }
    }
    best
}

/// Rescale a propagated state distribution to unit mass.
///
/// Each propagation step accepts transition rows within
/// `TRANSITION_TOLERANCE`, so the mass of `mu_t` may drift by up to
/// `(1 + tol)^t - 1`. Anything beyond that is rejected.
fn normalized_weights(mu_t: &[f64], t: usize) -> Result<Vec<f64>> {
    let mass: f64 = mu_t.iter().sum();
    let drift = (1.0 + TRANSITION_TOLERANCE).powi(t as i32) - 1.0 + DISTRIBUTION_TOLERANCE;
    if !(mass > 0.0) || (mass - 1.0).abs() > drift {
        return Err(MfgError::InvalidDistribution {
            message: format!("mean-field mass at t={} is {}", t, mass),
        });
    }
    Ok(mu_t.iter().map(|&m| m / mass).collect())
}

fn check_nodes(nodes: &[EmpiricalNode], n_others: usize, n_states: usize) -> Result<()> {
    for node in nodes {
        if node.counts.len() != n_states {
            return Err(MfgError::shape("empirical node counts", n_states, node.counts.len()));
        }
        let total: usize = node.counts.iter().sum();
        if total != n_others {
            return Err(MfgError::InvalidDistribution {
                message: format!("empirical node has {} agents, expected {}", total, n_others),
            });
        }
    }
    Ok(())
}

fn deviated_reward<E: MeanFieldEnv + ?Sized>(
    env: &E,
    n_agents: usize,
    nodes: Option<&[EmpiricalNode]>,
    s: usize,
    a: usize,
    t: usize,
) -> Result<f64> {
    check_action(env, s, a)?;
    let Some(nodes) = nodes else {
        return Ok(0.0);
    };
    let mut reward = 0.0;
    for node in nodes {
        let l = pairwise_statistic(env, n_agents, s, a, t, &node.counts)?;
        reward += node.prob * env.theta(l, t);
    }
    Ok(reward)
}

/// Pairwise reward averaged over the empirical distribution including the deviator.
fn pairwise_statistic<E: MeanFieldEnv + ?Sized>(
    env: &E,
    n_agents: usize,
    s: usize,
    a: usize,
    t: usize,
    counts: &[usize],
) -> Result<f64> {
    let mut l = 0.0;
    for (state, &count) in counts.iter().enumerate() {
        let count = if state == s { count + 1 } else { count };
        let fraction = count as f64 / n_agents as f64;
        l += checked_pairwise_reward(env, s, a, state, t)? * fraction;
    }
    Ok(l)
}
