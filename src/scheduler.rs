// src/scheduler.rs
//
// =============================================================================
// CPUSETISO: SUBMODULAR CORE SELECTOR
// =============================================================================
//
// Budgeted submodular maximization after Lin & Bilmes, "Multi-document
// Summarization via Budgeted Maximization of Submodular Functions"
// (NAACL-HLT 2010). Items are cores; the utility rewards pairs of cores with
// low latency and high aggregate load, with diminishing returns as a cluster
// fills up. A greedy pass ranks candidates by gain-to-cost ratio under a
// knapsack budget; a best-affordable-singleton fallback preserves the
// constant-factor approximation guarantee.
//
// The selector is pure and deterministic: same inputs, same set. Ties break
// to the lowest item index.

use std::collections::BTreeSet;

/// Stand-in for a zero latency between distinct cores.
pub const LATENCY_EPSILON: f64 = 1e-10;

// ============================================================================
// 1. POLICY INTERFACE
// ============================================================================

/// The index-set policy the selector is parameterized on. `cost` and
/// `weight` are indexed by item id; `items` is the candidate pool.
/// `similarity` is the inter-core latency: smaller is better.
pub trait IndexSetPolicy {
    fn items(&self) -> &[usize];
    fn similarity(&self, i: usize, j: usize) -> f64;
    fn cost(&self) -> &[f64];
    fn weight(&self) -> &[f64];
}

// ============================================================================
// 2. SELECTOR
// ============================================================================

pub struct SubmodularSelector {
    /// Exponent `r` applied to cost in the gain-to-cost ratio.
    exponent: f64,
}

impl Default for SubmodularSelector {
    fn default() -> Self {
        Self { exponent: 1.0 }
    }
}

impl SubmodularSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exponent(exponent: f64) -> Self {
        Self { exponent }
    }

    /// Coverage utility over a candidate set:
    ///
    ///   f(S) = sum over i in V\S, j in S of (w[i] + w[j]) / max(L(i,j), eps)
    pub fn utility(&self, policy: &dyn IndexSetPolicy, selected: &[usize]) -> f64 {
        let chosen: BTreeSet<usize> = selected.iter().copied().collect();
        self.utility_of(policy, &chosen)
    }

    fn utility_of(&self, policy: &dyn IndexSetPolicy, selected: &BTreeSet<usize>) -> f64 {
        let weights = policy.weight();
        let mut total = 0.0;

        for &i in policy.items() {
            if selected.contains(&i) {
                continue;
            }
            for &j in selected {
                let latency = policy.similarity(i, j).max(LATENCY_EPSILON);
                total += (weights[i] + weights[j]) / latency;
            }
        }
        total
    }

    /// Greedy budgeted selection. `budget` is the caller's request size `b`;
    /// the knapsack bound is `B = min(cost over items) * b`.
    ///
    /// Returns the selected item ids, sorted ascending. An empty pool, or a
    /// pool where nothing affordable exists, yields an empty set.
    pub fn select(&self, policy: &dyn IndexSetPolicy, budget: f64) -> Vec<usize> {
        let items = policy.items();
        if items.is_empty() {
            return Vec::new();
        }

        let cost = policy.cost();
        let min_cost = items
            .iter()
            .map(|&i| cost[i])
            .fold(f64::INFINITY, f64::min);
        let bound = min_cost * budget;

        // Candidate pool in ascending order; ties resolve to the lowest index.
        let mut pool: Vec<usize> = items.to_vec();
        pool.sort_unstable();
        pool.dedup();

        let mut greedy: BTreeSet<usize> = BTreeSet::new();
        let mut greedy_utility = 0.0;
        let mut greedy_cost = 0.0;

        while !pool.is_empty() {
            let mut best: Option<(usize, f64, f64, f64)> = None; // (item, ratio, gain, utility)

            for &candidate in &pool {
                let mut trial = greedy.clone();
                trial.insert(candidate);
                let trial_utility = self.utility_of(policy, &trial);
                let gain = trial_utility - greedy_utility;

                let c = cost[candidate];
                // A zero-cost item contributes no denominator; rank by raw gain.
                let ratio = if c > 0.0 {
                    gain / c.powf(self.exponent)
                } else {
                    gain
                };

                let better = match best {
                    None => true,
                    Some((_, best_ratio, _, _)) => ratio > best_ratio,
                };
                if better {
                    best = Some((candidate, ratio, gain, trial_utility));
                }
            }

            let Some((winner, _, gain, trial_utility)) = best else {
                break;
            };

            if greedy_cost + cost[winner] <= bound && gain >= 0.0 {
                greedy.insert(winner);
                greedy_cost += cost[winner];
                greedy_utility = trial_utility;
            }

            // The winner leaves the pool whether or not it was accepted.
            pool.retain(|&i| i != winner);
        }

        // Singleton fallback: the best affordable single item.
        let mut fallback: Option<(usize, f64)> = None;
        for &v in items {
            if cost[v] > bound {
                continue;
            }
            let value = self.utility_of(policy, &BTreeSet::from([v]));
            let better = match fallback {
                None => true,
                Some((_, best_value)) => value > best_value,
            };
            if better {
                fallback = Some((v, value));
            }
        }

        match fallback {
            Some((v, value)) if greedy_utility < value => vec![v],
            _ => greedy.into_iter().collect(),
        }
    }
}
