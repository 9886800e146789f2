// tests/scheduler.rs
//
// Selector invariants over a hand-checkable 4-core policy: costs
// [1, 2, 1, 1], two hardware threads per core (weights = cost / 2) and a
// banded latency matrix where neighbors sit one unit apart.

use cpusetiso::scheduler::{IndexSetPolicy, SubmodularSelector};

struct GridPolicy {
    items: Vec<usize>,
    cost: Vec<f64>,
    weight: Vec<f64>,
    latency: Vec<f64>,
    n: usize,
}

impl GridPolicy {
    fn banded_quad() -> Self {
        let cost = vec![1.0, 2.0, 1.0, 1.0];
        let weight: Vec<f64> = cost.iter().map(|c| c / 2.0).collect();
        Self {
            items: (0..4).collect(),
            cost,
            weight,
            latency: vec![
                0.0, 1.0, 2.0, 3.0, //
                1.0, 0.0, 1.0, 2.0, //
                2.0, 1.0, 0.0, 1.0, //
                3.0, 2.0, 1.0, 0.0,
            ],
            n: 4,
        }
    }
}

impl IndexSetPolicy for GridPolicy {
    fn items(&self) -> &[usize] {
        &self.items
    }

    fn similarity(&self, i: usize, j: usize) -> f64 {
        self.latency[i * self.n + j]
    }

    fn cost(&self) -> &[f64] {
        &self.cost
    }

    fn weight(&self) -> &[f64] {
        &self.weight
    }
}

#[test]
fn budget_two_picks_the_cheap_pair() {
    let policy = GridPolicy::banded_quad();
    let selector = SubmodularSelector::new();

    // B = min(cost) * 2 = 2: the cost-2 core cannot join a pair within
    // budget, so the greedy lands on the two cheap cores with the highest
    // mutual coverage.
    let selected = selector.select(&policy, 2.0);
    assert_eq!(selected, vec![0, 2]);

    let total_cost: f64 = selected.iter().map(|&i| policy.cost[i]).sum();
    assert!(total_cost <= 2.0);
    assert!(!selected.contains(&1));
}

#[test]
fn budget_one_degenerates_to_the_best_single_core() {
    let policy = GridPolicy::banded_quad();
    let selector = SubmodularSelector::new();

    let selected = selector.select(&policy, 1.0);
    assert_eq!(selected, vec![2]);
}

#[test]
fn utility_grows_with_the_budget() {
    let policy = GridPolicy::banded_quad();
    let selector = SubmodularSelector::new();

    let narrow = selector.select(&policy, 1.0);
    let wide = selector.select(&policy, 2.0);

    assert!(selector.utility(&policy, &narrow) <= selector.utility(&policy, &wide));
}

#[test]
fn selection_is_deterministic() {
    let selector = SubmodularSelector::new();

    let first = selector.select(&GridPolicy::banded_quad(), 2.0);
    for _ in 0..5 {
        assert_eq!(selector.select(&GridPolicy::banded_quad(), 2.0), first);
    }
}

#[test]
fn beats_every_affordable_singleton() {
    let policy = GridPolicy::banded_quad();
    let selector = SubmodularSelector::new();
    let bound = 1.0 * 2.0;

    let selected = selector.select(&policy, 2.0);
    let chosen_value = selector.utility(&policy, &selected);

    for v in 0..4usize {
        if policy.cost[v] <= bound {
            assert!(chosen_value >= selector.utility(&policy, &[v]));
        }
    }
}

#[test]
fn empty_pool_selects_nothing() {
    let policy = GridPolicy {
        items: Vec::new(),
        cost: Vec::new(),
        weight: Vec::new(),
        latency: Vec::new(),
        n: 0,
    };
    assert!(SubmodularSelector::new().select(&policy, 4.0).is_empty());
}

#[test]
fn unaffordable_pool_selects_nothing() {
    let policy = GridPolicy {
        items: vec![0, 1],
        cost: vec![5.0, 5.0],
        weight: vec![1.0, 1.0],
        latency: vec![0.0, 1.0, 1.0, 0.0],
        n: 2,
    };

    // B = 5 * 0.5 = 2.5; nothing fits, not even a singleton.
    assert!(SubmodularSelector::new().select(&policy, 0.5).is_empty());
}

#[test]
fn zero_latency_between_distinct_cores_stays_finite() {
    let policy = GridPolicy {
        items: vec![0, 1],
        cost: vec![1.0, 1.0],
        weight: vec![1.0, 1.0],
        latency: vec![0.0; 4],
        n: 2,
    };
    let selector = SubmodularSelector::new();

    let value = selector.utility(&policy, &[0]);
    assert!(value.is_finite());
    assert!(value > 0.0);

    // Both cores are loaded, so adding the second would collapse f to zero;
    // the greedy keeps a single core.
    let selected = selector.select(&policy, 2.0);
    assert_eq!(selected, vec![0]);
}

#[test]
fn gpu_neighborhood_is_selected_wholesale_when_idle() {
    // Eight cores; the candidate pool is the GPU neighborhood {4, 5} and it
    // carries no load. Load elsewhere is irrelevant: those cores are not
    // candidates and contribute nothing.
    let n = 8;
    let mut latency = vec![10.0; n * n];
    for i in 0..n {
        latency[i * n + i] = 0.0;
    }

    let mut cost = vec![0.25; n];
    let mut weight = vec![1.0; n];
    for idle in [4, 5] {
        cost[idle] = 0.0;
        weight[idle] = 0.0;
    }
    for blocked in [0, 1, 2, 3, 6, 7] {
        weight[blocked] = 0.0;
    }

    let policy = GridPolicy {
        items: vec![4, 5],
        cost,
        weight,
        latency,
        n,
    };

    let selected = SubmodularSelector::new().select(&policy, 2.0);
    assert_eq!(selected, vec![4, 5]);
}
