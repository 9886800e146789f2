// src/inventory.rs
//
// =============================================================================
// CPUSETISO: RESOURCE INVENTORY
// =============================================================================
//
// The composition layer between the hardware model and the live cpuset
// state. It folds the per-group task histogram into the cost/weight vectors
// the selector consumes and packages them as index-set policies:
//
// - CpuPolicy:  every core is a candidate.
// - CudaPolicy: only GPU-neighbor cores are candidates; everything else
//   carries zero weight and therefore never contributes positive marginal.

use crate::cpuset::CpusetDriver;
use crate::errors::Result;
use crate::scheduler::IndexSetPolicy;
use crate::topology::HardwareTopology;
use std::sync::Arc;

// ============================================================================
// 1. INVENTORY
// ============================================================================

pub struct ResourceInventory {
    topology: Arc<HardwareTopology>,
    driver: CpusetDriver,
}

impl ResourceInventory {
    pub fn new(topology: Arc<HardwareTopology>, driver: CpusetDriver) -> Self {
        Self { topology, driver }
    }

    pub fn topology(&self) -> &Arc<HardwareTopology> {
        &self.topology
    }

    /// Task count per dense core: how many cpuset groups currently claim the
    /// core's OS index.
    pub fn task_counts(&self) -> Result<Vec<u32>> {
        let groups = self.driver.list_groups()?;
        let histogram = self.driver.per_group_core_load(&groups)?;

        Ok((0..self.topology.num_cores())
            .map(|c| {
                histogram
                    .get(&self.topology.core(c).os_index)
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    /// Normalized task frequency: count on the core over the total count.
    /// All zeros when no group claims anything; callers must guard.
    pub fn cost_vector(counts: &[u32]) -> Vec<f64> {
        let total: u32 = counts.iter().sum();
        if total == 0 {
            return vec![0.0; counts.len()];
        }
        counts
            .iter()
            .map(|&c| f64::from(c) / f64::from(total))
            .collect()
    }

    /// Work per hardware thread: task count over the core's PU count.
    pub fn weight_vector(&self, counts: &[u32]) -> Vec<f64> {
        let pus = self.topology.pus_per_core();
        counts
            .iter()
            .zip(pus)
            .map(|(&c, pu)| f64::from(c) / pu.max(1) as f64)
            .collect()
    }

    /// Policy over every core on the host.
    pub fn cpu_policy(&self) -> Result<CpuPolicy> {
        let counts = self.task_counts()?;
        let cost = Self::cost_vector(&counts);
        let weight = self.weight_vector(&counts);
        let items: Vec<usize> = (0..self.topology.num_cores()).collect();

        log::debug!(
            "inventory: {} candidate core(s), total task count {}",
            items.len(),
            counts.iter().sum::<u32>()
        );

        Ok(CpuPolicy {
            topology: Arc::clone(&self.topology),
            items,
            cost,
            weight,
        })
    }

    /// Policy restricted to GPU-neighbor cores.
    pub fn cuda_policy(&self) -> Result<CudaPolicy> {
        Ok(CudaPolicy::from_cpu(self.cpu_policy()?))
    }
}

// ============================================================================
// 2. POLICIES
// ============================================================================

pub struct CpuPolicy {
    topology: Arc<HardwareTopology>,
    items: Vec<usize>,
    cost: Vec<f64>,
    weight: Vec<f64>,
}

impl CpuPolicy {
    /// Policy from explicit vectors (trial runs, tests).
    pub fn from_parts(
        topology: Arc<HardwareTopology>,
        items: Vec<usize>,
        cost: Vec<f64>,
        weight: Vec<f64>,
    ) -> Self {
        Self {
            topology,
            items,
            cost,
            weight,
        }
    }

    /// The zero-load guard: when no candidate carries any cost the knapsack
    /// bound would collapse to zero, so an idle host gets a uniform unit
    /// cost per item and the budget admits exactly the requested core count.
    pub fn with_idle_guard(mut self) -> Self {
        if self.items.iter().all(|&i| self.cost[i] == 0.0) {
            for &i in &self.items {
                self.cost[i] = 1.0;
            }
        }
        self
    }
}

impl IndexSetPolicy for CpuPolicy {
    fn items(&self) -> &[usize] {
        &self.items
    }

    fn similarity(&self, i: usize, j: usize) -> f64 {
        self.topology.latency(i, j)
    }

    fn cost(&self) -> &[f64] {
        &self.cost
    }

    fn weight(&self) -> &[f64] {
        &self.weight
    }
}

/// Inherits cost and latency from the CPU policy; items shrink to the GPU
/// neighborhood and non-neighbor weights are forced to zero.
pub struct CudaPolicy {
    inner: CpuPolicy,
    items: Vec<usize>,
    weight: Vec<f64>,
}

impl CudaPolicy {
    pub fn from_cpu(cpu: CpuPolicy) -> Self {
        let items = cpu.topology.gpu_neighbor_cpus();

        let mut weight = vec![0.0; cpu.weight.len()];
        for &core in &items {
            weight[core] = cpu.weight[core];
        }

        Self {
            inner: cpu,
            items,
            weight,
        }
    }

    pub fn with_idle_guard(mut self) -> Self {
        if self.items.iter().all(|&i| self.inner.cost[i] == 0.0) {
            for &i in &self.items {
                self.inner.cost[i] = 1.0;
            }
        }
        self
    }
}

impl IndexSetPolicy for CudaPolicy {
    fn items(&self) -> &[usize] {
        &self.items
    }

    fn similarity(&self, i: usize, j: usize) -> f64 {
        self.inner.similarity(i, j)
    }

    fn cost(&self) -> &[f64] {
        &self.inner.cost
    }

    fn weight(&self) -> &[f64] {
        &self.weight
    }
}
