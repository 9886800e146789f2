// src/estimator.rs
//
// =============================================================================
// CPUSETISO: OVERSUBSCRIPTION ESTIMATOR
// =============================================================================
//
// Predicts the next likely CPU-count request from the persistent time
// series, attempts a trial placement of that size, and reports the
// placeable count as revocable capacity. Stateless beyond the store: every
// poll replays the latest bucket under its own read snapshot, so it is safe
// to run alongside the isolator.
//
// Model: the bucket's samples are treated as draws from a Poisson process;
// the reported size is argmax_k P(k; mu) over k in [1, max sample].

use crate::cpuset::CpusetDriver;
use crate::errors::{CpusetError, Result};
use crate::inventory::ResourceInventory;
use crate::resources::{Resource, Resources, DEFAULT_ROLE};
use crate::scheduler::SubmodularSelector;
use crate::series::SeriesStore;
use crate::topology::HardwareTopology;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Resource name the revocable verdict is reported under.
pub const REVOCABLE_RESOURCE: &str = "core";

/// The estimator surface the orchestrator polls.
#[async_trait]
pub trait ResourceEstimator: Send + Sync {
    async fn oversubscribable(&self) -> Result<Resources>;
}

// ============================================================================
// 1. POISSON MODEL
// ============================================================================

/// Most likely request size under a Poisson model with mean `mu`, scanning
/// k in [1, max_k]. Exact ties resolve to the larger k, so an integral mean
/// reports the mean itself (P(mu-1) == P(mu) for integral mu).
///
/// Densities are built with the recurrence P(k) = P(k-1) * mu / k; the
/// closed form's factorial would overflow past k = 170.
fn poisson_argmax(mu: f64, max_k: u32) -> Option<u32> {
    if max_k == 0 {
        return None;
    }

    let mut density = (-mu).exp(); // P(0)
    let mut best: Option<(u32, f64)> = None;

    for k in 1..=max_k {
        density *= mu / f64::from(k);
        let better = match best {
            None => true,
            Some((_, best_density)) => density >= best_density,
        };
        if better {
            best = Some((k, density));
        }
    }

    best.map(|(k, _)| k)
}

// ============================================================================
// 2. HANDLE
// ============================================================================

pub struct CpusetEstimator {
    mailbox: mpsc::Sender<Poll>,
    worker: JoinHandle<()>,
}

struct Poll {
    reply: oneshot::Sender<Result<Resources>>,
}

impl CpusetEstimator {
    /// Boots the estimator worker. `template` is the initial revocable
    /// resource template from the module parameters; it bounds nothing but
    /// is reported alongside the startup log for operators.
    pub fn start(
        topology: Arc<HardwareTopology>,
        driver: CpusetDriver,
        store: SeriesStore,
        template: Resources,
    ) -> Self {
        if !template.is_empty() {
            log::info!("estimator revocable template: {}", template);
        }

        let (tx, rx) = mpsc::channel(16);
        let worker = EstimatorWorker {
            inventory: ResourceInventory::new(topology, driver),
            store,
            selector: SubmodularSelector::new(),
        };

        Self {
            mailbox: tx,
            worker: tokio::spawn(worker.run(rx)),
        }
    }

    pub async fn shutdown(self) {
        drop(self.mailbox);
        let _ = self.worker.await;
    }
}

#[async_trait]
impl ResourceEstimator for CpusetEstimator {
    async fn oversubscribable(&self) -> Result<Resources> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(Poll { reply: tx })
            .await
            .map_err(|_| CpusetError::Terminated)?;
        rx.await.map_err(|_| CpusetError::Terminated)?
    }
}

// ============================================================================
// 3. WORKER
// ============================================================================

struct EstimatorWorker {
    inventory: ResourceInventory,
    store: SeriesStore,
    selector: SubmodularSelector,
}

impl EstimatorWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Poll>) {
        while let Some(poll) = rx.recv().await {
            let _ = poll.reply.send(self.oversubscribable());
        }
        log::debug!("estimator worker mailbox closed, terminating");
    }

    fn oversubscribable(&mut self) -> Result<Resources> {
        // 1. Replay the latest bucket.
        let samples = self.store.load_latest()?;
        if samples.is_empty() {
            return Ok(Resources::new());
        }

        let counts: Vec<u32> = samples.iter().map(|&(_, count)| count).collect();
        let total: u64 = counts.iter().map(|&c| u64::from(c)).sum();
        let mu = total as f64 / counts.len() as f64;
        let max_count = counts.iter().copied().max().unwrap_or(0);

        // 2. Most likely next request size.
        let predicted = match poisson_argmax(mu, max_count) {
            Some(k) => k,
            None => return Ok(Resources::new()),
        };

        // 3. Trial placement: only a fully-placeable prediction is offered.
        let policy = self.inventory.cpu_policy()?.with_idle_guard();
        let selected = self.selector.select(&policy, f64::from(predicted));

        if selected.len() != predicted as usize {
            log::info!(
                "estimator: predicted {} core(s) but placed {}, reporting none",
                predicted,
                selected.len()
            );
            return Ok(Resources::new());
        }

        log::info!(
            "estimator: offering {} revocable core(s) (mu {:.3} over {} sample(s))",
            predicted,
            mu,
            counts.len()
        );

        Ok(Resources::from_iter([Resource::new(
            REVOCABLE_RESOURCE,
            f64::from(predicted),
            DEFAULT_ROLE,
        )])
        .make_revocable())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poisson_argmax_prefers_larger_k_on_ties() {
        // P(1; 2) == P(2; 2) exactly; the tie goes to 2.
        assert_eq!(poisson_argmax(2.0, 3), Some(2));
    }

    #[test]
    fn poisson_argmax_tracks_the_mode() {
        assert_eq!(poisson_argmax(1.0, 4), Some(1));
        assert_eq!(poisson_argmax(3.5, 10), Some(3));
        assert_eq!(poisson_argmax(0.2, 5), Some(1));
    }

    #[test]
    fn poisson_argmax_is_clamped_by_the_largest_sample() {
        // The mode sits at 5 but no sample ever exceeded 2.
        assert_eq!(poisson_argmax(5.0, 2), Some(2));
        assert_eq!(poisson_argmax(5.0, 0), None);
    }
}
