// src/isolator.rs
//
// =============================================================================
// CPUSETISO: ISOLATOR ENGINE
// =============================================================================
//
// Per-container cpuset orchestration. The engine is an actor: one worker
// task owns the container maps, the driver, the topology and the series
// store, and processes requests strictly in arrival order. Callers hold a
// cheap handle and await oneshot replies. Dropping the handle closes the
// mailbox, which terminates the worker.
//
// Isolate sequence: record the request in the time series, create the
// group, select cores (CUDA policy when GPUs are requested), derive memory
// nodes, write cpus + mems, attach the pid. Any failure after group
// creation destroys the group again before the error is surfaced.

use crate::cpuset::CpusetDriver;
use crate::errors::{CpusetError, Result};
use crate::inventory::ResourceInventory;
use crate::resources::Resources;
use crate::scheduler::SubmodularSelector;
use crate::series::SeriesStore;
use crate::topology::HardwareTopology;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

// ============================================================================
// 1. ORCHESTRATOR-FACING TYPES
// ============================================================================

/// A previously-launched container handed back on agent restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerState {
    pub container_id: String,
    pub pid: u32,
}

/// Point-in-time usage report. Task counts only; utilization tracking is
/// out of scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceStatistics {
    pub timestamp_secs: i64,
    pub cpus_requested: f64,
}

/// The container lifecycle surface the orchestrator drives.
#[async_trait]
pub trait Isolator: Send + Sync {
    async fn recover(&self, states: Vec<ContainerState>, orphans: Vec<String>) -> Result<()>;
    async fn prepare(&self, container_id: &str) -> Result<()>;
    async fn update(&self, container_id: &str, resources: Resources) -> Result<()>;
    async fn isolate(&self, container_id: &str, pid: u32) -> Result<()>;
    async fn watch(&self, container_id: &str) -> Result<()>;
    async fn usage(&self, container_id: &str) -> Result<ResourceStatistics>;
    async fn cleanup(&self, container_id: &str) -> Result<()>;
}

// ============================================================================
// 2. MAILBOX PROTOCOL
// ============================================================================

enum Request {
    Recover {
        states: Vec<ContainerState>,
        reply: oneshot::Sender<Result<()>>,
    },
    Update {
        id: String,
        resources: Resources,
        reply: oneshot::Sender<Result<()>>,
    },
    Isolate {
        id: String,
        pid: u32,
        reply: oneshot::Sender<Result<()>>,
    },
    Usage {
        id: String,
        reply: oneshot::Sender<Result<ResourceStatistics>>,
    },
    Cleanup {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

// ============================================================================
// 3. HANDLE
// ============================================================================

#[derive(Debug)]
pub struct CpusetIsolator {
    mailbox: mpsc::Sender<Request>,
    worker: JoinHandle<()>,
}

impl CpusetIsolator {
    /// Boots the engine worker. The topology must already be discovered;
    /// the store carries the configured sample window.
    pub fn start(
        topology: Arc<HardwareTopology>,
        driver: CpusetDriver,
        store: SeriesStore,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);

        let worker = IsolatorWorker {
            inventory: ResourceInventory::new(Arc::clone(&topology), driver.clone()),
            topology,
            driver,
            store,
            selector: SubmodularSelector::new(),
            containers: HashMap::new(),
            pids: HashMap::new(),
        };

        Self {
            mailbox: tx,
            worker: tokio::spawn(worker.run(rx)),
        }
    }

    /// Graceful teardown: closes the mailbox and waits for the worker to
    /// drain in-flight requests.
    pub async fn shutdown(self) {
        drop(self.mailbox);
        let _ = self.worker.await;
    }

    async fn call<T>(
        &self,
        request: Request,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.mailbox
            .send(request)
            .await
            .map_err(|_| CpusetError::Terminated)?;
        rx.await.map_err(|_| CpusetError::Terminated)?
    }
}

#[async_trait]
impl Isolator for CpusetIsolator {
    async fn recover(&self, states: Vec<ContainerState>, _orphans: Vec<String>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.call(Request::Recover { states, reply: tx }, rx).await
    }

    async fn prepare(&self, _container_id: &str) -> Result<()> {
        // Nothing to stage before launch; the placement happens at isolate.
        Ok(())
    }

    async fn update(&self, container_id: &str, resources: Resources) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.call(
            Request::Update {
                id: container_id.to_string(),
                resources,
                reply: tx,
            },
            rx,
        )
        .await
    }

    async fn isolate(&self, container_id: &str, pid: u32) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.call(
            Request::Isolate {
                id: container_id.to_string(),
                pid,
                reply: tx,
            },
            rx,
        )
        .await
    }

    async fn watch(&self, _container_id: &str) -> Result<()> {
        // No limitation events are ever raised; the binding is static.
        Ok(())
    }

    async fn usage(&self, container_id: &str) -> Result<ResourceStatistics> {
        let (tx, rx) = oneshot::channel();
        self.call(
            Request::Usage {
                id: container_id.to_string(),
                reply: tx,
            },
            rx,
        )
        .await
    }

    async fn cleanup(&self, container_id: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.call(
            Request::Cleanup {
                id: container_id.to_string(),
                reply: tx,
            },
            rx,
        )
        .await
    }
}

// ============================================================================
// 4. WORKER
// ============================================================================

struct IsolatorWorker {
    topology: Arc<HardwareTopology>,
    driver: CpusetDriver,
    inventory: ResourceInventory,
    store: SeriesStore,
    selector: SubmodularSelector,
    containers: HashMap<String, Resources>,
    pids: HashMap<String, u32>,
}

impl IsolatorWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>) {
        while let Some(request) = rx.recv().await {
            match request {
                Request::Recover { states, reply } => {
                    let _ = reply.send(self.recover(states));
                }
                Request::Update {
                    id,
                    resources,
                    reply,
                } => {
                    let _ = reply.send(self.update(&id, resources));
                }
                Request::Isolate { id, pid, reply } => {
                    let _ = reply.send(self.isolate(&id, pid));
                }
                Request::Usage { id, reply } => {
                    let _ = reply.send(self.usage(&id));
                }
                Request::Cleanup { id, reply } => {
                    let _ = reply.send(self.cleanup(&id));
                }
            }
        }
        log::debug!("isolator worker mailbox closed, terminating");
    }

    fn recover(&mut self, states: Vec<ContainerState>) -> Result<()> {
        // Re-adopt pids for containers the orchestrator still knows about.
        // Their groups survived the restart; resources arrive via update.
        for state in states {
            log::info!(
                "recovered container '{}' with pid {}",
                state.container_id,
                state.pid
            );
            self.pids.insert(state.container_id, state.pid);
        }
        Ok(())
    }

    /// First-write-wins: repeated updates for the same id are ignored.
    fn update(&mut self, id: &str, resources: Resources) -> Result<()> {
        if self.containers.contains_key(id) {
            log::debug!("update for known container '{}' ignored", id);
            return Ok(());
        }
        self.containers.insert(id.to_string(), resources);
        Ok(())
    }

    fn isolate(&mut self, id: &str, pid: u32) -> Result<()> {
        let resources = self
            .containers
            .get(id)
            .ok_or_else(|| CpusetError::UnknownContainer(id.to_string()))?
            .clone();

        let cpus = resources.cpus();
        let gpus = resources.gpus();
        let requested = cpus.ceil() as usize;

        // Request history feeds the oversubscription estimator.
        self.store.append(requested as u32)?;

        self.driver.create_group(id)?;

        match self.place_and_attach(id, pid, cpus, gpus, requested) {
            Ok(selected) => {
                self.pids.insert(id.to_string(), pid);
                log::info!(
                    "isolated container '{}' (pid {}) on cores {:?}",
                    id,
                    pid,
                    selected
                );
                Ok(())
            }
            Err(e) => {
                // The group must not outlive a failed isolate.
                if let Err(destroy_err) = self.driver.destroy_group(id) {
                    log::warn!(
                        "failed to tear down group '{}' after isolate error: {}",
                        id,
                        destroy_err
                    );
                }
                Err(e)
            }
        }
    }

    fn place_and_attach(
        &mut self,
        id: &str,
        pid: u32,
        cpus: f64,
        gpus: f64,
        requested: usize,
    ) -> Result<Vec<u32>> {
        let selected = if gpus > 0.0 {
            let policy = self.inventory.cuda_policy()?.with_idle_guard();
            self.selector.select(&policy, cpus)
        } else {
            let policy = self.inventory.cpu_policy()?.with_idle_guard();
            self.selector.select(&policy, cpus)
        };

        if requested > 0 && selected.len() < requested {
            return Err(CpusetError::Exhausted {
                requested,
                selected: selected.len(),
            });
        }

        // Every NUMA node owning a selected core joins cpuset.mems.
        let mems: Vec<u32> = selected
            .iter()
            .map(|&core| self.topology.numa_of_core(core))
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect();

        let cores = self.topology.core_os_indices(&selected);

        self.driver.write_core_list(id, &cores)?;
        self.driver.write_mem_list(id, &mems)?;
        self.driver.attach_pid(id, pid)?;

        Ok(cores)
    }

    fn usage(&self, id: &str) -> Result<ResourceStatistics> {
        let resources = match self.containers.get(id) {
            Some(r) => r,
            None => {
                log::warn!("no resource usage for unknown container '{}'", id);
                return Ok(ResourceStatistics::default());
            }
        };

        Ok(ResourceStatistics {
            timestamp_secs: Utc::now().timestamp(),
            cpus_requested: resources.cpus(),
        })
    }

    fn cleanup(&mut self, id: &str) -> Result<()> {
        if self.containers.remove(id).is_none() {
            return Err(CpusetError::UnknownContainer(id.to_string()));
        }
        self.pids.remove(id);

        // The group only exists once isolate succeeded; update-then-cleanup
        // without an isolate in between has nothing to destroy.
        match self.driver.destroy_group(id) {
            Err(CpusetError::NotFound(_)) => {
                log::debug!("no cpuset group to destroy for '{}'", id);
                Ok(())
            }
            other => other,
        }
    }
}
