// src/topology.rs
//
// =============================================================================
// CPUSETISO: HARDWARE TOPOLOGY
// =============================================================================
//
// The hardware model: sockets, cores, processing units, NUMA nodes, GPUs and
// the inter-core latency matrix. Discovered once at construction through a
// `TopologyProbe` oracle and immutable afterwards, so it can be shared across
// engines behind an `Arc` without locking.
//
// The Linux probe reads sysfs:
// - /sys/devices/system/cpu/cpu*/topology  -> sockets, cores, PU siblings
// - /sys/devices/system/node/node*         -> NUMA ownership + SLIT distances
// - /sys/bus/pci/devices/*                 -> NVIDIA GPUs and their local cores
//
// Latency between two cores is the SLIT distance between their owning NUMA
// nodes; self-distance is forced to 0. Consumers must treat a zero latency
// between distinct cores as a vanishingly small positive value.

use crate::errors::{CpusetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// PCIe vendor id the GPU scan filters on (NVIDIA).
pub const GPU_VENDOR_NVIDIA: u32 = 0x10de;

// ============================================================================
// 1. SNAPSHOT MODEL
// ============================================================================

/// One physical core. `os_index` is the identifier written into cpuset files
/// (the lowest logical CPU id among the core's hardware threads).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreInfo {
    pub os_index: u32,
    pub socket: u32,
    pub numa_node: u32,
    pub pus: Vec<u32>,
}

/// A NUMA memory domain. `os_index` is the value written to `cpuset.mems`;
/// `cores` holds dense core indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumaNodeInfo {
    pub os_index: u32,
    pub cores: Vec<usize>,
}

/// A PCIe GPU plus the cores physically closest to it (dense core indices),
/// as reported by the device oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuInfo {
    pub pci_address: String,
    pub vendor_id: u32,
    pub neighbor_cores: Vec<usize>,
}

/// Everything a probe reports. Core positions in `cores` are the dense
/// indices the scheduler operates on; `latency` is row-major over them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub cores: Vec<CoreInfo>,
    pub numa_nodes: Vec<NumaNodeInfo>,
    pub gpus: Vec<GpuInfo>,
    pub latency: Vec<f64>,
}

pub trait TopologyProbe {
    fn snapshot(&self) -> Result<TopologySnapshot>;
}

// ============================================================================
// 2. CACHED TOPOLOGY
// ============================================================================

pub struct HardwareTopology {
    snapshot: TopologySnapshot,
    num_sockets: usize,
}

impl HardwareTopology {
    /// Runs the probe once and caches the result.
    pub fn discover(probe: &dyn TopologyProbe) -> Result<Self> {
        let snapshot = probe.snapshot()?;
        Self::from_snapshot(snapshot)
    }

    /// Builds the model from a literal snapshot (tests, replay).
    pub fn from_snapshot(snapshot: TopologySnapshot) -> Result<Self> {
        let n = snapshot.cores.len();
        if snapshot.latency.len() != n * n {
            return Err(CpusetError::Parse(format!(
                "latency matrix has {} entries for {} cores",
                snapshot.latency.len(),
                n
            )));
        }

        let mut sockets: Vec<u32> = snapshot.cores.iter().map(|c| c.socket).collect();
        sockets.sort_unstable();
        sockets.dedup();

        log::info!(
            "topology: {} socket(s), {} core(s), {} pu(s), {} numa node(s), {} gpu(s)",
            sockets.len(),
            n,
            snapshot.cores.iter().map(|c| c.pus.len()).sum::<usize>(),
            snapshot.numa_nodes.len(),
            snapshot.gpus.len()
        );

        Ok(Self {
            snapshot,
            num_sockets: sockets.len(),
        })
    }

    pub fn num_sockets(&self) -> usize {
        self.num_sockets
    }

    pub fn num_cores(&self) -> usize {
        self.snapshot.cores.len()
    }

    pub fn num_pus(&self) -> usize {
        self.snapshot.cores.iter().map(|c| c.pus.len()).sum()
    }

    /// Core counts per socket, in socket order.
    pub fn cores_per_socket(&self) -> Vec<usize> {
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for core in &self.snapshot.cores {
            *counts.entry(core.socket).or_insert(0) += 1;
        }
        counts.into_values().collect()
    }

    /// Hardware-thread counts per core, in dense core order.
    pub fn pus_per_core(&self) -> Vec<usize> {
        self.snapshot.cores.iter().map(|c| c.pus.len()).collect()
    }

    /// Latency between two cores in the oracle's native units.
    /// `latency(i, i)` is always 0.
    pub fn latency(&self, i: usize, j: usize) -> f64 {
        if i == j {
            return 0.0;
        }
        self.snapshot.latency[i * self.num_cores() + j]
    }

    /// OS index of the NUMA node owning the core.
    pub fn numa_of_core(&self, core: usize) -> u32 {
        self.snapshot.cores[core].numa_node
    }

    /// Union of all GPUs' neighbor cores, sorted and deduplicated.
    pub fn gpu_neighbor_cpus(&self) -> Vec<usize> {
        let mut cores: Vec<usize> = self
            .snapshot
            .gpus
            .iter()
            .flat_map(|g| g.neighbor_cores.iter().copied())
            .collect();
        cores.sort_unstable();
        cores.dedup();
        cores
    }

    pub fn gpus(&self) -> &[GpuInfo] {
        &self.snapshot.gpus
    }

    pub fn numa_nodes(&self) -> &[NumaNodeInfo] {
        &self.snapshot.numa_nodes
    }

    pub fn core(&self, core: usize) -> &CoreInfo {
        &self.snapshot.cores[core]
    }

    /// Translates dense core indices into the OS indices cpuset files use.
    pub fn core_os_indices(&self, cores: &[usize]) -> Vec<u32> {
        cores
            .iter()
            .map(|&c| self.snapshot.cores[c].os_index)
            .collect()
    }

    pub fn snapshot(&self) -> &TopologySnapshot {
        &self.snapshot
    }
}

// ============================================================================
// 3. LINUX SYSFS PROBE
// ============================================================================

pub struct SysfsProbe {
    cpu_root: PathBuf,
    node_root: PathBuf,
    pci_root: PathBuf,
}

impl Default for SysfsProbe {
    fn default() -> Self {
        Self {
            cpu_root: PathBuf::from("/sys/devices/system/cpu"),
            node_root: PathBuf::from("/sys/devices/system/node"),
            pci_root: PathBuf::from("/sys/bus/pci/devices"),
        }
    }
}

impl SysfsProbe {
    /// Probe over staged sysfs roots (tests, recorded hosts).
    pub fn with_roots(
        cpu_root: impl AsRef<Path>,
        node_root: impl AsRef<Path>,
        pci_root: impl AsRef<Path>,
    ) -> Self {
        Self {
            cpu_root: cpu_root.as_ref().to_path_buf(),
            node_root: node_root.as_ref().to_path_buf(),
            pci_root: pci_root.as_ref().to_path_buf(),
        }
    }

    /// Logical CPU ids present under the cpu root. Falls back to `num_cpus`
    /// when the directory is missing (stripped-down containers).
    fn logical_cpus(&self) -> Vec<u32> {
        let mut cpus: Vec<u32> = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.cpu_root) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(idx) = name.strip_prefix("cpu") {
                    if let Ok(idx) = idx.parse::<u32>() {
                        cpus.push(idx);
                    }
                }
            }
        }

        if cpus.is_empty() {
            log::warn!(
                "no cpu entries under {:?}; assuming {} flat logical cpus",
                self.cpu_root,
                num_cpus::get()
            );
            cpus = (0..num_cpus::get() as u32).collect();
        }

        cpus.sort_unstable();
        cpus
    }

    fn read_u32(path: &Path) -> Option<u32> {
        let raw = fs::read_to_string(path).ok()?;
        let raw = raw.trim();
        match raw.strip_prefix("0x") {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => raw.parse().ok(),
        }
    }

    fn read_list(path: &Path) -> Vec<u32> {
        fs::read_to_string(path)
            .ok()
            .and_then(|raw| crate::cpuset::parse_core_list(&raw).ok())
            .unwrap_or_default()
    }

    /// NUMA node os indices, each with its logical-cpu list and SLIT row.
    fn numa_nodes(&self) -> Vec<(u32, Vec<u32>, Vec<f64>)> {
        let mut nodes = Vec::new();
        if let Ok(entries) = fs::read_dir(&self.node_root) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(idx) = name.strip_prefix("node") {
                    if let Ok(idx) = idx.parse::<u32>() {
                        let cpulist = Self::read_list(&entry.path().join("cpulist"));
                        let distances = fs::read_to_string(entry.path().join("distance"))
                            .ok()
                            .map(|raw| {
                                raw.split_whitespace()
                                    .filter_map(|tok| tok.parse::<f64>().ok())
                                    .collect()
                            })
                            .unwrap_or_default();
                        nodes.push((idx, cpulist, distances));
                    }
                }
            }
        }
        nodes.sort_by_key(|(idx, _, _)| *idx);
        nodes
    }

    fn gpus(&self, cores: &[CoreInfo]) -> Vec<GpuInfo> {
        let mut gpus = Vec::new();
        let Ok(entries) = fs::read_dir(&self.pci_root) else {
            return gpus;
        };

        for entry in entries.flatten() {
            let vendor = match Self::read_u32(&entry.path().join("vendor")) {
                Some(v) => v,
                None => continue,
            };
            if vendor != GPU_VENDOR_NVIDIA {
                continue;
            }

            let local_cpus = Self::read_list(&entry.path().join("local_cpulist"));
            let neighbor_cores: Vec<usize> = cores
                .iter()
                .enumerate()
                .filter(|(_, core)| core.pus.iter().any(|pu| local_cpus.contains(pu)))
                .map(|(dense, _)| dense)
                .collect();

            gpus.push(GpuInfo {
                pci_address: entry.file_name().to_string_lossy().into_owned(),
                vendor_id: vendor,
                neighbor_cores,
            });
        }

        gpus.sort_by(|a, b| a.pci_address.cmp(&b.pci_address));
        gpus
    }
}

impl TopologyProbe for SysfsProbe {
    fn snapshot(&self) -> Result<TopologySnapshot> {
        // 1. Group logical cpus into physical cores by (package, core_id).
        let mut groups: BTreeMap<(u32, u32), Vec<u32>> = BTreeMap::new();
        for cpu in self.logical_cpus() {
            let topo = self.cpu_root.join(format!("cpu{}/topology", cpu));
            let package = Self::read_u32(&topo.join("physical_package_id")).unwrap_or(0);
            // Without a core_id every logical cpu is its own core.
            let core_id = Self::read_u32(&topo.join("core_id")).unwrap_or(cpu);
            groups.entry((package, core_id)).or_default().push(cpu);
        }

        let mut cores: Vec<CoreInfo> = groups
            .into_iter()
            .map(|((package, _), mut pus)| {
                pus.sort_unstable();
                CoreInfo {
                    os_index: pus[0],
                    socket: package,
                    numa_node: 0,
                    pus,
                }
            })
            .collect();
        cores.sort_by_key(|c| c.os_index);

        // 2. NUMA ownership. A missing node tree degrades to one node owning
        //    every core with a flat unit distance.
        let raw_nodes = self.numa_nodes();
        let (node_ids, distances): (Vec<u32>, Vec<Vec<f64>>) = if raw_nodes.is_empty() {
            (vec![0], vec![vec![10.0]])
        } else {
            for core in cores.iter_mut() {
                // Cores listed by no node fall into the lowest one.
                core.numa_node = raw_nodes[0].0;
                for (node_idx, cpulist, _) in &raw_nodes {
                    if core.pus.iter().any(|pu| cpulist.contains(pu)) {
                        core.numa_node = *node_idx;
                        break;
                    }
                }
            }
            raw_nodes
                .iter()
                .map(|(idx, _, dist)| (*idx, dist.clone()))
                .unzip()
        };

        let numa_nodes: Vec<NumaNodeInfo> = node_ids
            .iter()
            .map(|&idx| NumaNodeInfo {
                os_index: idx,
                cores: cores
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.numa_node == idx)
                    .map(|(dense, _)| dense)
                    .collect(),
            })
            .collect();

        // 3. Core-to-core latency from the node SLIT. Self-distance is 0.
        let node_pos: BTreeMap<u32, usize> =
            node_ids.iter().enumerate().map(|(pos, &idx)| (idx, pos)).collect();
        let n = cores.len();
        let mut latency = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let ni = node_pos.get(&cores[i].numa_node).copied().unwrap_or(0);
                let nj = node_pos.get(&cores[j].numa_node).copied().unwrap_or(0);
                latency[i * n + j] = distances
                    .get(ni)
                    .and_then(|row| row.get(nj))
                    .copied()
                    .unwrap_or(10.0);
            }
        }

        // 4. GPUs by PCIe vendor filter.
        let gpus = self.gpus(&cores);

        Ok(TopologySnapshot {
            cores,
            numa_nodes,
            gpus,
            latency,
        })
    }
}
