// src/cpuset.rs
//
// =============================================================================
// CPUSETISO: CGROUP CPUSET DRIVER
// =============================================================================
//
// Read/write access to the kernel cpuset controller (cgroup v1).
//
// Responsibilities:
// 1. Enumerate cpuset groups under the controller root.
// 2. Parse and emit kernel cpuset lists ("0-3,8,10-11").
// 3. Create/destroy per-container groups, write cpus/mems, attach pids.
// 4. Build the task-count-per-core histogram the scheduler consumes.
//
// The controller root is explicit in the constructor so agents with a
// non-standard mount (and tests with a scratch directory) can redirect it.

use crate::errors::{CpusetError, Result};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_CPUSET_ROOT: &str = "/sys/fs/cgroup/cpuset";

// ============================================================================
// 1. LIST GRAMMAR
// ============================================================================

/// Parses a kernel cpuset list: a comma-separated sequence of single indices
/// and inclusive `lo-hi` ranges. Returns the indices sorted and deduplicated.
pub fn parse_core_list(raw: &str) -> Result<Vec<u32>> {
    let line = raw.trim();
    let mut indices: Vec<u32> = Vec::new();

    if line.is_empty() {
        return Ok(indices);
    }

    for term in line.split(',') {
        let term = term.trim();
        if let Some((lo, hi)) = term.split_once('-') {
            let lo: u32 = lo
                .trim()
                .parse()
                .map_err(|_| CpusetError::Parse(format!("bad range start in '{}'", term)))?;
            let hi: u32 = hi
                .trim()
                .parse()
                .map_err(|_| CpusetError::Parse(format!("bad range end in '{}'", term)))?;
            if hi < lo {
                return Err(CpusetError::Parse(format!("inverted range '{}'", term)));
            }
            indices.extend(lo..=hi);
        } else {
            let idx: u32 = term
                .parse()
                .map_err(|_| CpusetError::Parse(format!("bad index '{}'", term)))?;
            indices.push(idx);
        }
    }

    indices.sort_unstable();
    indices.dedup();
    Ok(indices)
}

/// Emits the write encoding: plain comma-separated decimals, no ranges.
/// The kernel accepts singleton lists, so no compaction is attempted.
pub fn format_core_list(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// ============================================================================
// 2. THE DRIVER
// ============================================================================

#[derive(Debug, Clone)]
pub struct CpusetDriver {
    root: PathBuf,
}

impl CpusetDriver {
    /// Driver over an explicit controller root.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Driver over the standard v1 mount point.
    pub fn system() -> Self {
        Self::new(DEFAULT_CPUSET_ROOT)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fails with `Unavailable` when the controller is not mounted.
    pub fn check_available(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(CpusetError::Unavailable(self.root.clone()));
        }
        Ok(())
    }

    fn group_path(&self, group: &str) -> PathBuf {
        self.root.join(group)
    }

    /// Directory entries under the controller root that are directories and
    /// not symlinks. Each is a live cpuset group.
    pub fn list_groups(&self) -> Result<Vec<String>> {
        self.check_available()?;

        let mut groups = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let meta = fs::symlink_metadata(entry.path())?;
            if meta.is_dir() && !meta.file_type().is_symlink() {
                groups.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        groups.sort();
        Ok(groups)
    }

    /// Reads and parses any cpuset list file.
    pub fn read_core_list(&self, path: impl AsRef<Path>) -> Result<Vec<u32>> {
        let raw = fs::read_to_string(path.as_ref())?;
        parse_core_list(&raw)
    }

    /// Parses the controller root's `cpuset.cpus`: every core present on the host.
    pub fn read_root_cpus(&self) -> Result<Vec<u32>> {
        self.check_available()?;
        self.read_core_list(self.root.join("cpuset.cpus"))
    }

    /// Parses the controller root's `cpuset.mems`: every memory node on the host.
    pub fn read_root_mems(&self) -> Result<Vec<u32>> {
        self.check_available()?;
        self.read_core_list(self.root.join("cpuset.mems"))
    }

    /// Creates a group directory. An existing directory is `AlreadyExists`.
    pub fn create_group(&self, group: &str) -> Result<()> {
        self.check_available()?;

        let path = self.group_path(group);
        if path.exists() {
            return Err(CpusetError::AlreadyExists(group.to_string()));
        }
        fs::create_dir(&path)?;
        log::debug!("created cpuset group {:?}", path);
        Ok(())
    }

    /// Opt-in idempotent variant: an existing group is treated as success.
    pub fn ensure_group(&self, group: &str) -> Result<()> {
        match self.create_group(group) {
            Err(CpusetError::AlreadyExists(_)) => Ok(()),
            other => other,
        }
    }

    /// Removes a group directory. Fails with `NotFound` when absent.
    pub fn destroy_group(&self, group: &str) -> Result<()> {
        self.check_available()?;

        let path = self.group_path(group);
        if !path.exists() {
            return Err(CpusetError::NotFound(group.to_string()));
        }
        fs::remove_dir_all(&path)?;
        log::debug!("destroyed cpuset group {:?}", path);
        Ok(())
    }

    /// Writes the core list into the group's `cpuset.cpus`.
    pub fn write_core_list(&self, group: &str, cores: &[u32]) -> Result<()> {
        self.write_list_file(group, "cpuset.cpus", cores)
    }

    /// Writes the memory-node list into the group's `cpuset.mems`.
    pub fn write_mem_list(&self, group: &str, mems: &[u32]) -> Result<()> {
        self.write_list_file(group, "cpuset.mems", mems)
    }

    fn write_list_file(&self, group: &str, file: &str, indices: &[u32]) -> Result<()> {
        let dir = self.group_path(group);
        if !dir.exists() {
            return Err(CpusetError::NotFound(group.to_string()));
        }
        fs::write(dir.join(file), format_core_list(indices))?;
        Ok(())
    }

    /// Appends the pid to the group's `tasks` file, flushed before close.
    /// The kernel moves the task; descendants inherit the binding.
    pub fn attach_pid(&self, group: &str, pid: u32) -> Result<()> {
        let dir = self.group_path(group);
        if !dir.exists() {
            return Err(CpusetError::NotFound(group.to_string()));
        }

        let mut tasks = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("tasks"))?;
        writeln!(tasks, "{}", pid)?;
        tasks.flush()?;
        log::debug!("attached pid {} to cpuset group '{}'", pid, group);
        Ok(())
    }

    /// Task-count histogram: for each group's `cpuset.cpus`, one count per
    /// core that appears in it. This counts how many cpuset groups currently
    /// claim a core, not kernel run-queue depth.
    ///
    /// A group whose `cpuset.cpus` is not readable yet (created but not
    /// populated, or mid-teardown) contributes no claims.
    pub fn per_group_core_load(&self, groups: &[String]) -> Result<BTreeMap<u32, u32>> {
        self.check_available()?;

        let mut histogram: BTreeMap<u32, u32> = BTreeMap::new();
        for group in groups {
            let cpus_path = self.group_path(group).join("cpuset.cpus");
            let cores = match self.read_core_list(&cpus_path) {
                Ok(cores) => cores,
                Err(CpusetError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("group '{}' has no core list yet, skipping", group);
                    continue;
                }
                Err(e) => return Err(e),
            };
            for core in cores {
                *histogram.entry(core).or_insert(0) += 1;
            }
        }
        Ok(histogram)
    }
}
