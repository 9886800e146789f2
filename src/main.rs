// src/main.rs
//
// =============================================================================
// CPUSETISO: OPERATOR CLI & ENTRY POINT
// =============================================================================
//
// The operator surface around the engine library.
//
// Modes:
// 1. PROBE:    Read-only dump of the cpuset controller state.
// 2. TOPOLOGY: Dump the discovered hardware model as JSON.
// 3. ISOLATE:  One-shot update -> isolate round for a container id.
// 4. ESTIMATE: Run the oversubscription estimator once.
// 5. DEMO:     Create a scratch group mirroring the root lists, read the
//              utilization histogram, destroy the group.
//
// Fatal startup errors (missing samplewindow, unopenable store, failed
// topology probe) exit non-zero with a diagnostic on stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use cpusetiso::cpuset::{CpusetDriver, DEFAULT_CPUSET_ROOT};
use cpusetiso::estimator::{CpusetEstimator, ResourceEstimator};
use cpusetiso::isolator::{CpusetIsolator, Isolator};
use cpusetiso::create_estimator;
use cpusetiso::module::{Parameters, PARAM_DB_PATH, PARAM_RESOURCES};
use cpusetiso::resources::{Resource, Resources};
use cpusetiso::series::SeriesStore;
use cpusetiso::topology::{HardwareTopology, SysfsProbe};

// ============================================================================
// 1. CLI DEFINITION
// ============================================================================

#[derive(Parser)]
#[command(
    name = "cpusetiso",
    version,
    about = "Topology-aware cpuset isolation for container agents"
)]
struct Cli {
    /// Cpuset controller root.
    #[arg(long, default_value = DEFAULT_CPUSET_ROOT, global = true)]
    cpuset_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump cpuset groups, root cpus/mems and the per-core task histogram.
    Probe,

    /// Dump the discovered hardware topology as JSON.
    Topology,

    /// Place one container: record, select cores, write the group, attach.
    Isolate {
        /// Container identifier (becomes the cpuset group name).
        #[arg(long)]
        id: String,

        /// Root pid to attach.
        #[arg(long)]
        pid: u32,

        /// Requested CPU count.
        #[arg(long)]
        cpus: f64,

        /// Requested GPU count.
        #[arg(long, default_value_t = 0.0)]
        gpus: f64,

        /// Directory for the request time-series store.
        #[arg(long, default_value = ".")]
        db: String,

        /// Poisson bucket width in minutes.
        #[arg(long)]
        samplewindow: f64,
    },

    /// Poll the oversubscription estimator once.
    Estimate {
        /// Directory for the request time-series store.
        #[arg(long, default_value = ".")]
        db: String,

        /// Initial revocable resource template, host resource syntax.
        #[arg(long)]
        resources: Option<String>,
    },

    /// Lifecycle demo: scratch group, mirror root lists, read load, destroy.
    Demo {
        #[arg(long, default_value = "cpusetiso_demo")]
        group: String,
    },
}

// ============================================================================
// 2. ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".into());
    log::debug!("cpusetiso starting on {}", host);

    let cli = Cli::parse();
    let driver = CpusetDriver::new(&cli.cpuset_root);

    match cli.command {
        Commands::Probe => run_probe(driver),
        Commands::Topology => run_topology(),
        Commands::Isolate {
            id,
            pid,
            cpus,
            gpus,
            db,
            samplewindow,
        } => run_isolate(driver, id, pid, cpus, gpus, db, samplewindow).await,
        Commands::Estimate { db, resources } => run_estimate(db, resources).await,
        Commands::Demo { group } => run_demo(driver, group),
    }
}

// ============================================================================
// 3. SUBCOMMANDS
// ============================================================================

fn run_probe(driver: CpusetDriver) -> Result<()> {
    let groups = driver.list_groups().context("listing cpuset groups")?;

    println!("cpuset groups");
    for group in &groups {
        println!("  {}", group);
    }

    println!("root cpus: {:?}", driver.read_root_cpus()?);
    println!("root mems: {:?}", driver.read_root_mems()?);

    println!("per-core task counts");
    for (core, count) in driver.per_group_core_load(&groups)? {
        println!("  core {:>3}  {}", core, count);
    }
    Ok(())
}

fn run_topology() -> Result<()> {
    let topology = HardwareTopology::discover(&SysfsProbe::default())
        .context("failed to initialize the hardware topology")?;

    println!(
        "{}",
        serde_json::to_string_pretty(topology.snapshot())?
    );
    Ok(())
}

async fn run_isolate(
    driver: CpusetDriver,
    id: String,
    pid: u32,
    cpus: f64,
    gpus: f64,
    db: String,
    samplewindow: f64,
) -> Result<()> {
    driver.check_available()?;

    let topology = Arc::new(
        HardwareTopology::discover(&SysfsProbe::default())
            .context("failed to initialize the hardware topology")?,
    );
    let store = SeriesStore::open(&db, samplewindow)
        .context("failed to open the request time-series store")?;

    let engine = CpusetIsolator::start(topology, driver, store);

    let mut request = Resources::new();
    request.push(Resource::new("cpus", cpus, "*"));
    if gpus > 0.0 {
        request.push(Resource::new("gpus", gpus, "*"));
    }

    engine.update(&id, request).await?;
    engine.isolate(&id, pid).await?;

    log::info!("container '{}' pinned; group '{}' is live", id, id);
    engine.shutdown().await;
    Ok(())
}

async fn run_estimate(db: String, resources: Option<String>) -> Result<()> {
    let mut pairs = vec![(PARAM_DB_PATH.to_string(), db)];
    if let Some(template) = resources {
        pairs.push((PARAM_RESOURCES.to_string(), template));
    }

    let estimator: CpusetEstimator = create_estimator(&Parameters::from_pairs(pairs))?;
    let verdict = estimator.oversubscribable().await?;

    if verdict.is_empty() {
        println!("no revocable capacity");
    } else {
        println!("revocable: {}", verdict);
    }
    estimator.shutdown().await;
    Ok(())
}

/// Lifecycle exercise over a scratch group: create, mirror the root lists,
/// observe the histogram shift, tear down. A kernel cgroup cannot be removed
/// while tasks sit in it, so the demo never attaches anything; use `isolate`
/// for an actual pin.
fn run_demo(driver: CpusetDriver, group: String) -> Result<()> {
    driver.check_available()?;

    let cpus = driver.read_root_cpus()?;
    let mems = driver.read_root_mems()?;
    log::info!("root cpus {:?}, mems {:?}", cpus, mems);

    driver.ensure_group(&group)?;
    driver.write_core_list(&group, &cpus)?;
    driver.write_mem_list(&group, &mems)?;

    println!("per-core task counts");
    let groups = driver.list_groups()?;
    for (core, count) in driver.per_group_core_load(&groups)? {
        println!("  core {:>3}  {}", core, count);
    }

    driver.destroy_group(&group)?;
    log::info!("demo group '{}' destroyed", group);
    Ok(())
}
