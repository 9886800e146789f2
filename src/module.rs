// src/module.rs
//
// =============================================================================
// CPUSETISO: MODULE ENTRY POINTS
// =============================================================================
//
// The surface the orchestrator loads: `create_isolator`, `create_estimator`
// and the `compatible` probe, configured through a flat key/value parameter
// list. Fatal misconfiguration (a missing sample window, an unopenable
// store, a failed topology probe) surfaces as an error the host turns into
// a non-zero exit; nothing is written to disk before validation passes.

use crate::cpuset::CpusetDriver;
use crate::estimator::CpusetEstimator;
use crate::isolator::CpusetIsolator;
use crate::resources::Resources;
use crate::series::SeriesStore;
use crate::topology::{HardwareTopology, SysfsProbe};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub const PARAM_DB_PATH: &str = "cpusetdbpath";
pub const PARAM_SAMPLE_WINDOW: &str = "samplewindow";
pub const PARAM_RESOURCES: &str = "resources";

// ============================================================================
// 1. PARAMETERS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

/// The orchestrator's flat parameter list. Lookups return the first match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameters(Vec<Parameter>);

impl Parameters {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(key, value)| Parameter {
                    key: key.into(),
                    value: value.into(),
                })
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }
}

// ============================================================================
// 2. ENTRY POINTS
// ============================================================================

/// Compatibility probe for the host's module loader.
pub fn compatible() -> bool {
    true
}

fn db_path(params: &Parameters) -> PathBuf {
    params
        .get(PARAM_DB_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn sample_window(params: &Parameters) -> Result<f64> {
    let raw = params.get(PARAM_SAMPLE_WINDOW).ok_or_else(|| {
        anyhow!(
            "missing required module parameter '{}'",
            PARAM_SAMPLE_WINDOW
        )
    })?;
    raw.parse::<f64>()
        .with_context(|| format!("failed to parse {} '{}'", PARAM_SAMPLE_WINDOW, raw))
}

/// Builds the isolator engine. Must run inside a tokio runtime: the engine
/// worker is spawned immediately.
///
/// Fatal: missing/malformed `samplewindow`, store open failure, topology
/// probe failure. A missing cpuset controller is only logged here; isolate
/// calls will fail with `Unavailable` if it never appears.
pub fn create_isolator(params: &Parameters) -> Result<CpusetIsolator> {
    let window = sample_window(params)?;

    let driver = CpusetDriver::system();
    if let Err(e) = driver.check_available() {
        log::warn!("cpuset controller not available at startup: {}", e);
    }

    let topology = HardwareTopology::discover(&SysfsProbe::default())
        .context("failed to initialize the hardware topology")?;

    let store = SeriesStore::open(db_path(params), window)
        .context("failed to open the request time-series store")?;

    Ok(CpusetIsolator::start(Arc::new(topology), driver, store))
}

/// Builds the oversubscription estimator. Must run inside a tokio runtime.
///
/// The `resources` parameter seeds the revocable template; `samplewindow`
/// is optional here since the estimator only replays existing buckets.
pub fn create_estimator(params: &Parameters) -> Result<CpusetEstimator> {
    let template = match params.get(PARAM_RESOURCES) {
        Some(raw) => Resources::parse(raw)
            .map_err(|e| anyhow!("failed to parse resources '{}': {}", raw, e))?
            .make_revocable(),
        None => Resources::new(),
    };

    let window = match params.get(PARAM_SAMPLE_WINDOW) {
        Some(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("failed to parse {} '{}'", PARAM_SAMPLE_WINDOW, raw))?,
        None => 1.0,
    };

    let driver = CpusetDriver::system();
    let topology = HardwareTopology::discover(&SysfsProbe::default())
        .context("failed to initialize the hardware topology")?;

    let store = SeriesStore::open(db_path(params), window)
        .context("failed to open the request time-series store")?;

    Ok(CpusetEstimator::start(
        Arc::new(topology),
        driver,
        store,
        template,
    ))
}

// ============================================================================
// TESTS
// ============================================================================
