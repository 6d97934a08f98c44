//! Fitting configuration.
//!
//! All tunables live in [`FitConfig`], which deserializes from TOML. Every
//! field has a default, so an empty file (or no file) yields the stock
//! configuration:
//!
//! ```toml
//! [fit]
//! tolerance = 6e-2
//! values_tolerance = 1e-2
//! max_evaluations = 100
//! metric = "comparator"
//! workers = 1
//!
//! [diode]
//! forward_voltage = 0.7
//! deadband = 0.1
//!
//! [limits]
//! huge_resistance = 1e10
//! present_threshold = 1e8
//! null_resistance = 1e-6
//! min_capacitance = 1e-15
//! max_capacitance = 1e-3
//!
//! [stimulus]
//! frequency = 1e4
//! amplitude = 5.0
//! series_resistance = 100.0
//! snr = 120.0
//! cycles = 10
//! samples = 100
//!
//! [simulator]
//! executable = "ngspice"
//! timeout_secs = 60
//! ```

use serde_derive::Deserialize;
use std::path::Path;

use crate::error::{FitError, Result};
use crate::simulator::Stimulus;

/// Which scalar the optimizer minimizes.
///
/// Success is always judged by the comparator score regardless of the metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfitMetric {
    /// Curve comparator score.
    #[default]
    Comparator,
    /// Sum of squared current differences, sample by sample.
    Squared,
    /// Squared current differences after aligning the full-voltage peaks.
    PhaseAligned,
    /// Sum of the real spectrum of the instantaneous power difference.
    Spectral,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub fit: SearchConfig,
    pub diode: DiodeConfig,
    pub limits: Limits,
    pub stimulus: Stimulus,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Comparator score at or below which a fit counts as a success.
    pub tolerance: f64,
    /// Relative tolerance of the optimizer on parameter values.
    pub values_tolerance: f64,
    /// Objective evaluations allowed per session fit.
    pub max_evaluations: usize,
    pub metric: MisfitMetric,
    /// Worker threads for session fits. 1 keeps the search sequential.
    pub workers: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tolerance: 6e-2,
            values_tolerance: 1e-2,
            max_evaluations: 100,
            metric: MisfitMetric::Comparator,
            workers: 1,
        }
    }
}

/// Piecewise-linear diode approximation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiodeConfig {
    /// A diode conducts fully above this voltage and not at all below it.
    pub forward_voltage: f64,
    /// Band around the forward voltage treated as noise.
    pub deadband: f64,
}

impl Default for DiodeConfig {
    fn default() -> Self {
        Self {
            forward_voltage: 0.7,
            deadband: 0.1,
        }
    }
}

/// Extreme values used to express open/shorted structure numerically.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Open-circuit resistance.
    pub huge_resistance: f64,
    /// Branch resistors below this are present; capacitor and diode switch
    /// resistors at or above it mean the element is present.
    pub present_threshold: f64,
    /// Short-circuit resistance.
    pub null_resistance: f64,
    pub min_capacitance: f64,
    pub max_capacitance: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            huge_resistance: 1e10,
            present_threshold: 1e8,
            null_resistance: 1e-6,
            min_capacitance: 1e-15,
            max_capacitance: 1e-3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub executable: String,
    pub timeout_secs: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            executable: "ngspice".to_string(),
            timeout_secs: 60,
        }
    }
}

impl FitConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: FitConfig = toml::from_str(text).map_err(|e| FitError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<()> {
        let l = &self.limits;
        if !(l.null_resistance < l.present_threshold && l.present_threshold <= l.huge_resistance) {
            return Err(FitError::Config(
                "limits must satisfy null_resistance < present_threshold <= huge_resistance".into(),
            ));
        }
        if l.min_capacitance <= 0.0 || l.min_capacitance > l.max_capacitance {
            return Err(FitError::Config(
                "limits must satisfy 0 < min_capacitance <= max_capacitance".into(),
            ));
        }
        if self.stimulus.frequency <= 0.0 {
            return Err(FitError::Config("stimulus.frequency must be positive".into()));
        }
        if self.stimulus.samples < 2 || self.stimulus.cycles == 0 {
            return Err(FitError::Config(
                "stimulus needs at least 2 samples and 1 cycle".into(),
            ));
        }
        if self.fit.workers == 0 {
            return Err(FitError::Config("fit.workers must be at least 1".into()));
        }
        Ok(())
    }
}
