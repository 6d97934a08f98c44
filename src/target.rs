//! The curve being fitted.
//!
//! A target is either simulated from a known schematic or loaded from a
//! measurement file. Everything derived from it (full voltage, drift
//! corrected current, comparator noise floors) is computed once here.

use serde_derive::Deserialize;
use std::path::Path;

use crate::config::FitConfig;
use crate::error::{FitError, Result};
use crate::netlist;
use crate::parser;
use crate::schematic::Schematic;
use crate::simulator::{max_abs, IvCurve, Simulator, Stimulus};

/// Share of the peak amplitude treated as comparator noise.
const NOISE_FRACTION: f64 = 0.01;

#[derive(Debug, Clone)]
pub struct TargetCurve {
    curve: IvCurve,
    full_voltages: Vec<f64>,
    corrected_currents: Vec<f64>,
    zero_drift: f64,
    noise_v: f64,
    noise_i: f64,
}

impl TargetCurve {
    /// Wrap measured samples. `series_resistance` is the sense resistor
    /// the measurement was taken through.
    pub fn new(curve: IvCurve, series_resistance: f64, forward_voltage: f64) -> Result<Self> {
        if curve.voltages.len() != curve.currents.len() {
            return Err(FitError::MalformedInput(format!(
                "{} voltages but {} currents",
                curve.voltages.len(),
                curve.currents.len()
            )));
        }
        if curve.len() < 2 {
            return Err(FitError::MalformedInput("curve needs at least 2 samples".into()));
        }
        if curve.voltages.iter().chain(&curve.currents).any(|x| !x.is_finite()) {
            return Err(FitError::MalformedInput("curve contains non-finite samples".into()));
        }

        let full_voltages = curve
            .voltages
            .iter()
            .zip(&curve.currents)
            .map(|(v, i)| v + series_resistance * i)
            .collect();

        // Mean current where both diodes are off.
        let (sum, count) = curve
            .voltages
            .iter()
            .zip(&curve.currents)
            .filter(|(v, _)| v.abs() < forward_voltage)
            .fold((0.0, 0usize), |(s, n), (_, i)| (s + i, n + 1));
        let zero_drift = if count > 0 { sum / count as f64 } else { 0.0 };
        let corrected_currents = curve.currents.iter().map(|i| i - zero_drift).collect();

        Ok(TargetCurve {
            noise_v: NOISE_FRACTION * max_abs(&curve.voltages),
            noise_i: NOISE_FRACTION * max_abs(&curve.currents),
            curve,
            full_voltages,
            corrected_currents,
            zero_drift,
        })
    }

    /// Simulate `sch` and use the result as the target.
    pub fn from_schematic(
        sch: &Schematic,
        simulator: &dyn Simulator,
        config: &FitConfig,
    ) -> Result<Self> {
        let text = netlist::synthesize(sch, &config.limits);
        let curve = simulator.simulate(&text, &config.stimulus)?;
        Self::new(curve, config.stimulus.series_resistance, config.diode.forward_voltage)
    }

    /// Read a reference circuit, then simulate it.
    pub fn from_circuit_file(
        path: &Path,
        simulator: &dyn Simulator,
        config: &FitConfig,
    ) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let sch = netlist::to_schematic(&parser::parse(&text)?, &config.limits)?;
        Self::from_schematic(&sch, simulator, config)
    }

    pub fn curve(&self) -> &IvCurve {
        &self.curve
    }

    pub fn voltages(&self) -> &[f64] {
        &self.curve.voltages
    }

    pub fn currents(&self) -> &[f64] {
        &self.curve.currents
    }

    /// Probe voltage before the sense resistor, `v + Rcs·i`.
    pub fn full_voltages(&self) -> &[f64] {
        &self.full_voltages
    }

    pub fn corrected_currents(&self) -> &[f64] {
        &self.corrected_currents
    }

    pub fn zero_drift(&self) -> f64 {
        self.zero_drift
    }

    /// Comparator noise floors `(voltage, current)`.
    pub fn noise_floor(&self) -> (f64, f64) {
        (self.noise_v, self.noise_i)
    }

    pub fn len(&self) -> usize {
        self.curve.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curve.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Measurement files
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Board {
    elements: Vec<BoardElement>,
}

#[derive(Debug, Deserialize)]
struct BoardElement {
    pins: Vec<Pin>,
}

#[derive(Debug, Deserialize)]
struct Pin {
    iv_curves: Vec<MeasuredCurve>,
}

#[derive(Debug, Deserialize)]
struct MeasuredCurve {
    voltages: Vec<f64>,
    currents: Vec<f64>,
    measurement_settings: MeasurementSettings,
}

#[derive(Debug, Deserialize)]
struct MeasurementSettings {
    probe_signal_frequency: f64,
    max_voltage: f64,
    internal_resistance: f64,
}

/// Read pin `record` of the first board element.
///
/// The probe frequency, amplitude, sense resistor and sample count of the
/// measurement replace those in `stimulus`.
pub fn parse_measurement(text: &str, record: usize, stimulus: &mut Stimulus) -> Result<IvCurve> {
    let board: Board = serde_json::from_str(text)
        .map_err(|e| FitError::MalformedInput(format!("measurement file: {e}")))?;
    let element = board
        .elements
        .into_iter()
        .next()
        .ok_or_else(|| FitError::MalformedInput("measurement file has no elements".into()))?;
    let pin_count = element.pins.len();
    let pin = element.pins.into_iter().nth(record).ok_or_else(|| {
        FitError::MalformedInput(format!("record {record} out of range, file has {pin_count} pins"))
    })?;
    let measured = pin
        .iv_curves
        .into_iter()
        .next()
        .ok_or_else(|| FitError::MalformedInput(format!("pin {record} has no iv_curves")))?;

    if measured.voltages.len() != measured.currents.len() {
        return Err(FitError::MalformedInput(format!(
            "pin {record}: {} voltages but {} currents",
            measured.voltages.len(),
            measured.currents.len()
        )));
    }
    let settings = measured.measurement_settings;
    if settings.probe_signal_frequency <= 0.0 {
        return Err(FitError::MalformedInput(format!(
            "pin {record}: probe_signal_frequency must be positive"
        )));
    }

    stimulus.frequency = settings.probe_signal_frequency;
    stimulus.amplitude = settings.max_voltage;
    stimulus.series_resistance = settings.internal_resistance;
    stimulus.samples = measured.voltages.len();
    tracing::info!(
        record,
        frequency = stimulus.frequency,
        amplitude = stimulus.amplitude,
        series_resistance = stimulus.series_resistance,
        samples = stimulus.samples,
        "loaded measurement"
    );

    Ok(IvCurve::new(measured.voltages, measured.currents))
}

pub fn load_measurement(path: &Path, record: usize, stimulus: &mut Stimulus) -> Result<IvCurve> {
    let text = std::fs::read_to_string(path)?;
    parse_measurement(&text, record, stimulus)
}
