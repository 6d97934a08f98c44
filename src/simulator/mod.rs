//! Circuit simulation seam.
//!
//! The fitter only needs `simulate(netlist, stimulus) -> IvCurve`. The
//! shipped adapter drives ngspice in batch mode; tests plug in their own.

pub mod ngspice;
pub mod rawfile;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde_derive::{Deserialize, Serialize};

use crate::error::Result;

pub use ngspice::Ngspice;

/// Probe signal driving the network through the current-sense resistor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Stimulus {
    /// Sine frequency, Hz.
    pub frequency: f64,
    /// Sine amplitude, V.
    pub amplitude: f64,
    /// Current-sense resistor between the probe and the network input, ohms.
    pub series_resistance: f64,
    /// Signal-to-noise ratio of the synthetic measurement, dB.
    pub snr: f64,
    /// Periods simulated before the last one is sampled.
    pub cycles: usize,
    /// Samples per period.
    pub samples: usize,
}

impl Default for Stimulus {
    fn default() -> Self {
        Self {
            frequency: 1e4,
            amplitude: 5.0,
            series_resistance: 100.0,
            snr: 120.0,
            cycles: 10,
            samples: 100,
        }
    }
}

impl Stimulus {
    pub fn period(&self) -> f64 {
        1.0 / self.frequency
    }

    /// Transient step so that one period spans `samples` steps.
    pub fn time_step(&self) -> f64 {
        self.period() / self.samples as f64
    }
}

/// One period of voltage at the network input and current into it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IvCurve {
    pub voltages: Vec<f64>,
    pub currents: Vec<f64>,
}

impl IvCurve {
    pub fn new(voltages: Vec<f64>, currents: Vec<f64>) -> Self {
        debug_assert_eq!(voltages.len(), currents.len());
        IvCurve { voltages, currents }
    }

    pub fn len(&self) -> usize {
        self.voltages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }

    pub fn max_abs_current(&self) -> f64 {
        max_abs(&self.currents)
    }
}

pub(crate) fn max_abs(values: &[f64]) -> f64 {
    values.iter().fold(0.0_f64, |m, v| m.max(v.abs()))
}

/// Runs a synthesized netlist under the stimulus.
///
/// Implementations are shared across worker threads.
pub trait Simulator: Send + Sync {
    fn simulate(&self, netlist: &str, stimulus: &Stimulus) -> Result<IvCurve>;
}

impl<S: Simulator + ?Sized> Simulator for Box<S> {
    fn simulate(&self, netlist: &str, stimulus: &Stimulus) -> Result<IvCurve> {
        (**self).simulate(netlist, stimulus)
    }
}

const NOISE_SEED: u64 = 0x1f5e_ed17;

/// Add white Gaussian noise at `snr_db` to both channels.
///
/// The generator is reseeded on every call, so equal curves always receive
/// equal noise.
pub fn add_noise(curve: &mut IvCurve, snr_db: f64) {
    if !snr_db.is_finite() || curve.is_empty() {
        return;
    }
    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    for channel in [&mut curve.voltages, &mut curve.currents] {
        let rms = (channel.iter().map(|v| v * v).sum::<f64>() / channel.len() as f64).sqrt();
        let sigma = rms / 10f64.powf(snr_db / 20.0);
        let Ok(normal) = Normal::new(0.0, sigma) else {
            continue;
        };
        for v in channel.iter_mut() {
            *v += normal.sample(&mut rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sine_curve() -> IvCurve {
        let v: Vec<f64> = (0..100)
            .map(|k| 5.0 * (2.0 * std::f64::consts::PI * k as f64 / 100.0).sin())
            .collect();
        let i = v.iter().map(|v| v / 1000.0).collect();
        IvCurve::new(v, i)
    }

    #[test]
    fn test_stimulus_time_step() {
        let s = Stimulus::default();
        assert_abs_diff_eq!(s.time_step(), 1e-6, epsilon = 1e-18);
    }

    #[test]
    fn test_noise_is_deterministic() {
        let mut a = sine_curve();
        let mut b = sine_curve();
        add_noise(&mut a, 40.0);
        add_noise(&mut b, 40.0);
        assert_eq!(a, b);
        assert_ne!(a, sine_curve());
    }

    #[test]
    fn test_high_snr_noise_is_tiny() {
        let clean = sine_curve();
        let mut noisy = clean.clone();
        add_noise(&mut noisy, 120.0);
        for (n, c) in noisy.voltages.iter().zip(&clean.voltages) {
            assert_abs_diff_eq!(n, c, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_zero_signal_stays_zero() {
        let mut flat = IvCurve::new(vec![0.0; 10], vec![0.0; 10]);
        add_noise(&mut flat, 30.0);
        assert!(flat.currents.iter().all(|&c| c == 0.0));
    }
}
