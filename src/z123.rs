//! Analytical first guess ("Z123") for the branch values.
//!
//! Diodes are treated as ideal switches with a fixed forward voltage, which
//! turns the network into a piecewise-linear one: below the forward voltage
//! only R2 conducts, above it R1 joins, below minus it R3 joins. R2 comes
//! from the ohmic part of the curve, R1 and R3 from the two peaks. A short
//! list of fallback triples covers curves where one of the regions is
//! missing, and the triple with the lowest current residual wins. Series
//! capacitances are then sized from the phase lag between the voltage and
//! current peaks.

use crate::config::{DiodeConfig, FitConfig, Limits};
use crate::schematic::{reactance_to_capacitance, ComponentId, Schematic};
use crate::target::TargetCurve;

/// The diode a peak formula relies on is not conducting at that peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiodeClosed;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Approximation {
    pub r1: f64,
    pub r2: f64,
    pub r3: f64,
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
    /// Sum of squared current errors of the chosen triple.
    pub residual: f64,
}

impl Approximation {
    /// Copy the branch values into `sch`. Switch resistors are untouched.
    pub fn seed(&self, sch: &mut Schematic) {
        sch[ComponentId::R1] = self.r1;
        sch[ComponentId::C1] = self.c1;
        sch[ComponentId::R2] = self.r2;
        sch[ComponentId::C2] = self.c2;
        sch[ComponentId::R3] = self.r3;
        sch[ComponentId::C3] = self.c3;
    }
}

/// Everything the piecewise-linear model needs.
#[derive(Debug, Clone, Copy)]
pub struct PwlModel {
    pub series_resistance: f64,
    pub forward_voltage: f64,
}

impl PwlModel {
    /// Current drawn at full (pre sense resistor) voltage `v`.
    pub fn current(&self, v: f64, r1: f64, r2: f64, r3: f64) -> f64 {
        let (rcs, vd) = (self.series_resistance, self.forward_voltage);
        let (r1, r2, r3) = (r1.abs(), r2.abs(), r3.abs());
        let ohmic = v / (rcs + r2);
        let v2 = r2 * ohmic;

        if v2 >= vd {
            (v * (r1 + r2) - r2 * vd) / (r1 * r2 + r1 * rcs + r2 * rcs)
        } else if v2 <= -vd {
            (v * (r3 + r2) + r2 * vd) / (r3 * r2 + r3 * rcs + r2 * rcs)
        } else {
            ohmic
        }
    }

    /// Σ (I_pwl(V_k) − i_k)² against the drift-corrected target current.
    pub fn residual(&self, target: &TargetCurve, r1: f64, r2: f64, r3: f64) -> f64 {
        target
            .full_voltages()
            .iter()
            .zip(target.corrected_currents())
            .map(|(&v, &i)| (self.current(v, r1, r2, r3) - i).powi(2))
            .sum()
    }
}

fn ratio(v: f64, i: f64, huge: f64) -> f64 {
    if i == 0.0 {
        huge
    } else {
        v / i
    }
}

fn argmax(xs: &[f64]) -> usize {
    let mut best = 0;
    for (k, &x) in xs.iter().enumerate() {
        if x > xs[best] {
            best = k;
        }
    }
    best
}

fn argmin(xs: &[f64]) -> usize {
    let mut best = 0;
    for (k, &x) in xs.iter().enumerate() {
        if x < xs[best] {
            best = k;
        }
    }
    best
}

struct Peaks<'a> {
    target: &'a TargetCurve,
    model: PwlModel,
    diode: &'a DiodeConfig,
    huge: f64,
    max_idx: usize,
    min_idx: usize,
}

impl Peaks<'_> {
    fn v(&self, k: usize) -> f64 {
        self.target.full_voltages()[k]
    }

    fn i(&self, k: usize) -> f64 {
        self.target.corrected_currents()[k]
    }

    /// R1 at the positive peak, given R2.
    fn r1_from_r2(&self, r2: f64) -> Result<f64, DiodeClosed> {
        let (v, i) = (self.v(self.max_idx), self.i(self.max_idx));
        let (rcs, vd) = (self.model.series_resistance, self.diode.forward_voltage);
        if v / (rcs + r2) * r2 < vd - self.diode.deadband {
            return Err(DiodeClosed);
        }
        Ok(r2 * (v - i * rcs - vd) / (i * (r2 + rcs) - v))
    }

    /// R3 at the negative peak, given R2.
    fn r3_from_r2(&self, r2: f64) -> Result<f64, DiodeClosed> {
        let (v, i) = (self.v(self.min_idx), self.i(self.min_idx));
        let (rcs, vd) = (self.model.series_resistance, self.diode.forward_voltage);
        if v / (rcs + r2) * r2 > -(vd - self.diode.deadband) {
            return Err(DiodeClosed);
        }
        Ok(r2 * (v - i * rcs + vd) / (i * (r2 + rcs) - v))
    }

    fn at_max(&self, offset: f64) -> f64 {
        ratio(self.v(self.max_idx) + offset, self.i(self.max_idx), self.huge)
    }

    fn at_min(&self, offset: f64) -> f64 {
        ratio(self.v(self.min_idx) + offset, self.i(self.min_idx), self.huge)
    }
}

/// Mean |v/i| over the samples where only R2 can conduct.
fn measure_r2(target: &TargetCurve, diode: &DiodeConfig, huge: f64) -> f64 {
    let (sum, count) = target
        .voltages()
        .iter()
        .zip(target.corrected_currents())
        .filter(|(v, _)| v.abs() > diode.deadband && v.abs() < diode.forward_voltage)
        .map(|(&v, &i)| ratio(v, i, huge))
        .filter(|&r| r < huge)
        .fold((0.0, 0usize), |(s, n), r| (s + r.abs(), n + 1));
    if count == 0 {
        huge
    } else {
        sum / count as f64
    }
}

/// Peak-to-peak lag in degrees, folded into [5, 85].
fn fold_phase(shift: f64) -> f64 {
    (shift.abs() % 90.0).clamp(5.0, 85.0)
}

fn parallel(rs: &[f64]) -> f64 {
    1.0 / rs.iter().map(|r| 1.0 / r).sum::<f64>()
}

fn capacitance(rc: f64, phase_deg: f64, frequency: f64, limits: &Limits) -> f64 {
    let c = reactance_to_capacitance(rc * phase_deg.to_radians().cos(), frequency);
    c.clamp(limits.min_capacitance, limits.max_capacitance)
}

/// Compute the first guess for `target`.
pub fn approximate(target: &TargetCurve, config: &FitConfig) -> Approximation {
    let _span = tracing::info_span!("approximate").entered();
    let limits = &config.limits;
    let (huge, null) = (limits.huge_resistance, limits.null_resistance);
    let model = PwlModel {
        series_resistance: config.stimulus.series_resistance,
        forward_voltage: config.diode.forward_voltage,
    };
    let peaks = Peaks {
        target,
        model,
        diode: &config.diode,
        huge,
        max_idx: argmax(target.full_voltages()),
        min_idx: argmin(target.full_voltages()),
    };

    let r2 = measure_r2(target, &config.diode, huge);
    let r1 = peaks.r1_from_r2(r2).unwrap_or(null);
    let r3 = peaks.r3_from_r2(r2).unwrap_or(null);
    let r1_open = peaks.r1_from_r2(huge).unwrap_or(null);
    let r3_open = peaks.r3_from_r2(huge).unwrap_or(null);

    let vd = config.diode.forward_voltage;
    let r1_0 = peaks.at_max(0.0);
    let r1_d = peaks.at_max(-vd);
    let r3_0 = peaks.at_min(0.0);
    let r3_d = peaks.at_min(vd);

    let candidates = [
        [r1, r2, r3],
        [r1, huge, r3],
        [r1, huge, r3_open],
        [r1_open, huge, r3],
        [r1_open, huge, r3_open],
        [r1_open, huge, huge],
        [huge, huge, r3_open],
        [r1_d, huge, r3_d],
        [r1_d, r3_0, huge],
        [huge, r1_0, r3_d],
        [huge, r3_0, huge],
        [huge, r1_0, huge],
        [null, r2, null],
        [null, r2, r3],
        [r1, r2, null],
        [r1, null, r3],
    ];

    let mut best = candidates[0];
    let mut best_residual = f64::INFINITY;
    for (k, c) in candidates.iter().enumerate() {
        let residual = model.residual(target, c[0], c[1], c[2]);
        tracing::debug!(candidate = k, r1 = c[0], r2 = c[1], r3 = c[2], residual, "z123 candidate");
        if residual < best_residual {
            best = *c;
            best_residual = residual;
        }
    }
    let finite = |r: f64| if r.is_finite() { r.abs() } else { huge };
    let [r1, r2, r3] = best.map(finite);

    // Lag is measured in samples over the record length.
    let n = target.len() as f64;
    let full = target.full_voltages();
    let current = target.currents();
    let phase_1 = fold_phase(360.0 * (argmax(full) as f64 - argmax(current) as f64) / n);
    let phase_3 = fold_phase(360.0 * (argmin(full) as f64 - argmin(current) as f64) / n);
    let phase_2 = 0.5 * (phase_1 + phase_3);

    let f = config.stimulus.frequency;
    let result = Approximation {
        r1,
        r2,
        r3,
        c1: capacitance(parallel(&[r1, r2]), phase_1, f, limits),
        c2: capacitance(parallel(&[r1, r2, r3]), phase_2, f, limits),
        c3: capacitance(parallel(&[r2, r3]), phase_3, f, limits),
        residual: best_residual,
    };
    tracing::info!(
        r1 = result.r1,
        r2 = result.r2,
        r3 = result.r3,
        c1 = result.c1,
        c2 = result.c2,
        c3 = result.c3,
        phase_1,
        phase_3,
        residual = result.residual,
        "z123 approximation"
    );
    result
}
