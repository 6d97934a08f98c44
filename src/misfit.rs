//! Misfit evaluation: synthesize, simulate, score.

use num_complex::Complex64;
use rustfft::FftPlanner;
use serde_derive::Serialize;

use crate::config::MisfitMetric;
use crate::fit::FittingContext;
use crate::netlist;
use crate::schematic::{ParameterVector, Schematic};
use crate::simulator::IvCurve;
use crate::target::TargetCurve;

/// Score assigned when a simulation fails. Large enough that no real
/// candidate ever loses to a failed one.
pub const FAILURE_SCORE: f64 = 1e10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    /// Value of the configured metric; what the optimizer minimizes.
    pub misfit: f64,
    /// Comparator score; what success is judged on.
    pub similarity: f64,
}

impl Score {
    pub const FAILED: Score = Score {
        misfit: FAILURE_SCORE,
        similarity: FAILURE_SCORE,
    };

    /// Success test. The boundary is inclusive.
    pub fn meets(&self, tolerance: f64) -> bool {
        self.similarity <= tolerance
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Compute the configured metric. `similarity` is the comparator score,
/// already known to the caller.
pub fn metric_value(
    metric: MisfitMetric,
    target: &TargetCurve,
    simulated: &IvCurve,
    similarity: f64,
    series_resistance: f64,
) -> f64 {
    match metric {
        MisfitMetric::Comparator => similarity,
        MisfitMetric::Squared => squared(target.currents(), &simulated.currents),
        MisfitMetric::PhaseAligned => phase_aligned(target, simulated, series_resistance),
        MisfitMetric::Spectral => spectral(target.curve(), simulated),
    }
}

/// Σ (a − b)² over the common prefix.
pub fn squared(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Squared current difference after rotating the simulated samples so the
/// full-voltage peaks line up.
pub fn phase_aligned(target: &TargetCurve, simulated: &IvCurve, series_resistance: f64) -> f64 {
    let n = target.len().min(simulated.len());
    if n == 0 {
        return 0.0;
    }
    let sim_full: Vec<f64> = simulated
        .voltages
        .iter()
        .zip(&simulated.currents)
        .map(|(v, i)| v + series_resistance * i)
        .collect();

    let target_peak = argmax(&target.full_voltages()[..n]);
    let sim_peak = argmax(&sim_full[..n]);
    let shift = sim_peak + n - target_peak;

    let ti = target.currents();
    (0..n)
        .map(|k| (ti[k] - simulated.currents[(k + shift) % n]).powi(2))
        .sum()
}

/// Sum of the real parts of the one-sided spectrum of the instantaneous
/// power difference. Can be negative.
pub fn spectral(target: &IvCurve, simulated: &IvCurve) -> f64 {
    let n = target.len().min(simulated.len());
    if n == 0 {
        return 0.0;
    }
    let mut buf: Vec<Complex64> = (0..n)
        .map(|k| {
            let p = target.currents[k] * target.voltages[k]
                - simulated.currents[k] * simulated.voltages[k];
            Complex64::new(p, 0.0)
        })
        .collect();
    let mut planner = FftPlanner::new();
    planner.plan_fft_forward(n).process(&mut buf);
    buf[..n / 2 + 1].iter().map(|c| c.re).sum()
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

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Scores candidate parameter vectors against the context's target.
///
/// One evaluator belongs to one session fit; it owns the per-fit counters
/// and the curve of the most recent successful simulation until a caller
/// takes it.
pub struct Evaluator<'a> {
    ctx: &'a FittingContext,
    last_curve: Option<IvCurve>,
    evaluations: usize,
    failures: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(ctx: &'a FittingContext) -> Self {
        Evaluator {
            ctx,
            last_curve: None,
            evaluations: 0,
            failures: 0,
        }
    }

    pub fn evaluate(&mut self, xi: &ParameterVector) -> Score {
        let sch = Schematic::from_parameters(xi, self.ctx.stimulus().frequency);
        self.evaluate_schematic(&sch)
    }

    pub fn evaluate_schematic(&mut self, sch: &Schematic) -> Score {
        self.evaluations += 1;
        let config = self.ctx.config();
        let text = netlist::synthesize(sch, &config.limits);

        self.last_curve = None;
        let curve = match self.ctx.simulator().simulate(&text, self.ctx.stimulus()) {
            Ok(curve) => curve,
            Err(e) => {
                self.failures += 1;
                tracing::warn!(error = %e, "simulation failed");
                return Score::FAILED;
            }
        };

        let target = self.ctx.target();
        let similarity = self.ctx.comparator().compare(target.curve(), &curve);
        let misfit = metric_value(
            config.fit.metric,
            target,
            &curve,
            similarity,
            self.ctx.stimulus().series_resistance,
        );
        self.last_curve = Some(curve);

        Score {
            misfit: finite_or_failed(misfit),
            similarity: finite_or_failed(similarity),
        }
    }

    /// Take the curve of the last evaluation. `None` if that evaluation
    /// failed or the curve was already taken.
    pub fn take_last_curve(&mut self) -> Option<IvCurve> {
        self.last_curve.take()
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn failures(&self) -> usize {
        self.failures
    }
}

fn finite_or_failed(x: f64) -> f64 {
    if x.is_nan() {
        FAILURE_SCORE
    } else {
        x.min(FAILURE_SCORE)
    }
}
