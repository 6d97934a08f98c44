//! I-V curve comparator.
//!
//! Each axis is measured in units of its noise floor, so a score of 1 means
//! the curves sit one noise amplitude apart. The score is the root mean
//! square of the distances from every sample of either curve to the other
//! curve, taken as a closed polyline. Identical curves score 0.

use crate::simulator::{max_abs, IvCurve};

/// Share of the larger peak used as the unit of an axis that has no noise
/// floor.
const FALLBACK_RESOLUTION: f64 = 0.01;

pub trait CurveComparator: Send + Sync {
    fn compare(&self, a: &IvCurve, b: &IvCurve) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvComparator {
    noise_v: f64,
    noise_i: f64,
}

impl IvComparator {
    /// Comparator measuring voltage and current in units of the given
    /// noise amplitudes.
    pub fn calibrated(noise_v: f64, noise_i: f64) -> Self {
        IvComparator {
            noise_v: noise_v.abs(),
            noise_i: noise_i.abs(),
        }
    }
}

impl CurveComparator for IvComparator {
    fn compare(&self, a: &IvCurve, b: &IvCurve) -> f64 {
        if a.is_empty() || b.is_empty() {
            return f64::INFINITY;
        }
        let sv = axis_unit(self.noise_v, &a.voltages, &b.voltages);
        let si = axis_unit(self.noise_i, &a.currents, &b.currents);

        let pa = normalized(a, sv, si);
        let pb = normalized(b, sv, si);
        let total = squared_distances(&pa, &pb) + squared_distances(&pb, &pa);
        (total / (pa.len() + pb.len()) as f64).sqrt()
    }
}

fn axis_unit(noise: f64, a: &[f64], b: &[f64]) -> f64 {
    if noise > 0.0 {
        return noise;
    }
    let peak = max_abs(a).max(max_abs(b));
    if peak > 0.0 {
        FALLBACK_RESOLUTION * peak
    } else {
        1.0
    }
}

fn normalized(curve: &IvCurve, sv: f64, si: f64) -> Vec<(f64, f64)> {
    curve
        .voltages
        .iter()
        .zip(&curve.currents)
        .map(|(v, i)| (v / sv, i / si))
        .collect()
}

/// Sum of squared distances from each point of `from` to the closed
/// polyline `to`.
fn squared_distances(from: &[(f64, f64)], to: &[(f64, f64)]) -> f64 {
    from.iter().map(|&p| distance_to_polyline(p, to).powi(2)).sum()
}

fn distance_to_polyline(p: (f64, f64), line: &[(f64, f64)]) -> f64 {
    let n = line.len();
    if n == 1 {
        return dist(p, line[0]);
    }
    (0..n)
        .map(|k| distance_to_segment(p, line[k], line[(k + 1) % n]))
        .fold(f64::INFINITY, f64::min)
}

fn distance_to_segment(p: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    if len2 == 0.0 {
        return dist(p, a);
    }
    let t = (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len2).clamp(0.0, 1.0);
    dist(p, (a.0 + t * dx, a.1 + t * dy))
}

fn dist(p: (f64, f64), q: (f64, f64)) -> f64 {
    ((p.0 - q.0).powi(2) + (p.1 - q.1).powi(2)).sqrt()
}
