//! Test simulators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use ivfit::config::{FitConfig, Limits};
use ivfit::error::{FitError, Result};
use ivfit::netlist;
use ivfit::parser;
use ivfit::schematic::{ComponentId, Schematic};
use ivfit::simulator::{IvCurve, Simulator, Stimulus};
use ivfit::target::TargetCurve;

// ── Network model ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Diode {
    None,
    /// Conducts from the input to ground above the forward voltage.
    Forward,
    /// Conducts from ground to the input below minus the forward voltage.
    Reverse,
}

/// A present branch: series resistance, optional series capacitor, ideal
/// diode.
#[derive(Debug, Clone, Copy)]
struct Branch {
    resistance: f64,
    capacitance: Option<f64>,
    diode: Diode,
}

impl Branch {
    /// Current with the capacitor treated as a short.
    fn current(&self, u: f64, vd: f64) -> f64 {
        match self.diode {
            Diode::None => u / self.resistance,
            Diode::Forward => (u - vd).max(0.0) / self.resistance,
            Diode::Reverse => (u + vd).min(0.0) / self.resistance,
        }
    }

    /// Hold `u` for `dt` with the capacitor charged to `vc`. Returns the
    /// mean current over the step and the capacitor voltage after it.
    fn step(&self, u: f64, vc: f64, dt: f64, vd: f64) -> (f64, f64) {
        let Some(c) = self.capacitance else {
            return (self.current(u, vd), vc);
        };
        // Voltage the capacitor relaxes towards while current flows.
        let settle = match self.diode {
            Diode::None => Some(u),
            Diode::Forward => (u - vc > vd).then_some(u - vd),
            Diode::Reverse => (u - vc < -vd).then_some(u + vd),
        };
        let Some(settle) = settle else {
            return (0.0, vc);
        };
        let decay = (-dt / (self.resistance * c)).exp();
        let next = settle + (vc - settle) * decay;
        (c * (next - vc) / dt, next)
    }
}

struct Network {
    branches: Vec<Branch>,
    forward_voltage: f64,
}

impl Network {
    fn parse(
        text: &str,
        limits: &Limits,
        forward_voltage: f64,
        capacitors: bool,
    ) -> Result<Self> {
        use ComponentId::*;

        let sch = netlist::to_schematic(&parser::parse(text)?, limits)?;
        let t = limits.present_threshold;
        let layout = [
            (R1, C1, RC1, Some(RD1), Diode::Forward),
            (R2, C2, RC2, None, Diode::None),
            (R3, C3, RC3, Some(RD3), Diode::Reverse),
        ];
        let mut branches = Vec::new();
        for (r, c, rc, rd, diode) in layout {
            if sch[r] >= t {
                continue;
            }
            let mut resistance = sch[r];
            let diode = match rd {
                Some(rd) if sch[rd] < t => {
                    resistance += sch[rd];
                    Diode::None
                }
                Some(_) => diode,
                None => Diode::None,
            };
            let capacitance = (capacitors && sch[rc] >= t).then_some(sch[c]);
            branches.push(Branch {
                resistance,
                capacitance,
                diode,
            });
        }
        Ok(Network {
            branches,
            forward_voltage,
        })
    }

    fn step_current(&self, u: f64, charges: &[f64], dt: f64) -> f64 {
        self.branches
            .iter()
            .zip(charges)
            .map(|(b, &vc)| b.step(u, vc, dt, self.forward_voltage).0)
            .sum()
    }

    fn advance(&self, u: f64, charges: &mut [f64], dt: f64) -> f64 {
        let mut total = 0.0;
        for (b, vc) in self.branches.iter().zip(charges.iter_mut()) {
            let (i, next) = b.step(u, *vc, dt, self.forward_voltage);
            total += i;
            *vc = next;
        }
        total
    }
}

/// Node voltage where the sense resistor carries `current(u)`. `current`
/// must be non-decreasing in `u`.
fn node_voltage(drive: f64, rcs: f64, current: impl Fn(f64) -> f64) -> f64 {
    if rcs == 0.0 {
        return drive;
    }
    let excess = |u: f64| (drive - u) / rcs - current(u);
    let mut width = drive.abs().max(1.0);
    let mut lo = drive - width;
    while excess(lo) < 0.0 {
        width *= 2.0;
        lo = drive - width;
    }
    let mut hi = drive + width;
    while excess(hi) > 0.0 {
        width *= 2.0;
        hi = drive + width;
    }
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if excess(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

fn probe(stimulus: &Stimulus, k: usize) -> f64 {
    let phase = 2.0 * std::f64::consts::PI * k as f64 / stimulus.samples as f64;
    stimulus.amplitude * phase.sin()
}

// ── Simulators ──────────────────────────────────────────────────────

/// Resistive network with ideal diodes (conducting above the forward
/// voltage, open below), probed through the sense resistor. Capacitors are
/// treated as shorts.
pub struct PwlSimulator {
    limits: Limits,
    forward_voltage: f64,
    calls: AtomicUsize,
}

impl PwlSimulator {
    pub fn new(config: &FitConfig) -> Self {
        PwlSimulator {
            limits: config.limits.clone(),
            forward_voltage: config.diode.forward_voltage,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Simulator for PwlSimulator {
    fn simulate(&self, netlist_text: &str, stimulus: &Stimulus) -> Result<IvCurve> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let net = Network::parse(netlist_text, &self.limits, self.forward_voltage, false)?;
        let vd = self.forward_voltage;
        let current = |u: f64| net.branches.iter().map(|b| b.current(u, vd)).sum::<f64>();

        let n = stimulus.samples;
        let mut voltages = Vec::with_capacity(n);
        let mut currents = Vec::with_capacity(n);
        for k in 0..n {
            let drive = probe(stimulus, k);
            let u = node_voltage(drive, stimulus.series_resistance, current);
            voltages.push(u);
            currents.push(current(u));
        }
        Ok(IvCurve::new(voltages, currents))
    }
}

/// The same network with its capacitors, stepped through `cycles` periods
/// from discharged capacitors. The last period is returned.
///
/// The probe is held constant over each sample step and every capacitor
/// relaxes exponentially towards its branch's driving voltage.
pub struct RcSimulator {
    limits: Limits,
    forward_voltage: f64,
}

impl RcSimulator {
    pub fn new(config: &FitConfig) -> Self {
        RcSimulator {
            limits: config.limits.clone(),
            forward_voltage: config.diode.forward_voltage,
        }
    }
}

impl Simulator for RcSimulator {
    fn simulate(&self, netlist_text: &str, stimulus: &Stimulus) -> Result<IvCurve> {
        let net = Network::parse(netlist_text, &self.limits, self.forward_voltage, true)?;
        if stimulus.cycles == 0 {
            return Err(FitError::Simulation("no periods to simulate".into()));
        }

        let n = stimulus.samples;
        let dt = stimulus.time_step();
        let steps = stimulus.cycles * n;
        let mut charges = vec![0.0; net.branches.len()];
        let mut voltages = Vec::with_capacity(n);
        let mut currents = Vec::with_capacity(n);
        for step in 0..steps {
            let drive = probe(stimulus, step % n);
            let u = node_voltage(drive, stimulus.series_resistance, |u| {
                net.step_current(u, &charges, dt)
            });
            let i = net.advance(u, &mut charges, dt);
            if step >= steps - n {
                voltages.push(u);
                currents.push(i);
            }
        }
        Ok(IvCurve::new(voltages, currents))
    }
}

/// Always fails.
pub struct FailingSimulator;

impl Simulator for FailingSimulator {
    fn simulate(&self, _netlist: &str, _stimulus: &Stimulus) -> Result<IvCurve> {
        Err(FitError::Simulation("simulator unavailable".into()))
    }
}

// ── Targets ─────────────────────────────────────────────────────────

/// Simulate a netlist in the three-branch vocabulary as a fitting target.
pub fn target_from_netlist(
    text: &str,
    simulator: &dyn Simulator,
    config: &FitConfig,
) -> TargetCurve {
    let parsed = parser::parse(text).expect("parse failed");
    let sch = netlist::to_schematic(&parsed, &config.limits).expect("not a three-branch netlist");
    TargetCurve::from_schematic(&sch, simulator, config).expect("target simulation failed")
}

/// R1 = 100 with D1, R3 = 1k with D3, branch 2 open.
pub const TWO_DIODES: &str = "\
* reference
R1 _net0 input 100
D1 _net0 0 DMOD_D1
R3 _net2 input 1k
D3 0 _net2 DMOD_D1
.MODEL DMOD_D1 D (IS=1e-14)
.END
";

/// R1 = 100 Ω in series with C1 = 100 nF (D1 bridged), R3 = 1 kΩ with D3,
/// branch 2 open.
pub fn rc_schematic(limits: &Limits) -> Schematic {
    let mut sch = Schematic::open(limits);
    sch[ComponentId::R1] = 100.0;
    sch[ComponentId::C1] = 100e-9;
    sch[ComponentId::RC1] = limits.huge_resistance;
    sch[ComponentId::RD1] = limits.null_resistance;
    sch[ComponentId::R3] = 1000.0;
    sch
}

/// Switch code of [`rc_schematic`]: branch 2 disabled, D1 and C3 bridged.
pub const RC_CODE: u8 = 0b0011_0010;
