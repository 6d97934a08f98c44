//! ngspice batch-mode adapter.
//!
//! Wraps the network in a probe deck, runs `ngspice -b -r <raw>`, reads the
//! rawfile back and resamples the last stimulus period.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use super::rawfile::{parse_rawfile, RawData};
use super::{add_noise, IvCurve, Simulator, Stimulus};
use crate::config::SimulatorConfig;
use crate::error::{FitError, Result};

#[derive(Debug, Clone, Default)]
pub struct Ngspice {
    config: SimulatorConfig,
}

impl Ngspice {
    pub fn new(config: SimulatorConfig) -> Self {
        Ngspice { config }
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.config.executable)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn run(&self, deck: &str) -> Result<RawData> {
        let mut deck_file = NamedTempFile::new()?;
        deck_file.write_all(deck.as_bytes())?;
        let raw_file = NamedTempFile::new()?;

        let mut command = Command::new(&self.config.executable);
        command
            .arg("-b")
            .arg("-r")
            .arg(raw_file.path())
            .arg(deck_file.path());
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let (status, stderr) = run_captured(command, timeout).map_err(|e| match e {
            FitError::Io(io) => FitError::Simulation(format!(
                "failed to run {}: {io}",
                self.config.executable
            )),
            other => other,
        })?;
        if !status.success() {
            return Err(FitError::Simulation(format!(
                "ngspice exited with {status}:\n{stderr}"
            )));
        }

        let data = std::fs::read(raw_file.path())?;
        if data.is_empty() {
            return Err(FitError::Simulation("ngspice produced an empty rawfile".into()));
        }
        parse_rawfile(&data)
    }
}

impl Simulator for Ngspice {
    fn simulate(&self, netlist: &str, stimulus: &Stimulus) -> Result<IvCurve> {
        let deck = probe_deck(netlist, stimulus);
        let raw = self.run(&deck)?;
        let mut curve = extract_curve(&raw, stimulus)?;
        add_noise(&mut curve, stimulus.snr);
        Ok(curve)
    }
}

/// Surround the network body with the probe source, sense resistor and
/// transient analysis. The body's own `.END` is dropped.
pub fn probe_deck(netlist: &str, stimulus: &Stimulus) -> String {
    let mut deck = String::from("* ivfit probe deck\n");
    let source = format!("SIN(0 {:e} {:e})", stimulus.amplitude, stimulus.frequency);
    if stimulus.series_resistance > 0.0 {
        deck.push_str(&format!("V_probe probe 0 {source}\n"));
        deck.push_str(&format!("R_cs probe input {:e}\n", stimulus.series_resistance));
    } else {
        deck.push_str(&format!("V_probe input 0 {source}\n"));
    }
    for line in netlist.lines() {
        if line.trim().eq_ignore_ascii_case(".end") {
            continue;
        }
        deck.push_str(line);
        deck.push('\n');
    }
    let stop = stimulus.cycles as f64 * stimulus.period();
    deck.push_str(&format!(".tran {:e} {:e}\n", stimulus.time_step(), stop));
    deck.push_str(".end\n");
    deck
}

fn column(raw: &RawData, names: &[&str]) -> Result<Vec<f64>> {
    names
        .iter()
        .find_map(|name| raw.column(name))
        .ok_or_else(|| FitError::Simulation(format!("rawfile has no {}", names[0])))
}

/// Resample the last period onto `samples` uniform points.
fn extract_curve(raw: &RawData, stimulus: &Stimulus) -> Result<IvCurve> {
    let time = column(raw, &["time"])?;
    let v_input = column(raw, &["v(input)", "input"])?;
    let current = if stimulus.series_resistance > 0.0 {
        let v_probe = column(raw, &["v(probe)", "probe"])?;
        v_probe
            .iter()
            .zip(&v_input)
            .map(|(p, u)| (p - u) / stimulus.series_resistance)
            .collect()
    } else {
        column(raw, &["i(v_probe)", "v_probe#branch"])?
            .into_iter()
            .map(|i| -i)
            .collect::<Vec<_>>()
    };

    let (Some(&t_first), Some(&t_last)) = (time.first(), time.last()) else {
        return Err(FitError::Simulation("rawfile has no points".into()));
    };
    let start = t_last - stimulus.period();
    if start < t_first {
        return Err(FitError::Simulation(format!(
            "transient ends at {t_last:e}s, shorter than one period"
        )));
    }

    let n = stimulus.samples;
    let step = stimulus.period() / n as f64;
    let mut voltages = Vec::with_capacity(n);
    let mut currents = Vec::with_capacity(n);
    for k in 0..n {
        let t = start + k as f64 * step;
        voltages.push(interpolate(&time, &v_input, t));
        currents.push(interpolate(&time, &current, t));
    }
    Ok(IvCurve::new(voltages, currents))
}

/// Linear interpolation of `(xs, ys)` at `x`; `xs` ascending. Clamps at
/// the ends.
pub(crate) fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let hi = xs.partition_point(|&t| t < x);
    if hi == 0 {
        return ys[0];
    }
    if hi >= xs.len() {
        return ys[xs.len() - 1];
    }
    let lo = hi - 1;
    let span = xs[hi] - xs[lo];
    if span <= 0.0 {
        return ys[hi];
    }
    ys[lo] + (ys[hi] - ys[lo]) * (x - xs[lo]) / span
}

/// Run `command` with stdout discarded and stderr collected, killing it
/// once `timeout` has elapsed.
///
/// Stderr is drained on its own thread so a chatty run cannot block on a
/// full pipe.
fn run_captured(mut command: Command, timeout: Duration) -> Result<(ExitStatus, String)> {
    let mut child = command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;
    let reader = child.stderr.take().map(|mut pipe| {
        std::thread::spawn(move || {
            let mut text = String::new();
            pipe.read_to_string(&mut text).ok();
            text
        })
    });

    let status = wait_with_timeout(&mut child, timeout)?;
    Ok((status, collect(reader)))
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Wait for the child, killing it once `timeout` has elapsed.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus> {
    let start = Instant::now();
    let poll_interval = Duration::from_millis(20);

    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(FitError::SimulationTimeout(timeout.as_secs()));
                }
                std::thread::sleep(poll_interval);
            }
            Err(e) => return Err(FitError::Simulation(e.to_string())),
        }
    }
}
