//! Integration tests for the full search: target -> sessions -> report.

mod common;

use approx::assert_relative_eq;
use common::{
    rc_schematic, target_from_netlist, FailingSimulator, PwlSimulator, RcSimulator, RC_CODE,
    TWO_DIODES,
};
use ivfit::compare::CurveComparator;
use ivfit::config::FitConfig;
use ivfit::fit::{self, FittingContext};
use ivfit::misfit::{Evaluator, Score};
use ivfit::netlist;
use ivfit::output::{self, Written};
use ivfit::parser;
use ivfit::schematic::ComponentId;
use ivfit::session::{Session, SessionState};
use ivfit::simulator::IvCurve;
use ivfit::stats::FitStats;
use ivfit::switches::{valid_codes, SwitchCode};
use ivfit::target::TargetCurve;

fn pwl_context(config: FitConfig) -> FittingContext {
    let simulator = PwlSimulator::new(&config);
    let target = target_from_netlist(TWO_DIODES, &simulator, &config);
    FittingContext::new(config, target, Box::new(simulator))
}

// ── Success ─────────────────────────────────────────────────────────

#[test]
fn test_two_diode_target_is_fitted() {
    let ctx = pwl_context(FitConfig::default());
    let mut stats = FitStats::new();
    let report = fit::run(&ctx, &mut stats).expect("fit failed");

    assert!(report.success);
    assert!(report.score().similarity <= ctx.config().fit.tolerance);
    let sch = report.schematic();
    assert_relative_eq!(sch[ComponentId::R1], 100.0, max_relative = 1e-3);
    assert_relative_eq!(sch[ComponentId::R3], 1000.0, max_relative = 1e-3);
    assert!(sch[ComponentId::R2] >= ctx.config().limits.present_threshold);
    assert_eq!(stats.winning_code, Some(report.best.code.bits()));
    assert_eq!(stats.sessions_built, report.sessions.len());
}

#[test]
fn test_result_netlist_is_written() {
    let ctx = pwl_context(FitConfig::default());
    let report = fit::run(&ctx, &mut FitStats::new()).expect("fit failed");

    let dir = tempfile::tempdir().expect("tempdir");
    let cir = dir.path().join("result.cir");
    let csv = dir.path().join("curves.csv");
    let written = output::write_result(&report, &ctx, &cir, Some(&csv)).expect("write failed");
    assert_eq!(written, Written::Netlist);

    let text = std::fs::read_to_string(&cir).expect("read back");
    let parsed = parser::parse(&text).expect("parse failed");
    let sch = netlist::to_schematic(&parsed, &ctx.config().limits).expect("three-branch netlist");
    assert_relative_eq!(sch[ComponentId::R1], 100.0, max_relative = 1e-3);
    assert_relative_eq!(sch[ComponentId::R3], 1000.0, max_relative = 1e-3);

    let csv_text = std::fs::read_to_string(&csv).expect("read csv");
    assert_eq!(csv_text.lines().count(), 1 + ctx.stimulus().samples);
}

// ── Tolerance ───────────────────────────────────────────────────────

#[test]
fn test_tolerance_boundary_is_inclusive() {
    let probe = pwl_context(FitConfig::default());
    let first = valid_codes().next().expect("no codes");
    let (mut session, _) = Session::seed(first, 0, &probe);
    session.score(&probe);
    let similarity = session.score.similarity;

    let mut config = FitConfig::default();
    config.fit.tolerance = similarity;
    let ctx = pwl_context(config);
    let report = fit::run(&ctx, &mut FitStats::new()).expect("fit failed");

    assert!(report.success);
    assert_eq!(report.best.code, first);
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.best.state, SessionState::Scored);
}

#[test]
fn test_large_resistor_error_misses_default_tolerance() {
    let ctx = pwl_context(FitConfig::default());
    let parsed = parser::parse(TWO_DIODES).expect("parse failed");
    let mut sch = netlist::to_schematic(&parsed, &ctx.config().limits).expect("schematic");
    let mut evaluator = Evaluator::new(&ctx);

    let exact = evaluator.evaluate_schematic(&sch);
    assert!(exact.meets(ctx.config().fit.tolerance));

    sch[ComponentId::R1] = 150.0;
    let off = evaluator.evaluate_schematic(&sch);
    assert!(!off.meets(ctx.config().fit.tolerance), "similarity {}", off.similarity);
}

/// Calls every pair of curves identical.
struct Indifferent;

impl CurveComparator for Indifferent {
    fn compare(&self, _a: &IvCurve, _b: &IvCurve) -> f64 {
        0.0
    }
}

#[test]
fn test_custom_comparator_decides_success() {
    let mut config = FitConfig::default();
    config.fit.tolerance = 0.0;
    let ctx = pwl_context(config).with_comparator(Box::new(Indifferent));
    let report = fit::run(&ctx, &mut FitStats::new()).expect("fit failed");

    assert!(report.success);
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(Some(report.best.code), valid_codes().next());
    assert_eq!(report.score().similarity, 0.0);
}

// ── Capacitors ──────────────────────────────────────────────────────

#[test]
fn test_capacitor_branch_values_are_recovered() {
    let mut config = FitConfig::default();
    config.fit.tolerance = 1e-2;
    config.fit.max_evaluations = 2000;
    config.stimulus.cycles = 4;
    let simulator = RcSimulator::new(&config);
    let truth = rc_schematic(&config.limits);
    let target = TargetCurve::from_schematic(&truth, &simulator, &config).expect("target");
    let ctx = FittingContext::new(config, target, Box::new(simulator));
    let tolerance = ctx.config().fit.tolerance;

    let (mut session, _) = Session::seed(SwitchCode::new(RC_CODE), 0, &ctx);
    assert_eq!(
        session.variables,
        [ComponentId::R1, ComponentId::C1, ComponentId::R3]
    );
    // Every free value starts 15% off.
    session.start[ComponentId::R1] = 115.0;
    session.start[ComponentId::C1] = 85e-9;
    session.start[ComponentId::R3] = 880.0;
    session.score(&ctx);
    assert!(!session.is_success(tolerance));

    session.fit(&ctx, || false);
    assert!(
        session.is_success(tolerance),
        "similarity {}",
        session.score.similarity
    );
    let values = ctx.config().fit.values_tolerance;
    let sch = session.schematic();
    assert_relative_eq!(sch[ComponentId::R1], 100.0, max_relative = values);
    assert_relative_eq!(sch[ComponentId::C1], 100e-9, max_relative = values);
    assert_relative_eq!(sch[ComponentId::R3], 1000.0, max_relative = values);
}

#[test]
fn test_capacitor_changes_the_curve() {
    let config = FitConfig::default();
    let simulator = RcSimulator::new(&config);
    let mut sch = rc_schematic(&config.limits);
    let with_cap = TargetCurve::from_schematic(&sch, &simulator, &config).expect("target");
    sch[ComponentId::RC1] = config.limits.null_resistance;
    let without = TargetCurve::from_schematic(&sch, &simulator, &config).expect("target");

    // The capacitor lets current lead the voltage, so the curve opens into
    // a loop and the positive peak current drops.
    let peak = |t: &TargetCurve| t.currents().iter().cloned().fold(f64::MIN, f64::max);
    assert!(peak(&with_cap) < peak(&without));
    let ctx = FittingContext::new(config, with_cap, Box::new(simulator));
    let score = Evaluator::new(&ctx).evaluate_schematic(&sch);
    assert!(!score.meets(ctx.config().fit.tolerance));
}

// ── Exhaustive search ───────────────────────────────────────────────

fn unreachable_config(workers: usize) -> FitConfig {
    let mut config = FitConfig::default();
    config.fit.tolerance = -1.0;
    config.fit.max_evaluations = 20;
    config.fit.workers = workers;
    config
}

#[test]
fn test_no_success_fits_every_session_and_keeps_the_best() {
    let ctx = pwl_context(unreachable_config(1));
    let mut stats = FitStats::new();
    let report = fit::run(&ctx, &mut stats).expect("fit failed");

    assert!(!report.success);
    assert_eq!(report.sessions.len(), 74);
    assert!(report.sessions.iter().all(|s| s.state == SessionState::Fitted));
    let min = report
        .sessions
        .iter()
        .map(|s| s.score.misfit)
        .fold(f64::INFINITY, f64::min);
    assert_eq!(report.score().misfit, min);
    assert_eq!(stats.sessions_fitted, 74);
    assert_eq!(stats.winning_code, None);
    for session in &report.sessions {
        assert!(session.evaluations <= 1 + ctx.config().fit.max_evaluations);
    }
}

#[test]
fn test_parallel_search_matches_sequential() {
    let sequential =
        fit::run(&pwl_context(unreachable_config(1)), &mut FitStats::new()).expect("fit failed");
    let parallel =
        fit::run(&pwl_context(unreachable_config(4)), &mut FitStats::new()).expect("fit failed");

    assert!(!parallel.success);
    assert_eq!(parallel.sessions.len(), 74);
    assert!(parallel.sessions.iter().all(|s| s.state == SessionState::Fitted));
    assert_eq!(parallel.score().misfit, sequential.score().misfit);
}

#[test]
fn test_stage_two_order_is_by_seeded_misfit() {
    let ctx = pwl_context(unreachable_config(1));
    let mut seeded: Vec<(f64, SwitchCode)> = valid_codes()
        .map(|code| {
            let (mut s, _) = Session::seed(code, 0, &ctx);
            s.score(&ctx);
            (s.score.misfit, code)
        })
        .collect();
    seeded.sort_by(|a, b| a.0.total_cmp(&b.0));

    let report = fit::run(&ctx, &mut FitStats::new()).expect("fit failed");
    let order: Vec<SwitchCode> = report.sessions.iter().map(|s| s.code).collect();
    let expected: Vec<SwitchCode> = seeded.into_iter().map(|(_, code)| code).collect();
    assert_eq!(order, expected);
}

// ── Failures ────────────────────────────────────────────────────────

#[test]
fn test_failing_simulator_still_reports() {
    let mut config = FitConfig::default();
    config.fit.max_evaluations = 5;
    let target = target_from_netlist(TWO_DIODES, &PwlSimulator::new(&config), &config);
    let ctx = FittingContext::new(config, target, Box::new(FailingSimulator));

    let mut stats = FitStats::new();
    let report = fit::run(&ctx, &mut stats).expect("fit failed");
    assert!(!report.success);
    assert_eq!(report.score(), Score::FAILED);
    assert_eq!(stats.simulation_failures, stats.evaluations);

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("result.cir");
    let written = output::write_result(&report, &ctx, &path, None).expect("write failed");
    assert_eq!(written, Written::Dump);

    let text = std::fs::read_to_string(&path).expect("read back");
    let dump: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(dump["success"], false);
    assert!(dump["schematic"]["R1"].is_number());
    assert!(dump["schematic"]["_R_D3"].is_number());
    assert!(dump["variables"].is_array());
}

#[test]
fn test_measurement_target_runs() {
    // A measurement file drives the stimulus; the fit uses its settings.
    let mut config = FitConfig::default();
    let simulator = PwlSimulator::new(&config);
    let reference = target_from_netlist(TWO_DIODES, &simulator, &config);
    let json = serde_json::json!({
        "elements": [{"pins": [{"iv_curves": [{
            "voltages": reference.voltages(),
            "currents": reference.currents(),
            "measurement_settings": {
                "probe_signal_frequency": 1e4,
                "max_voltage": 5.0,
                "internal_resistance": 100.0
            }
        }]}]}]
    });
    let curve = ivfit::target::parse_measurement(&json.to_string(), 0, &mut config.stimulus)
        .expect("measurement");
    let target = TargetCurve::new(
        curve,
        config.stimulus.series_resistance,
        config.diode.forward_voltage,
    )
    .expect("target");
    let ctx = FittingContext::new(config, target, Box::new(simulator));
    let report = fit::run(&ctx, &mut FitStats::new()).expect("fit failed");
    assert!(report.success);
}
