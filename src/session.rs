//! Fitting sessions.
//!
//! A session is one switch code seeded from the analytical approximation.
//! It moves `Seeded -> Scored -> Fitted`: scoring runs the evaluator once on
//! the seed, fitting runs Powell over the session's free components.

use std::cell::Cell;

use serde_derive::Serialize;

use crate::codec::VariabilityMask;
use crate::fit::FittingContext;
use crate::misfit::{Evaluator, Score};
use crate::optimize::{self, PowellParams, Termination};
use crate::schematic::{ComponentId, ParameterVector, Schematic};
use crate::simulator::IvCurve;
use crate::switches::SwitchCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Seeded,
    Scored,
    Fitted,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub code: SwitchCode,
    /// Approximation variant this session was seeded from.
    pub variant: usize,
    pub start: Schematic,
    pub result: Option<Schematic>,
    /// Components the optimizer may change, in slot order.
    pub variables: Vec<ComponentId>,
    pub score: Score,
    /// Simulated curve of [`Session::schematic`], when it simulated.
    pub curve: Option<IvCurve>,
    pub evaluations: usize,
    /// Times the fit found a strictly better point.
    pub improvements: usize,
    pub failures: usize,
    pub state: SessionState,
}

impl Session {
    /// Seed a session for `code`. The second value reports whether another
    /// approximation variant exists; there is only ever one.
    pub fn seed(code: SwitchCode, variant: usize, ctx: &FittingContext) -> (Session, bool) {
        let limits = &ctx.config().limits;
        let mut start = Schematic::open(limits);
        ctx.approximation().seed(&mut start);
        let variables = code.apply(&mut start, limits);
        let session = Session {
            code,
            variant,
            start,
            result: None,
            variables,
            score: Score::FAILED,
            curve: None,
            evaluations: 0,
            improvements: 0,
            failures: 0,
            state: SessionState::Seeded,
        };
        (session, false)
    }

    /// Best schematic known for this session.
    pub fn schematic(&self) -> &Schematic {
        self.result.as_ref().unwrap_or(&self.start)
    }

    pub fn is_success(&self, tolerance: f64) -> bool {
        self.state != SessionState::Seeded && self.score.meets(tolerance)
    }

    /// Evaluate the seed once.
    pub fn score(&mut self, ctx: &FittingContext) {
        let mut evaluator = Evaluator::new(ctx);
        self.score = evaluator.evaluate_schematic(&self.start);
        self.curve = evaluator.take_last_curve();
        self.evaluations += evaluator.evaluations();
        self.failures += evaluator.failures();
        self.state = SessionState::Scored;
    }

    /// Refine the free components with Powell. Offsets are added to the
    /// seed's parameter vector; the best point seen becomes the result.
    ///
    /// The fit stops early once the best point meets the tolerance, or
    /// when `cancelled` turns true.
    pub fn fit<C>(&mut self, ctx: &FittingContext, cancelled: C) -> Termination
    where
        C: Fn() -> bool,
    {
        let _span = tracing::info_span!("session", code = %self.code).entered();
        let config = ctx.config();
        let frequency = ctx.stimulus().frequency;
        let tolerance = config.fit.tolerance;

        let base = self.start.to_parameters(frequency);
        let mask = VariabilityMask::from_components(&self.variables);
        let x0 = vec![0.0; mask.count()];
        let scales: Vec<f64> = mask
            .pack(&base)
            .iter()
            .map(|v| v.abs().max(1.0))
            .collect();
        let params = PowellParams {
            max_evaluations: config.fit.max_evaluations,
            xtol: config.fit.values_tolerance,
            ..PowellParams::default()
        };

        let mut evaluator = Evaluator::new(ctx);
        let mut best: Option<(ParameterVector, Score, Option<IvCurve>)> = None;
        let mut improvements = 0;
        let reached = Cell::new(false);

        let outcome = optimize::minimize(
            |offsets| {
                let xi = mask.unroll(&base, offsets);
                let score = evaluator.evaluate(&xi);
                let curve = evaluator.take_last_curve();
                let improved = match &best {
                    Some((_, b, _)) => score.misfit < b.misfit,
                    None => true,
                };
                if improved {
                    if best.is_some() {
                        improvements += 1;
                        tracing::debug!(
                            misfit = score.misfit,
                            similarity = score.similarity,
                            "improved"
                        );
                    }
                    best = Some((xi, score, curve));
                }
                if best.as_ref().is_some_and(|(_, b, _)| b.meets(tolerance)) {
                    reached.set(true);
                }
                score.misfit
            },
            &x0,
            &scales,
            &params,
            || reached.get() || cancelled(),
        );

        self.evaluations += evaluator.evaluations();
        self.failures += evaluator.failures();
        self.improvements += improvements;
        if let Some((xi, score, curve)) = best {
            self.result = Some(Schematic::from_parameters(&xi, frequency));
            self.score = score;
            self.curve = curve;
        }
        self.state = SessionState::Fitted;

        tracing::info!(
            misfit = self.score.misfit,
            similarity = self.score.similarity,
            evaluations = outcome.evaluations,
            iterations = outcome.iterations,
            termination = ?outcome.termination,
            "session fitted"
        );
        outcome.termination
    }
}

/// Serializable summary of a session, used by the JSON result dump.
#[derive(Debug, Serialize)]
pub struct SessionSummary<'a> {
    pub code: u8,
    pub variant: usize,
    pub state: SessionState,
    pub misfit: f64,
    pub similarity: f64,
    pub evaluations: usize,
    pub improvements: usize,
    pub variables: Vec<&'static str>,
    pub schematic: &'a Schematic,
}

impl Session {
    pub fn summary(&self) -> SessionSummary<'_> {
        SessionSummary {
            code: self.code.bits(),
            variant: self.variant,
            state: self.state,
            misfit: self.score.misfit,
            similarity: self.score.similarity,
            evaluations: self.evaluations,
            improvements: self.improvements,
            variables: self.variables.iter().map(|c| c.name()).collect(),
            schematic: self.schematic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitConfig;
    use crate::error::{FitError, Result};
    use crate::ir::Element;
    use crate::parser;
    use crate::simulator::{IvCurve, Simulator, Stimulus};
    use crate::target::TargetCurve;

    /// Linear network: the parallel combination of the present branch
    /// resistors, probed directly.
    struct ParallelResistors;

    impl Simulator for ParallelResistors {
        fn simulate(&self, netlist: &str, stimulus: &Stimulus) -> Result<IvCurve> {
            let parsed = parser::parse(netlist)?;
            let g: f64 = ["R1", "R2", "R3"]
                .iter()
                .filter_map(|n| match parsed.find(n) {
                    Some(Element::Resistor { value, .. }) => Some(1.0 / value),
                    _ => None,
                })
                .sum();
            if g == 0.0 {
                return Err(FitError::Simulation("open circuit".into()));
            }
            Ok(sine(1.0 / g, stimulus.samples))
        }
    }

    fn sine(r: f64, n: usize) -> IvCurve {
        let v: Vec<f64> = (0..n)
            .map(|k| 5.0 * (2.0 * std::f64::consts::PI * k as f64 / n as f64).sin())
            .collect();
        let i = v.iter().map(|v| v / r).collect();
        IvCurve::new(v, i)
    }

    fn context(tolerance: f64) -> FittingContext {
        let mut config = FitConfig::default();
        config.fit.tolerance = tolerance;
        config.stimulus.series_resistance = 0.0;
        let target = TargetCurve::new(sine(500.0, 100), 0.0, 0.7).unwrap();
        FittingContext::new(config, target, Box::new(ParallelResistors))
    }

    #[test]
    fn test_seed_applies_code_and_reports_single_variant() {
        let ctx = context(1e-3);
        let (session, more) = Session::seed(SwitchCode::new(0b110), 0, &ctx);
        assert!(!more);
        assert_eq!(session.state, SessionState::Seeded);
        assert_eq!(session.start[ComponentId::R2], ctx.config().limits.huge_resistance);
        assert_eq!(session.start[ComponentId::R3], ctx.config().limits.huge_resistance);
        assert!(session.variables.contains(&ComponentId::R1));
        assert!(!session.is_success(f64::INFINITY));
    }

    #[test]
    fn test_scoring_moves_to_scored() {
        let ctx = context(1e-3);
        let (mut session, _) = Session::seed(SwitchCode::new(0b110), 0, &ctx);
        session.score(&ctx);
        assert_eq!(session.state, SessionState::Scored);
        assert_eq!(session.evaluations, 1);
        assert!(session.score.similarity.is_finite());
        assert_eq!(session.curve.as_ref().map(|c| c.len()), Some(100));
    }

    #[test]
    fn test_fit_improves_on_the_seed() {
        let ctx = context(1e-9);
        let (mut session, _) = Session::seed(SwitchCode::new(0b110), 0, &ctx);
        session.start[ComponentId::R1] = 800.0;
        session.score(&ctx);
        let seeded = session.score.misfit;
        session.fit(&ctx, || false);
        assert_eq!(session.state, SessionState::Fitted);
        assert!(session.score.misfit < seeded);
        assert!(session.improvements > 0);
        assert!(session.curve.is_some());
        assert!(session.evaluations <= 1 + ctx.config().fit.max_evaluations);
        let r1 = session.schematic()[ComponentId::R1];
        assert!((r1 - 500.0).abs() < (800.0_f64 - 500.0).abs());
    }

    #[test]
    fn test_fit_stops_once_tolerance_met() {
        let ctx = context(0.5);
        let (mut session, _) = Session::seed(SwitchCode::new(0b110), 0, &ctx);
        session.start[ComponentId::R1] = 501.0;
        let termination = session.fit(&ctx, || false);
        assert_eq!(termination, Termination::Stopped);
        assert_eq!(session.evaluations, 1);
        assert!(session.is_success(0.5));
    }

    #[test]
    fn test_cancelled_fit_does_not_evaluate() {
        let ctx = context(1e-9);
        let (mut session, _) = Session::seed(SwitchCode::new(0b110), 0, &ctx);
        let termination = session.fit(&ctx, || true);
        assert_eq!(termination, Termination::Stopped);
        assert_eq!(session.evaluations, 0);
        assert!(session.result.is_none());
        assert!(session.curve.is_none());
        assert_eq!(session.state, SessionState::Fitted);
    }
}
