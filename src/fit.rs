//! Search orchestration.
//!
//! Stage 1 seeds and scores one session per valid switch code and stops at
//! the first one whose comparator score meets the tolerance. Stage 2 sorts
//! the sessions by misfit and runs Powell on each in turn, again stopping at
//! the first success. Without a success the best session is reported.
//!
//! With more than one worker, stage 2 runs on a rayon pool; the sessions
//! share a [`BestTracker`] and the first success cancels the others between
//! objective evaluations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

use rayon::prelude::*;

use crate::compare::{CurveComparator, IvComparator};
use crate::config::FitConfig;
use crate::error::{FitError, Result};
use crate::misfit::Score;
use crate::schematic::{ParameterVector, Schematic};
use crate::session::{Session, SessionState};
use crate::simulator::{Simulator, Stimulus};
use crate::stats::FitStats;
use crate::switches::{valid_codes, SwitchCode};
use crate::target::TargetCurve;
use crate::z123::{self, Approximation};

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a run needs, shared read-only by every session.
pub struct FittingContext {
    config: FitConfig,
    target: TargetCurve,
    simulator: Box<dyn Simulator>,
    comparator: Box<dyn CurveComparator>,
    approximation: OnceLock<Approximation>,
}

impl FittingContext {
    /// Context with the default comparator calibrated to the target's
    /// noise floor.
    pub fn new(config: FitConfig, target: TargetCurve, simulator: Box<dyn Simulator>) -> Self {
        let (noise_v, noise_i) = target.noise_floor();
        FittingContext {
            config,
            target,
            simulator,
            comparator: Box::new(IvComparator::calibrated(noise_v, noise_i)),
            approximation: OnceLock::new(),
        }
    }

    pub fn with_comparator(mut self, comparator: Box<dyn CurveComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn stimulus(&self) -> &Stimulus {
        &self.config.stimulus
    }

    pub fn target(&self) -> &TargetCurve {
        &self.target
    }

    pub fn simulator(&self) -> &dyn Simulator {
        self.simulator.as_ref()
    }

    pub fn comparator(&self) -> &dyn CurveComparator {
        self.comparator.as_ref()
    }

    /// Analytical seed, computed on first use.
    pub fn approximation(&self) -> &Approximation {
        self.approximation
            .get_or_init(|| z123::approximate(&self.target, &self.config))
    }
}

// ---------------------------------------------------------------------------
// Best tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestResult {
    pub score: Score,
    pub parameters: ParameterVector,
    pub code: SwitchCode,
    /// Index of the session in the run's session list.
    pub session: usize,
}

impl BestResult {
    pub fn of(index: usize, session: &Session, frequency: f64) -> Self {
        BestResult {
            score: session.score,
            parameters: session.schematic().to_parameters(frequency),
            code: session.code,
            session: index,
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    best: Option<BestResult>,
    success: Option<usize>,
}

/// Best result shared between concurrent session fits, plus the flag that
/// tells the remaining fits to give up.
#[derive(Debug, Default)]
pub struct BestTracker {
    state: Mutex<TrackerState>,
    cancelled: AtomicBool,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep `candidate` if its misfit is strictly lower than the current
    /// best. Returns whether it was kept.
    pub fn offer(&self, candidate: BestResult) -> bool {
        let mut state = self.lock();
        let better = match &state.best {
            Some(best) => candidate.score.misfit < best.score.misfit,
            None => true,
        };
        if better {
            state.best = Some(candidate);
        }
        better
    }

    /// Record a session that met the tolerance and cancel the rest. Only
    /// the first success is kept.
    pub fn succeed(&self, session: usize) {
        let mut state = self.lock();
        state.success.get_or_insert(session);
        self.cancel();
    }

    pub fn best(&self) -> Option<BestResult> {
        self.lock().best
    }

    pub fn success(&self) -> Option<usize> {
        self.lock().success
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FitReport {
    pub success: bool,
    /// The session that met the tolerance, or the lowest-misfit one.
    pub best: Session,
    /// Every session built, in stage-2 order when stage 2 ran.
    pub sessions: Vec<Session>,
}

impl FitReport {
    pub fn schematic(&self) -> &Schematic {
        self.best.schematic()
    }

    pub fn score(&self) -> Score {
        self.best.score
    }
}

/// Run the two-stage search.
pub fn run(ctx: &FittingContext, stats: &mut FitStats) -> Result<FitReport> {
    let _span = tracing::info_span!("fit").entered();
    let tolerance = ctx.config().fit.tolerance;

    let start = Instant::now();
    let approximation = ctx.approximation();
    stats.add_phase("approximation", start.elapsed());
    tracing::info!(
        r1 = approximation.r1,
        r2 = approximation.r2,
        r3 = approximation.r3,
        residual = approximation.residual,
        "analytical seed"
    );

    let start = Instant::now();
    let (mut sessions, winner) = score_all(ctx, tolerance);
    stats.add_phase("stage 1", start.elapsed());
    if let Some(index) = winner {
        return Ok(finish(sessions, index, true, stats));
    }
    if sessions.is_empty() {
        return Err(FitError::Config("no valid switch codes".into()));
    }

    sessions.sort_by(|a, b| a.score.misfit.total_cmp(&b.score.misfit));

    let start = Instant::now();
    let workers = ctx.config().fit.workers;
    let (index, success) = if workers > 1 {
        fit_parallel(ctx, &mut sessions, workers)?
    } else {
        fit_sequential(ctx, &mut sessions)
    };
    stats.add_phase("stage 2", start.elapsed());

    Ok(finish(sessions, index, success, stats))
}

/// Stage 1. Returns the sessions built so far and the index of the first
/// one that met the tolerance.
fn score_all(ctx: &FittingContext, tolerance: f64) -> (Vec<Session>, Option<usize>) {
    let _span = tracing::info_span!("stage1").entered();
    let mut sessions = Vec::new();
    for code in valid_codes() {
        let mut variant = 0;
        loop {
            let (mut session, more) = Session::seed(code, variant, ctx);
            session.score(ctx);
            tracing::debug!(
                code = %code,
                misfit = session.score.misfit,
                similarity = session.score.similarity,
                "scored"
            );
            let success = session.is_success(tolerance);
            sessions.push(session);
            if success {
                let index = sessions.len() - 1;
                return (sessions, Some(index));
            }
            if !more {
                break;
            }
            variant += 1;
        }
    }
    (sessions, None)
}

fn fit_sequential(ctx: &FittingContext, sessions: &mut [Session]) -> (usize, bool) {
    let _span = tracing::info_span!("stage2").entered();
    let tolerance = ctx.config().fit.tolerance;
    let mut best = 0;
    let mut best_misfit = sessions[0].score.misfit;

    for (index, session) in sessions.iter_mut().enumerate() {
        session.fit(ctx, || false);
        if session.score.misfit < best_misfit {
            best = index;
            best_misfit = session.score.misfit;
            tracing::debug!(code = %session.code, misfit = best_misfit, "new best");
        }
        if session.is_success(tolerance) {
            return (index, true);
        }
    }
    (best, false)
}

fn fit_parallel(
    ctx: &FittingContext,
    sessions: &mut [Session],
    workers: usize,
) -> Result<(usize, bool)> {
    let _span = tracing::info_span!("stage2", workers).entered();
    let tolerance = ctx.config().fit.tolerance;
    let frequency = ctx.stimulus().frequency;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| FitError::Config(format!("worker pool: {e}")))?;

    let tracker = BestTracker::new();
    tracker.offer(BestResult::of(0, &sessions[0], frequency));

    pool.install(|| {
        sessions.par_iter_mut().enumerate().for_each(|(index, session)| {
            if tracker.is_cancelled() {
                return;
            }
            session.fit(ctx, || tracker.is_cancelled());
            if tracker.offer(BestResult::of(index, session, frequency)) {
                tracing::debug!(code = %session.code, misfit = session.score.misfit, "new best");
            }
            if session.is_success(tolerance) {
                tracker.succeed(index);
            }
        });
    });

    Ok(match tracker.success() {
        Some(index) => (index, true),
        None => (tracker.best().map_or(0, |b| b.session), false),
    })
}

fn finish(sessions: Vec<Session>, best: usize, success: bool, stats: &mut FitStats) -> FitReport {
    stats.sessions_built = sessions.len();
    for session in &sessions {
        stats.evaluations += session.evaluations;
        stats.simulation_failures += session.failures;
        stats.improvements += session.improvements;
        if session.state == SessionState::Fitted {
            stats.sessions_fitted += 1;
        }
    }

    let best = sessions[best].clone();
    if success {
        stats.winning_code = Some(best.code.bits());
        tracing::info!(
            code = %best.code,
            similarity = best.score.similarity,
            misfit = best.score.misfit,
            "fit succeeded"
        );
    } else {
        tracing::info!(
            code = %best.code,
            similarity = best.score.similarity,
            misfit = best.score.misfit,
            "no session met the tolerance, keeping the best one"
        );
    }

    FitReport {
        success,
        best,
        sessions,
    }
}
