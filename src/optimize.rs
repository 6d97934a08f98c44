//! Derivative-free minimization: Powell's direction-set method.
//!
//! Each iteration minimizes along every direction in the set with argmin's
//! Brent solver, then possibly swaps the direction of largest decrease for
//! the net displacement of the iteration. Objective calls are counted
//! against a hard budget and every call is preceded by the caller's stop
//! predicate, so a search can be abandoned between any two simulations.

use std::cell::RefCell;

use argmin::core::{CostFunction, Error as ArgminError, Executor, State};
use argmin::solver::brent::BrentOpt;

/// Powell minimization parameters.
#[derive(Debug, Clone)]
pub struct PowellParams {
    /// Objective calls allowed, including the one at the start point.
    pub max_evaluations: usize,
    /// Relative precision sought along each direction, in units of the
    /// direction length.
    pub xtol: f64,
    /// Relative decrease per iteration below which the search has converged.
    pub ftol: f64,
    pub max_iterations: usize,
}

impl Default for PowellParams {
    fn default() -> Self {
        Self {
            max_evaluations: 100,
            xtol: 1e-2,
            ftol: 1e-4,
            max_iterations: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The last iteration decreased the objective by less than `ftol`.
    Converged,
    /// `max_evaluations` objective calls were spent.
    EvaluationBudget,
    /// The stop predicate returned true.
    Stopped,
    IterationLimit,
}

#[derive(Debug, Clone)]
pub struct PowellResult {
    /// Best point seen.
    pub x: Vec<f64>,
    pub value: f64,
    pub evaluations: usize,
    pub iterations: usize,
    pub termination: Termination,
}

/// Why a search stopped before converging.
#[derive(Debug, Clone, Copy)]
enum Halt {
    Budget,
    Stopped,
}

impl From<Halt> for Termination {
    fn from(h: Halt) -> Self {
        match h {
            Halt::Budget => Termination::EvaluationBudget,
            Halt::Stopped => Termination::Stopped,
        }
    }
}

/// Budgeted objective that remembers the best point it was called with.
struct Tracked<F, S> {
    f: F,
    should_stop: S,
    evaluations: usize,
    max_evaluations: usize,
    best_x: Vec<f64>,
    best_f: f64,
    /// Set when a call was refused, so a line search can report why.
    halted: Option<Halt>,
}

impl<F, S> Tracked<F, S>
where
    F: FnMut(&[f64]) -> f64,
    S: FnMut() -> bool,
{
    fn eval(&mut self, x: &[f64]) -> Result<f64, Halt> {
        let refused = if (self.should_stop)() {
            Some(Halt::Stopped)
        } else if self.evaluations >= self.max_evaluations {
            Some(Halt::Budget)
        } else {
            None
        };
        if let Some(halt) = refused {
            self.halted = Some(halt);
            return Err(halt);
        }
        self.evaluations += 1;
        let fx = (self.f)(x);
        if fx < self.best_f || self.best_x.is_empty() || self.best_f.is_nan() {
            self.best_f = fx;
            self.best_x = x.to_vec();
        }
        Ok(fx)
    }

    /// `f(origin + t·dir)`.
    fn along(&mut self, origin: &[f64], dir: &[f64], t: f64) -> Result<f64, Halt> {
        let x: Vec<f64> = origin.iter().zip(dir).map(|(o, d)| o + t * d).collect();
        self.eval(&x)
    }
}

/// Minimize `f` from `x0`.
///
/// The initial directions are the coordinate axes scaled by `scales`
/// (missing or zero scales count as 1). `should_stop` is polled before
/// every objective call and after every iteration.
pub fn minimize<F, S>(
    f: F,
    x0: &[f64],
    scales: &[f64],
    params: &PowellParams,
    should_stop: S,
) -> PowellResult
where
    F: FnMut(&[f64]) -> f64,
    S: FnMut() -> bool,
{
    let obj = RefCell::new(Tracked {
        f,
        should_stop,
        evaluations: 0,
        max_evaluations: params.max_evaluations,
        best_x: Vec::new(),
        best_f: f64::INFINITY,
        halted: None,
    });
    let (iterations, termination) = match run(&obj, x0, scales, params) {
        Ok(outcome) => outcome,
        Err((iterations, halt)) => (iterations, halt.into()),
    };
    let obj = obj.into_inner();
    let x = if obj.best_x.is_empty() {
        x0.to_vec()
    } else {
        obj.best_x
    };
    PowellResult {
        x,
        value: obj.best_f,
        evaluations: obj.evaluations,
        iterations,
        termination,
    }
}

fn run<F, S>(
    obj: &RefCell<Tracked<F, S>>,
    x0: &[f64],
    scales: &[f64],
    params: &PowellParams,
) -> Result<(usize, Termination), (usize, Halt)>
where
    F: FnMut(&[f64]) -> f64,
    S: FnMut() -> bool,
{
    let n = x0.len();
    let mut directions: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let s = scales
                .get(i)
                .copied()
                .filter(|s| *s != 0.0 && s.is_finite())
                .unwrap_or(1.0);
            let mut d = vec![0.0; n];
            d[i] = s;
            d
        })
        .collect();
    let tol = params.xtol * LINE_RESOLUTION;

    let mut x = x0.to_vec();
    let mut fx = obj.borrow_mut().eval(&x).map_err(|h| (0, h))?;
    if n == 0 {
        return Ok((0, Termination::Converged));
    }

    for iter in 1..=params.max_iterations {
        let x_start = x.clone();
        let f_start = fx;
        let mut biggest_drop = 0.0;
        let mut biggest_idx = 0;

        for (i, dir) in directions.iter().enumerate() {
            let f_before = fx;
            let (t, ft) = line_minimize(obj, &x, fx, dir, tol).map_err(|h| (iter, h))?;
            for (xk, dk) in x.iter_mut().zip(dir) {
                *xk += t * dk;
            }
            fx = ft;
            if f_before - fx > biggest_drop {
                biggest_drop = f_before - fx;
                biggest_idx = i;
            }
        }

        let evaluations = obj.borrow().evaluations;
        tracing::debug!(iter, value = fx, evaluations, "powell iteration");

        if (obj.borrow_mut().should_stop)() {
            return Ok((iter, Termination::Stopped));
        }
        if 2.0 * (f_start - fx) <= params.ftol * (f_start.abs() + fx.abs()) + 1e-20 {
            return Ok((iter, Termination::Converged));
        }

        // Try replacing the direction of largest decrease with the net move.
        let net: Vec<f64> = x.iter().zip(&x_start).map(|(a, b)| a - b).collect();
        let extrapolated: Vec<f64> = x.iter().zip(&net).map(|(a, d)| a + d).collect();
        let fe = obj.borrow_mut().eval(&extrapolated).map_err(|h| (iter, h))?;
        if fe < f_start {
            let t = 2.0 * (f_start - 2.0 * fx + fe) * (f_start - fx - biggest_drop).powi(2)
                - biggest_drop * (f_start - fe).powi(2);
            if t < 0.0 {
                let (s, fs) = line_minimize(obj, &x, fx, &net, tol).map_err(|h| (iter, h))?;
                for (xk, dk) in x.iter_mut().zip(&net) {
                    *xk += s * dk;
                }
                fx = fs;
                directions.swap_remove(biggest_idx);
                directions.push(net);
            }
        }
    }
    Ok((params.max_iterations, Termination::IterationLimit))
}

// ---------------------------------------------------------------------------
// Line search
// ---------------------------------------------------------------------------

/// Share of `xtol` each line search resolves.
const LINE_RESOLUTION: f64 = 1e-3;
/// Brent iterations per interval.
const LINE_ITERATIONS: u64 = 100;
/// A minimum this close to an interval end (relative to its width) moves
/// the interval.
const EDGE: f64 = 1e-2;
/// Width of the next interval relative to the last one.
const GROWTH: f64 = 3.0;
const MAX_SHIFTS: usize = 8;

/// The objective restricted to `origin + t·dir`.
struct Line<'a, F, S> {
    obj: &'a RefCell<Tracked<F, S>>,
    origin: &'a [f64],
    dir: &'a [f64],
}

impl<F, S> CostFunction for Line<'_, F, S>
where
    F: FnMut(&[f64]) -> f64,
    S: FnMut() -> bool,
{
    type Param = f64;
    type Output = f64;

    fn cost(&self, t: &Self::Param) -> Result<Self::Output, ArgminError> {
        self.obj
            .borrow_mut()
            .along(self.origin, self.dir, *t)
            .map_err(|halt| ArgminError::msg(format!("line search halted: {halt:?}")))
    }
}

/// Minimize along `dir` from `origin`, where `f(origin) = f0`.
/// Returns the step `t` and the value there; `(0, f0)` when nothing
/// strictly better was found.
///
/// The search starts on `t ∈ [-1, 1]`. While the minimum sits on an end of
/// the interval, a wider interval starting from that end is searched.
fn line_minimize<F, S>(
    obj: &RefCell<Tracked<F, S>>,
    origin: &[f64],
    f0: f64,
    dir: &[f64],
    tol: f64,
) -> Result<(f64, f64), Halt>
where
    F: FnMut(&[f64]) -> f64,
    S: FnMut() -> bool,
{
    let mut best = (0.0, f0);
    let (mut lo, mut hi) = (-1.0, 1.0);
    for _ in 0..=MAX_SHIFTS {
        let Some((t, ft)) = brent(obj, origin, dir, lo, hi, tol)? else {
            break;
        };
        if ft >= best.1 {
            break;
        }
        best = (t, ft);
        let width = hi - lo;
        if hi - t <= EDGE * width {
            (lo, hi) = (t, t + GROWTH * width);
        } else if t - lo <= EDGE * width {
            (lo, hi) = (t - GROWTH * width, t);
        } else {
            break;
        }
    }
    Ok(best)
}

/// One Brent search on `[lo, hi]`. `None` when the solver gave up for a
/// reason other than the budget or the stop predicate.
fn brent<F, S>(
    obj: &RefCell<Tracked<F, S>>,
    origin: &[f64],
    dir: &[f64],
    lo: f64,
    hi: f64,
    tol: f64,
) -> Result<Option<(f64, f64)>, Halt>
where
    F: FnMut(&[f64]) -> f64,
    S: FnMut() -> bool,
{
    let line = Line { obj, origin, dir };
    let solver = BrentOpt::new(lo, hi).set_tolerance(tol, tol);
    let outcome = Executor::new(line, solver)
        .configure(|state| state.max_iters(LINE_ITERATIONS))
        .run();
    match outcome {
        Ok(result) => {
            let state = result.state();
            Ok(state.get_best_param().map(|t| (*t, state.get_best_cost())))
        }
        Err(e) => match obj.borrow_mut().halted.take() {
            Some(halt) => Err(halt),
            None => {
                tracing::debug!(error = %e, "line search failed");
                Ok(None)
            }
        },
    }
}
