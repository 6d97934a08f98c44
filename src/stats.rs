//! Run statistics for `--stats` output.

use std::time::{Duration, Instant};

/// Counters and phase timings for one fitting run.
pub struct FitStats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    pub sessions_built: usize,
    pub sessions_fitted: usize,
    /// Simulator calls, across all sessions.
    pub evaluations: usize,
    pub simulation_failures: usize,
    pub improvements: usize,
    /// Bits of the code that met the tolerance, if any.
    pub winning_code: Option<u8>,
}

impl Default for FitStats {
    fn default() -> Self {
        Self::new()
    }
}

impl FitStats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            sessions_built: 0,
            sessions_fitted: 0,
            evaluations: 0,
            simulation_failures: 0,
            improvements: 0,
            winning_code: None,
        }
    }

    /// Record a completed phase with its duration.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        self.phases.push((name, duration));
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== ivfit Run Stats ===");

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        eprintln!("  Sessions built:         {}", self.sessions_built);
        eprintln!("  Sessions fitted:        {}", self.sessions_fitted);
        eprintln!("  Simulations:            {}", self.evaluations);
        if self.simulation_failures > 0 {
            eprintln!("    Failed:               {}", self.simulation_failures);
        }
        eprintln!("  Improvements:           {}", self.improvements);
        match self.winning_code {
            Some(code) => eprintln!("  Winning code:           {:#010b}", code),
            None => eprintln!("  Winning code:           none"),
        }

        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}
