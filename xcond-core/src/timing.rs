use std::time::{Duration, Instant};

/// Pipeline phase being timed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    Condense,
    Solve,
    Expand,
}

/// Accumulated wall time per phase.
#[derive(Debug, Default, Clone)]
pub struct PhaseTimers {
    pub condense: Duration,
    pub solve: Duration,
    pub expand: Duration,
}

impl PhaseTimers {
    pub fn scoped(&mut self, phase: Phase) -> PhaseGuard<'_> {
        PhaseGuard {
            phase,
            start: Instant::now(),
            timers: self,
        }
    }

    pub fn add(&mut self, phase: Phase, dt: Duration) {
        match phase {
            Phase::Condense => self.condense += dt,
            Phase::Solve => self.solve += dt,
            Phase::Expand => self.expand += dt,
        }
    }

    /// Condense and expand together, in seconds.
    pub fn condensing_secs(&self) -> f64 {
        (self.condense + self.expand).as_secs_f64()
    }

    pub fn total(&self) -> Duration {
        self.condense + self.solve + self.expand
    }
}

pub struct PhaseGuard<'a> {
    phase: Phase,
    start: Instant,
    timers: &'a mut PhaseTimers,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.timers.add(self.phase, self.start.elapsed());
    }
}
