//! Injectable time source and the sample-time replay schedule

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of "now" for the engine
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for replay and tests
///
/// Never moves backwards: `set` ignores earlier instants.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        if by > Duration::zero() {
            *now += by;
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock();
        if at > *now {
            *now = at;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Evaluation boundaries on a fixed cadence of sample time
///
/// The first boundary lies one step after the first sample. Boundaries whose
/// window can no longer hold an accepted sample are skipped rather than
/// evaluated, so a jump in sample time costs nothing.
#[derive(Debug, Clone)]
pub struct ReplaySchedule {
    every: Duration,
    window: Duration,
    next: Option<DateTime<Utc>>,
    last_sample: Option<DateTime<Utc>>,
}

impl ReplaySchedule {
    pub fn new(every: Duration, window: Duration) -> Self {
        Self {
            every,
            window,
            next: None,
            last_sample: None,
        }
    }

    /// Boundaries strictly before `ts` that are due, in order
    pub fn advance(&mut self, ts: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        let mut next = *self.next.get_or_insert(ts + self.every);
        let mut due = Vec::new();
        while ts > next {
            let holds_samples = self
                .last_sample
                .is_some_and(|last| next - self.window <= last);
            if !holds_samples {
                // Land on the first boundary at or after `ts`, keeping the grid
                let step_ms = self.every.num_milliseconds().max(1);
                let behind_ms = (ts - next).num_milliseconds();
                let steps = (behind_ms + step_ms - 1) / step_ms;
                next += Duration::milliseconds(steps * step_ms);
                break;
            }
            due.push(next);
            next += self.every;
        }
        self.next = Some(next);
        due
    }

    /// Record an accepted sample
    pub fn record(&mut self, ts: DateTime<Utc>) {
        self.last_sample = Some(self.last_sample.map_or(ts, |last| last.max(ts)));
    }

    pub fn last_sample(&self) -> Option<DateTime<Utc>> {
        self.last_sample
    }

    pub fn next_boundary(&self) -> Option<DateTime<Utc>> {
        self.next
    }
}
