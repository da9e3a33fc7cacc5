//! Monotonic time and the one-shot/cancelable/rearmable timer primitive that
//! the PA algorithm, PA-local, PA-PD, and routing election all build on.
//!
//! The daemon is single-threaded and cooperative (spec.md §5): rather than
//! deliver timer expiry as a push callback, every subsystem exposes a
//! `next_wakeup()` deadline and a `run(now)` method; the event loop driver
//! (see `src/bin/homenetd.rs`) sleeps until the earliest deadline across all
//! subsystems and then calls `run` on whichever are due. This is the same
//! "single uloop_timeout per subsystem, coalesced into one pass" shape as
//! the original `pa_local_schedule`/`__pa_local_do` split.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

/// A point in time, expressed in milliseconds since the process started.
/// Matches the original's `hnetd_time_t` in spirit: an opaque, monotonic,
/// millisecond-resolution timestamp that is never compared across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(pub u64);

impl Time {
    /// The zero instant. Only meaningful as a sentinel ("never scheduled").
    pub const ZERO: Time = Time(0);

    /// This time plus `ms` milliseconds.
    pub fn plus_ms(self, ms: u64) -> Time {
        Time(self.0.saturating_add(ms))
    }

    /// This time minus `ms` milliseconds, saturating at zero.
    pub fn minus_ms(self, ms: u64) -> Time {
        Time(self.0.saturating_sub(ms))
    }

    /// Milliseconds between `self` and an earlier `other`, or 0 if `other`
    /// is later.
    pub fn saturating_sub(self, other: Time) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Supplies the current time. Abstracted so tests can drive the algorithms
/// with a fully deterministic, manually-advanced clock instead of real time.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> Time;
}

/// A `Clock` backed by `std::time::Instant`, for production use.
#[derive(Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Creates a clock whose epoch is "now".
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Time {
        Time(self.start.elapsed().as_millis() as u64)
    }
}

/// A manually-advanced clock for tests. Shares its counter via `Rc<Cell<_>>`
/// so cloned handles observe the same advances.
#[derive(Clone)]
pub struct TestClock(Rc<Cell<u64>>);

impl TestClock {
    /// Creates a test clock starting at `Time::ZERO`.
    pub fn new() -> Self {
        TestClock(Rc::new(Cell::new(0)))
    }

    /// Advances the clock by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }

    /// Sets the clock to an absolute time. Only moves forward.
    pub fn set(&self, at: Time) {
        if at.0 > self.0.get() {
            self.0.set(at.0);
        }
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Time {
        Time(self.0.get())
    }
}

/// A one-shot, cancelable, rearmable deadline.
///
/// `Timer` does not itself deliver callbacks: subsystems poll it with
/// [`Timer::poll`] from their own `run(now)` method, which is how the event
/// loop avoids delivering a stale expiry after a timer has been rearmed
/// (rearming simply replaces the stored deadline; there is nothing in flight
/// to race against).
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    deadline: Option<Time>,
}

impl Timer {
    /// Creates a timer with nothing scheduled.
    pub fn new() -> Self {
        Timer { deadline: None }
    }

    /// Arms the timer for `at`, overwriting any previous deadline.
    pub fn arm(&mut self, at: Time) {
        self.deadline = Some(at);
    }

    /// Arms the timer for `at` only if it is unset or currently scheduled
    /// later than `at`. Used to implement "schedule run soon" without
    /// pushing a later-running timer further out.
    pub fn arm_no_later_than(&mut self, at: Time) {
        match self.deadline {
            Some(existing) if existing <= at => {}
            _ => self.deadline = Some(at),
        }
    }

    /// Cancels the timer. A canceled timer never fires.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// The current deadline, if armed.
    pub fn deadline(&self) -> Option<Time> {
        self.deadline
    }

    /// True if the timer is armed and `now` has reached its deadline.
    /// Does not clear the deadline; callers that act on expiry should
    /// `cancel()` or `arm()` a new deadline afterwards.
    pub fn is_due(&self, now: Time) -> bool {
        matches!(self.deadline, Some(d) if d <= now)
    }
}

/// Returns the earlier of two optional deadlines.
pub fn earliest(a: Option<Time>, b: Option<Time>) -> Option<Time> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if a <= b { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
