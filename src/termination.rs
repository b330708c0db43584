//! Cooperative planning budgets.
//!
//! Planners poll a [`TerminationChecker`] between expansions and stop on their
//! own, so a call may overshoot its budget by one expansion but never blocks.

use std::time::Duration;
use std::time::Instant;

pub trait TerminationChecker {
    /// Re-arms the budget for a new planning call.
    fn init(&mut self);

    fn reached_termination(&self) -> bool;

    /// Accounting hook, called once per node expansion.
    fn notify_expansion(&mut self);
}

/// Wall-clock budget.
///
/// Polled on every expansion, so it measures against a monotonic deadline.
/// `hrsw::Stopwatch` reads `SystemTime` and panics if the clock steps back.
#[derive(Debug, Clone, Copy)]
pub struct TimeTerminationChecker {
    budget: Duration,
    deadline: Instant,
}

impl TimeTerminationChecker {
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self {
            budget,
            deadline: Self::deadline_from_now(budget),
        }
    }

    fn deadline_from_now(budget: Duration) -> Instant {
        let now = Instant::now();
        // Capped where `Instant` would overflow
        now.checked_add(budget)
            .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)))
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

impl TerminationChecker for TimeTerminationChecker {
    fn init(&mut self) {
        self.deadline = Self::deadline_from_now(self.budget);
    }

    #[inline(always)]
    fn reached_termination(&self) -> bool {
        Instant::now() >= self.deadline
    }

    #[inline(always)]
    fn notify_expansion(&mut self) {}
}

/// Stops after a fixed number of expansions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionTerminationChecker {
    limit: u64,
    expansions: u64,
}

impl ExpansionTerminationChecker {
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            expansions: 0,
        }
    }

    pub fn expansions(&self) -> u64 {
        self.expansions
    }
}

impl TerminationChecker for ExpansionTerminationChecker {
    fn init(&mut self) {
        self.expansions = 0;
    }

    #[inline(always)]
    fn reached_termination(&self) -> bool {
        self.expansions >= self.limit
    }

    #[inline(always)]
    fn notify_expansion(&mut self) {
        self.expansions += 1;
    }
}

/// Never fires, for offline searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnlimitedTerminationChecker;

impl TerminationChecker for UnlimitedTerminationChecker {
    fn init(&mut self) {}

    #[inline(always)]
    fn reached_termination(&self) -> bool {
        false
    }

    #[inline(always)]
    fn notify_expansion(&mut self) {}
}

/// Fires after a number of polls, like a wall-clock budget that also runs
/// out while a planner isn't expanding.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct PollTerminationChecker {
    limit: u32,
    polls: std::cell::Cell<u32>,
}

#[cfg(test)]
impl PollTerminationChecker {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            limit,
            polls: std::cell::Cell::new(0),
        }
    }
}

#[cfg(test)]
impl TerminationChecker for PollTerminationChecker {
    fn init(&mut self) {
        self.polls.set(0);
    }

    fn reached_termination(&self) -> bool {
        let polls = self.polls.get() + 1;
        self.polls.set(polls);
        polls > self.limit
    }

    fn notify_expansion(&mut self) {}
}
