//! Host-side timing around the engine: periodic polls, the daily energy
//! reset and requests waiting for the engine to go idle.

use crate::prelude::*;
use crate::coordinator::{Coordinator, WILDCARD};
use crate::zigbee::transport::{ResetLine, Transport};

use chrono::{Datelike, NaiveDate};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

// PollScheduler {{{
/// Due at start, then every `interval` after each accepted poll.
#[derive(Clone, Debug)]
pub struct PollScheduler {
    interval: Duration,
    last: Option<Instant>,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn due(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
} // }}}

// DayRollover {{{
/// Tracks the local day; the first observation only records it.
#[derive(Clone, Debug, Default)]
pub struct DayRollover {
    day: Option<(i32, u32)>,
}

impl DayRollover {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `date` is a different day than the last one seen.
    pub fn observe(&mut self, date: NaiveDate) -> bool {
        let day = (date.year(), date.ordinal());
        match self.day.replace(day) {
            Some(previous) => previous != day,
            None => false,
        }
    }
} // }}}

// requests {{{
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostRequest {
    Pair(String),
    Poll(String),
    Reboot(String),
}

impl HostRequest {
    fn issue<T, R>(&self, coordinator: &mut Coordinator<T, R>) -> Result<(), RequestError>
    where
        T: Transport,
        R: ResetLine,
    {
        match self {
            Self::Pair(selector) => coordinator.start_pair(selector),
            Self::Poll(selector) => coordinator.start_poll(selector),
            Self::Reboot(serial) => coordinator.start_reboot(serial),
        }
    }
}

impl std::fmt::Display for HostRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pair(s) => write!(f, "pair {}", s),
            Self::Poll(s) => write!(f, "poll {}", s),
            Self::Reboot(s) => write!(f, "reboot {}", s),
        }
    }
}

/// Requests issued in order, one at a time, while the engine is idle.
#[derive(Clone, Debug, Default)]
pub struct RequestQueue {
    pending: VecDeque<HostRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: HostRequest) {
        self.pending.push_back(request);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Issue the head request. A busy engine keeps it queued; any other
    /// refusal drops it. Returns true if a request was accepted.
    pub fn dispatch<T, R>(&mut self, coordinator: &mut Coordinator<T, R>) -> bool
    where
        T: Transport,
        R: ResetLine,
    {
        let Some(request) = self.pending.front() else {
            return false;
        };
        if !coordinator.is_idle() {
            return false;
        }

        match request.issue(coordinator) {
            Ok(()) => {
                info!("{} accepted", request);
                self.pending.pop_front();
                true
            }
            Err(RequestError::Busy) => false,
            Err(err) => {
                warn!("{} rejected: {}", request, err);
                self.pending.pop_front();
                false
            }
        }
    }
} // }}}

/// Issue the periodic wildcard poll if it is due. It stays due until the
/// engine accepts it; nothing to poll counts as done.
pub fn poll_if_due<T: Transport, R: ResetLine>(
    scheduler: &mut PollScheduler,
    coordinator: &mut Coordinator<T, R>,
    now: Instant,
) -> bool {
    if !scheduler.due(now) || !coordinator.is_idle() {
        return false;
    }
    match coordinator.start_poll(WILDCARD) {
        Ok(()) => {
            scheduler.mark(now);
            true
        }
        Err(RequestError::NothingEligible) => {
            debug!("no paired inverter to poll");
            scheduler.mark(now);
            false
        }
        Err(err) => {
            debug!("scheduled poll deferred: {}", err);
            false
        }
    }
}
