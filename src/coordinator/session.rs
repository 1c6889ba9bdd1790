use crate::prelude::*;
use crate::zigbee::reader::SETTLE_DELAY_MS;
use crate::zigbee::transport::RESET_PULSE_MS;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Delay after any transition into `Idle`.
pub const IDLE_DELAY_MS: u64 = 1000;
/// Idle ticks between periodic health checks.
pub const HEALTH_CHECK_IDLE_TICKS: u32 = 30;
/// Failed checks tolerated before a hard reset.
pub const MAX_RETRIES: u32 = 3;

// {{{ Phase
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Phase {
    Stopped = 0,
    Check1 = 1,
    Check2 = 2,
    HardReset = 10,
    Initialize = 11,
    EnterNormalOperation = 12,
    Idle = 20,
    PollInverter = 21,
    PairInverter = 22,
    RebootInverter = 23,
}

impl Phase {
    /// Delay requested when moving from `self` to `next`, keyed by the phase
    /// being left. `None` keeps the current delay.
    pub fn delay_to(self, next: Phase) -> Option<u64> {
        match self {
            Self::Check1 | Self::Check2 if self == next => Some(700),
            Self::Check1 | Self::Check2 => Some(100),
            Self::HardReset if self == next => Some(RESET_PULSE_MS),
            Self::HardReset => Some(2500),
            Self::Initialize => Some(1000),
            Self::EnterNormalOperation => Some(500),
            Self::PairInverter | Self::PollInverter | Self::Idle => Some(100),
            Self::RebootInverter => Some(2000),
            Self::Stopped => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, u8::from(*self))
    }
} // }}}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    Pair,
    Poll,
    Reboot,
}

impl Operation {
    pub fn is_eligible(&self, inverter: &Inverter) -> bool {
        match self {
            Self::Pair => !inverter.is_paired(),
            Self::Poll | Self::Reboot => inverter.is_paired(),
        }
    }
}

/// The single inverter operation in progress. `all` walks every eligible
/// inverter after `index` once this one completes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Target {
    pub operation: Operation,
    pub index: usize,
    pub all: bool,
}

/// What a tick decided.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
    /// Nothing decided; counts as an attempt once the link is idle.
    Stay,
    Enter(Phase),
    /// Run the current phase again for another inverter, attempts from zero.
    Continue(Target),
}

#[derive(Clone, Debug)]
pub struct Session {
    pub phase: Phase,
    pub attempt: u32,
    pub idle_ticks: u32,
    pub target: Option<Target>,
    pub ecu: Option<EcuAddress>,
    pub next_delay_ms: u64,
    /// Pair id seen so far in the running pairing sequence.
    pub pair_found: Option<PairId>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: Phase::Stopped,
            attempt: 0,
            idle_ticks: 0,
            target: None,
            ecu: None,
            next_delay_ms: 0,
            pair_found: None,
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        if let Some(delay) = self.phase.delay_to(phase) {
            self.next_delay_ms = delay;
        }
        if phase == Phase::Idle {
            self.next_delay_ms = IDLE_DELAY_MS;
        }
        if phase != self.phase {
            self.phase = phase;
            self.attempt = 0;
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        self.target.map(|t| t.operation)
    }

    pub fn is_pairing(&self) -> bool {
        self.operation() == Some(Operation::Pair)
    }

    /// Apply a tick's decision. An unchanged phase with nothing left on the
    /// wire counts one attempt.
    pub fn finish_tick(
        &mut self,
        before: Phase,
        transition: Transition,
        link_idle: bool,
        link_settling: bool,
    ) {
        let chained = match transition {
            Transition::Stay => false,
            Transition::Enter(phase) => {
                self.enter(phase);
                false
            }
            Transition::Continue(target) => {
                self.target = Some(target);
                true
            }
        };

        if link_settling {
            self.next_delay_ms = SETTLE_DELAY_MS;
        }

        if link_idle && self.phase == before {
            self.enter(before);
            self.attempt = if chained { 0 } else { self.attempt + 1 };
        }
    }
}
