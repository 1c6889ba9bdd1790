use crate::prelude::*;

pub mod commands;
pub mod session;

use crate::persistence::{self, PreferenceStore};
use crate::telemetry::{Publication, TelemetrySink};
use crate::zigbee::{
    decoder::Limits,
    reader::Link,
    transport::{ResetLine, Transport},
};
use commands::{
    health_check::HealthCheck, initialize::Initialize, normal_operation::NormalOperation,
    pair::Pair, ping::Ping, poll::Poll, reboot::Reboot,
};
pub use session::{Operation, Phase, Session, Target, Transition};
use session::{HEALTH_CHECK_IDLE_TICKS, MAX_RETRIES};

pub const WILDCARD: &str = "*";

#[derive(Clone, Debug, Default)]
pub struct EngineStats {
    pub hard_resets: u64,
    pub pairings_ok: u64,
    pub pairings_failed: u64,
    pub polls_ok: u64,
    pub polls_rejected: u64,
    pub polls_failed: u64,
    pub reboots: u64,
}

impl EngineStats {
    pub fn print_summary(&self) {
        info!("Coordinator statistics:");
        info!("  Hard resets: {}", self.hard_resets);
        info!("  Pairings: {} ok, {} failed", self.pairings_ok, self.pairings_failed);
        info!(
            "  Polls: {} ok, {} rejected, {} failed",
            self.polls_ok, self.polls_rejected, self.polls_failed
        );
        info!("  Reboots: {}", self.reboots);
    }
}

/// The cooperative protocol engine. The host calls `tick` and sleeps for
/// the returned number of milliseconds; nothing in here blocks on I/O.
pub struct Coordinator<T, R> {
    link: Link<T>,
    reset: R,
    inverters: Vec<Inverter>,
    session: Session,
    limits: Limits,
    store: Option<Box<dyn PreferenceStore + Send>>,
    sinks: Vec<Box<dyn TelemetrySink + Send>>,
    stats: EngineStats,
}

impl<T: Transport, R: ResetLine> Coordinator<T, R> {
    pub fn new(transport: T, reset: R, inverters: Vec<Inverter>, limits: Limits) -> Self {
        Self {
            link: Link::new(transport),
            reset,
            inverters,
            session: Session::new(),
            limits,
            store: None,
            sinks: Vec::new(),
            stats: EngineStats::default(),
        }
    }

    // accessors {{{
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn phase(&self) -> Phase {
        self.session.phase
    }

    pub fn is_idle(&self) -> bool {
        self.session.phase == Phase::Idle
    }

    pub fn next_delay_ms(&self) -> u64 {
        self.session.next_delay_ms
    }

    pub fn inverters(&self) -> &[Inverter] {
        &self.inverters
    }

    pub fn inverter(&self, serial: &Serial) -> Option<&Inverter> {
        self.inverters.iter().find(|inv| inv.serial() == *serial)
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    pub fn reset_line(&self) -> &R {
        &self.reset
    }
    // }}}

    pub fn add_sink(&mut self, sink: Box<dyn TelemetrySink + Send>) {
        self.sinks.push(sink);
    }

    /// Load stored preferences into every inverter and keep saving from now on.
    pub fn enable_restore(&mut self, store: Box<dyn PreferenceStore + Send>) {
        for inverter in self.inverters.iter_mut() {
            match persistence::restore(&*store, inverter) {
                Ok(true) => info!(
                    "restored {}: pair id {}, {:.2} Wh today",
                    inverter.serial(),
                    inverter
                        .pair_id()
                        .map(|id| id.to_string())
                        .unwrap_or_else(|| "unpaired".into()),
                    inverter.telemetry().energy_today[crate::telemetry::TOTAL]
                ),
                Ok(false) => debug!("nothing stored for {}", inverter.serial()),
                Err(err) => warn!("failed to restore {}: {}", inverter.serial(), err),
            }
        }
        self.store = Some(store);
    }

    pub fn log_summary(&self) {
        info!("Coordinator:");
        info!(
            "  ECU id: {}",
            self.session.ecu.map(|ecu| ecu.to_string()).unwrap_or_else(|| "not set".into())
        );
        info!("  Phase: {}", self.session.phase);
        info!("  Configured inverters:");
        for inverter in &self.inverters {
            info!(
                "    {} {} pair id {} panels {:?}",
                inverter.variant(),
                inverter.serial(),
                inverter.pair_id().map(|id| id.to_string()).unwrap_or_else(|| "unpaired".into()),
                inverter.connected_channels().collect::<Vec<_>>()
            );
        }
    }

    /// Configure the radio address and start bring-up, from a hard reset or
    /// from a health check.
    pub fn restart(&mut self, ecu: EcuAddress, hard: bool) {
        info!("restarting coordinator {} ({})", ecu, if hard { "hard" } else { "soft" });
        self.session.ecu = Some(ecu);
        self.link.reset();
        self.release_reset();
        self.session
            .enter(if hard { Phase::HardReset } else { Phase::Check1 });
    }

    pub fn stop(&mut self) {
        info!("stopping coordinator in {}", self.session.phase);
        self.session.target = None;
        self.session.enter(Phase::Stopped);
    }

    fn release_reset(&mut self) {
        if let Err(err) = self.reset.set_level(true) {
            warn!("failed to drive reset line high: {}", err);
        }
    }

    // requests {{{
    pub fn start_pair(&mut self, selector: &str) -> Result<(), RequestError> {
        let target = self.select(Operation::Pair, selector)?;
        self.ensure_idle()?;
        if target.all {
            info!("pairing all unpaired inverters");
        } else {
            info!("pairing inverter {}", self.inverters[target.index].serial());
        }
        self.session.target = Some(target);
        self.release_reset();
        self.session.enter(Phase::HardReset);
        Ok(())
    }

    pub fn start_poll(&mut self, selector: &str) -> Result<(), RequestError> {
        let target = self.select(Operation::Poll, selector)?;
        self.ensure_idle()?;
        if target.all {
            debug!("polling all paired inverters");
        } else {
            info!("polling inverter {}", self.inverters[target.index].serial());
        }
        self.session.target = Some(target);
        self.session.enter(Phase::PollInverter);
        Ok(())
    }

    pub fn start_reboot(&mut self, serial: &str) -> Result<(), RequestError> {
        let target = self.select(Operation::Reboot, serial)?;
        self.ensure_idle()?;
        self.session.target = Some(target);
        self.session.enter(Phase::RebootInverter);
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), RequestError> {
        match self.session.phase {
            Phase::Idle => Ok(()),
            Phase::Stopped => Err(RequestError::Stopped),
            _ => Err(RequestError::Busy),
        }
    }

    fn select(&self, operation: Operation, selector: &str) -> Result<Target, RequestError> {
        if selector == WILDCARD && operation != Operation::Reboot {
            return self
                .inverters
                .iter()
                .position(|inv| operation.is_eligible(inv))
                .map(|index| Target {
                    operation,
                    index,
                    all: true,
                })
                .ok_or(RequestError::NothingEligible);
        }

        let index = self
            .inverters
            .iter()
            .position(|inv| inv.serial().as_str().eq_ignore_ascii_case(selector))
            .ok_or_else(|| RequestError::UnknownInverter(selector.to_string()))?;

        if operation != Operation::Pair && !self.inverters[index].is_paired() {
            return Err(RequestError::NotPaired(selector.to_string()));
        }

        Ok(Target {
            operation,
            index,
            all: false,
        })
    }

    fn next_eligible(&self, finished: Target) -> Option<Target> {
        self.inverters
            .iter()
            .enumerate()
            .skip(finished.index + 1)
            .find(|(_, inv)| finished.operation.is_eligible(inv))
            .map(|(index, _)| Target { index, ..finished })
    }
    // }}}

    /// Zero today's energy on every inverter, at local midnight.
    pub fn reset_energy_today(&mut self) {
        info!("new day, resetting today's energy");
        for index in 0..self.inverters.len() {
            let cleared = self.inverters[index].telemetry().with_energy_today_cleared();
            self.inverters[index].set_telemetry(cleared);
            self.persist(index);
            self.publish(index);
        }
    }

    fn persist(&mut self, index: usize) {
        if let Some(store) = self.store.as_deref_mut() {
            if let Err(err) = persistence::save(store, &self.inverters[index]) {
                warn!("failed to save preferences of {}: {}", self.inverters[index].serial(), err);
            }
        }
    }

    fn publish(&mut self, index: usize) {
        let publication = Publication::from_inverter(&self.inverters[index]);
        for sink in self.sinks.iter_mut() {
            if let Err(err) = sink.publish(&publication) {
                warn!("failed to publish {}: {}", publication.serial, err);
            }
        }
    }

    /// Run one step and return the delay before the next.
    pub fn tick(&mut self) -> u64 {
        let Some(ecu) = self.session.ecu else {
            return self.session.next_delay_ms;
        };
        let before = self.session.phase;
        if before == Phase::Stopped {
            return self.session.next_delay_ms;
        }
        if before != Phase::Idle {
            trace!(
                "tick {}:{} reader {:?}",
                before,
                self.session.attempt,
                self.link.reader_phase()
            );
        }

        let transition = match before {
            Phase::Stopped => Transition::Stay,
            Phase::Check1 => {
                let progress = Ping::new(&mut self.link).run();
                self.retry_or_reset(progress, Phase::Check2)
            }
            Phase::Check2 => {
                let progress = HealthCheck::new(&mut self.link, &ecu).run();
                let next = if self.session.is_pairing() {
                    Phase::PairInverter
                } else {
                    Phase::Idle
                };
                self.retry_or_reset(progress, next)
            }
            Phase::HardReset => self.hard_reset(),
            Phase::Initialize => {
                match Initialize::new(&mut self.link, &ecu, self.session.attempt as usize).run() {
                    Progress::Incomplete => Transition::Stay,
                    Progress::Success(()) if self.session.is_pairing() => {
                        Transition::Enter(Phase::Check1)
                    }
                    Progress::Success(()) => Transition::Enter(Phase::EnterNormalOperation),
                    Progress::Fail(err) => {
                        warn!("coordinator initialisation failed: {}", err);
                        Transition::Enter(Phase::HardReset)
                    }
                }
            }
            Phase::EnterNormalOperation => match NormalOperation::new(&mut self.link, &ecu).run() {
                Progress::Incomplete => Transition::Stay,
                Progress::Success(()) => Transition::Enter(Phase::Check1),
                Progress::Fail(err) => {
                    warn!("entering normal operation failed: {}", err);
                    Transition::Enter(Phase::HardReset)
                }
            },
            Phase::Idle => self.idle(),
            Phase::PairInverter => self.pair(&ecu),
            Phase::PollInverter => self.poll(&ecu),
            Phase::RebootInverter => self.reboot(&ecu),
        };

        self.session
            .finish_tick(before, transition, self.link.is_idle(), self.link.is_settling());
        self.session.next_delay_ms
    }

    fn retry_or_reset(&self, progress: Progress<()>, next: Phase) -> Transition {
        match progress {
            Progress::Incomplete => Transition::Stay,
            Progress::Success(()) => Transition::Enter(next),
            Progress::Fail(err) if self.session.attempt < MAX_RETRIES => {
                debug!("{} attempt {} failed: {}", self.session.phase, self.session.attempt, err);
                Transition::Stay
            }
            Progress::Fail(err) => {
                warn!("coordinator not responding ({}), hard reset", err);
                Transition::Enter(Phase::HardReset)
            }
        }
    }

    /// First tick pulls the reset pin low, the next one releases it.
    fn hard_reset(&mut self) -> Transition {
        if self.session.attempt == 0 {
            debug!("hard reset of coordinator radio");
            self.stats.hard_resets += 1;
            self.link.reset();
            if let Err(err) = self.reset.set_level(false) {
                warn!("failed to drive reset line low: {}", err);
            }
            return Transition::Stay;
        }
        self.release_reset();
        Transition::Enter(Phase::Initialize)
    }

    fn idle(&mut self) -> Transition {
        self.session.idle_ticks += 1;
        if self.session.idle_ticks > HEALTH_CHECK_IDLE_TICKS {
            self.session.idle_ticks = 0;
            return Transition::Enter(Phase::Check1);
        }
        match self.session.operation() {
            Some(Operation::Pair) => {
                self.release_reset();
                Transition::Enter(Phase::HardReset)
            }
            Some(Operation::Reboot) => Transition::Enter(Phase::RebootInverter),
            Some(Operation::Poll) => Transition::Enter(Phase::PollInverter),
            None => Transition::Stay,
        }
    }

    fn active_target(&self, operation: Operation) -> Option<Target> {
        self.session
            .target
            .filter(|t| t.operation == operation && t.index < self.inverters.len())
    }

    /// Hand the phase to the next inverter of a wildcard request.
    fn chain(&mut self, finished: Target) -> Option<Transition> {
        self.session.target = None;
        if !finished.all {
            return None;
        }
        self.next_eligible(finished).map(Transition::Continue)
    }

    fn pair(&mut self, ecu: &EcuAddress) -> Transition {
        let Some(target) = self.active_target(Operation::Pair) else {
            warn!("pairing without a target");
            return Transition::Enter(Phase::Idle);
        };

        let progress = Pair::new(
            &mut self.link,
            &self.inverters[target.index],
            ecu,
            self.session.attempt as usize,
            &mut self.session.pair_found,
        )
        .run();

        let paired = match progress {
            Progress::Incomplete => return Transition::Stay,
            Progress::Success(id) => {
                info!(
                    "pairing successful, {} has pair id {}",
                    self.inverters[target.index].serial(),
                    id
                );
                self.inverters[target.index].set_pair_id(Some(id));
                self.stats.pairings_ok += 1;
                true
            }
            Progress::Fail(err) => {
                error!("pairing {} failed: {}", self.inverters[target.index].serial(), err);
                self.inverters[target.index].set_pair_id(None);
                self.stats.pairings_failed += 1;
                false
            }
        };
        self.persist(target.index);

        if let Some(next) = self.chain(target) {
            return next;
        }
        if paired {
            Transition::Enter(Phase::EnterNormalOperation)
        } else {
            Transition::Enter(Phase::HardReset)
        }
    }

    fn poll(&mut self, ecu: &EcuAddress) -> Transition {
        let Some(target) = self.active_target(Operation::Poll) else {
            return Transition::Enter(Phase::Idle);
        };
        let index = target.index;

        let progress = Poll::new(&mut self.link, &self.inverters[index], ecu, &self.limits).run();
        match progress {
            Progress::Incomplete => return Transition::Stay,
            Progress::Success(telemetry) => {
                info!("successfully polled inverter {}", self.inverters[index].serial());
                self.stats.polls_ok += 1;
                self.inverters[index].record_poll_success();
                self.inverters[index].set_telemetry(telemetry);
                self.persist(index);
                self.publish(index);
            }
            Progress::Fail(EngineError::Decode(err)) if err.is_rejection() => {
                warn!(
                    "ignoring invalid data from inverter {}: {}",
                    self.inverters[index].serial(),
                    err
                );
                self.stats.polls_rejected += 1;
                self.inverters[index].record_poll_success();
            }
            Progress::Fail(err) => {
                debug!("poll of {} failed: {}", self.inverters[index].serial(), err);
                self.stats.polls_failed += 1;
                if self.inverters[index].record_poll_failure() {
                    warn!(
                        "{} failed polls in a row for {}, readings now unknown",
                        self.inverters[index].failed_polls(),
                        self.inverters[index].serial()
                    );
                    let invalidated = self.inverters[index].telemetry().invalidated();
                    self.inverters[index].set_telemetry(invalidated);
                    self.persist(index);
                    self.publish(index);
                }
            }
        }

        self.chain(target).unwrap_or(Transition::Enter(Phase::Idle))
    }

    fn reboot(&mut self, ecu: &EcuAddress) -> Transition {
        let Some(target) = self.active_target(Operation::Reboot) else {
            return Transition::Enter(Phase::Idle);
        };

        let progress = Reboot::new(
            &mut self.link,
            &self.inverters[target.index],
            ecu,
            self.session.attempt,
        )
        .run();

        match progress {
            Progress::Incomplete => Transition::Stay,
            Progress::Success(()) | Progress::Fail(_) => {
                self.stats.reboots += 1;
                self.session.target = None;
                Transition::Enter(Phase::Idle)
            }
        }
    }
}
