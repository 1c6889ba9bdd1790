use crate::prelude::*;
use crate::zigbee::{command, frame, reader::Link, transport::Transport};

/// Asks the radio for its device info. A running coordinator reports its own
/// IEEE address followed by device type and state `0709`.
pub struct HealthCheck<'a, T> {
    link: &'a mut Link<T>,
    ecu: &'a EcuAddress,
}

impl<'a, T: Transport> HealthCheck<'a, T> {
    pub fn new(link: &'a mut Link<T>, ecu: &'a EcuAddress) -> Self {
        Self { link, ecu }
    }

    pub fn run(self) -> Progress<()> {
        let reply = match self.link.exchange(command::HEALTH_CHECK) {
            Progress::Success(reply) => reply,
            Progress::Fail(err) => return Progress::Fail(err),
            Progress::Incomplete => return Progress::Incomplete,
        };

        let reversed = self.ecu.reversed();
        let running = reply.contains(&reversed)
            && frame::after_marker(&reply.hex, &reversed[4..])
                .is_some_and(|tail| tail.contains(command::COORDINATOR_RUNNING));

        if running {
            trace!("coordinator check ok");
            Progress::Success(())
        } else {
            debug!("coordinator check failed, reply {:?}", reply.hex);
            Progress::Fail(EngineError::ProtocolMismatch {
                expected: format!("{}..{}", reversed, command::COORDINATOR_RUNNING),
            })
        }
    }
}
