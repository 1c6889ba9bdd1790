use crate::prelude::*;
use crate::zigbee::{command, reader::Link, transport::Transport};

/// Serial loopback: the firmware answers `2101` with a fixed reply.
pub struct Ping<'a, T> {
    link: &'a mut Link<T>,
}

impl<'a, T: Transport> Ping<'a, T> {
    pub fn new(link: &'a mut Link<T>) -> Self {
        Self { link }
    }

    pub fn run(self) -> Progress<()> {
        match self.link.exchange(command::PING) {
            Progress::Success(reply) if reply.contains(command::PING_REPLY) => {
                trace!("ping ok");
                Progress::Success(())
            }
            Progress::Success(reply) => {
                debug!("unexpected ping reply {:?}", reply.hex);
                Progress::Fail(EngineError::ProtocolMismatch {
                    expected: command::PING_REPLY.to_string(),
                })
            }
            Progress::Fail(err) => Progress::Fail(err),
            Progress::Incomplete => Progress::Incomplete,
        }
    }
}
