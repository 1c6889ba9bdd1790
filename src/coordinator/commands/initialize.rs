use crate::prelude::*;
use crate::zigbee::{command, reader::Link, transport::Transport};

/// One network-setup command per call; replies are read and discarded.
pub struct Initialize<'a, T> {
    link: &'a mut Link<T>,
    ecu: &'a EcuAddress,
    step: usize,
}

impl<'a, T: Transport> Initialize<'a, T> {
    pub fn new(link: &'a mut Link<T>, ecu: &'a EcuAddress, step: usize) -> Self {
        Self { link, ecu, step }
    }

    pub fn run(self) -> Progress<()> {
        let Some(payload) = command::initialize(self.step, self.ecu) else {
            return Progress::Fail(EngineError::ProtocolMismatch {
                expected: format!("initialisation step below {}", command::INITIALIZE_STEPS),
            });
        };
        if self.link.is_idle() {
            debug!("initialisation step {}", self.step);
        }

        match self.link.exchange(&payload) {
            Progress::Success(_) if self.step + 1 < command::INITIALIZE_STEPS => {
                Progress::Incomplete
            }
            other => other.map(|_| ()),
        }
    }
}
