use crate::prelude::*;
use crate::zigbee::{command, reader::Link, transport::Transport};

/// Sends the reboot command on the first attempt, then waits a full reboot
/// delay before reading whatever comes back.
pub struct Reboot<'a, T> {
    link: &'a mut Link<T>,
    inverter: &'a Inverter,
    ecu: &'a EcuAddress,
    attempt: u32,
}

impl<'a, T: Transport> Reboot<'a, T> {
    pub fn new(
        link: &'a mut Link<T>,
        inverter: &'a Inverter,
        ecu: &'a EcuAddress,
        attempt: u32,
    ) -> Self {
        Self {
            link,
            inverter,
            ecu,
            attempt,
        }
    }

    pub fn run(self) -> Progress<()> {
        let Some(pair_id) = self.inverter.pair_id() else {
            return Progress::Fail(EngineError::Unpaired(self.inverter.serial().to_string()));
        };

        if self.attempt == 0 && self.link.is_idle() {
            info!("rebooting inverter {}", self.inverter.serial());
            if let Err(err) = self.link.send(&command::reboot(&pair_id, self.ecu)) {
                return Progress::Fail(err);
            }
            return Progress::Incomplete;
        }

        match self.link.receive() {
            Progress::Incomplete => Progress::Incomplete,
            _ => Progress::Success(()),
        }
    }
}
