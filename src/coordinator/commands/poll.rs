use crate::prelude::*;
use crate::zigbee::{
    command,
    decoder::{self, Limits},
    reader::{Link, RawFrame},
    transport::Transport,
};

/// Requests a data frame and decodes it. A missing reply is decoded as an
/// empty one so it counts as a failed poll.
pub struct Poll<'a, T> {
    link: &'a mut Link<T>,
    inverter: &'a Inverter,
    ecu: &'a EcuAddress,
    limits: &'a Limits,
}

impl<'a, T: Transport> Poll<'a, T> {
    pub fn new(
        link: &'a mut Link<T>,
        inverter: &'a Inverter,
        ecu: &'a EcuAddress,
        limits: &'a Limits,
    ) -> Self {
        Self {
            link,
            inverter,
            ecu,
            limits,
        }
    }

    pub fn run(self) -> Progress<TelemetrySnapshot> {
        let Some(pair_id) = self.inverter.pair_id() else {
            return Progress::Fail(EngineError::Unpaired(self.inverter.serial().to_string()));
        };

        let reply = match self.link.exchange(&command::poll(&pair_id, self.ecu)) {
            Progress::Incomplete => return Progress::Incomplete,
            Progress::Success(reply) => reply,
            Progress::Fail(EngineError::NoResponse) => RawFrame::default(),
            Progress::Fail(err) => return Progress::Fail(err),
        };

        decoder::decode(&reply, self.inverter, self.limits)
            .map_err(EngineError::from)
            .into()
    }
}
