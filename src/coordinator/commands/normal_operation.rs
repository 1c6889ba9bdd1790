use crate::prelude::*;
use crate::zigbee::{command, reader::Link, transport::Transport};

pub struct NormalOperation<'a, T> {
    link: &'a mut Link<T>,
    ecu: &'a EcuAddress,
}

impl<'a, T: Transport> NormalOperation<'a, T> {
    pub fn new(link: &'a mut Link<T>, ecu: &'a EcuAddress) -> Self {
        Self { link, ecu }
    }

    /// Any reply counts.
    pub fn run(self) -> Progress<()> {
        self.link.exchange(&command::normal_operation(self.ecu)).map(|_| {
            debug!("coordinator in normal operation");
        })
    }
}
