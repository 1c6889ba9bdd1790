use crate::prelude::*;
use crate::zigbee::{
    command, frame,
    reader::{Link, RawFrame},
    transport::Transport,
};

/// Reply sizes that can carry a pairing answer.
const PAIR_REPLY_BYTES: std::ops::RangeInclusive<usize> = 60..=111;

/// Four fixed commands per inverter. Replies to steps 1 and 2 may carry the
/// pair id; either one is enough.
pub struct Pair<'a, T> {
    link: &'a mut Link<T>,
    inverter: &'a Inverter,
    ecu: &'a EcuAddress,
    step: usize,
    found: &'a mut Option<PairId>,
}

impl<'a, T: Transport> Pair<'a, T> {
    pub fn new(
        link: &'a mut Link<T>,
        inverter: &'a Inverter,
        ecu: &'a EcuAddress,
        step: usize,
        found: &'a mut Option<PairId>,
    ) -> Self {
        Self {
            link,
            inverter,
            ecu,
            step,
            found,
        }
    }

    pub fn run(self) -> Progress<PairId> {
        let serial = self.inverter.serial();
        let Some(payload) = command::pair(self.step, &serial, self.ecu) else {
            return Progress::Fail(EngineError::ProtocolMismatch {
                expected: format!("pairing step below {}", command::PAIR_STEPS),
            });
        };
        if self.step == 0 && self.link.is_idle() {
            info!("starting pair of {}", serial);
            *self.found = None;
        }

        let reply = match self.link.exchange(&payload) {
            Progress::Incomplete => return Progress::Incomplete,
            Progress::Success(reply) => reply,
            Progress::Fail(EngineError::NoResponse) => RawFrame::default(),
            Progress::Fail(err) => return Progress::Fail(err),
        };

        if self.step == 1 || self.step == 2 {
            if let Some(id) = pair_id_from_reply(&reply, &serial) {
                debug!("pair step {} of {} found id {}", self.step, serial, id);
                *self.found = Some(id);
            }
        }

        if self.step + 1 < command::PAIR_STEPS {
            return Progress::Incomplete;
        }

        match self.found.take() {
            Some(id) => Progress::Success(id),
            None => Progress::Fail(EngineError::ProtocolMismatch {
                expected: format!("pair id for {}", serial),
            }),
        }
    }
}

/// The id is the four hex characters after the last echo of the serial.
pub fn pair_id_from_reply(reply: &RawFrame, serial: &Serial) -> Option<PairId> {
    if reply.hex.len() < 6 || !PAIR_REPLY_BYTES.contains(&reply.bytes_read) {
        trace!("no pairing answer in {} byte reply", reply.bytes_read);
        return None;
    }
    let tail = frame::after_last_marker(&reply.hex, serial.as_str())?;
    tail.get(..PairId::LEN).and_then(|id| PairId::from_str(id).ok())
}
