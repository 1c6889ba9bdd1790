use crate::prelude::*;
use crate::zigbee::{frame, transport::Transport};

use bytes::{BufMut, Bytes, BytesMut};
use std::io;

/// Bytes kept from one reply; anything beyond is drained and dropped.
pub const MAX_FRAME: usize = 230;
/// Empty ticks tolerated before giving up on a reply.
pub const WAIT_LIMIT: u32 = 20;
/// Re-poll delay while a reply is still arriving.
pub const SETTLE_DELAY_MS: u64 = 120;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReaderPhase {
    #[default]
    Idle,
    Waiting { attempts: u32 },
    Reading { last_count: usize },
}

/// One complete reply, hex-encoded uppercase with line noise stripped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawFrame {
    pub hex: String,
    pub bytes_read: usize,
    pub raw: Bytes,
}

impl RawFrame {
    pub fn contains(&self, marker: &str) -> bool {
        self.hex.contains(marker)
    }

    pub fn is_empty(&self) -> bool {
        self.bytes_read == 0
    }
}

/// Assembles a reply across ticks. A reply is complete once the number of
/// buffered bytes stops changing between two ticks, or the buffer is full.
#[derive(Debug, Default)]
pub struct LinkReader {
    phase: ReaderPhase,
}

impl LinkReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ReaderPhase {
        self.phase
    }

    /// Forget any reply in progress.
    pub fn reset(&mut self) {
        if self.phase != ReaderPhase::Idle {
            debug!("abandoning reply in {:?}", self.phase);
        }
        self.phase = ReaderPhase::Idle;
    }

    pub fn poll<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Progress<RawFrame> {
        match self.step(transport) {
            Ok(progress) => progress,
            Err(err) => {
                self.phase = ReaderPhase::Idle;
                Progress::Fail(err.into())
            }
        }
    }

    fn step<T: Transport + ?Sized>(&mut self, transport: &mut T) -> io::Result<Progress<RawFrame>> {
        let available = transport.bytes_available()?;

        if self.phase == ReaderPhase::Idle && available == 0 {
            self.phase = ReaderPhase::Waiting { attempts: 0 };
        }

        if let ReaderPhase::Waiting { attempts } = self.phase {
            let attempts = attempts + 1;
            self.phase = ReaderPhase::Waiting { attempts };
            if available == 0 {
                if attempts > WAIT_LIMIT {
                    self.phase = ReaderPhase::Idle;
                    return Ok(Progress::Fail(EngineError::NoResponse));
                }
                return Ok(Progress::Incomplete);
            }
        }

        if let ReaderPhase::Reading { last_count } = self.phase {
            if available == last_count || available >= MAX_FRAME {
                let frame = Self::drain(transport)?;
                self.phase = ReaderPhase::Idle;
                return Ok(Progress::Success(frame));
            }
        }

        self.phase = ReaderPhase::Reading {
            last_count: available,
        };
        Ok(Progress::Incomplete)
    }

    fn drain<T: Transport + ?Sized>(transport: &mut T) -> io::Result<RawFrame> {
        let mut raw = BytesMut::with_capacity(MAX_FRAME);
        let mut dropped = 0;
        while transport.bytes_available()? > 0 {
            let byte = transport.read_byte()?;
            if raw.len() < MAX_FRAME {
                raw.put_u8(byte);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!("reply exceeded {} bytes, dropped {}", MAX_FRAME, dropped);
        }

        let encoded = hex::encode_upper(&raw);
        Ok(RawFrame {
            hex: frame::strip_line_noise(&encoded).to_string(),
            bytes_read: raw.len(),
            raw: raw.freeze(),
        })
    }
}

/// The transport plus the reader state that belongs to it.
pub struct Link<T> {
    transport: T,
    reader: LinkReader,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            reader: LinkReader::new(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn reader_phase(&self) -> ReaderPhase {
        self.reader.phase()
    }

    pub fn reset(&mut self) {
        self.reader.reset();
    }

    /// No reply is being waited on or assembled.
    pub fn is_idle(&self) -> bool {
        self.reader.phase() == ReaderPhase::Idle
    }

    /// A reply is arriving and wants a short re-poll.
    pub fn is_settling(&self) -> bool {
        matches!(self.reader.phase(), ReaderPhase::Reading { .. })
    }

    pub fn send(&mut self, payload: &str) -> Result<(), EngineError> {
        let wire = frame::encode(payload)?;
        self.transport.discard_input()?;
        for byte in &wire {
            self.transport.write_byte(*byte)?;
        }
        self.transport.flush()?;
        trace!("tx {}", hex::encode_upper(&wire));
        Ok(())
    }

    pub fn receive(&mut self) -> Progress<RawFrame> {
        let progress = self.reader.poll(&mut self.transport);
        if let Progress::Success(reply) = &progress {
            trace!("rx {} ({} bytes)", reply.hex, reply.bytes_read);
            for sub in frame::sub_frames(&reply.hex) {
                if !sub.checksum_ok() {
                    trace!("rx {} has a bad checksum, accepted anyway", sub.command);
                }
            }
        }
        progress
    }

    /// Send `payload` if no reply is outstanding, then poll for the reply.
    pub fn exchange(&mut self, payload: &str) -> Progress<RawFrame> {
        if self.is_idle() {
            if let Err(err) = self.send(payload) {
                return Progress::Fail(err);
            }
        }
        self.receive()
    }
}
