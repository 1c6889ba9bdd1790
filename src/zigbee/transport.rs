use crate::prelude::*;

use serde::Deserialize;
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Byte-level access to the coordinator's UART. Nothing here blocks waiting
/// for data; callers check `bytes_available` first.
pub trait Transport {
    fn bytes_available(&mut self) -> io::Result<usize>;
    fn read_byte(&mut self) -> io::Result<u8>;
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;

    fn discard_input(&mut self) -> io::Result<()> {
        while self.bytes_available()? > 0 {
            self.read_byte()?;
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }
    fn read_byte(&mut self) -> io::Result<u8> {
        (**self).read_byte()
    }
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        (**self).write_byte(byte)
    }
    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
    fn discard_input(&mut self) -> io::Result<()> {
        (**self).discard_input()
    }
}

// SerialTransport {{{
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    outgoing: Vec<u8>,
}

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        info!("opening {} at {} baud", path, baud_rate);
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|err| anyhow!("failed to open {}: {}", path, err))?;

        Ok(Self::new(port))
    }

    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            outgoing: Vec::new(),
        }
    }

    /// Second handle on the same device, used for the modem-control reset line.
    pub fn try_clone_port(&self) -> Result<Box<dyn SerialPort>> {
        Ok(self.port.try_clone()?)
    }
}

impl Transport for SerialTransport {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.port.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.outgoing.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.outgoing);
        self.port.write_all(&pending)?;
        self.port.flush()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        Ok(self.port.clear(ClearBuffer::Input)?)
    }
} // }}}

/// Output wired to the CC2530 reset pin. High is "running". A hard reset
/// holds it low for `RESET_PULSE_MS` across two engine ticks.
pub trait ResetLine {
    fn set_level(&mut self, high: bool) -> io::Result<()>;
}

pub const RESET_PULSE_MS: u64 = 50;

impl<R: ResetLine + ?Sized> ResetLine for Box<R> {
    fn set_level(&mut self, high: bool) -> io::Result<()> {
        (**self).set_level(high)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ResetSignal {
    #[default]
    Rts,
    Dtr,
    None,
}

impl std::fmt::Display for ResetSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Rts => "rts",
            Self::Dtr => "dtr",
            Self::None => "none",
        };
        write!(f, "{}", name)
    }
}

/// Reset pin driven through RTS or DTR of the serial adapter.
pub struct ModemControlLine {
    port: Box<dyn SerialPort>,
    signal: ResetSignal,
}

impl ModemControlLine {
    pub fn new(port: Box<dyn SerialPort>, signal: ResetSignal) -> Self {
        Self { port, signal }
    }
}

impl ResetLine for ModemControlLine {
    fn set_level(&mut self, high: bool) -> io::Result<()> {
        debug!("reset line ({}) -> {}", self.signal, if high { "high" } else { "low" });
        match self.signal {
            ResetSignal::Rts => self.port.write_request_to_send(high)?,
            ResetSignal::Dtr => self.port.write_data_terminal_ready(high)?,
            ResetSignal::None => {}
        }
        Ok(())
    }
}

/// For adapters without a wired reset; hard resets become re-initialisation only.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoResetLine;

impl ResetLine for NoResetLine {
    fn set_level(&mut self, high: bool) -> io::Result<()> {
        trace!("no reset line wired, ignoring level {}", high);
        Ok(())
    }
}
