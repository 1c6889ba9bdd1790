//! Poll reply decoding.
//!
//! Readings sit at fixed hex-character offsets inside the inverter payload,
//! which starts `DATA_OFFSET` characters after the incoming-message header.
//! Offsets and scaling differ per hardware variant and live in `Layout`
//! tables below.

use crate::prelude::*;
use crate::inverter::MAX_CHANNELS;
use crate::telemetry::TOTAL;
use crate::zigbee::{command, frame, reader::RawFrame};

use serde::Deserialize;

/// Shortest poll reply that can carry a full payload, in hex characters.
pub const MIN_POLL_REPLY: usize = 223;
/// Offset of the inverter payload inside the incoming message.
pub const DATA_OFFSET: usize = 30;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Field {
    pub offset: usize,
    pub width: usize,
}

impl Field {
    pub fn read(&self, data: &str) -> Result<u64, DecodeError> {
        frame::hex_field(data, self.offset, self.width)
            .ok_or(DecodeError::TooShort { len: data.len() })
    }
}

const fn field(offset: usize, width: usize) -> Field {
    Field { offset, width }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reading {
    /// `raw * slope + bias`
    Linear { field: Field, slope: f64, bias: f64 },
    /// `numerator / raw`
    Reciprocal { field: Field, numerator: f64 },
    /// `(coarse * shift + fine) * scale`, two nibble-aligned fields.
    Packed {
        coarse: Field,
        shift: u64,
        fine: Field,
        scale: f64,
    },
}

impl Reading {
    pub fn read(&self, data: &str) -> Result<f64, DecodeError> {
        Ok(match *self {
            Self::Linear { field, slope, bias } => field.read(data)? as f64 * slope + bias,
            Self::Reciprocal { field, numerator } => numerator / field.read(data)? as f64,
            Self::Packed {
                coarse,
                shift,
                fine,
                scale,
            } => (coarse.read(data)? * shift + fine.read(data)?) as f64 * scale,
        })
    }
}

const fn linear(offset: usize, width: usize, slope: f64, bias: f64) -> Reading {
    Reading::Linear {
        field: field(offset, width),
        slope,
        bias,
    }
}

const VOLT_SCALE: f64 = 82.5 / 4096.0;
const AMP_SCALE: f64 = 27.5 / 4096.0;

const fn packed_volts(coarse: usize, fine: usize) -> Option<Reading> {
    Some(Reading::Packed {
        coarse: field(coarse, 2),
        shift: 16,
        fine: field(fine, 1),
        scale: VOLT_SCALE,
    })
}

const fn packed_amps(coarse: usize, fine: usize) -> Option<Reading> {
    Some(Reading::Packed {
        coarse: field(coarse, 1),
        shift: 256,
        fine: field(fine, 2),
        scale: AMP_SCALE,
    })
}

/// Per-channel since-reset energy counters, `stride` characters apart.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnergyCounter {
    pub offset: usize,
    pub stride: usize,
    pub width: usize,
    pub wh_per_count: f64,
}

impl EnergyCounter {
    pub fn field(&self, channel: usize) -> Field {
        field(self.offset + channel * self.stride, self.width)
    }

    pub fn read(&self, channel: usize, data: &str) -> Result<f64, DecodeError> {
        Ok(self.field(channel).read(data)? as f64 * self.wh_per_count)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Layout {
    pub ac_voltage: Reading,
    pub ac_frequency: Reading,
    pub temperature: Reading,
    pub timestamp: Field,
    pub dc_voltage: [Option<Reading>; MAX_CHANNELS],
    pub dc_current: [Option<Reading>; MAX_CHANNELS],
    pub energy: EnergyCounter,
}

/// Measured from the start of the message tail, not the payload.
pub const SIGNAL_QUALITY: Reading = linear(14, 2, 100.0 / 255.0, 0.0);

const YC600: Layout = Layout {
    ac_voltage: linear(56, 4, 1.0 / 5.3108, 0.0),
    ac_frequency: Reading::Reciprocal {
        field: field(24, 6),
        numerator: 50_000_000.0,
    },
    temperature: linear(20, 4, 0.2752, -258.7),
    timestamp: field(34, 4),
    dc_voltage: [packed_volts(48, 46), packed_volts(54, 52), None, None],
    dc_current: [packed_amps(47, 44), packed_amps(53, 50), None, None],
    energy: EnergyCounter {
        offset: 74,
        stride: 10,
        width: 6,
        wh_per_count: 8.311 / 3600.0,
    },
};

const QS1: Layout = Layout {
    timestamp: field(60, 4),
    dc_voltage: [
        packed_volts(48, 46),
        packed_volts(54, 52),
        packed_volts(42, 40),
        packed_volts(36, 34),
    ],
    dc_current: [
        packed_amps(47, 44),
        packed_amps(53, 50),
        packed_amps(41, 38),
        packed_amps(35, 32),
    ],
    ..YC600
};

const DS3: Layout = Layout {
    ac_voltage: linear(68, 4, 1.0 / 3.8, 0.0),
    ac_frequency: linear(72, 4, 0.01, 0.0),
    temperature: linear(96, 4, 0.0198, -23.84),
    timestamp: field(76, 4),
    dc_voltage: [
        Some(linear(52, 4, 1.0 / 48.0, 0.0)),
        Some(linear(56, 4, 1.0 / 48.0, 0.0)),
        None,
        None,
    ],
    dc_current: [
        Some(linear(60, 4, 0.0125, 0.0)),
        Some(linear(64, 4, 0.0125, 0.0)),
        None,
        None,
    ],
    energy: EnergyCounter {
        offset: 100,
        stride: 8,
        width: 8,
        wh_per_count: 1.66 / 100_000.0,
    },
};

static YC600_LAYOUT: Layout = YC600;
static QS1_LAYOUT: Layout = QS1;
static DS3_LAYOUT: Layout = DS3;

pub fn layout(variant: Variant) -> &'static Layout {
    match variant {
        Variant::Yc600 => &YC600_LAYOUT,
        Variant::Qs1 => &QS1_LAYOUT,
        Variant::Ds3 => &DS3_LAYOUT,
    }
}

// Limits {{{
/// Bounds a decoded reading must respect to be stored.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    pub yc600_max_power: f64,
    pub qs1_max_power: f64,
    pub ds3_max_power: f64,
    pub min_frequency: f64,
    pub max_frequency: f64,
    pub min_ac_voltage: f64,
    pub max_ac_voltage: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            yc600_max_power: 450.0,
            qs1_max_power: 480.0,
            ds3_max_power: 750.0,
            min_frequency: 30.0,
            max_frequency: 80.0,
            min_ac_voltage: 80.0,
            max_ac_voltage: 290.0,
        }
    }
}

fn at_most(field: &'static str, value: f64, limit: f64) -> Result<(), DecodeError> {
    if value > limit {
        return Err(DecodeError::Rejected { field, value, limit });
    }
    Ok(())
}

fn at_least(field: &'static str, value: f64, limit: f64) -> Result<(), DecodeError> {
    if value < limit {
        return Err(DecodeError::Rejected { field, value, limit });
    }
    Ok(())
}

impl Limits {
    /// NaN passes every comparison, as an unknown value is not out of range.
    pub fn check(&self, t: &TelemetrySnapshot, inverter: &Inverter) -> Result<(), DecodeError> {
        let max_power = inverter.variant().max_power(self);
        for ch in inverter.connected_channels() {
            at_most("dc_power", t.dc_power[ch], max_power)?;
            at_most("ac_power", t.ac_power[ch], max_power)?;
            at_least("dc_power", t.dc_power[ch], 0.0)?;
            at_least("ac_power", t.ac_power[ch], 0.0)?;
            at_least("dc_current", t.dc_current[ch], 0.0)?;
            at_least("dc_voltage", t.dc_voltage[ch], 0.0)?;
        }
        at_least("ac_frequency", t.ac_frequency, self.min_frequency)?;
        at_most("ac_frequency", t.ac_frequency, self.max_frequency)?;
        at_least("ac_voltage", t.ac_voltage, self.min_ac_voltage)?;
        at_most("ac_voltage", t.ac_voltage, self.max_ac_voltage)?;
        at_least("signal_quality", t.signal_quality, 0.0)?;
        at_most("signal_quality", t.signal_quality, 100.0)?;
        Ok(())
    }
} // }}}

/// Energy produced by one channel since the previous poll.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnergyStep {
    pub increase: f64,
    pub today: f64,
    pub ac_power: f64,
}

/// A timestamp that went backwards, or no previous poll, means the
/// inverter restarted its counters: the whole counter value is new energy.
pub fn energy_step(
    previous: &TelemetrySnapshot,
    timestamp: u32,
    channel: usize,
    since_reset: f64,
) -> EnergyStep {
    let restarted = timestamp < previous.poll_timestamp || previous.poll_timestamp == 0;
    let (base_time, base_energy) = if restarted {
        (0, 0.0)
    } else {
        (previous.poll_timestamp, previous.energy_since_reset[channel])
    };

    let increase = since_reset - base_energy;
    let hours = f64::from(timestamp - base_time) / 3600.0;
    EnergyStep {
        increase,
        today: previous.energy_today[channel] + increase,
        ac_power: increase / hours,
    }
}

/// Decode a poll reply against the inverter's previous reading.
pub fn decode(
    reply: &RawFrame,
    inverter: &Inverter,
    limits: &Limits,
) -> Result<TelemetrySnapshot, DecodeError> {
    if reply.is_empty() {
        return Err(DecodeError::NoAnswer);
    }
    for (marker, name) in [
        (command::AF_DATA_REQUEST_OK, "AF_DATA_REQUEST success"),
        (command::AF_DATA_CONFIRM_OK, "AF_DATA_CONFIRM success"),
        (command::AF_INCOMING_MSG, "AF_INCOMING_MSG"),
    ] {
        if !reply.contains(marker) {
            return Err(DecodeError::MissingMarker(name));
        }
    }
    if reply.hex.len() < MIN_POLL_REPLY {
        return Err(DecodeError::TooShort { len: reply.hex.len() });
    }

    let tail = frame::after_marker(&reply.hex, command::AF_INCOMING_DATA)
        .ok_or(DecodeError::MissingMarker("AF_INCOMING_MSG header"))?;
    let data = tail
        .get(DATA_OFFSET..)
        .ok_or(DecodeError::TooShort { len: reply.hex.len() })?;

    let layout = inverter.variant().layout();
    let previous = inverter.telemetry();

    let mut next = TelemetrySnapshot {
        signal_quality: SIGNAL_QUALITY.read(tail)?,
        ac_voltage: layout.ac_voltage.read(data)?,
        ac_frequency: layout.ac_frequency.read(data)?,
        temperature: layout.temperature.read(data)?,
        poll_timestamp: layout.timestamp.read(data)? as u32,
        ..Default::default()
    };

    for ch in inverter.connected_channels() {
        if let Some(reading) = layout.dc_voltage[ch] {
            next.dc_voltage[ch] = reading.read(data)?;
        }
        if let Some(reading) = layout.dc_current[ch] {
            next.dc_current[ch] = reading.read(data)?;
        }

        let since_reset = layout.energy.read(ch, data)?;
        let step = energy_step(previous, next.poll_timestamp, ch, since_reset);
        next.energy_since_reset[ch] = since_reset;
        next.energy_today[ch] = step.today;
        next.ac_power[ch] = step.ac_power;
        next.dc_power[ch] = next.dc_voltage[ch] * next.dc_current[ch];

        next.dc_voltage[TOTAL] += next.dc_voltage[ch];
        next.dc_current[TOTAL] += next.dc_current[ch];
        next.dc_power[TOTAL] += next.dc_power[ch];
        next.ac_power[TOTAL] += next.ac_power[ch];
        next.energy_since_reset[TOTAL] += since_reset;
        next.energy_today[TOTAL] += step.today;
    }

    limits.check(&next, inverter)?;
    Ok(next)
}
