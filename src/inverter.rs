use crate::prelude::*;
use crate::zigbee::decoder::{Layout, Limits};

use serde::{Deserialize, Serialize, Serializer};

pub const MAX_CHANNELS: usize = 4;

// fixed-width uppercase hex identifiers {{{
macro_rules! hex_identifier {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn as_str(&self) -> &str {
                std::str::from_utf8(&self.0).unwrap_or_default()
            }
        }

        impl std::str::FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.len() != $len || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
                    bail!("{} must be exactly {} hex digits, got {:?}", stringify!($name), $len, s);
                }
                let mut r = [0u8; $len];
                r.copy_from_slice(s.to_ascii_uppercase().as_bytes());
                Ok(Self(r))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }
    };
}

hex_identifier!(Serial, 12);
hex_identifier!(PairId, 4);
hex_identifier!(EcuAddress, 12);
// }}}

impl EcuAddress {
    /// Byte-reversed form, as the radio reports its IEEE address.
    pub fn reversed(&self) -> String {
        self.0
            .chunks(2)
            .rev()
            .map(|pair| String::from_utf8_lossy(pair).into_owned())
            .collect()
    }

    pub fn short_address(&self) -> &str {
        &self.as_str()[0..4]
    }

    pub fn short_address_swapped(&self) -> String {
        let s = self.as_str();
        format!("{}{}", &s[2..4], &s[0..2])
    }
}

// Variant {{{
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Yc600,
    Qs1,
    Ds3,
}

impl Variant {
    pub fn channel_count(&self) -> usize {
        match self {
            Self::Qs1 => 4,
            Self::Yc600 | Self::Ds3 => 2,
        }
    }

    pub fn max_power(&self, limits: &Limits) -> f64 {
        match self {
            Self::Yc600 => limits.yc600_max_power,
            Self::Qs1 => limits.qs1_max_power,
            Self::Ds3 => limits.ds3_max_power,
        }
    }

    pub fn layout(&self) -> &'static Layout {
        crate::zigbee::decoder::layout(*self)
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Yc600 => "YC600",
            Self::Qs1 => "QS1",
            Self::Ds3 => "DS3",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for Variant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yc600" => Ok(Self::Yc600),
            "qs1" => Ok(Self::Qs1),
            "ds3" => Ok(Self::Ds3),
            _ => bail!("unknown inverter type {}", s),
        }
    }
} // }}}

/// One microinverter behind the coordinator and everything learned about it.
#[derive(Clone, Debug)]
pub struct Inverter {
    serial: Serial,
    variant: Variant,
    panels: [bool; MAX_CHANNELS],
    pair_id: Option<PairId>,
    failed_polls: u32,
    telemetry: TelemetrySnapshot,
}

impl Inverter {
    pub fn new(serial: Serial, variant: Variant) -> Self {
        let mut panels = [false; MAX_CHANNELS];
        for connected in panels.iter_mut().take(variant.channel_count()) {
            *connected = true;
        }
        Self {
            serial,
            variant,
            panels,
            pair_id: None,
            failed_polls: 0,
            telemetry: TelemetrySnapshot::default(),
        }
    }

    pub fn with_panels(mut self, connected: &[bool]) -> Self {
        self.panels = [false; MAX_CHANNELS];
        for (slot, value) in self.panels.iter_mut().zip(connected) {
            *slot = *value;
        }
        self
    }

    pub fn with_pair_id(mut self, pair_id: Option<PairId>) -> Self {
        self.pair_id = pair_id;
        self
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Connected and supported by the hardware.
    pub fn is_panel_connected(&self, channel: usize) -> bool {
        channel < self.variant.channel_count() && self.panels.get(channel).copied().unwrap_or(false)
    }

    pub fn connected_channels(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CHANNELS).filter(|ch| self.is_panel_connected(*ch))
    }

    pub fn pair_id(&self) -> Option<PairId> {
        self.pair_id
    }

    pub fn is_paired(&self) -> bool {
        self.pair_id.is_some()
    }

    pub fn set_pair_id(&mut self, pair_id: Option<PairId>) {
        self.pair_id = pair_id;
    }

    pub fn failed_polls(&self) -> u32 {
        self.failed_polls
    }

    pub fn telemetry(&self) -> &TelemetrySnapshot {
        &self.telemetry
    }

    /// Replaces the stored reading as a whole.
    pub fn set_telemetry(&mut self, telemetry: TelemetrySnapshot) {
        self.telemetry = telemetry;
    }

    pub fn record_poll_success(&mut self) {
        self.failed_polls = 0;
    }

    /// Returns true when this failure crosses the invalidation threshold.
    pub fn record_poll_failure(&mut self) -> bool {
        self.failed_polls += 1;
        self.failed_polls == crate::telemetry::INVALIDATE_AFTER_FAILURES
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_validated_and_uppercased() {
        assert_eq!(Serial::from_str("40800015821a").unwrap().as_str(), "40800015821A");
        assert!(Serial::from_str("4080001582").is_err());
        assert!(PairId::from_str("10XZ").is_err());
        assert_eq!(PairId::from_str("103a").unwrap().to_string(), "103A");
    }

    #[test]
    fn ecu_address_forms() {
        let ecu = EcuAddress::from_str("D8A3011B9780").unwrap();
        assert_eq!(ecu.reversed(), "80971B01A3D8");
        assert_eq!(ecu.short_address(), "D8A3");
        assert_eq!(ecu.short_address_swapped(), "A3D8");
    }

    #[test]
    fn panels_beyond_the_hardware_are_ignored() {
        let serial = Serial::from_str("408000158215").unwrap();
        let yc600 = Inverter::new(serial, Variant::Yc600).with_panels(&[true, true, true, true]);
        assert_eq!(yc600.connected_channels().collect::<Vec<_>>(), vec![0, 1]);

        let qs1 = Inverter::new(serial, Variant::Qs1).with_panels(&[true, false, true]);
        assert_eq!(qs1.connected_channels().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn tenth_failure_crosses_threshold_once() {
        let mut inv = Inverter::new(Serial::from_str("408000158215").unwrap(), Variant::Ds3);
        let crossings: Vec<bool> = (0..12).map(|_| inv.record_poll_failure()).collect();
        assert_eq!(crossings.iter().filter(|c| **c).count(), 1);
        assert!(crossings[9]);
        inv.record_poll_success();
        assert_eq!(inv.failed_polls(), 0);
    }
}
