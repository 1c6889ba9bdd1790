use crate::prelude::*;
use crate::inverter::MAX_CHANNELS;

use serde::Serialize;

/// Consecutive failed polls after which live readings become unknown.
pub const INVALIDATE_AFTER_FAILURES: u32 = 10;

/// Index of the aggregate in every per-channel array.
pub const TOTAL: usize = MAX_CHANNELS;

/// One decoded poll. Per-channel arrays hold channels 0..4 and, at
/// `TOTAL`, the sum over connected channels. NaN means "unknown".
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub poll_timestamp: u32,
    pub ac_voltage: f64,
    pub ac_frequency: f64,
    pub temperature: f64,
    pub signal_quality: f64,
    pub dc_voltage: [f64; MAX_CHANNELS + 1],
    pub dc_current: [f64; MAX_CHANNELS + 1],
    pub dc_power: [f64; MAX_CHANNELS + 1],
    pub ac_power: [f64; MAX_CHANNELS + 1],
    pub energy_since_reset: [f64; MAX_CHANNELS + 1],
    pub energy_today: [f64; MAX_CHANNELS + 1],
}

impl TelemetrySnapshot {
    /// Copy with every live reading unknown; timestamp and energy counters kept.
    pub fn invalidated(&self) -> Self {
        Self {
            ac_voltage: f64::NAN,
            ac_frequency: f64::NAN,
            temperature: f64::NAN,
            signal_quality: f64::NAN,
            dc_voltage: [f64::NAN; MAX_CHANNELS + 1],
            dc_current: [f64::NAN; MAX_CHANNELS + 1],
            dc_power: [f64::NAN; MAX_CHANNELS + 1],
            ac_power: [f64::NAN; MAX_CHANNELS + 1],
            ..self.clone()
        }
    }

    pub fn with_energy_today_cleared(&self) -> Self {
        Self {
            energy_today: [0.0; MAX_CHANNELS + 1],
            ..self.clone()
        }
    }

    fn grid(&self) -> [f64; 4] {
        [self.ac_voltage, self.ac_frequency, self.temperature, self.signal_quality]
    }

    /// Bitwise equality, so NaN fields compare equal to themselves.
    pub fn same_as(&self, other: &Self) -> bool {
        fn bits(values: &[f64]) -> Vec<u64> {
            values.iter().map(|v| v.to_bits()).collect()
        }
        self.poll_timestamp == other.poll_timestamp
            && bits(&self.grid()) == bits(&other.grid())
            && bits(&self.dc_voltage) == bits(&other.dc_voltage)
            && bits(&self.dc_current) == bits(&other.dc_current)
            && bits(&self.dc_power) == bits(&other.dc_power)
            && bits(&self.ac_power) == bits(&other.ac_power)
            && bits(&self.energy_since_reset) == bits(&other.energy_since_reset)
            && bits(&self.energy_today) == bits(&other.energy_today)
    }
}

// Publication {{{
fn known(value: f64) -> Option<f64> {
    (!value.is_nan()).then_some(value)
}

fn nan_is_zero(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PanelReading {
    pub channel: usize,
    pub energy: Option<f64>,
    pub ac_power: f64,
    pub dc_power: f64,
    pub dc_voltage: Option<f64>,
    pub dc_current: Option<f64>,
}

/// What a sink should publish for one inverter: connected panels only,
/// power fields read 0 when unknown, other unknowns stay `None`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Publication {
    pub serial: Serial,
    pub variant: Variant,
    pub pair_id: Option<PairId>,
    pub energy: Option<f64>,
    pub ac_power: f64,
    pub dc_power: f64,
    pub temperature: Option<f64>,
    pub ac_voltage: Option<f64>,
    pub ac_frequency: Option<f64>,
    pub signal_quality: Option<f64>,
    pub panels: Vec<PanelReading>,
}

impl Publication {
    pub fn from_inverter(inverter: &Inverter) -> Self {
        let t = inverter.telemetry();
        let panels = inverter
            .connected_channels()
            .map(|ch| PanelReading {
                channel: ch,
                energy: known(t.energy_today[ch]),
                ac_power: nan_is_zero(t.ac_power[ch]),
                dc_power: nan_is_zero(t.dc_power[ch]),
                dc_voltage: known(t.dc_voltage[ch]),
                dc_current: known(t.dc_current[ch]),
            })
            .collect();

        Self {
            serial: inverter.serial(),
            variant: inverter.variant(),
            pair_id: inverter.pair_id(),
            energy: known(t.energy_today[TOTAL]),
            ac_power: nan_is_zero(t.ac_power[TOTAL]),
            dc_power: nan_is_zero(t.dc_power[TOTAL]),
            temperature: known(t.temperature),
            ac_voltage: known(t.ac_voltage),
            ac_frequency: known(t.ac_frequency),
            signal_quality: known(t.signal_quality),
            panels,
        }
    }
} // }}}

/// Receives every stored change to an inverter's telemetry.
pub trait TelemetrySink {
    fn publish(&mut self, publication: &Publication) -> Result<()>;
}

/// Writes one summary line per publication to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

fn show(value: Option<f64>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| format!("{:.2}", v))
}

impl TelemetrySink for LogSink {
    fn publish(&mut self, p: &Publication) -> Result<()> {
        info!(
            "{} {}: {:.1} W ac, {:.1} W dc, today {} Wh, {} V {} Hz, {} C, signal {}%",
            p.variant,
            p.serial,
            p.ac_power,
            p.dc_power,
            show(p.energy),
            show(p.ac_voltage),
            show(p.ac_frequency),
            show(p.temperature),
            show(p.signal_quality),
        );
        for panel in &p.panels {
            debug!(
                "  panel {}: {:.1} W ac, {:.1} W dc, {} V, {} A, today {} Wh",
                panel.channel,
                panel.ac_power,
                panel.dc_power,
                show(panel.dc_voltage),
                show(panel.dc_current),
                show(panel.energy),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inverter() -> Inverter {
        Inverter::new(Serial::from_str("408000158215").unwrap(), Variant::Qs1)
            .with_panels(&[true, false, true, true])
    }

    #[test]
    fn invalidation_keeps_energy() {
        let mut t = TelemetrySnapshot::default();
        t.poll_timestamp = 1234;
        t.energy_today = [1.0, 2.0, 3.0, 4.0, 10.0];
        t.energy_since_reset = [5.0, 6.0, 7.0, 8.0, 26.0];
        t.ac_voltage = 230.0;

        let bad = t.invalidated();
        assert!(bad.ac_voltage.is_nan());
        assert!(bad.ac_frequency.is_nan());
        assert!(bad.ac_power.iter().all(|v| v.is_nan()));
        assert_eq!(bad.energy_today, t.energy_today);
        assert_eq!(bad.energy_since_reset, t.energy_since_reset);
        assert_eq!(bad.poll_timestamp, 1234);
        assert!(bad.same_as(&bad.clone()));
        assert!(!bad.same_as(&t));
    }

    #[test]
    fn publication_substitutes_zero_for_unknown_power_only() {
        let mut inv = inverter();
        inv.set_telemetry(TelemetrySnapshot::default().invalidated());
        let p = Publication::from_inverter(&inv);

        assert_eq!(p.ac_power, 0.0);
        assert_eq!(p.dc_power, 0.0);
        assert_eq!(p.ac_voltage, None);
        assert_eq!(p.signal_quality, None);
        assert_eq!(p.energy, Some(0.0));
        assert_eq!(p.panels.iter().map(|p| p.channel).collect::<Vec<_>>(), vec![0, 2, 3]);
        assert!(p.panels.iter().all(|p| p.ac_power == 0.0 && p.dc_voltage.is_none()));
    }

    #[test]
    fn publication_serializes_unknown_as_null() {
        let mut inv = inverter();
        inv.set_telemetry(TelemetrySnapshot::default().invalidated());
        let json = serde_json::to_value(Publication::from_inverter(&inv)).unwrap();
        assert_eq!(json["serial"], "408000158215");
        assert_eq!(json["variant"], "qs1");
        assert!(json["temperature"].is_null());
        assert_eq!(json["ac_power"], 0.0);
    }
}
