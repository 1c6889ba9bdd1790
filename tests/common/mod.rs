#![allow(dead_code)]

use apsystems_bridge::coordinator::{Coordinator, Phase};
use apsystems_bridge::persistence::{MemoryStore, PreferenceStore};
use apsystems_bridge::prelude::*;
use apsystems_bridge::telemetry::{Publication, TelemetrySink};
use apsystems_bridge::zigbee::decoder::{self, Field, Reading, Limits};
use apsystems_bridge::zigbee::transport::{ResetLine, Transport};

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

pub const ECU: &str = "D8A3011B9780";
pub const SERIALS: [&str; 3] = ["408000158215", "408000158216", "702000012345"];

pub const PING_REPLY: &str = "FE02610179071C";
pub const HEALTH_REPLY: &str = "FE0E670000FFFF80971B01A3D800000709001F";
pub const INIT_REPLY: &str = "FE0166050062";
pub const ACK: &str = "FE0164010064";

const PAIR_PREFIX: &str = "24020FFFFFFFFFFFFFFFFF14FFFF14";

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn ecu() -> EcuAddress {
    EcuAddress::from_str(ECU).unwrap()
}

pub fn serial(index: usize) -> Serial {
    Serial::from_str(SERIALS[index]).unwrap()
}

pub fn pair_id(id: &str) -> PairId {
    PairId::from_str(id).unwrap()
}

// FakeRadio {{{
/// What the coordinator answers. `None` leaves the request unanswered.
#[derive(Clone, Debug)]
pub struct RadioScript {
    pub ping: Option<String>,
    pub health: Option<String>,
    pub init: Option<String>,
    pub normal: Option<String>,
    pub reboot: Option<String>,
    /// serial -> pair id handed out while pairing
    pub pair_ids: HashMap<String, String>,
    /// pair id -> poll reply
    pub polls: HashMap<String, String>,
}

impl Default for RadioScript {
    fn default() -> Self {
        Self {
            ping: Some(PING_REPLY.to_string()),
            health: Some(HEALTH_REPLY.to_string()),
            init: Some(INIT_REPLY.to_string()),
            normal: Some(ACK.to_string()),
            reboot: Some(ACK.to_string()),
            pair_ids: HashMap::new(),
            polls: HashMap::new(),
        }
    }
}

impl RadioScript {
    fn answer(&self, payload: &str) -> Option<String> {
        if payload == "2101" {
            return self.ping.clone();
        }
        if payload == "2700" {
            return self.health.clone();
        }
        if let Some(rest) = payload.strip_prefix(PAIR_PREFIX) {
            let answer = self
                .pair_ids
                .iter()
                .find(|(serial, _)| rest.contains(serial.as_str()))
                .map(|(serial, id)| pair_reply(serial, id));
            return Some(answer.unwrap_or_else(|| ACK.to_string()));
        }
        if payload.starts_with("2401FFFF") {
            return self.normal.clone();
        }
        if payload.starts_with("2401") {
            let id = &payload[4..8];
            if payload.contains("FBFB06C1") {
                return self.reboot.clone();
            }
            return self.polls.get(id).cloned();
        }
        self.init.clone()
    }
}

/// A pairing answer: the serial echoed back followed by the new id.
pub fn pair_reply(serial: &str, id: &str) -> String {
    let body = format!("FE0164010064FE1F4481000000000000{}{}0000", serial, id);
    format!("{}{}", body, "0".repeat(140 - body.len()))
}

#[derive(Debug, Default)]
pub struct FakeRadio {
    pub script: RadioScript,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    /// Payloads written, without framing.
    pub sent: Vec<String>,
}

impl FakeRadio {
    pub fn new(script: RadioScript) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn sent_starting_with(&self, prefix: &str) -> Vec<&String> {
        self.sent.iter().filter(|p| p.starts_with(prefix)).collect()
    }
}

impl Transport for FakeRadio {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.rx.len())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        self.rx
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "nothing to read"))
    }

    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.tx.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let wire = std::mem::take(&mut self.tx);
        assert!(wire.len() >= 5, "short frame {:02X?}", wire);
        assert_eq!(wire[0], 0xFE);
        let payload = hex::encode_upper(&wire[2..wire.len() - 1]);

        if let Some(reply) = self.script.answer(&payload) {
            self.rx.extend(hex::decode(reply).unwrap());
        }
        self.sent.push(payload);
        Ok(())
    }
} // }}}

/// Remembers every level driven onto the reset pin.
#[derive(Clone, Debug, Default)]
pub struct RecordingResetLine {
    pub levels: Arc<Mutex<Vec<bool>>>,
}

impl RecordingResetLine {
    pub fn levels(&self) -> Vec<bool> {
        self.levels.lock().unwrap().clone()
    }

    pub fn pulses(&self) -> usize {
        self.levels().iter().filter(|high| !**high).count()
    }
}

impl ResetLine for RecordingResetLine {
    fn set_level(&mut self, high: bool) -> io::Result<()> {
        self.levels.lock().unwrap().push(high);
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    pub published: Arc<Mutex<Vec<Publication>>>,
}

impl RecordingSink {
    pub fn published(&self) -> Vec<Publication> {
        self.published.lock().unwrap().clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn publish(&mut self, publication: &Publication) -> Result<()> {
        self.published.lock().unwrap().push(publication.clone());
        Ok(())
    }
}

/// A store the test keeps a handle on after handing it to the coordinator.
#[derive(Clone, Debug, Default)]
pub struct SharedStore {
    pub inner: Arc<Mutex<MemoryStore>>,
}

impl PreferenceStore for SharedStore {
    fn load(&self, key: u32) -> Result<Option<Vec<u8>>> {
        self.inner.lock().unwrap().load(key)
    }

    fn save(&mut self, key: u32, blob: &[u8]) -> Result<()> {
        self.inner.lock().unwrap().save(key, blob)
    }
}

// PollFrame {{{
/// Builds a poll reply carrying the given readings for one variant.
#[derive(Clone, Debug)]
pub struct PollFrame {
    variant: Variant,
    tail: String,
    data: String,
}

fn put(target: &mut String, field: Field, raw: u64) {
    let text = format!("{:0width$X}", raw, width = field.width);
    assert_eq!(text.len(), field.width, "{} does not fit {:?}", raw, field);
    target.replace_range(field.offset..field.offset + field.width, &text);
}

fn put_reading(target: &mut String, reading: Reading, value: f64) {
    match reading {
        Reading::Linear { field, slope, bias } => {
            put(target, field, ((value - bias) / slope).round() as u64)
        }
        Reading::Reciprocal { field, numerator } => {
            put(target, field, (numerator / value).round() as u64)
        }
        Reading::Packed {
            coarse,
            shift,
            fine,
            scale,
        } => {
            let total = (value / scale).round() as u64;
            put(target, coarse, total / shift);
            put(target, fine, total % shift);
        }
    }
}

impl PollFrame {
    pub fn new(variant: Variant) -> Self {
        Self {
            variant,
            tail: "0".repeat(decoder::DATA_OFFSET),
            data: "0".repeat(192),
        }
        .ac_voltage(230.0)
        .frequency(50.0)
        .temperature(30.0)
        .signal_quality(80.0)
    }

    pub fn ac_voltage(mut self, volts: f64) -> Self {
        put_reading(&mut self.data, self.variant.layout().ac_voltage, volts);
        self
    }

    pub fn frequency(mut self, hz: f64) -> Self {
        put_reading(&mut self.data, self.variant.layout().ac_frequency, hz);
        self
    }

    pub fn temperature(mut self, celsius: f64) -> Self {
        put_reading(&mut self.data, self.variant.layout().temperature, celsius);
        self
    }

    pub fn signal_quality(mut self, percent: f64) -> Self {
        put_reading(&mut self.tail, decoder::SIGNAL_QUALITY, percent);
        self
    }

    pub fn timestamp(mut self, seconds: u32) -> Self {
        put(&mut self.data, self.variant.layout().timestamp, u64::from(seconds));
        self
    }

    pub fn dc(mut self, channel: usize, volts: f64, amps: f64) -> Self {
        let layout = self.variant.layout();
        put_reading(&mut self.data, layout.dc_voltage[channel].unwrap(), volts);
        put_reading(&mut self.data, layout.dc_current[channel].unwrap(), amps);
        self
    }

    pub fn energy(mut self, channel: usize, watt_hours: f64) -> Self {
        let counter = self.variant.layout().energy;
        put(
            &mut self.data,
            counter.field(channel),
            (watt_hours / counter.wh_per_count).round() as u64,
        );
        self
    }

    pub fn to_hex(&self) -> String {
        let message = format!("44810000{}{}", self.tail, self.data);
        format!("FE0164010064FE03448000CDFE{:02X}{}", message.len() / 2 - 2, message)
    }
} // }}}

pub type TestCoordinator = Coordinator<FakeRadio, RecordingResetLine>;

pub struct Factory;

impl Factory {
    pub fn coordinator(
        inverters: Vec<Inverter>,
        script: RadioScript,
    ) -> (TestCoordinator, RecordingResetLine) {
        common_setup();
        let reset = RecordingResetLine::default();
        let coordinator =
            Coordinator::new(FakeRadio::new(script), reset.clone(), inverters, Limits::default());
        (coordinator, reset)
    }

    pub fn yc600(index: usize, id: Option<&str>) -> Inverter {
        Inverter::new(serial(index), Variant::Yc600).with_pair_id(id.map(pair_id))
    }

    pub fn qs1(index: usize, id: Option<&str>) -> Inverter {
        Inverter::new(serial(index), Variant::Qs1).with_pair_id(id.map(pair_id))
    }

    pub fn ds3(index: usize, id: Option<&str>) -> Inverter {
        Inverter::new(serial(index), Variant::Ds3).with_pair_id(id.map(pair_id))
    }

    /// Soft restart and run to idle.
    pub fn idle_coordinator(
        inverters: Vec<Inverter>,
        script: RadioScript,
    ) -> (TestCoordinator, RecordingResetLine) {
        let (mut coordinator, reset) = Self::coordinator(inverters, script);
        coordinator.restart(ecu(), false);
        run_until_phase(&mut coordinator, Phase::Idle, 10);
        (coordinator, reset)
    }
}

/// Tick until `done` holds, returning the number of ticks taken.
pub fn run_until<F>(coordinator: &mut TestCoordinator, limit: usize, mut done: F) -> usize
where
    F: FnMut(&TestCoordinator) -> bool,
{
    for ticks in 1..=limit {
        coordinator.tick();
        if done(coordinator) {
            return ticks;
        }
    }
    panic!("condition not reached in {} ticks, phase {}", limit, coordinator.phase());
}

pub fn run_until_phase(coordinator: &mut TestCoordinator, phase: Phase, limit: usize) -> usize {
    run_until(coordinator, limit, |c| c.phase() == phase)
}

pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {} within {} of {}",
        actual,
        tolerance,
        expected
    );
}
