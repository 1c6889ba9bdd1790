pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::str::FromStr;

pub use crate::config::Config;
pub use crate::error::{DecodeError, EngineError, FrameError, RequestError};
pub use crate::inverter::{EcuAddress, Inverter, PairId, Serial, Variant};
pub use crate::telemetry::TelemetrySnapshot;
pub use crate::zigbee::Progress;
