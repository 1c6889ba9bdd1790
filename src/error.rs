use thiserror::Error;

/// Problems building an outgoing command.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum FrameError {
    #[error("payload {0:?} is shorter than two bytes")]
    TooShort(String),
    #[error("payload is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Why a poll reply produced no usable telemetry.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum DecodeError {
    #[error("no answer to poll request")]
    NoAnswer,
    #[error("reply is missing {0}")]
    MissingMarker(&'static str),
    #[error("reply is too short ({len} hex chars)")]
    TooShort { len: usize },
    #[error("{field} out of range: {value:.2} (limit {limit})")]
    Rejected {
        field: &'static str,
        value: f64,
        limit: f64,
    },
}

impl DecodeError {
    /// The frame was complete and well-formed but failed the validity gate.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Failure outcomes of a cooperative engine step.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum EngineError {
    #[error("no response from coordinator")]
    NoResponse,
    #[error("reply did not contain {expected}")]
    ProtocolMismatch { expected: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("inverter {0} has no pair id")]
    Unpaired(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A pair/poll/reboot request the engine refused.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RequestError {
    #[error("coordinator busy, retry once idle")]
    Busy,
    #[error("coordinator not started")]
    Stopped,
    #[error("no inverter with serial {0} is configured")]
    UnknownInverter(String),
    #[error("inverter {0} is not paired")]
    NotPaired(String),
    #[error("no eligible inverter, skipped")]
    NothingEligible,
}
