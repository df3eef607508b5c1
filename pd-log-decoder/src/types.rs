//! Core types for the PD log decoder library
//!
//! This module defines the raw inputs the decoder consumes (frames and
//! measurement samples as delivered by a frame source) and the error types
//! shared by every layer of the library.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the decoder
pub type Timestamp = DateTime<Utc>;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Direction of a PD message on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    SourceToSink,
    SinkToSource,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::SourceToSink => write!(f, "source_to_sink"),
            Direction::SinkToSource => write!(f, "sink_to_source"),
        }
    }
}

/// Start-of-packet marker identifying the addressed port partner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sop {
    /// Port partner
    #[default]
    Sop,
    /// Cable plug nearest to the source (SOP')
    SopPrime,
    /// Far-end cable plug (SOP'')
    SopDoublePrime,
    /// SOP' debug
    SopPrimeDebug,
    /// SOP'' debug
    SopDoublePrimeDebug,
}

impl Sop {
    /// True for packets addressed to a cable plug
    pub fn is_cable_plug(self) -> bool {
        matches!(self, Sop::SopPrime | Sop::SopDoublePrime)
    }
}

impl fmt::Display for Sop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sop::Sop => write!(f, "SOP"),
            Sop::SopPrime => write!(f, "SOP'"),
            Sop::SopDoublePrime => write!(f, "SOP''"),
            Sop::SopPrimeDebug => write!(f, "SOP'_Debug"),
            Sop::SopDoublePrimeDebug => write!(f, "SOP''_Debug"),
        }
    }
}

/// A VBUS measurement reported alongside captured traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Measurement {
    /// Bus voltage in millivolts
    pub voltage_mv: Option<u32>,
    /// Bus current in milliamps (absolute value)
    pub current_ma: Option<u32>,
}

impl Measurement {
    pub fn new(voltage_mv: Option<u32>, current_ma: Option<u32>) -> Self {
        Self {
            voltage_mv,
            current_ma,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.voltage_mv.is_none() && self.current_ma.is_none()
    }

    /// Power in milliwatts, when both axes are known
    pub fn power_mw(&self) -> Option<u64> {
        match (self.voltage_mv, self.current_ma) {
            (Some(v), Some(i)) => Some(v as u64 * i as u64 / 1000),
            _ => None,
        }
    }

    /// Overlay the axes present in `newer` onto this measurement
    pub fn merge(&mut self, newer: &Measurement) {
        if newer.voltage_mv.is_some() {
            self.voltage_mv = newer.voltage_mv;
        }
        if newer.current_ma.is_some() {
            self.current_ma = newer.current_ma;
        }
    }
}

/// A measurement sample with the time it was taken
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSample {
    pub timestamp: Timestamp,
    #[serde(flatten)]
    pub measurement: Measurement,
}

/// Raw PD frame as delivered by a frame source
///
/// This is a single PD message as sniffed from the CC line, before any
/// header or data object interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    /// Absolute capture time
    pub timestamp: Timestamp,
    /// Which side transmitted the message
    pub direction: Direction,
    /// Start-of-packet marker
    pub sop: Sop,
    /// Header plus data objects, little-endian as on the wire
    pub bytes: Vec<u8>,
    /// Measurement reported together with this frame (if any)
    pub measurement: Option<Measurement>,
}

impl RawFrame {
    pub fn new(timestamp: Timestamp, direction: Direction, bytes: Vec<u8>) -> Self {
        Self {
            timestamp,
            direction,
            sop: Sop::Sop,
            bytes,
            measurement: None,
        }
    }

    pub fn with_sop(mut self, sop: Sop) -> Self {
        self.sop = sop;
        self
    }

    pub fn with_measurement(mut self, voltage_mv: Option<u32>, current_ma: Option<u32>) -> Self {
        self.measurement = Some(Measurement::new(voltage_mv, current_ma));
        self
    }

    /// The measurement carried by this frame as a timestamped sample
    pub fn sample(&self) -> Option<MeasurementSample> {
        self.measurement
            .filter(|m| !m.is_empty())
            .map(|measurement| MeasurementSample {
                timestamp: self.timestamp,
                measurement,
            })
    }
}

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Malformed frame: expected {expected} bytes for {object_count} data objects, got {actual}")]
    MalformedFrame {
        object_count: u8,
        expected: usize,
        actual: usize,
    },

    #[error("Frame too short: {0} bytes (header needs 2)")]
    FrameTooShort(usize),

    #[error("Invalid data object 0x{word:08X}: {reason}")]
    InvalidObject { word: u32, reason: String },

    #[error("Failed to parse replay file at line {line}: {reason}")]
    ReplayParse { line: usize, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DecoderError {
    /// True for the structural errors that cause a frame to be discarded
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            DecoderError::MalformedFrame { .. } | DecoderError::FrameTooShort(_)
        )
    }
}

/// Errors returned by the session control surface
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("capture session is already running")]
    AlreadyRunning,

    #[error("capture session is not running")]
    NotRunning,

    #[error("capture worker has shut down")]
    WorkerDisconnected,
}
