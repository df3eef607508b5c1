//! Capture file formats
//!
//! A capture source yields the events a live sniffer would deliver: frames,
//! standalone measurement samples and operator control actions. Each format
//! implements an iterator over [`CaptureEvent`]s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::types::{MeasurementSample, RawFrame, Result, Timestamp};

pub mod jsonl;

pub use jsonl::JsonlReplay;

/// Operator action recorded in a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAction::Start => write!(f, "start"),
            ControlAction::Pause => write!(f, "pause"),
            ControlAction::Resume => write!(f, "resume"),
            ControlAction::Stop => write!(f, "stop"),
        }
    }
}

/// One event from a capture source
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Frame(RawFrame),
    Measurement(MeasurementSample),
    Control {
        timestamp: Timestamp,
        action: ControlAction,
    },
}

impl CaptureEvent {
    pub fn timestamp(&self) -> Timestamp {
        match self {
            CaptureEvent::Frame(frame) => frame.timestamp,
            CaptureEvent::Measurement(sample) => sample.timestamp,
            CaptureEvent::Control { timestamp, .. } => *timestamp,
        }
    }
}

/// Common trait for capture file readers
pub trait CaptureSource: Iterator<Item = Result<CaptureEvent>> + Sized {
    /// Open a capture file and return an iterator over its events
    fn open(path: &Path) -> Result<Self>;
}

/// Keep only the frames of an event stream
pub fn frames<I>(events: I) -> impl Iterator<Item = Result<RawFrame>>
where
    I: Iterator<Item = Result<CaptureEvent>>,
{
    events.filter_map(|event| match event {
        Ok(CaptureEvent::Frame(frame)) => Some(Ok(frame)),
        Ok(_) => None,
        Err(e) => Some(Err(e)),
    })
}
