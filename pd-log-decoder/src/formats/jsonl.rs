//! JSON-lines replay files
//!
//! One capture event per line, tagged by `kind`:
//!
//! ```text
//! {"kind":"control","timestamp":"2024-05-01T10:00:00Z","action":"start"}
//! {"kind":"frame","timestamp":"2024-05-01T10:00:00.010Z","direction":"source_to_sink","bytes":"a1 21 2c 91 01 08 2c d1 02 00","voltage_mV":5020}
//! {"kind":"measurement","timestamp":"2024-05-01T10:00:00.200Z","voltage_mV":9010,"current_mA":1520}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{CaptureEvent, CaptureSource, ControlAction};
use crate::types::{
    DecoderError, Direction, Measurement, MeasurementSample, RawFrame, Result, Sop, Timestamp,
};

/// One line of a replay file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ReplayEntry {
    Frame {
        timestamp: Timestamp,
        direction: Direction,
        #[serde(default)]
        sop: Sop,
        /// Hex string, whitespace allowed between bytes
        bytes: String,
        #[serde(default, rename = "voltage_mV", alias = "voltage_mv")]
        voltage_mv: Option<u32>,
        #[serde(default, rename = "current_mA", alias = "current_ma")]
        current_ma: Option<u32>,
    },
    Measurement {
        timestamp: Timestamp,
        #[serde(default, rename = "voltage_mV", alias = "voltage_mv")]
        voltage_mv: Option<u32>,
        #[serde(default, rename = "current_mA", alias = "current_ma")]
        current_ma: Option<u32>,
    },
    Control {
        timestamp: Timestamp,
        action: ControlAction,
    },
}

impl ReplayEntry {
    fn into_event(self) -> std::result::Result<CaptureEvent, String> {
        let event = match self {
            ReplayEntry::Frame {
                timestamp,
                direction,
                sop,
                bytes,
                voltage_mv,
                current_ma,
            } => {
                let mut frame =
                    RawFrame::new(timestamp, direction, parse_hex(&bytes)?).with_sop(sop);
                if voltage_mv.is_some() || current_ma.is_some() {
                    frame = frame.with_measurement(voltage_mv, current_ma);
                }
                CaptureEvent::Frame(frame)
            }
            ReplayEntry::Measurement {
                timestamp,
                voltage_mv,
                current_ma,
            } => CaptureEvent::Measurement(MeasurementSample {
                timestamp,
                measurement: Measurement::new(voltage_mv, current_ma),
            }),
            ReplayEntry::Control { timestamp, action } => {
                CaptureEvent::Control { timestamp, action }
            }
        };
        Ok(event)
    }
}

fn parse_hex(text: &str) -> std::result::Result<Vec<u8>, String> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = digits.strip_prefix("0x").unwrap_or(&digits);
    hex::decode(digits).map_err(|e| format!("invalid frame bytes: {}", e))
}

/// Replay file reader
pub struct JsonlReplay<R: BufRead> {
    lines: std::io::Lines<R>,
    line_number: usize,
}

impl<R: BufRead> JsonlReplay<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_number: 0,
        }
    }

    fn parse_line(&self, line: &str) -> Result<CaptureEvent> {
        let entry: ReplayEntry = serde_json::from_str(line).map_err(|e| DecoderError::ReplayParse {
            line: self.line_number,
            reason: e.to_string(),
        })?;
        entry.into_event().map_err(|reason| DecoderError::ReplayParse {
            line: self.line_number,
            reason,
        })
    }
}

impl CaptureSource for JsonlReplay<BufReader<File>> {
    fn open(path: &Path) -> Result<Self> {
        log::info!("Opening replay file: {:?}", path);
        let file = File::open(path)?;
        Ok(Self::from_reader(BufReader::new(file)))
    }
}

impl<R: BufRead> Iterator for JsonlReplay<R> {
    type Item = Result<CaptureEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_number += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return Some(self.parse_line(trimmed));
        }
    }
}
