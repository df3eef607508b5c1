//! Request Data Objects
//!
//! The RDO layout depends on the PDO the request points at, so the
//! classifier needs the negotiation context. Without one the
//! Fixed/Variable layout is assumed and the object is marked best-effort.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::pdo::{amps, volts, watts, PdoKind};
use crate::negotiation::{AdvertisedPdo, NegotiationContext};
use crate::types::{DecoderError, Result};

/// What the sink asks for, in the units of the referenced PDO kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestOperation {
    /// Fixed and Variable supplies, 10 mA resolution. With give-back set the
    /// second field is the minimum operating current.
    Current {
        operating_ma: u32,
        max_operating_ma: u32,
    },
    /// Battery supplies, 250 mW resolution
    Power {
        operating_mw: u32,
        max_operating_mw: u32,
    },
    /// Programmable supplies: 20 mV output voltage, 50 mA operating current
    Programmable { output_mv: u32, operating_ma: u32 },
}

impl RequestOperation {
    /// Operating current in mA, when the request is expressed in current
    pub fn operating_current_ma(&self) -> Option<u32> {
        match self {
            RequestOperation::Current { operating_ma, .. } => Some(*operating_ma),
            RequestOperation::Programmable { operating_ma, .. } => Some(*operating_ma),
            RequestOperation::Power { .. } => None,
        }
    }
}

/// Request Data Object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDataObject {
    /// 1-based index into the advertised PDO list
    pub object_position: u8,
    pub give_back: bool,
    pub capability_mismatch: bool,
    pub usb_communications_capable: bool,
    pub no_usb_suspend: bool,
    pub unchunked_extended_messages: bool,
    pub epr_mode_capable: bool,
    pub operation: RequestOperation,
    /// The advertised PDO at `object_position`, when known
    pub target: Option<AdvertisedPdo>,
    /// Layout was guessed because no matching capabilities were known
    pub best_effort: bool,
}

impl RequestDataObject {
    /// A Fixed/Variable request
    pub fn fixed(object_position: u8, operating_ma: u32, max_operating_ma: u32) -> Self {
        Self::with_operation(
            object_position,
            RequestOperation::Current {
                operating_ma,
                max_operating_ma,
            },
        )
    }

    /// A PPS request
    pub fn programmable(object_position: u8, output_mv: u32, operating_ma: u32) -> Self {
        Self::with_operation(
            object_position,
            RequestOperation::Programmable {
                output_mv,
                operating_ma,
            },
        )
    }

    fn with_operation(object_position: u8, operation: RequestOperation) -> Self {
        Self {
            object_position,
            give_back: false,
            capability_mismatch: false,
            usb_communications_capable: false,
            no_usb_suspend: false,
            unchunked_extended_messages: false,
            epr_mode_capable: false,
            operation,
            target: None,
            best_effort: false,
        }
    }

    /// Decode using the layout for a given PDO kind
    pub fn from_word(word: u32, kind: PdoKind) -> Self {
        let operation = match kind {
            PdoKind::Battery => RequestOperation::Power {
                operating_mw: ((word >> 10) & 0x3FF) * 250,
                max_operating_mw: (word & 0x3FF) * 250,
            },
            PdoKind::Pps => RequestOperation::Programmable {
                output_mv: ((word >> 9) & 0xFFF) * 20,
                operating_ma: (word & 0x7F) * 50,
            },
            PdoKind::Fixed | PdoKind::Variable | PdoKind::ReservedAugmented => {
                RequestOperation::Current {
                    operating_ma: ((word >> 10) & 0x3FF) * 10,
                    max_operating_ma: (word & 0x3FF) * 10,
                }
            }
        };
        Self {
            object_position: (word >> 28) as u8,
            // bit 27 is reserved in the PPS layout
            give_back: kind != PdoKind::Pps && word & (1 << 27) != 0,
            capability_mismatch: word & (1 << 26) != 0,
            usb_communications_capable: word & (1 << 25) != 0,
            no_usb_suspend: word & (1 << 24) != 0,
            unchunked_extended_messages: word & (1 << 23) != 0,
            epr_mode_capable: word & (1 << 22) != 0,
            operation,
            target: None,
            best_effort: false,
        }
    }

    pub fn to_word(&self) -> u32 {
        let mut word = ((self.object_position & 0x0F) as u32) << 28;
        let flags = [
            (self.give_back, 27),
            (self.capability_mismatch, 26),
            (self.usb_communications_capable, 25),
            (self.no_usb_suspend, 24),
            (self.unchunked_extended_messages, 23),
            (self.epr_mode_capable, 22),
        ];
        for (set, n) in flags {
            if set {
                word |= 1 << n;
            }
        }
        word |= match self.operation {
            RequestOperation::Current {
                operating_ma,
                max_operating_ma,
            } => ((operating_ma / 10) & 0x3FF) << 10 | ((max_operating_ma / 10) & 0x3FF),
            RequestOperation::Power {
                operating_mw,
                max_operating_mw,
            } => ((operating_mw / 250) & 0x3FF) << 10 | ((max_operating_mw / 250) & 0x3FF),
            RequestOperation::Programmable {
                output_mv,
                operating_ma,
            } => ((output_mv / 20) & 0xFFF) << 9 | ((operating_ma / 50) & 0x7F),
        };
        word
    }

    /// Voltage of the referenced PDO, when it is a fixed supply
    pub fn target_voltage_mv(&self) -> Option<u32> {
        self.target.and_then(|pdo| pdo.voltage_mv())
    }
}

/// Classify a request word against the last known source capabilities
pub fn classify_request(word: u32, context: &NegotiationContext) -> Result<RequestDataObject> {
    let position = (word >> 28) as u8;
    if position == 0 {
        return Err(DecoderError::InvalidObject {
            word,
            reason: "request object position 0 is reserved".to_string(),
        });
    }

    let target = context.pdo_at(position).copied();
    let known_kind = context.expected_kind(position);

    let mut rdo = RequestDataObject::from_word(word, known_kind.unwrap_or(PdoKind::Fixed));
    rdo.target = target;
    rdo.best_effort = known_kind.is_none();
    if rdo.best_effort {
        log::trace!(
            "No capability context for request position {}, using Fixed/Variable layout",
            position
        );
    }
    Ok(rdo)
}

impl fmt::Display for RequestDataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Request #{} ", self.object_position)?;
        match self.operation {
            RequestOperation::Current {
                operating_ma,
                max_operating_ma,
            } => {
                let limit = if self.give_back { "min" } else { "max" };
                write!(f, "{} ({} {})", amps(operating_ma), limit, amps(max_operating_ma))?
            }
            RequestOperation::Power {
                operating_mw,
                max_operating_mw,
            } => write!(f, "{} (max {})", watts(operating_mw), watts(max_operating_mw))?,
            RequestOperation::Programmable {
                output_mv,
                operating_ma,
            } => write!(f, "{} {}", volts(output_mv), amps(operating_ma))?,
        }
        if let Some(target) = &self.target {
            match target.voltage_mv() {
                Some(mv) => write!(f, " -> {} {}", target.kind, volts(mv))?,
                None => write!(
                    f,
                    " -> {} {}-{}",
                    target.kind,
                    volts(target.min_voltage_mv),
                    volts(target.max_voltage_mv)
                )?,
            }
        }
        if self.capability_mismatch {
            write!(f, " [mismatch]")?;
        }
        if self.best_effort {
            write!(f, " [best-effort]")?;
        }
        Ok(())
    }
}
