//! Message Decoding Engine
//!
//! Turns the bytes of one PD frame into a header plus an ordered list of
//! classified data objects. Each object word is classified with the context
//! its message type implies; anomalies are recorded as notes on the decoded
//! message instead of failing the frame. Only structural errors in the
//! header (length mismatch, short frame) reject a frame.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::header::{
    data_objects, decode_extended_header, decode_header, DataMessage, ExtendedHeader, Header,
    MessageType,
};
use crate::negotiation::NegotiationContext;
use crate::objects::{classify_object, DataObject, IdHeaderVdo, ObjectContext, VdmHeader, VdmObject};
use crate::types::{Result, Sop};
use crate::vendors::{standard_sid_name, VendorLookup};

/// Non-fatal decode anomaly attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeNote {
    /// Type code not known for its namespace
    UnrecognizedCode(u8),
    /// Request decoded without matching source capabilities
    AmbiguousRequestContext { object_position: u8 },
    /// Vendor id missing from the lookup table
    UnresolvedVendorId(u16),
    /// Object word rejected by its classifier, kept raw
    InvalidObject {
        index: usize,
        word: u32,
        reason: String,
    },
}

impl fmt::Display for DecodeNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeNote::UnrecognizedCode(code) => write!(f, "unrecognized type code {}", code),
            DecodeNote::AmbiguousRequestContext { object_position } => write!(
                f,
                "no capabilities for request position {}",
                object_position
            ),
            DecodeNote::UnresolvedVendorId(id) => write!(f, "unknown vendor 0x{:04X}", id),
            DecodeNote::InvalidObject {
                index,
                word,
                reason,
            } => write!(f, "object {} (0x{:08X}): {}", index + 1, word, reason),
        }
    }
}

/// A fully decoded PD message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub header: Header,
    /// Present for extended messages
    pub extended_header: Option<ExtendedHeader>,
    pub objects: Vec<DataObject>,
    pub notes: Vec<DecodeNote>,
}

impl DecodedMessage {
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// True when any request in this message was decoded without context
    pub fn is_best_effort(&self) -> bool {
        self.notes
            .iter()
            .any(|note| matches!(note, DecodeNote::AmbiguousRequestContext { .. }))
    }

    /// One-line human readable summary of the payload
    pub fn summary(&self) -> String {
        if !self.objects.is_empty() {
            return self
                .objects
                .iter()
                .map(|object| object.to_string())
                .collect::<Vec<_>>()
                .join(" | ");
        }
        match &self.extended_header {
            Some(ext) if ext.chunked => format!(
                "{} ({} bytes, chunk {})",
                self.header.message_type, ext.data_size, ext.chunk_number
            ),
            Some(ext) => format!("{} ({} bytes)", self.header.message_type, ext.data_size),
            None => self.header.message_type.to_string(),
        }
    }
}

/// Message decoder - classifies the data objects of PD frames
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode one frame
    ///
    /// # Arguments
    /// * `raw` - Header plus data objects as captured
    /// * `sop` - Start-of-packet the frame was received on
    /// * `negotiation` - Last known source capabilities, used for requests
    /// * `vendors` - Vendor id lookup for VDM headers and identity VDOs
    ///
    /// # Returns
    /// * `Err` only for structural header errors (`MalformedFrame`, `FrameTooShort`)
    pub fn decode(
        raw: &[u8],
        sop: Sop,
        negotiation: &NegotiationContext,
        vendors: &dyn VendorLookup,
    ) -> Result<DecodedMessage> {
        let header = decode_header(raw)?;
        let mut message = DecodedMessage {
            header,
            extended_header: None,
            objects: Vec::with_capacity(header.object_count as usize),
            notes: Vec::new(),
        };

        if header.message_type.is_unrecognized() {
            log::debug!(
                "Unrecognized message type code {} ({} objects)",
                header.message_type.code(),
                header.object_count
            );
            message
                .notes
                .push(DecodeNote::UnrecognizedCode(header.message_type.code()));
        }

        let kind = match header.message_type {
            MessageType::Control(_) => return Ok(message),
            MessageType::Extended(_) => {
                // Extended payloads stay raw
                message.extended_header = decode_extended_header(raw);
                return Ok(message);
            }
            MessageType::Data(kind) => kind,
        };

        Self::classify_objects(raw, kind, sop, negotiation, &mut message);
        Self::resolve_vendors(&mut message, vendors);
        Ok(message)
    }

    fn classify_objects(
        raw: &[u8],
        kind: DataMessage,
        sop: Sop,
        negotiation: &NegotiationContext,
        message: &mut DecodedMessage,
    ) {
        let mut vdm_header: Option<VdmHeader> = None;
        let mut id_header: Option<IdHeaderVdo> = None;

        for (index, word) in data_objects(raw).enumerate() {
            let context = match (kind, index) {
                (DataMessage::SourceCapabilities | DataMessage::SinkCapabilities, _) => {
                    ObjectContext::Capability
                }
                (DataMessage::Request, _) | (DataMessage::EprRequest, 0) => {
                    ObjectContext::Request(negotiation)
                }
                (DataMessage::EprRequest, 1) => ObjectContext::Capability,
                (DataMessage::VendorDefined, 0) => ObjectContext::VdmHeader,
                (DataMessage::VendorDefined, position) => match vdm_header.as_ref() {
                    Some(header) => ObjectContext::Vdo {
                        header,
                        position,
                        sop,
                        id_header: id_header.as_ref(),
                    },
                    None => ObjectContext::Opaque,
                },
                _ => ObjectContext::Opaque,
            };

            let object = match classify_object(word, &context) {
                Ok(object) => object,
                Err(e) => {
                    log::debug!("Object {} of {} kept raw: {}", index + 1, kind, e);
                    message.notes.push(DecodeNote::InvalidObject {
                        index,
                        word,
                        reason: e.to_string(),
                    });
                    DataObject::Unrecognized(word)
                }
            };
            log::trace!("Object {}: {}", index + 1, object);

            match &object {
                DataObject::Request(rdo) if rdo.best_effort => {
                    message.notes.push(DecodeNote::AmbiguousRequestContext {
                        object_position: rdo.object_position,
                    });
                }
                DataObject::Vdm(VdmObject::Header(header)) => vdm_header = Some(header.clone()),
                DataObject::Vdm(VdmObject::IdHeader(id)) => id_header = Some(id.clone()),
                _ => {}
            }
            message.objects.push(object);
        }
    }

    fn resolve_vendors(message: &mut DecodedMessage, vendors: &dyn VendorLookup) {
        let mut unresolved = Vec::new();
        for object in &mut message.objects {
            let label = match object {
                DataObject::Vdm(VdmObject::Header(header)) => header.vendor_mut(),
                DataObject::Vdm(VdmObject::IdHeader(id)) => &mut id.vendor,
                _ => continue,
            };
            if standard_sid_name(label.id).is_some() {
                continue;
            }
            if !label.resolve(vendors) && !unresolved.contains(&label.id) {
                unresolved.push(label.id);
            }
        }
        message
            .notes
            .extend(unresolved.into_iter().map(DecodeNote::UnresolvedVendorId));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{ControlMessage, ExtendedMessage};
    use crate::objects::{FixedSupplyPdo, ProductType, RequestDataObject};
    use crate::vendors::VendorTable;

    fn frame(header: u16, objects: &[u32]) -> Vec<u8> {
        let mut bytes = header.to_le_bytes().to_vec();
        for word in objects {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    /// Decode on SOP with no capabilities and an empty vendor table
    fn decode_plain(bytes: &[u8]) -> Result<DecodedMessage> {
        MessageDecoder::decode(bytes, Sop::Sop, &NegotiationContext::new(), &VendorTable::new())
    }

    fn source_caps() -> Vec<u8> {
        frame(
            0x21A1,
            &[
                FixedSupplyPdo::new(5000, 3000).to_word(),
                FixedSupplyPdo::new(9000, 3000).to_word(),
            ],
        )
    }

    #[test]
    fn test_decode_source_capabilities() {
        let message = decode_plain(&source_caps()).unwrap();
        assert_eq!(
            message.message_type(),
            MessageType::Data(DataMessage::SourceCapabilities)
        );
        assert_eq!(message.objects.len(), 2);
        assert!(message.notes.is_empty());
        assert_eq!(message.summary(), "Fixed 5.00V 3.00A | Fixed 9.00V 3.00A");
    }

    #[test]
    fn test_request_uses_negotiation_context() {
        let vendors = VendorTable::new();
        let caps = decode_plain(&source_caps()).unwrap();
        let negotiation = NegotiationContext::from_capabilities(&caps.objects);

        let request = frame(0x1082, &[RequestDataObject::fixed(2, 3000, 3000).to_word()]);
        let message = MessageDecoder::decode(&request, Sop::Sop, &negotiation, &vendors).unwrap();
        let rdo = message.objects[0].as_request().unwrap();
        assert_eq!(rdo.target_voltage_mv(), Some(9000));
        assert!(!message.is_best_effort());

        let blind = decode_plain(&request).unwrap();
        assert!(blind.is_best_effort());
        assert_eq!(
            blind.notes,
            vec![DecodeNote::AmbiguousRequestContext { object_position: 2 }]
        );
    }

    #[test]
    fn test_invalid_object_is_kept_raw() {
        let request = frame(0x1082, &[0x0000_012C]);
        let message = decode_plain(&request).unwrap();
        assert_eq!(message.objects, vec![DataObject::Unrecognized(0x0000_012C)]);
        assert!(matches!(
            message.notes[0],
            DecodeNote::InvalidObject { index: 0, .. }
        ));
    }

    #[test]
    fn test_control_message_has_no_objects() {
        let message = decode_plain(&[0x46, 0x05]).unwrap();
        assert_eq!(message.message_type(), MessageType::Control(ControlMessage::PsRdy));
        assert_eq!(message.summary(), "PS_RDY");
    }

    #[test]
    fn test_unrecognized_control_code_is_noted() {
        let message = decode_plain(&[0x1F, 0x00]).unwrap();
        assert!(message.message_type().is_unrecognized());
        assert_eq!(message.notes, vec![DecodeNote::UnrecognizedCode(0x1F)]);
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let mut bytes = source_caps();
        bytes.truncate(6);
        let err = decode_plain(&bytes).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_extended_message_keeps_payload_raw() {
        // Status, extended, 2 data objects worth of payload
        let bytes = frame(0xA182, &[0x0000_8006, 0]);
        let message = decode_plain(&bytes).unwrap();
        assert_eq!(
            message.message_type(),
            MessageType::Extended(ExtendedMessage::Status)
        );
        assert!(message.objects.is_empty());
        assert_eq!(message.extended_header.unwrap().data_size, 6);
    }

    #[test]
    fn test_cable_identity_with_vendor_lookup() {
        let vendors: VendorTable = [(0x2B89, "Anker")].into_iter().collect();
        // Vendor_Defined from the cable plug, 5 objects
        let bytes = frame(
            0x514F,
            &[
                0xFF00_A041,
                3 << 27 | 0x2B89,
                0,
                0x0001_0100,
                2 << 18 | 1 << 5,
            ],
        );
        let message =
            MessageDecoder::decode(&bytes, Sop::SopPrime, &NegotiationContext::new(), &vendors)
                .unwrap();
        assert!(message.notes.is_empty());
        let Some(VdmObject::IdHeader(id)) = message.objects[1].as_vdm() else {
            panic!("expected ID header");
        };
        assert_eq!(id.product_type, ProductType::PassiveCable);
        assert_eq!(id.vendor.to_string(), "Anker (0x2B89)");
        assert!(matches!(
            message.objects[4],
            DataObject::Vdm(VdmObject::PassiveCable(_))
        ));
    }

    #[test]
    fn test_unknown_vendor_is_noted_not_failed() {
        let bytes = frame(0x114F, &[0x1D5C_0001]);
        let message = decode_plain(&bytes).unwrap();
        assert_eq!(message.notes, vec![DecodeNote::UnresolvedVendorId(0x1D5C)]);
        assert_eq!(message.summary(), "UVDM 0x1D5C 0x0001");
    }
}
