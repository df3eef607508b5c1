//! PD message header decoding
//!
//! Every PD message starts with a 16-bit little-endian header. The header
//! carries the message type, the number of 32-bit data objects that follow
//! and a handful of role/revision bits. Extended messages carry an
//! additional 16-bit extended header in front of their payload.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{DecoderError, Result};

/// Length of the message header in bytes
pub const HEADER_LEN: usize = 2;
/// Length of one data object in bytes
pub const OBJECT_LEN: usize = 4;
/// Length of the extended message header in bytes
pub const EXTENDED_HEADER_LEN: usize = 2;
/// Largest object count the 3-bit header field can express
pub const MAX_OBJECTS: u8 = 7;

/// Generates a message type enum with its code table and display names.
/// Codes missing from the table decode to `Unrecognized(code)`.
macro_rules! message_types {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:literal => $label:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant,)*
            /// Code reserved by the protocol revision we know about
            Unrecognized(u8),
        }

        impl $name {
            pub fn from_code(code: u8) -> Self {
                match code {
                    $($code => $name::$variant,)*
                    other => $name::Unrecognized(other),
                }
            }

            pub fn code(self) -> u8 {
                match self {
                    $($name::$variant => $code,)*
                    $name::Unrecognized(code) => code,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)*
                    $name::Unrecognized(_) => "Unrecognized",
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $name::Unrecognized(code) => write!(f, "Unrecognized(0x{:02X})", code),
                    other => f.write_str(other.name()),
                }
            }
        }
    };
}

message_types! {
    /// Control messages (no data objects)
    ControlMessage {
        GoodCrc = 1 => "GoodCRC",
        GotoMin = 2 => "GotoMin",
        Accept = 3 => "Accept",
        Reject = 4 => "Reject",
        Ping = 5 => "Ping",
        PsRdy = 6 => "PS_RDY",
        GetSourceCap = 7 => "Get_Source_Cap",
        GetSinkCap = 8 => "Get_Sink_Cap",
        DrSwap = 9 => "DR_Swap",
        PrSwap = 10 => "PR_Swap",
        VconnSwap = 11 => "VCONN_Swap",
        Wait = 12 => "Wait",
        SoftReset = 13 => "Soft_Reset",
        DataReset = 14 => "Data_Reset",
        DataResetComplete = 15 => "Data_Reset_Complete",
        NotSupported = 16 => "Not_Supported",
        GetSourceCapExtended = 17 => "Get_Source_Cap_Extended",
        GetStatus = 18 => "Get_Status",
        FrSwap = 19 => "FR_Swap",
        GetPpsStatus = 20 => "Get_PPS_Status",
        GetCountryCodes = 21 => "Get_Country_Codes",
        GetSinkCapExtended = 22 => "Get_Sink_Cap_Extended",
        GetSourceInfo = 23 => "Get_Source_Info",
        GetRevision = 24 => "Get_Revision",
    }
}

message_types! {
    /// Data messages (one or more data objects)
    DataMessage {
        SourceCapabilities = 1 => "SourceCapabilities",
        Request = 2 => "Request",
        Bist = 3 => "BIST",
        SinkCapabilities = 4 => "SinkCapabilities",
        BatteryStatus = 5 => "Battery_Status",
        Alert = 6 => "Alert",
        GetCountryInfo = 7 => "Get_Country_Info",
        EnterUsb = 8 => "Enter_USB",
        EprRequest = 9 => "EPR_Request",
        EprMode = 10 => "EPR_Mode",
        SourceInfo = 11 => "Source_Info",
        Revision = 12 => "Revision",
        VendorDefined = 15 => "Vendor_Defined",
    }
}

message_types! {
    /// Extended messages (extended header plus byte payload)
    ExtendedMessage {
        SourceCapabilitiesExtended = 1 => "Source_Capabilities_Extended",
        Status = 2 => "Status",
        GetBatteryCap = 3 => "Get_Battery_Cap",
        GetBatteryStatus = 4 => "Get_Battery_Status",
        BatteryCapabilities = 5 => "Battery_Capabilities",
        GetManufacturerInfo = 6 => "Get_Manufacturer_Info",
        ManufacturerInfo = 7 => "Manufacturer_Info",
        SecurityRequest = 8 => "Security_Request",
        SecurityResponse = 9 => "Security_Response",
        FirmwareUpdateRequest = 10 => "Firmware_Update_Request",
        FirmwareUpdateResponse = 11 => "Firmware_Update_Response",
        PpsStatus = 12 => "PPS_Status",
        CountryInfo = 13 => "Country_Info",
        CountryCodes = 14 => "Country_Codes",
        SinkCapabilitiesExtended = 15 => "Sink_Capabilities_Extended",
        ExtendedControl = 16 => "Extended_Control",
        EprSourceCapabilities = 17 => "EPR_Source_Capabilities",
        EprSinkCapabilities = 18 => "EPR_Sink_Capabilities",
        VendorDefinedExtended = 19 => "Vendor_Defined_Extended",
    }
}

/// Semantic message type
///
/// The 5-bit type code is interpreted in one of three namespaces: control
/// messages carry no data objects, data messages carry at least one, and
/// extended messages are flagged by the header's extended bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Control(ControlMessage),
    Data(DataMessage),
    Extended(ExtendedMessage),
}

impl MessageType {
    /// Classify a 5-bit type code using the object count and extended flag
    pub fn from_header_bits(code: u8, object_count: u8, extended: bool) -> Self {
        let code = code & 0x1F;
        if extended {
            MessageType::Extended(ExtendedMessage::from_code(code))
        } else if object_count == 0 {
            MessageType::Control(ControlMessage::from_code(code))
        } else {
            MessageType::Data(DataMessage::from_code(code))
        }
    }

    pub fn code(self) -> u8 {
        match self {
            MessageType::Control(t) => t.code(),
            MessageType::Data(t) => t.code(),
            MessageType::Extended(t) => t.code(),
        }
    }

    /// True when the type code is not known for its namespace
    pub fn is_unrecognized(self) -> bool {
        matches!(
            self,
            MessageType::Control(ControlMessage::Unrecognized(_))
                | MessageType::Data(DataMessage::Unrecognized(_))
                | MessageType::Extended(ExtendedMessage::Unrecognized(_))
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Control(t) => write!(f, "{}", t),
            MessageType::Data(t) => write!(f, "{}", t),
            MessageType::Extended(t) => write!(f, "{}", t),
        }
    }
}

/// Specification revision advertised in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecRevision {
    Rev10,
    Rev20,
    Rev30,
    Reserved,
}

impl SpecRevision {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => SpecRevision::Rev10,
            1 => SpecRevision::Rev20,
            2 => SpecRevision::Rev30,
            _ => SpecRevision::Reserved,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            SpecRevision::Rev10 => 0,
            SpecRevision::Rev20 => 1,
            SpecRevision::Rev30 => 2,
            SpecRevision::Reserved => 3,
        }
    }
}

impl fmt::Display for SpecRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecRevision::Rev10 => write!(f, "1.0"),
            SpecRevision::Rev20 => write!(f, "2.0"),
            SpecRevision::Rev30 => write!(f, "3.x"),
            SpecRevision::Reserved => write!(f, "reserved"),
        }
    }
}

/// Port data role (meaningful for SOP packets only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataRole {
    Ufp,
    Dfp,
}

/// Port power role for SOP packets. For SOP'/SOP'' packets the same bit
/// tells whether the message came from a cable plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerRole {
    Sink,
    Source,
}

/// Decoded PD message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub message_type: MessageType,
    pub data_role: DataRole,
    pub spec_revision: SpecRevision,
    pub power_role: PowerRole,
    /// Rolling 3-bit id used for retry detection
    pub message_id: u8,
    pub object_count: u8,
    pub extended: bool,
}

impl Header {
    /// Parse the 16-bit header word
    pub fn from_word(word: u16) -> Self {
        let object_count = ((word >> 12) & 0x07) as u8;
        let extended = word & 0x8000 != 0;
        Self {
            message_type: MessageType::from_header_bits(
                (word & 0x1F) as u8,
                object_count,
                extended,
            ),
            data_role: if word & (1 << 5) != 0 { DataRole::Dfp } else { DataRole::Ufp },
            spec_revision: SpecRevision::from_bits(((word >> 6) & 0x03) as u8),
            power_role: if word & (1 << 8) != 0 { PowerRole::Source } else { PowerRole::Sink },
            message_id: ((word >> 9) & 0x07) as u8,
            object_count,
            extended,
        }
    }

    /// Pack the header back into its 16-bit wire form
    pub fn to_word(&self) -> u16 {
        let mut word = (self.message_type.code() & 0x1F) as u16;
        if self.data_role == DataRole::Dfp {
            word |= 1 << 5;
        }
        word |= (self.spec_revision.bits() as u16) << 6;
        if self.power_role == PowerRole::Source {
            word |= 1 << 8;
        }
        word |= ((self.message_id & 0x07) as u16) << 9;
        word |= ((self.object_count & 0x07) as u16) << 12;
        if self.extended {
            word |= 0x8000;
        }
        word
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        LittleEndian::write_u16(&mut bytes, self.to_word());
        bytes
    }

    /// Total frame length implied by the object count
    pub fn expected_frame_len(&self) -> usize {
        HEADER_LEN + self.object_count as usize * OBJECT_LEN
    }

    /// True for messages sent by a cable plug (SOP'/SOP'' packets only)
    pub fn is_from_cable_plug(&self) -> bool {
        self.power_role == PowerRole::Source
    }
}

/// Extended message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedHeader {
    pub chunked: bool,
    pub chunk_number: u8,
    pub request_chunk: bool,
    /// Total payload size in bytes (across all chunks)
    pub data_size: u16,
}

impl ExtendedHeader {
    pub fn from_word(word: u16) -> Self {
        Self {
            chunked: word & 0x8000 != 0,
            chunk_number: ((word >> 11) & 0x0F) as u8,
            request_chunk: word & (1 << 10) != 0,
            data_size: word & 0x01FF,
        }
    }

    pub fn to_word(&self) -> u16 {
        let mut word = self.data_size & 0x01FF;
        if self.request_chunk {
            word |= 1 << 10;
        }
        word |= ((self.chunk_number & 0x0F) as u16) << 11;
        if self.chunked {
            word |= 0x8000;
        }
        word
    }
}

/// Decode and validate the header of a raw frame
///
/// The declared object count must account for every byte after the header;
/// anything else is a structural inconsistency and the frame is rejected.
/// Unknown type codes are not errors, they decode to `Unrecognized`.
pub fn decode_header(raw: &[u8]) -> Result<Header> {
    if raw.len() < HEADER_LEN {
        return Err(DecoderError::FrameTooShort(raw.len()));
    }

    let header = Header::from_word(LittleEndian::read_u16(&raw[..HEADER_LEN]));
    let expected = header.expected_frame_len();
    if expected != raw.len() {
        return Err(DecoderError::MalformedFrame {
            object_count: header.object_count,
            expected,
            actual: raw.len(),
        });
    }

    Ok(header)
}

/// Read the extended header of an extended message
///
/// Expects a frame already validated by [`decode_header`].
pub fn decode_extended_header(raw: &[u8]) -> Option<ExtendedHeader> {
    let end = HEADER_LEN + EXTENDED_HEADER_LEN;
    if raw.len() < end {
        return None;
    }
    Some(ExtendedHeader::from_word(LittleEndian::read_u16(&raw[HEADER_LEN..end])))
}

/// Iterate over the 32-bit data objects following the header
pub fn data_objects(raw: &[u8]) -> impl Iterator<Item = u32> + '_ {
    raw.get(HEADER_LEN..)
        .unwrap_or(&[])
        .chunks_exact(OBJECT_LEN)
        .map(LittleEndian::read_u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_source_capabilities_header() {
        // Source_Capabilities, DFP, Rev 3.0, Source, id 0, 2 objects
        let header = decode_header(&[0xA1, 0x21, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(header.message_type, MessageType::Data(DataMessage::SourceCapabilities));
        assert_eq!(header.data_role, DataRole::Dfp);
        assert_eq!(header.spec_revision, SpecRevision::Rev30);
        assert_eq!(header.power_role, PowerRole::Source);
        assert_eq!(header.message_id, 0);
        assert_eq!(header.object_count, 2);
        assert!(!header.extended);
    }

    #[test]
    fn test_decode_control_header() {
        // GoodCRC from the sink, message id 3
        let header = decode_header(&0x0681u16.to_le_bytes()).unwrap();
        assert_eq!(header.message_type, MessageType::Control(ControlMessage::GoodCrc));
        assert_eq!(header.message_id, 3);
        assert_eq!(header.power_role, PowerRole::Sink);
        assert_eq!(header.data_role, DataRole::Ufp);
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        // Declares 2 objects, carries 1
        let err = decode_header(&[0xA1, 0x21, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(
            err,
            DecoderError::MalformedFrame { object_count: 2, expected: 10, actual: 6 }
        ));

        // Declares 0 objects, carries trailing bytes
        let err = decode_header(&[0x81, 0x06, 0xFF]).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(decode_header(&[0x81]), Err(DecoderError::FrameTooShort(1))));
        assert!(matches!(decode_header(&[]), Err(DecoderError::FrameTooShort(0))));
    }

    #[test]
    fn test_unknown_codes_are_not_errors() {
        // Control code 0x1F is reserved
        let header = decode_header(&0x009Fu16.to_le_bytes()).unwrap();
        assert_eq!(header.message_type, MessageType::Control(ControlMessage::Unrecognized(0x1F)));
        assert!(header.message_type.is_unrecognized());
        assert_eq!(header.message_type.to_string(), "Unrecognized(0x1F)");

        // Data code 0x0D is reserved
        let mut frame = vec![0x8D, 0x11];
        frame.extend_from_slice(&[0; 4]);
        let header = decode_header(&frame).unwrap();
        assert_eq!(header.message_type, MessageType::Data(DataMessage::Unrecognized(0x0D)));
    }

    #[test]
    fn test_header_word_round_trip() {
        for word in [0x0681u16, 0x21A1, 0x1042, 0x5A8F, 0x9182] {
            assert_eq!(Header::from_word(word).to_word(), word);
        }
    }

    #[test]
    fn test_extended_header() {
        // Status (extended), 2 objects: extended header + 6 payload bytes
        let mut frame = vec![0x82, 0xA1];
        frame.extend_from_slice(&0x8006u16.to_le_bytes());
        frame.extend_from_slice(&[0; 6]);
        let header = decode_header(&frame).unwrap();
        assert_eq!(header.message_type, MessageType::Extended(ExtendedMessage::Status));

        let ext = decode_extended_header(&frame).unwrap();
        assert!(ext.chunked);
        assert_eq!(ext.chunk_number, 0);
        assert_eq!(ext.data_size, 6);
        assert_eq!(ext.to_word(), 0x8006);
    }

    #[test]
    fn test_data_objects_iteration() {
        let frame = [0xA1, 0x21, 0x2C, 0x91, 0x01, 0x08, 0x2C, 0xD1, 0x02, 0x00];
        let words: Vec<u32> = data_objects(&frame).collect();
        assert_eq!(words, vec![0x0801_912C, 0x0002_D12C]);
    }
}
