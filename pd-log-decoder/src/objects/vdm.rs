//! Vendor Defined Messages
//!
//! The first object of a Vendor_Defined message is the VDM header. Bit 15
//! tells structured from unstructured VDMs. Only Discover Identity ACK
//! responses get their VDOs decoded; every other command keeps header
//! fields only, since those payloads are mode or vendor specific.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::pdo::volts;
use crate::types::Sop;
use crate::vendors::{standard_sid_name, VendorLabel};

#[inline]
fn bit(word: u32, n: u32) -> bool {
    word & (1 << n) != 0
}

#[inline]
fn field(word: u32, shift: u32, width: u32) -> u8 {
    ((word >> shift) & ((1 << width) - 1)) as u8
}

/// Structured VDM command type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    Request,
    Ack,
    Nak,
    Busy,
}

impl CommandType {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => CommandType::Request,
            1 => CommandType::Ack,
            2 => CommandType::Nak,
            _ => CommandType::Busy,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandType::Request => write!(f, "REQ"),
            CommandType::Ack => write!(f, "ACK"),
            CommandType::Nak => write!(f, "NAK"),
            CommandType::Busy => write!(f, "BUSY"),
        }
    }
}

/// Structured VDM command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VdmCommand {
    DiscoverIdentity,
    DiscoverSvids,
    DiscoverModes,
    EnterMode,
    ExitMode,
    Attention,
    /// Commands 16..31 are defined by the SVID owner
    SvidSpecific(u8),
    Reserved(u8),
}

impl VdmCommand {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x1F {
            1 => VdmCommand::DiscoverIdentity,
            2 => VdmCommand::DiscoverSvids,
            3 => VdmCommand::DiscoverModes,
            4 => VdmCommand::EnterMode,
            5 => VdmCommand::ExitMode,
            6 => VdmCommand::Attention,
            code @ 16..=31 => VdmCommand::SvidSpecific(code),
            code => VdmCommand::Reserved(code),
        }
    }
}

impl fmt::Display for VdmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VdmCommand::DiscoverIdentity => write!(f, "Discover Identity"),
            VdmCommand::DiscoverSvids => write!(f, "Discover SVIDs"),
            VdmCommand::DiscoverModes => write!(f, "Discover Modes"),
            VdmCommand::EnterMode => write!(f, "Enter Mode"),
            VdmCommand::ExitMode => write!(f, "Exit Mode"),
            VdmCommand::Attention => write!(f, "Attention"),
            VdmCommand::SvidSpecific(code) => write!(f, "SVID Command {}", code),
            VdmCommand::Reserved(code) => write!(f, "Reserved Command {}", code),
        }
    }
}

/// Structured VDM header fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredVdmHeader {
    pub svid: VendorLabel,
    pub version_major: u8,
    pub version_minor: u8,
    pub object_position: u8,
    pub command_type: CommandType,
    pub command: VdmCommand,
}

/// VDM header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VdmHeader {
    Structured(StructuredVdmHeader),
    Unstructured { vendor: VendorLabel, payload: u16 },
}

impl VdmHeader {
    pub fn from_word(word: u32) -> Self {
        let id = (word >> 16) as u16;
        if bit(word, 15) {
            VdmHeader::Structured(StructuredVdmHeader {
                svid: VendorLabel::unresolved(id),
                version_major: field(word, 13, 2),
                version_minor: field(word, 11, 2),
                object_position: field(word, 8, 3),
                command_type: CommandType::from_bits(field(word, 6, 2)),
                command: VdmCommand::from_bits(field(word, 0, 5)),
            })
        } else {
            VdmHeader::Unstructured {
                vendor: VendorLabel::unresolved(id),
                payload: (word & 0x7FFF) as u16,
            }
        }
    }

    /// SVID for structured VDMs, vendor id for unstructured ones
    pub fn vendor(&self) -> &VendorLabel {
        match self {
            VdmHeader::Structured(header) => &header.svid,
            VdmHeader::Unstructured { vendor, .. } => vendor,
        }
    }

    pub fn vendor_mut(&mut self) -> &mut VendorLabel {
        match self {
            VdmHeader::Structured(header) => &mut header.svid,
            VdmHeader::Unstructured { vendor, .. } => vendor,
        }
    }

    /// True for a Discover Identity ACK, the only response decoded in full
    pub fn is_identity_response(&self) -> bool {
        matches!(
            self,
            VdmHeader::Structured(StructuredVdmHeader {
                command: VdmCommand::DiscoverIdentity,
                command_type: CommandType::Ack,
                ..
            })
        )
    }
}

impl fmt::Display for VdmHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VdmHeader::Structured(header) => {
                write!(f, "SVDM {} {} ", header.command, header.command_type)?;
                match standard_sid_name(header.svid.id) {
                    Some(name) => write!(f, "{}", name),
                    None => write!(f, "SVID {}", header.svid),
                }
            }
            VdmHeader::Unstructured { vendor, payload } => {
                write!(f, "UVDM {} 0x{:04X}", vendor, payload)
            }
        }
    }
}

/// Product type reported in the ID Header (UFP or cable plug, by SOP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    NotSpecified,
    Hub,
    Peripheral,
    PowerSinkDevice,
    PassiveCable,
    ActiveCable,
    VconnPoweredDevice,
    Reserved(u8),
}

impl ProductType {
    fn decode(bits: u8, sop: Sop) -> Self {
        match (sop.is_cable_plug(), bits) {
            (_, 0) => ProductType::NotSpecified,
            (true, 3) => ProductType::PassiveCable,
            (true, 4) => ProductType::ActiveCable,
            (true, 6) => ProductType::VconnPoweredDevice,
            (false, 1) => ProductType::Hub,
            (false, 2) => ProductType::Peripheral,
            (false, 3) => ProductType::PowerSinkDevice,
            (_, other) => ProductType::Reserved(other),
        }
    }

    pub fn is_cable(self) -> bool {
        matches!(
            self,
            ProductType::PassiveCable | ProductType::ActiveCable | ProductType::VconnPoweredDevice
        )
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductType::NotSpecified => write!(f, "Not Specified"),
            ProductType::Hub => write!(f, "PDUSB Hub"),
            ProductType::Peripheral => write!(f, "PDUSB Peripheral"),
            ProductType::PowerSinkDevice => write!(f, "PSD"),
            ProductType::PassiveCable => write!(f, "Passive Cable"),
            ProductType::ActiveCable => write!(f, "Active Cable"),
            ProductType::VconnPoweredDevice => write!(f, "VPD"),
            ProductType::Reserved(code) => write!(f, "Reserved({})", code),
        }
    }
}

/// DFP product type reported in the ID Header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DfpProductType {
    NotSpecified,
    Hub,
    Host,
    PowerBrick,
    Reserved(u8),
}

impl DfpProductType {
    fn decode(bits: u8) -> Self {
        match bits {
            0 => DfpProductType::NotSpecified,
            1 => DfpProductType::Hub,
            2 => DfpProductType::Host,
            3 => DfpProductType::PowerBrick,
            other => DfpProductType::Reserved(other),
        }
    }
}

/// Connector type reported in the ID Header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorType {
    NotSpecified,
    Receptacle,
    Plug,
    Reserved,
}

/// ID Header VDO
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdHeaderVdo {
    pub usb_host_capable: bool,
    pub usb_device_capable: bool,
    pub product_type: ProductType,
    pub modal_operation: bool,
    pub dfp_product_type: DfpProductType,
    pub connector_type: ConnectorType,
    pub vendor: VendorLabel,
}

impl IdHeaderVdo {
    pub fn from_word(word: u32, sop: Sop) -> Self {
        Self {
            usb_host_capable: bit(word, 31),
            usb_device_capable: bit(word, 30),
            product_type: ProductType::decode(field(word, 27, 3), sop),
            modal_operation: bit(word, 26),
            dfp_product_type: DfpProductType::decode(field(word, 23, 3)),
            connector_type: match field(word, 21, 2) {
                0 => ConnectorType::NotSpecified,
                2 => ConnectorType::Receptacle,
                3 => ConnectorType::Plug,
                _ => ConnectorType::Reserved,
            },
            vendor: VendorLabel::unresolved(word as u16),
        }
    }
}

/// Cert Stat VDO: the XID assigned by USB-IF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertStatVdo {
    pub xid: u32,
}

/// Product VDO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVdo {
    pub product_id: u16,
    pub bcd_device: u16,
}

impl ProductVdo {
    pub fn from_word(word: u32) -> Self {
        Self {
            product_id: (word >> 16) as u16,
            bcd_device: word as u16,
        }
    }
}

/// Cable plug connector on the far end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CableConnector {
    TypeC,
    Captive,
    Reserved(u8),
}

/// Cable current handling capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CableCurrent {
    ThreeAmps,
    FiveAmps,
    Reserved(u8),
}

impl CableCurrent {
    pub fn max_ma(self) -> Option<u32> {
        match self {
            CableCurrent::ThreeAmps => Some(3000),
            CableCurrent::FiveAmps => Some(5000),
            CableCurrent::Reserved(_) => None,
        }
    }
}

/// Highest USB signaling speed supported by the cable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UsbSpeed {
    Usb20,
    Usb32Gen1,
    Usb32Gen2,
    Usb4Gen3,
    Usb4Gen4,
    Reserved(u8),
}

impl UsbSpeed {
    fn decode(bits: u8) -> Self {
        match bits {
            0 => UsbSpeed::Usb20,
            1 => UsbSpeed::Usb32Gen1,
            2 => UsbSpeed::Usb32Gen2,
            3 => UsbSpeed::Usb4Gen3,
            4 => UsbSpeed::Usb4Gen4,
            other => UsbSpeed::Reserved(other),
        }
    }
}

impl fmt::Display for UsbSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbSpeed::Usb20 => write!(f, "USB 2.0"),
            UsbSpeed::Usb32Gen1 => write!(f, "USB 3.2 Gen1"),
            UsbSpeed::Usb32Gen2 => write!(f, "USB 3.2/USB4 Gen2"),
            UsbSpeed::Usb4Gen3 => write!(f, "USB4 Gen3"),
            UsbSpeed::Usb4Gen4 => write!(f, "USB4 Gen4"),
            UsbSpeed::Reserved(code) => write!(f, "Reserved({})", code),
        }
    }
}

/// Maximum VBUS voltage the cable is rated for, in mV
fn max_vbus_voltage_mv(bits: u8) -> u32 {
    match bits & 0x03 {
        0 => 20_000,
        1 => 30_000,
        2 => 40_000,
        _ => 50_000,
    }
}

/// Fields shared by the passive cable VDO and active cable VDO 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CableVdo {
    pub hw_version: u8,
    pub fw_version: u8,
    /// VDO version, tracks the USB-PD revision the cable was built against
    pub vdo_version: u8,
    pub connector: CableConnector,
    pub epr_capable: bool,
    /// Latency code (1 = <10 ns ... 8 = >70 ns; 9/10 optical for active)
    pub latency: u8,
    pub termination: u8,
    pub max_vbus_voltage_mv: u32,
    pub current: CableCurrent,
    pub highest_speed: UsbSpeed,
}

impl CableVdo {
    pub fn from_word(word: u32) -> Self {
        Self {
            hw_version: field(word, 28, 4),
            fw_version: field(word, 24, 4),
            vdo_version: field(word, 21, 3),
            connector: match field(word, 18, 2) {
                2 => CableConnector::TypeC,
                3 => CableConnector::Captive,
                other => CableConnector::Reserved(other),
            },
            epr_capable: bit(word, 17),
            latency: field(word, 13, 4),
            termination: field(word, 11, 2),
            max_vbus_voltage_mv: max_vbus_voltage_mv(field(word, 9, 2)),
            current: match field(word, 5, 2) {
                1 => CableCurrent::ThreeAmps,
                2 => CableCurrent::FiveAmps,
                other => CableCurrent::Reserved(other),
            },
            highest_speed: UsbSpeed::decode(field(word, 0, 3)),
        }
    }

    /// Approximate cable length class for a latency code
    pub fn latency_description(&self) -> &'static str {
        match self.latency {
            1 => "<10ns (~1m)",
            2 => "10-20ns (~2m)",
            3 => "20-30ns (~3m)",
            4 => "30-40ns (~4m)",
            5 => "40-50ns (~5m)",
            6 => "50-60ns (~6m)",
            7 => "60-70ns (~7m)",
            8 => ">70ns (>~7m)",
            9 => "1000ns (~200m)",
            10 => "2000ns (~400m)",
            _ => "reserved",
        }
    }
}

impl fmt::Display for CableVdo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = match self.current.max_ma() {
            Some(ma) => format!("{}A", ma / 1000),
            None => "?A".to_string(),
        };
        write!(
            f,
            "{} {} {} latency {}",
            current,
            volts(self.max_vbus_voltage_mv),
            self.highest_speed,
            self.latency_description()
        )?;
        if self.epr_capable {
            write!(f, " EPR")?;
        }
        Ok(())
    }
}

/// Active cable VDO 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCableVdo {
    pub cable: CableVdo,
    pub sbu_supported: bool,
    pub sbu_vconn_powered: bool,
    pub vbus_through_cable: bool,
    pub sop_double_prime_present: bool,
}

impl ActiveCableVdo {
    pub fn from_word(word: u32) -> Self {
        Self {
            cable: CableVdo::from_word(word),
            // 0 means supported
            sbu_supported: !bit(word, 8),
            sbu_vconn_powered: bit(word, 7),
            vbus_through_cable: bit(word, 4),
            sop_double_prime_present: bit(word, 3),
        }
    }
}

/// Active cable VDO 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCableVdo2 {
    pub max_operating_temp_c: u8,
    pub shutdown_temp_c: u8,
    pub optically_isolated: bool,
    pub usb4_supported: bool,
    pub usb2_supported: bool,
    pub usb32_supported: bool,
    pub two_lanes: bool,
}

impl ActiveCableVdo2 {
    pub fn from_word(word: u32) -> Self {
        Self {
            max_operating_temp_c: field(word, 24, 8),
            shutdown_temp_c: field(word, 16, 8),
            optically_isolated: bit(word, 2),
            // support bits are active low
            usb4_supported: !bit(word, 8),
            usb2_supported: !bit(word, 5),
            usb32_supported: !bit(word, 4),
            two_lanes: bit(word, 3),
        }
    }
}

/// VCONN-Powered USB Device VDO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpdVdo {
    pub hw_version: u8,
    pub fw_version: u8,
    pub vdo_version: u8,
    pub max_vbus_voltage_mv: u32,
    pub charge_through_current_5a: bool,
    /// 2 mOhm units
    pub vbus_impedance: u8,
    /// 1 mOhm units
    pub ground_impedance: u8,
    pub charge_through_supported: bool,
}

impl VpdVdo {
    pub fn from_word(word: u32) -> Self {
        Self {
            hw_version: field(word, 28, 4),
            fw_version: field(word, 24, 4),
            vdo_version: field(word, 21, 3),
            max_vbus_voltage_mv: max_vbus_voltage_mv(field(word, 15, 2)),
            charge_through_current_5a: bit(word, 14),
            vbus_impedance: field(word, 7, 6),
            ground_impedance: field(word, 1, 6),
            charge_through_supported: bit(word, 0),
        }
    }
}

/// One object of a Vendor_Defined message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VdmObject {
    Header(VdmHeader),
    IdHeader(IdHeaderVdo),
    CertStat(CertStatVdo),
    Product(ProductVdo),
    PassiveCable(CableVdo),
    ActiveCable(ActiveCableVdo),
    ActiveCable2(ActiveCableVdo2),
    Vpd(VpdVdo),
    /// VDO whose meaning is mode or vendor specific
    Raw(u32),
}

impl fmt::Display for VdmObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VdmObject::Header(header) => write!(f, "{}", header),
            VdmObject::IdHeader(id) => write!(f, "ID {} {}", id.vendor, id.product_type),
            VdmObject::CertStat(cert) => write!(f, "XID 0x{:08X}", cert.xid),
            VdmObject::Product(product) => write!(
                f,
                "PID 0x{:04X} bcdDevice 0x{:04X}",
                product.product_id, product.bcd_device
            ),
            VdmObject::PassiveCable(cable) => write!(f, "Passive {}", cable),
            VdmObject::ActiveCable(active) => write!(f, "Active {}", active.cable),
            VdmObject::ActiveCable2(active) => write!(
                f,
                "Active max {}C shutdown {}C",
                active.max_operating_temp_c, active.shutdown_temp_c
            ),
            VdmObject::Vpd(vpd) => write!(f, "VPD {}", volts(vpd.max_vbus_voltage_mv)),
            VdmObject::Raw(word) => write!(f, "VDO 0x{:08X}", word),
        }
    }
}

/// Classify the object at `position` (1-based, after the VDM header)
pub fn classify_vdo(
    word: u32,
    header: &VdmHeader,
    position: usize,
    sop: Sop,
    id_header: Option<&IdHeaderVdo>,
) -> VdmObject {
    if !header.is_identity_response() {
        return VdmObject::Raw(word);
    }

    let product_type = id_header.map(|id| id.product_type);
    match (position, product_type) {
        (1, _) => VdmObject::IdHeader(IdHeaderVdo::from_word(word, sop)),
        (2, _) => VdmObject::CertStat(CertStatVdo { xid: word }),
        (3, _) => VdmObject::Product(ProductVdo::from_word(word)),
        (4, Some(ProductType::PassiveCable)) => VdmObject::PassiveCable(CableVdo::from_word(word)),
        (4, Some(ProductType::ActiveCable)) => {
            VdmObject::ActiveCable(ActiveCableVdo::from_word(word))
        }
        (4, Some(ProductType::VconnPoweredDevice)) => VdmObject::Vpd(VpdVdo::from_word(word)),
        (5, Some(ProductType::ActiveCable)) => {
            VdmObject::ActiveCable2(ActiveCableVdo2::from_word(word))
        }
        _ => VdmObject::Raw(word),
    }
}

/// Cable identity collected from a Discover Identity ACK sent by a cable plug
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CableIdentity {
    pub vendor: VendorLabel,
    pub product_type: ProductType,
    pub product_id: Option<u16>,
    pub bcd_device: Option<u16>,
    pub cable: Option<CableVdo>,
    pub vpd: Option<VpdVdo>,
}

impl CableIdentity {
    /// Extract the cable identity from the VDM objects of one message
    pub fn from_objects<'a>(objects: impl IntoIterator<Item = &'a VdmObject>) -> Option<Self> {
        let mut identity: Option<CableIdentity> = None;
        for object in objects {
            match object {
                VdmObject::IdHeader(id) if id.product_type.is_cable() => {
                    identity = Some(CableIdentity {
                        vendor: id.vendor.clone(),
                        product_type: id.product_type,
                        product_id: None,
                        bcd_device: None,
                        cable: None,
                        vpd: None,
                    });
                }
                VdmObject::Product(product) => {
                    if let Some(identity) = identity.as_mut() {
                        identity.product_id = Some(product.product_id);
                        identity.bcd_device = Some(product.bcd_device);
                    }
                }
                VdmObject::PassiveCable(cable) => {
                    if let Some(identity) = identity.as_mut() {
                        identity.cable = Some(*cable);
                    }
                }
                VdmObject::ActiveCable(active) => {
                    if let Some(identity) = identity.as_mut() {
                        identity.cable = Some(active.cable);
                    }
                }
                VdmObject::Vpd(vpd) => {
                    if let Some(identity) = identity.as_mut() {
                        identity.vpd = Some(*vpd);
                    }
                }
                _ => {}
            }
        }
        identity
    }
}

impl fmt::Display for CableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.product_type, self.vendor)?;
        if let Some(pid) = self.product_id {
            write!(f, " PID 0x{:04X}", pid)?;
        }
        if let Some(cable) = &self.cable {
            write!(f, " {}", cable)?;
        }
        Ok(())
    }
}
