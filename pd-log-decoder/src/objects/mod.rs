//! Data object classification
//!
//! A data object is a 32-bit word whose meaning depends on the message type
//! and its position in the message. The caller picks an [`ObjectContext`]
//! per word and [`classify_object`] dispatches to the PDO, RDO or VDM
//! decoder.

pub mod pdo;
pub mod rdo;
pub mod vdm;

pub use pdo::{
    classify_pdo, AugmentedPdo, BatteryPdo, FastRoleSwapCurrent, FixedSupplyPdo, PdoKind, PpsApdo,
    SinkFixedFlags, VariableSupplyPdo,
};
pub use rdo::{classify_request, RequestDataObject, RequestOperation};
pub use vdm::{
    classify_vdo, ActiveCableVdo, ActiveCableVdo2, CableConnector, CableCurrent, CableIdentity,
    CableVdo, CertStatVdo, CommandType, ConnectorType, DfpProductType, IdHeaderVdo, ProductType,
    ProductVdo, StructuredVdmHeader, UsbSpeed, VdmCommand, VdmHeader, VdmObject, VpdVdo,
};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::negotiation::NegotiationContext;
use crate::types::{Result, Sop};

/// A classified data object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataObject {
    Fixed(FixedSupplyPdo),
    Variable(VariableSupplyPdo),
    Battery(BatteryPdo),
    Augmented(AugmentedPdo),
    Request(RequestDataObject),
    Vdm(VdmObject),
    /// Word kept as-is, either opaque for its message type or failed to classify
    Unrecognized(u32),
}

impl DataObject {
    /// True for any of the power data object variants
    pub fn is_pdo(&self) -> bool {
        matches!(
            self,
            DataObject::Fixed(_)
                | DataObject::Variable(_)
                | DataObject::Battery(_)
                | DataObject::Augmented(_)
        )
    }

    pub fn as_request(&self) -> Option<&RequestDataObject> {
        match self {
            DataObject::Request(rdo) => Some(rdo),
            _ => None,
        }
    }

    pub fn as_vdm(&self) -> Option<&VdmObject> {
        match self {
            DataObject::Vdm(vdm) => Some(vdm),
            _ => None,
        }
    }
}

impl fmt::Display for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataObject::Fixed(pdo) => write!(f, "{}", pdo),
            DataObject::Variable(pdo) => write!(f, "{}", pdo),
            DataObject::Battery(pdo) => write!(f, "{}", pdo),
            DataObject::Augmented(pdo) => write!(f, "{}", pdo),
            DataObject::Request(rdo) => write!(f, "{}", rdo),
            DataObject::Vdm(vdm) => write!(f, "{}", vdm),
            DataObject::Unrecognized(word) => write!(f, "0x{:08X}", word),
        }
    }
}

/// How a word should be interpreted
#[derive(Debug, Clone, Copy)]
pub enum ObjectContext<'a> {
    /// Source or Sink Capabilities
    Capability,
    /// Request against the last known source capabilities
    Request(&'a NegotiationContext),
    /// First object of a Vendor_Defined message
    VdmHeader,
    /// Object after the VDM header; `position` is 1-based
    Vdo {
        header: &'a VdmHeader,
        position: usize,
        sop: Sop,
        id_header: Option<&'a IdHeaderVdo>,
    },
    /// Message type whose objects are not interpreted
    Opaque,
}

/// Classify one data object word
pub fn classify_object(word: u32, context: &ObjectContext<'_>) -> Result<DataObject> {
    let object = match context {
        ObjectContext::Capability => classify_pdo(word),
        ObjectContext::Request(negotiation) => {
            DataObject::Request(classify_request(word, negotiation)?)
        }
        ObjectContext::VdmHeader => DataObject::Vdm(VdmObject::Header(VdmHeader::from_word(word))),
        ObjectContext::Vdo {
            header,
            position,
            sop,
            id_header,
        } => DataObject::Vdm(classify_vdo(word, header, *position, *sop, *id_header)),
        ObjectContext::Opaque => DataObject::Unrecognized(word),
    };
    Ok(object)
}
