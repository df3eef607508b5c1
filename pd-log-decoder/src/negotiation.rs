//! Negotiation context
//!
//! A Request Data Object only makes sense next to the capabilities it
//! answers: the RDO bit layout depends on the kind of PDO at the requested
//! object position. The context remembers the most recent Source
//! Capabilities and is passed explicitly into the classifier.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::objects::pdo::{amps, volts, watts};
use crate::objects::{AugmentedPdo, DataObject, PdoKind};

/// One advertised source capability, reduced to what a request references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisedPdo {
    /// 1-based object position in the capabilities message
    pub position: u8,
    pub kind: PdoKind,
    pub min_voltage_mv: u32,
    pub max_voltage_mv: u32,
    pub max_current_ma: Option<u32>,
    pub max_power_mw: Option<u32>,
}

impl AdvertisedPdo {
    /// Build from a decoded capability object (None for non-PDO objects)
    pub fn from_object(position: u8, object: &DataObject) -> Option<Self> {
        let advertised = match object {
            DataObject::Fixed(pdo) => Self {
                position,
                kind: PdoKind::Fixed,
                min_voltage_mv: pdo.voltage_mv,
                max_voltage_mv: pdo.voltage_mv,
                max_current_ma: Some(pdo.max_current_ma),
                max_power_mw: None,
            },
            DataObject::Variable(pdo) => Self {
                position,
                kind: PdoKind::Variable,
                min_voltage_mv: pdo.min_voltage_mv,
                max_voltage_mv: pdo.max_voltage_mv,
                max_current_ma: Some(pdo.max_current_ma),
                max_power_mw: None,
            },
            DataObject::Battery(pdo) => Self {
                position,
                kind: PdoKind::Battery,
                min_voltage_mv: pdo.min_voltage_mv,
                max_voltage_mv: pdo.max_voltage_mv,
                max_current_ma: None,
                max_power_mw: Some(pdo.max_power_mw),
            },
            DataObject::Augmented(AugmentedPdo::Pps(pps)) => Self {
                position,
                kind: PdoKind::Pps,
                min_voltage_mv: pps.min_voltage_mv,
                max_voltage_mv: pps.max_voltage_mv,
                max_current_ma: Some(pps.max_current_ma),
                max_power_mw: None,
            },
            DataObject::Augmented(AugmentedPdo::Reserved { .. }) => Self {
                position,
                kind: PdoKind::ReservedAugmented,
                min_voltage_mv: 0,
                max_voltage_mv: 0,
                max_current_ma: None,
                max_power_mw: None,
            },
            DataObject::Request(_) | DataObject::Vdm(_) | DataObject::Unrecognized(_) => {
                return None
            }
        };
        Some(advertised)
    }

    /// Fixed voltage of the PDO, if it has exactly one
    pub fn voltage_mv(&self) -> Option<u32> {
        (self.min_voltage_mv == self.max_voltage_mv && self.kind == PdoKind::Fixed)
            .then_some(self.max_voltage_mv)
    }
}

impl fmt::Display for AdvertisedPdo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.kind)?;
        if self.min_voltage_mv == self.max_voltage_mv {
            write!(f, "{}", volts(self.max_voltage_mv))?;
        } else {
            write!(f, "{}-{}", volts(self.min_voltage_mv), volts(self.max_voltage_mv))?;
        }
        if let Some(ma) = self.max_current_ma {
            write!(f, " {}", amps(ma))?;
        }
        if let Some(mw) = self.max_power_mw {
            write!(f, " {}", watts(mw))?;
        }
        Ok(())
    }
}

/// Last-seen source capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NegotiationContext {
    source_pdos: Vec<AdvertisedPdo>,
}

impl NegotiationContext {
    /// Empty context (no Source Capabilities seen yet)
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from the objects of a Source Capabilities message
    pub fn from_capabilities(objects: &[DataObject]) -> Self {
        let source_pdos = objects
            .iter()
            .enumerate()
            .filter_map(|(i, object)| AdvertisedPdo::from_object(i as u8 + 1, object))
            .collect();
        Self { source_pdos }
    }

    pub fn is_empty(&self) -> bool {
        self.source_pdos.is_empty()
    }

    pub fn pdos(&self) -> &[AdvertisedPdo] {
        &self.source_pdos
    }

    /// PDO at a 1-based object position
    pub fn pdo_at(&self, position: u8) -> Option<&AdvertisedPdo> {
        self.source_pdos.iter().find(|pdo| pdo.position == position)
    }

    /// Layout a request at `position` is read with
    ///
    /// `None` when no PDO is advertised there or it is a reserved APDO.
    pub fn expected_kind(&self, position: u8) -> Option<PdoKind> {
        self.pdo_at(position)
            .map(|pdo| pdo.kind)
            .filter(|kind| *kind != PdoKind::ReservedAugmented)
    }
}
