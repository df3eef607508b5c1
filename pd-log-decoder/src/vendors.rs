//! USB vendor id resolution
//!
//! Vendor names come from an injected read-only table. The decoder never
//! fails on an unknown id; it keeps the raw value and renders it as hex.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Standard ID used by structured VDMs addressed to the PD protocol itself
pub const PD_SID: u16 = 0xFF00;
/// VESA DisplayPort alternate mode SVID
pub const DISPLAYPORT_SID: u16 = 0xFF01;

/// Read-only vendor id lookup
pub trait VendorLookup: Send + Sync {
    fn vendor_name(&self, vendor_id: u16) -> Option<&str>;
}

/// Name for standard SVIDs that are not vendor ids
pub fn standard_sid_name(svid: u16) -> Option<&'static str> {
    match svid {
        PD_SID => Some("PD SID"),
        DISPLAYPORT_SID => Some("DisplayPort"),
        _ => None,
    }
}

/// In-memory vendor table
#[derive(Debug, Clone, Default)]
pub struct VendorTable {
    names: HashMap<u16, String>,
}

impl VendorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vendor_id: u16, name: impl Into<String>) {
        self.names.insert(vendor_id, name.into());
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Parse a vendor id written as `0x05AC`, `05ac` or `05AC`
    pub fn parse_vendor_id(text: &str) -> Option<u16> {
        let text = text.trim();
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        if digits.is_empty() || digits.len() > 4 {
            return None;
        }
        u16::from_str_radix(digits, 16).ok()
    }
}

impl<S: Into<String>> FromIterator<(u16, S)> for VendorTable {
    fn from_iter<T: IntoIterator<Item = (u16, S)>>(iter: T) -> Self {
        Self {
            names: iter
                .into_iter()
                .map(|(id, name)| (id, name.into()))
                .collect(),
        }
    }
}

impl VendorLookup for VendorTable {
    fn vendor_name(&self, vendor_id: u16) -> Option<&str> {
        self.names.get(&vendor_id).map(String::as_str)
    }
}

/// A vendor id together with its resolved name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorLabel {
    pub id: u16,
    pub name: Option<String>,
}

impl VendorLabel {
    pub fn unresolved(id: u16) -> Self {
        Self { id, name: None }
    }

    /// Fill in the name from the lookup table
    pub fn resolve(&mut self, lookup: &dyn VendorLookup) -> bool {
        if self.name.is_none() {
            self.name = lookup.vendor_name(self.id).map(str::to_owned);
        }
        self.name.is_some()
    }

    pub fn is_resolved(&self) -> bool {
        self.name.is_some()
    }
}

impl fmt::Display for VendorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} (0x{:04X})", name, self.id),
            None => write!(f, "0x{:04X}", self.id),
        }
    }
}
