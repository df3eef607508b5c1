//! Power Data Objects
//!
//! Bits 31..30 select the supply type. Augmented PDOs use bits 29..28 for a
//! sub-kind; only the Programmable Power Supply layout is decoded, the
//! remaining sub-kinds are kept as raw words.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::DataObject;

const SUPPLY_FIXED: u32 = 0b00;
const SUPPLY_BATTERY: u32 = 0b01;
const SUPPLY_VARIABLE: u32 = 0b10;
const AUGMENTED_PPS: u8 = 0b00;

/// PDO kind, used to pick the matching Request Data Object layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PdoKind {
    Fixed,
    Variable,
    Battery,
    Pps,
    ReservedAugmented,
}

impl fmt::Display for PdoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdoKind::Fixed => write!(f, "Fixed"),
            PdoKind::Variable => write!(f, "Variable"),
            PdoKind::Battery => write!(f, "Battery"),
            PdoKind::Pps => write!(f, "PPS"),
            PdoKind::ReservedAugmented => write!(f, "Augmented"),
        }
    }
}

#[inline]
fn bit(word: u32, n: u32) -> bool {
    word & (1 << n) != 0
}

#[inline]
fn field(word: u32, shift: u32, width: u32) -> u32 {
    (word >> shift) & ((1 << width) - 1)
}

/// Fixed Supply PDO
///
/// Flags are decoded with the source layout. A PDO taken from Sink
/// Capabilities reuses bits 28 and 24..23, so read it via [`FixedSupplyPdo::sink_flags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedSupplyPdo {
    pub dual_role_power: bool,
    pub usb_suspend_supported: bool,
    pub unconstrained_power: bool,
    pub usb_communications_capable: bool,
    pub dual_role_data: bool,
    pub unchunked_extended_messages: bool,
    pub epr_mode_capable: bool,
    /// Peak current capability code (bits 21..20)
    pub peak_current: u8,
    /// Voltage, 50 mV resolution
    pub voltage_mv: u32,
    /// Maximum current, 10 mA resolution
    pub max_current_ma: u32,
}

impl FixedSupplyPdo {
    pub fn new(voltage_mv: u32, max_current_ma: u32) -> Self {
        Self {
            dual_role_power: false,
            usb_suspend_supported: false,
            unconstrained_power: false,
            usb_communications_capable: false,
            dual_role_data: false,
            unchunked_extended_messages: false,
            epr_mode_capable: false,
            peak_current: 0,
            voltage_mv,
            max_current_ma,
        }
    }

    pub fn from_word(word: u32) -> Self {
        Self {
            dual_role_power: bit(word, 29),
            usb_suspend_supported: bit(word, 28),
            unconstrained_power: bit(word, 27),
            usb_communications_capable: bit(word, 26),
            dual_role_data: bit(word, 25),
            unchunked_extended_messages: bit(word, 24),
            epr_mode_capable: bit(word, 23),
            peak_current: field(word, 20, 2) as u8,
            voltage_mv: field(word, 10, 10) * 50,
            max_current_ma: field(word, 0, 10) * 10,
        }
    }

    pub fn to_word(&self) -> u32 {
        let flags = [
            (self.dual_role_power, 29),
            (self.usb_suspend_supported, 28),
            (self.unconstrained_power, 27),
            (self.usb_communications_capable, 26),
            (self.dual_role_data, 25),
            (self.unchunked_extended_messages, 24),
            (self.epr_mode_capable, 23),
        ];
        let mut word = SUPPLY_FIXED << 30;
        for (set, n) in flags {
            if set {
                word |= 1 << n;
            }
        }
        word |= (self.peak_current as u32 & 0x3) << 20;
        word |= ((self.voltage_mv / 50) & 0x3FF) << 10;
        word |= (self.max_current_ma / 10) & 0x3FF;
        word
    }

    /// Flags as laid out in a sink Fixed PDO
    pub fn sink_flags(&self) -> SinkFixedFlags {
        let frs_bits = (self.unchunked_extended_messages as u8) << 1 | self.epr_mode_capable as u8;
        SinkFixedFlags {
            dual_role_power: self.dual_role_power,
            higher_capability: self.usb_suspend_supported,
            unconstrained_power: self.unconstrained_power,
            usb_communications_capable: self.usb_communications_capable,
            dual_role_data: self.dual_role_data,
            fast_role_swap: FastRoleSwapCurrent::from_bits(frs_bits),
        }
    }
}

/// Fast Role Swap current a sink needs (bits 24..23 of a sink Fixed PDO)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FastRoleSwapCurrent {
    NotSupported,
    DefaultUsbPower,
    OnePointFiveAmps,
    ThreeAmps,
}

impl FastRoleSwapCurrent {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => FastRoleSwapCurrent::NotSupported,
            1 => FastRoleSwapCurrent::DefaultUsbPower,
            2 => FastRoleSwapCurrent::OnePointFiveAmps,
            _ => FastRoleSwapCurrent::ThreeAmps,
        }
    }
}

/// Sink view of a Fixed PDO's flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkFixedFlags {
    pub dual_role_power: bool,
    pub higher_capability: bool,
    pub unconstrained_power: bool,
    pub usb_communications_capable: bool,
    pub dual_role_data: bool,
    pub fast_role_swap: FastRoleSwapCurrent,
}

impl fmt::Display for SinkFixedFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.dual_role_power, "DRP"),
            (self.higher_capability, "higher-capability"),
            (self.unconstrained_power, "unconstrained"),
            (self.usb_communications_capable, "USB-comms"),
            (self.dual_role_data, "DRD"),
        ];
        let mut flags: Vec<&str> = names
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        let frs = match self.fast_role_swap {
            FastRoleSwapCurrent::NotSupported => None,
            FastRoleSwapCurrent::DefaultUsbPower => Some("FRS default"),
            FastRoleSwapCurrent::OnePointFiveAmps => Some("FRS 1.5A"),
            FastRoleSwapCurrent::ThreeAmps => Some("FRS 3.0A"),
        };
        flags.extend(frs);
        if flags.is_empty() {
            write!(f, "no flags")
        } else {
            write!(f, "{}", flags.join(", "))
        }
    }
}

impl fmt::Display for FixedSupplyPdo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed {} {}", volts(self.voltage_mv), amps(self.max_current_ma))
    }
}

/// Variable Supply (non-battery) PDO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSupplyPdo {
    pub min_voltage_mv: u32,
    pub max_voltage_mv: u32,
    pub max_current_ma: u32,
}

impl VariableSupplyPdo {
    pub fn from_word(word: u32) -> Self {
        Self {
            max_voltage_mv: field(word, 20, 10) * 50,
            min_voltage_mv: field(word, 10, 10) * 50,
            max_current_ma: field(word, 0, 10) * 10,
        }
    }

    pub fn to_word(&self) -> u32 {
        (SUPPLY_VARIABLE << 30)
            | ((self.max_voltage_mv / 50) & 0x3FF) << 20
            | ((self.min_voltage_mv / 50) & 0x3FF) << 10
            | ((self.max_current_ma / 10) & 0x3FF)
    }
}

impl fmt::Display for VariableSupplyPdo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Variable {}-{} {}",
            volts(self.min_voltage_mv),
            volts(self.max_voltage_mv),
            amps(self.max_current_ma)
        )
    }
}

/// Battery Supply PDO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryPdo {
    pub min_voltage_mv: u32,
    pub max_voltage_mv: u32,
    /// Maximum power, 250 mW resolution
    pub max_power_mw: u32,
}

impl BatteryPdo {
    pub fn from_word(word: u32) -> Self {
        Self {
            max_voltage_mv: field(word, 20, 10) * 50,
            min_voltage_mv: field(word, 10, 10) * 50,
            max_power_mw: field(word, 0, 10) * 250,
        }
    }

    pub fn to_word(&self) -> u32 {
        (SUPPLY_BATTERY << 30)
            | ((self.max_voltage_mv / 50) & 0x3FF) << 20
            | ((self.min_voltage_mv / 50) & 0x3FF) << 10
            | ((self.max_power_mw / 250) & 0x3FF)
    }
}

impl fmt::Display for BatteryPdo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Battery {}-{} {}",
            volts(self.min_voltage_mv),
            volts(self.max_voltage_mv),
            watts(self.max_power_mw)
        )
    }
}

/// Programmable Power Supply augmented PDO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PpsApdo {
    pub power_limited: bool,
    /// 100 mV resolution
    pub min_voltage_mv: u32,
    /// 100 mV resolution
    pub max_voltage_mv: u32,
    /// 50 mA resolution
    pub max_current_ma: u32,
}

impl PpsApdo {
    pub fn from_word(word: u32) -> Self {
        Self {
            power_limited: bit(word, 27),
            max_voltage_mv: field(word, 17, 8) * 100,
            min_voltage_mv: field(word, 8, 8) * 100,
            max_current_ma: field(word, 0, 7) * 50,
        }
    }

    pub fn to_word(&self) -> u32 {
        let mut word = 0b11 << 30 | (AUGMENTED_PPS as u32) << 28;
        if self.power_limited {
            word |= 1 << 27;
        }
        word |= ((self.max_voltage_mv / 100) & 0xFF) << 17;
        word |= ((self.min_voltage_mv / 100) & 0xFF) << 8;
        word |= (self.max_current_ma / 50) & 0x7F;
        word
    }
}

impl fmt::Display for PpsApdo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PPS {}-{} {}",
            volts(self.min_voltage_mv),
            volts(self.max_voltage_mv),
            amps(self.max_current_ma)
        )?;
        if self.power_limited {
            write!(f, " (power limited)")?;
        }
        Ok(())
    }
}

/// Augmented PDO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AugmentedPdo {
    Pps(PpsApdo),
    /// Sub-kinds other than PPS (EPR AVS, SPR AVS, reserved)
    Reserved { sub_kind: u8, word: u32 },
}

impl AugmentedPdo {
    pub fn from_word(word: u32) -> Self {
        let sub_kind = field(word, 28, 2) as u8;
        if sub_kind == AUGMENTED_PPS {
            AugmentedPdo::Pps(PpsApdo::from_word(word))
        } else {
            AugmentedPdo::Reserved { sub_kind, word }
        }
    }

    pub fn to_word(&self) -> u32 {
        match self {
            AugmentedPdo::Pps(pps) => pps.to_word(),
            AugmentedPdo::Reserved { word, .. } => *word,
        }
    }

    pub fn kind(&self) -> PdoKind {
        match self {
            AugmentedPdo::Pps(_) => PdoKind::Pps,
            AugmentedPdo::Reserved { .. } => PdoKind::ReservedAugmented,
        }
    }
}

impl fmt::Display for AugmentedPdo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AugmentedPdo::Pps(pps) => write!(f, "{}", pps),
            AugmentedPdo::Reserved { sub_kind, word } => {
                write!(f, "Augmented({}) 0x{:08X}", sub_kind, word)
            }
        }
    }
}

/// Classify a word from a capabilities message
pub fn classify_pdo(word: u32) -> DataObject {
    match word >> 30 {
        SUPPLY_FIXED => DataObject::Fixed(FixedSupplyPdo::from_word(word)),
        SUPPLY_BATTERY => DataObject::Battery(BatteryPdo::from_word(word)),
        SUPPLY_VARIABLE => DataObject::Variable(VariableSupplyPdo::from_word(word)),
        _ => DataObject::Augmented(AugmentedPdo::from_word(word)),
    }
}

pub(crate) fn volts(mv: u32) -> String {
    format!("{}.{:02}V", mv / 1000, (mv % 1000) / 10)
}

pub(crate) fn amps(ma: u32) -> String {
    format!("{}.{:02}A", ma / 1000, (ma % 1000) / 10)
}

pub(crate) fn watts(mw: u32) -> String {
    format!("{}.{:02}W", mw / 1000, (mw % 1000) / 10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixed_5v_3a() {
        let pdo = FixedSupplyPdo::from_word(0x0801_912C);
        assert_eq!(pdo.voltage_mv, 5000);
        assert_eq!(pdo.max_current_ma, 3000);
        assert!(pdo.unconstrained_power);
        assert!(!pdo.dual_role_power);
        assert_eq!(pdo.to_string(), "Fixed 5.00V 3.00A");
    }

    #[test]
    fn test_fixed_flags() {
        // DRP, suspend, USB comm, DRD, peak current 2, 20V 5A
        let word = 1 << 29 | 1 << 28 | 1 << 26 | 1 << 25 | 2 << 20 | 400 << 10 | 500;
        let pdo = FixedSupplyPdo::from_word(word);
        assert!(pdo.dual_role_power);
        assert!(pdo.usb_suspend_supported);
        assert!(!pdo.unconstrained_power);
        assert!(pdo.usb_communications_capable);
        assert!(pdo.dual_role_data);
        assert_eq!(pdo.peak_current, 2);
        assert_eq!(pdo.voltage_mv, 20_000);
        assert_eq!(pdo.max_current_ma, 5000);
        assert_eq!(pdo.to_word(), word);
    }

    #[test]
    fn test_supply_type_selection() {
        assert!(matches!(classify_pdo(0x0801_912C), DataObject::Fixed(_)));
        assert!(matches!(classify_pdo(0x4000_0000), DataObject::Battery(_)));
        assert!(matches!(classify_pdo(0x8000_0000), DataObject::Variable(_)));
        assert!(matches!(
            classify_pdo(0xC000_0000),
            DataObject::Augmented(AugmentedPdo::Pps(_))
        ));
        assert!(matches!(
            classify_pdo(0xD000_0000),
            DataObject::Augmented(AugmentedPdo::Reserved { sub_kind: 1, .. })
        ));
    }

    #[test]
    fn test_variable_and_battery() {
        let variable = VariableSupplyPdo {
            min_voltage_mv: 5000,
            max_voltage_mv: 12_000,
            max_current_ma: 2000,
        };
        let decoded = VariableSupplyPdo::from_word(variable.to_word());
        assert_eq!(decoded, variable);
        assert_eq!(decoded.to_string(), "Variable 5.00V-12.00V 2.00A");

        let battery = BatteryPdo::from_word(240 << 20 | 100 << 10 | 120 | 1 << 30);
        assert_eq!(battery.max_voltage_mv, 12_000);
        assert_eq!(battery.min_voltage_mv, 5000);
        assert_eq!(battery.max_power_mw, 30_000);
        assert_eq!(battery.to_string(), "Battery 5.00V-12.00V 30.00W");
    }

    #[test]
    fn test_pps_apdo() {
        // 3.3V-11V 3A, power limited
        let word = 0b11 << 30 | 1 << 27 | 110 << 17 | 33 << 8 | 60;
        let pps = PpsApdo::from_word(word);
        assert!(pps.power_limited);
        assert_eq!(pps.min_voltage_mv, 3300);
        assert_eq!(pps.max_voltage_mv, 11_000);
        assert_eq!(pps.max_current_ma, 3000);
        assert_eq!(pps.to_word(), word);
        assert_eq!(pps.to_string(), "PPS 3.30V-11.00V 3.00A (power limited)");
    }

    #[test]
    fn test_reserved_augmented_keeps_word() {
        let word = 0xE123_4567;
        let apdo = AugmentedPdo::from_word(word);
        assert_eq!(apdo.kind(), PdoKind::ReservedAugmented);
        assert_eq!(apdo.to_word(), word);
    }

    fn valid_fixed_word() -> impl Strategy<Value = u32> {
        // Supply type 00, reserved bit 22 clear
        any::<u32>().prop_map(|w| w & 0x3FBF_FFFF)
    }

    #[test]
    fn test_sink_fixed_flags() {
        // DRP, higher capability, USB comm, FRS 3.0A, 9V 2A
        let word = 1 << 29 | 1 << 28 | 1 << 26 | 0b11 << 23 | 180 << 10 | 200;
        let pdo = FixedSupplyPdo::from_word(word);
        let flags = pdo.sink_flags();
        assert!(flags.dual_role_power);
        assert!(flags.higher_capability);
        assert!(!flags.unconstrained_power);
        assert!(flags.usb_communications_capable);
        assert_eq!(flags.fast_role_swap, FastRoleSwapCurrent::ThreeAmps);
        assert_eq!(flags.to_string(), "DRP, higher-capability, USB-comms, FRS 3.0A");

        let plain = FixedSupplyPdo::from_word(1 << 23 | 100 << 10 | 50).sink_flags();
        assert_eq!(plain.fast_role_swap, FastRoleSwapCurrent::DefaultUsbPower);
        assert_eq!(FixedSupplyPdo::new(5000, 900).sink_flags().to_string(), "no flags");
    }

    proptest! {
        #[test]
        fn fixed_pdo_round_trips(word in valid_fixed_word()) {
            let pdo = FixedSupplyPdo::from_word(word);
            prop_assert_eq!(pdo.to_word(), word);
            prop_assert_eq!(pdo.voltage_mv % 50, 0);
            prop_assert_eq!(pdo.max_current_ma % 10, 0);
            prop_assert_eq!(FixedSupplyPdo::from_word(pdo.to_word()), pdo);
        }

        #[test]
        fn fixed_pdo_resolution(volt_units in 0u32..1024, amp_units in 0u32..1024) {
            let pdo = FixedSupplyPdo::new(volt_units * 50, amp_units * 10);
            let decoded = FixedSupplyPdo::from_word(pdo.to_word());
            prop_assert_eq!(decoded.voltage_mv, volt_units * 50);
            prop_assert_eq!(decoded.max_current_ma, amp_units * 10);
        }
    }
}
