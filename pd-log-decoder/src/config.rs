//! Capture configuration types
//!
//! This module defines the configuration consumed by the capture session
//! and its decode worker. Every field has a serde default so a partial
//! `[capture]` table in a config file is enough.

use serde::{Deserialize, Serialize};

use crate::header::{ControlMessage, Header, MessageType};
use crate::types::Sop;

/// Auto-pause thresholds
///
/// The voltage and current axes trigger independently. An axis whose "on"
/// threshold is zero never triggers. The "off" thresholds are not required
/// to be below the "on" thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Pause once voltage reaches this value (mV)
    #[serde(rename = "voltage_on_mV", alias = "voltage_on_mv")]
    pub voltage_on_mv: u32,
    /// Resume once voltage falls below this value (mV)
    #[serde(rename = "voltage_off_mV", alias = "voltage_off_mv")]
    pub voltage_off_mv: u32,
    /// Pause once current reaches this value (mA)
    #[serde(rename = "current_on_mA", alias = "current_on_ma")]
    pub current_on_ma: u32,
    /// Resume once current falls below this value (mA)
    #[serde(rename = "current_off_mA", alias = "current_off_ma")]
    pub current_off_ma: u32,
    /// How long a condition must hold before the state changes
    pub delay_ms: u32,
}

impl ThresholdConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: voltage thresholds (mV)
    pub fn with_voltage(mut self, on_mv: u32, off_mv: u32) -> Self {
        self.voltage_on_mv = on_mv;
        self.voltage_off_mv = off_mv;
        self
    }

    /// Builder method: current thresholds (mA)
    pub fn with_current(mut self, on_ma: u32, off_ma: u32) -> Self {
        self.current_on_ma = on_ma;
        self.current_off_ma = off_ma;
        self
    }

    /// Builder method: debounce delay
    pub fn with_delay_ms(mut self, delay_ms: u32) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn voltage_enabled(&self) -> bool {
        self.voltage_on_mv > 0
    }

    pub fn current_enabled(&self) -> bool {
        self.current_on_ma > 0
    }

    /// True when at least one axis can trigger auto-pause
    pub fn is_enabled(&self) -> bool {
        self.voltage_enabled() || self.current_enabled()
    }

    pub fn delay(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.delay_ms as i64)
    }
}

/// Configuration for a capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Ring buffer capacity of the record store
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Auto-pause thresholds
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Bound of the frame queue between the frame source and the worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Flush a record batch once it holds this many records
    #[serde(default = "default_batch_max_records")]
    pub batch_max_records: usize,

    /// Flush a non-empty record batch at least this often
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Optional: only process frames received on these SOP kinds
    #[serde(default)]
    pub sop_filter: Option<Vec<Sop>>,

    /// Drop GoodCRC acknowledgements instead of recording them
    #[serde(default)]
    pub ignore_good_crc: bool,
}

fn default_max_records() -> usize {
    10_000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_batch_max_records() -> usize {
    64
}

fn default_batch_interval_ms() -> u64 {
    200
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            thresholds: ThresholdConfig::default(),
            queue_capacity: default_queue_capacity(),
            batch_max_records: default_batch_max_records(),
            batch_interval_ms: default_batch_interval_ms(),
            sop_filter: None,
            ignore_good_crc: false,
        }
    }
}

impl CaptureConfig {
    /// Create a new capture configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the record store capacity
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    /// Builder method: set auto-pause thresholds
    pub fn with_thresholds(mut self, thresholds: ThresholdConfig) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Builder method: set the frame queue bound
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Builder method: set the batch flush limits
    pub fn with_batching(mut self, max_records: usize, interval_ms: u64) -> Self {
        self.batch_max_records = max_records;
        self.batch_interval_ms = interval_ms;
        self
    }

    /// Builder method: set SOP filter
    pub fn with_sop_filter(mut self, sops: Vec<Sop>) -> Self {
        self.sop_filter = Some(sops);
        self
    }

    /// Builder method: drop GoodCRC messages
    pub fn with_ignore_good_crc(mut self, enabled: bool) -> Self {
        self.ignore_good_crc = enabled;
        self
    }

    /// Flush interval, never shorter than one millisecond
    pub fn batch_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.batch_interval_ms.max(1))
    }

    /// Check if frames on a SOP kind should be processed
    pub fn should_process_sop(&self, sop: Sop) -> bool {
        match &self.sop_filter {
            Some(sops) => sops.contains(&sop),
            None => true,
        }
    }

    /// Check if a decoded message should be recorded
    pub fn should_record(&self, header: &Header) -> bool {
        !(self.ignore_good_crc
            && header.message_type == MessageType::Control(ControlMessage::GoodCrc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_config_builder() {
        let config = CaptureConfig::new()
            .with_max_records(100)
            .with_thresholds(ThresholdConfig::new().with_voltage(20_000, 15_000).with_delay_ms(500))
            .with_batching(16, 50)
            .with_sop_filter(vec![Sop::Sop, Sop::SopPrime])
            .with_ignore_good_crc(true);

        assert_eq!(config.max_records, 100);
        assert!(config.thresholds.voltage_enabled());
        assert!(!config.thresholds.current_enabled());
        assert_eq!(config.thresholds.delay(), chrono::Duration::milliseconds(500));
        assert_eq!(config.batch_interval(), std::time::Duration::from_millis(50));
        assert!(config.should_process_sop(Sop::SopPrime));
        assert!(!config.should_process_sop(Sop::SopDoublePrime));
    }

    #[test]
    fn test_zero_batch_interval_is_clamped() {
        let config = CaptureConfig::new().with_batching(8, 0);
        assert_eq!(config.batch_interval_ms, 0);
        assert_eq!(config.batch_interval(), std::time::Duration::from_millis(1));
    }

    #[test]
    fn test_good_crc_filter() {
        let good_crc = Header::from_word(0x0681);
        let ps_rdy = Header::from_word(0x0546);

        let config = CaptureConfig::new();
        assert!(config.should_record(&good_crc));

        let config = config.with_ignore_good_crc(true);
        assert!(!config.should_record(&good_crc));
        assert!(config.should_record(&ps_rdy));
    }

    #[test]
    fn test_defaults_from_partial_json() {
        let config: CaptureConfig =
            serde_json::from_str(r#"{"max_records": 500, "thresholds": {"voltage_on_mV": 20000}}"#)
                .unwrap();
        assert_eq!(config.max_records, 500);
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.batch_max_records, 64);
        assert_eq!(config.thresholds.voltage_on_mv, 20_000);
        assert_eq!(config.thresholds.delay_ms, 0);
        assert!(config.sop_filter.is_none());
    }

    #[test]
    fn test_no_thresholds_disables_auto_pause() {
        assert!(!ThresholdConfig::default().is_enabled());
        assert!(ThresholdConfig::new().with_current(3000, 2000).is_enabled());
    }
}
