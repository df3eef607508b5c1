//! Threshold-driven auto-pause
//!
//! Evaluated synchronously for every measurement sample, in arrival order.
//! A condition has to hold continuously for the configured delay before
//! the pause cause changes, measured on sample timestamps.

use serde::{Deserialize, Serialize};

use crate::config::ThresholdConfig;
use crate::types::{Measurement, MeasurementSample, Timestamp};

/// Change of the automatic pause cause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoPauseChange {
    Entered,
    Cleared,
}

/// Which axes caused the current auto-pause
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredAxes {
    pub voltage: bool,
    pub current: bool,
}

impl TriggeredAxes {
    fn any(self) -> bool {
        self.voltage || self.current
    }
}

/// Debounced threshold evaluator
#[derive(Debug, Clone)]
pub struct AutoPauseEvaluator {
    thresholds: ThresholdConfig,
    last: Measurement,
    paused: bool,
    triggered: TriggeredAxes,
    pending_since: Option<Timestamp>,
}

impl AutoPauseEvaluator {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            thresholds,
            last: Measurement::default(),
            paused: false,
            triggered: TriggeredAxes::default(),
            pending_since: None,
        }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub fn set_thresholds(&mut self, thresholds: ThresholdConfig) {
        self.thresholds = thresholds;
        self.reset();
    }

    /// Forget the measurement history and any active pause
    pub fn reset(&mut self) {
        self.last = Measurement::default();
        self.paused = false;
        self.triggered = TriggeredAxes::default();
        self.pending_since = None;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn triggered(&self) -> TriggeredAxes {
        self.triggered
    }

    /// Latest value of each axis seen so far
    pub fn last_measurement(&self) -> Measurement {
        self.last
    }

    /// Feed one sample; returns the change of the auto-pause cause, if any
    pub fn observe(&mut self, sample: &MeasurementSample) -> Option<AutoPauseChange> {
        self.last.merge(&sample.measurement);
        if !self.thresholds.is_enabled() {
            return None;
        }

        if self.paused {
            if self.below_release() {
                if self.held(sample.timestamp) {
                    self.paused = false;
                    self.triggered = TriggeredAxes::default();
                    self.pending_since = None;
                    return Some(AutoPauseChange::Cleared);
                }
            } else {
                self.pending_since = None;
            }
        } else {
            let over = self.over_trigger();
            if over.any() {
                if self.held(sample.timestamp) {
                    self.paused = true;
                    self.triggered = over;
                    self.pending_since = None;
                    return Some(AutoPauseChange::Entered);
                }
            } else {
                self.pending_since = None;
            }
        }
        None
    }

    /// Start or continue the debounce window; true once it covers the delay
    fn held(&mut self, now: Timestamp) -> bool {
        let since = *self.pending_since.get_or_insert(now);
        now - since >= self.thresholds.delay()
    }

    fn over_trigger(&self) -> TriggeredAxes {
        let t = &self.thresholds;
        TriggeredAxes {
            voltage: t.voltage_enabled()
                && self.last.voltage_mv.is_some_and(|v| v >= t.voltage_on_mv),
            current: t.current_enabled()
                && self.last.current_ma.is_some_and(|i| i >= t.current_on_ma),
        }
    }

    /// Every triggering axis is below its release threshold.
    /// A zero "off" threshold releases at the "on" threshold.
    fn below_release(&self) -> bool {
        let t = &self.thresholds;
        let release = |off: u32, on: u32| if off > 0 { off } else { on };
        let voltage_ok = !self.triggered.voltage
            || self
                .last
                .voltage_mv
                .is_some_and(|v| v < release(t.voltage_off_mv, t.voltage_on_mv));
        let current_ok = !self.triggered.current
            || self
                .last
                .current_ma
                .is_some_and(|i| i < release(t.current_off_ma, t.current_on_ma));
        voltage_ok && current_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample(start: Timestamp, ms: i64, voltage_mv: u32) -> MeasurementSample {
        MeasurementSample {
            timestamp: start + Duration::milliseconds(ms),
            measurement: Measurement::new(Some(voltage_mv), None),
        }
    }

    fn run(
        evaluator: &mut AutoPauseEvaluator,
        start: Timestamp,
        trace: &[(i64, u32)],
    ) -> Vec<AutoPauseChange> {
        trace
            .iter()
            .filter_map(|&(ms, mv)| evaluator.observe(&sample(start, ms, mv)))
            .collect()
    }

    fn twenty_volt_trigger() -> AutoPauseEvaluator {
        AutoPauseEvaluator::new(
            ThresholdConfig::new()
                .with_voltage(20_000, 15_000)
                .with_delay_ms(500),
        )
    }

    #[test]
    fn test_short_excursion_does_not_pause() {
        let mut evaluator = twenty_volt_trigger();
        let trace: Vec<(i64, u32)> = (0..=10)
            .map(|i| (i * 100, if i <= 3 { 21_000 } else { 5_000 }))
            .collect();
        assert!(run(&mut evaluator, Utc::now(), &trace).is_empty());
        assert!(!evaluator.is_paused());
    }

    #[test]
    fn test_sustained_excursion_pauses_once() {
        let mut evaluator = twenty_volt_trigger();
        let trace: Vec<(i64, u32)> = (0..=6).map(|i| (i * 100, 21_000)).collect();
        assert_eq!(run(&mut evaluator, Utc::now(), &trace), vec![AutoPauseChange::Entered]);
        assert!(evaluator.is_paused());
        assert!(evaluator.triggered().voltage);
    }

    #[test]
    fn test_release_needs_sustained_drop() {
        let mut evaluator = twenty_volt_trigger();
        let start = Utc::now();
        run(&mut evaluator, start, &[(0, 21_000), (500, 21_000)]);
        assert!(evaluator.is_paused());

        // Dips below 15 V for 200 ms only, then between thresholds
        let trace = [(600, 5_000), (800, 5_000), (900, 18_000), (1500, 18_000)];
        let changes = run(&mut evaluator, start, &trace);
        assert!(changes.is_empty());

        let changes = run(&mut evaluator, start, &[(1600, 5_000), (2000, 5_000), (2100, 5_000)]);
        assert_eq!(changes, vec![AutoPauseChange::Cleared]);
    }

    #[test]
    fn test_current_axis_is_independent() {
        let mut evaluator = AutoPauseEvaluator::new(
            ThresholdConfig::new()
                .with_voltage(20_000, 15_000)
                .with_current(3_000, 1_000)
                .with_delay_ms(0),
        );
        let start = Utc::now();
        let high_current = MeasurementSample {
            timestamp: start,
            measurement: Measurement::new(Some(5_000), Some(3_200)),
        };
        assert_eq!(evaluator.observe(&high_current), Some(AutoPauseChange::Entered));
        assert_eq!(
            evaluator.triggered(),
            TriggeredAxes {
                voltage: false,
                current: true
            }
        );

        // Voltage-only sample keeps the last current reading
        assert_eq!(evaluator.observe(&sample(start, 10, 5_000)), None);
        let low_current = MeasurementSample {
            timestamp: start + Duration::milliseconds(20),
            measurement: Measurement::new(None, Some(500)),
        };
        assert_eq!(evaluator.observe(&low_current), Some(AutoPauseChange::Cleared));
    }

    #[test]
    fn test_disabled_thresholds_never_pause() {
        let mut evaluator = AutoPauseEvaluator::new(ThresholdConfig::default());
        let trace: Vec<(i64, u32)> = (0..20).map(|i| (i * 100, 48_000)).collect();
        assert!(run(&mut evaluator, Utc::now(), &trace).is_empty());
        assert_eq!(evaluator.last_measurement().voltage_mv, Some(48_000));
    }
}
