//! Capture session
//!
//! The session owns the record store, the threshold configuration and the
//! session state. Frames are decoded in every running state so the live
//! readout keeps moving; only frames accepted while capturing are stored.
//!
//! Manual and automatic pause are tracked as two separate causes. The
//! session is paused while either one is active, and clearing one cause
//! leaves the other in force.

pub mod auto_pause;
pub mod clock;

pub use auto_pause::{AutoPauseChange, AutoPauseEvaluator, TriggeredAxes};
pub use clock::{Clock, ManualClock, SystemClock};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{CaptureConfig, ThresholdConfig};
use crate::decoder::Decoder;
use crate::header::MessageType;
use crate::message_decoder::DecodedMessage;
use crate::negotiation::{AdvertisedPdo, NegotiationContext};
use crate::objects::CableIdentity;
use crate::store::{CaptureRecord, NewRecord, RecordStore};
use crate::types::{Measurement, MeasurementSample, RawFrame, SessionError, Timestamp};
use crate::vendors::VendorLookup;

/// Resolved state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Capturing,
    ManuallyPaused,
    AutoPaused,
}

impl SessionState {
    pub fn is_paused(self) -> bool {
        matches!(self, SessionState::ManuallyPaused | SessionState::AutoPaused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Capturing => write!(f, "Capturing"),
            SessionState::ManuallyPaused => write!(f, "ManuallyPaused"),
            SessionState::AutoPaused => write!(f, "AutoPaused"),
        }
    }
}

/// A change of the resolved session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: Timestamp,
}

/// What happened to an ingested frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Stored under this index
    Recorded(u64),
    /// Decoded for the live readout, not stored
    Paused,
    /// Dropped by the SOP or GoodCRC filter
    Filtered,
    /// Session not running, frame ignored
    Idle,
    /// Header inconsistent with frame length, discarded
    Malformed,
}

/// Result of ingesting one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub disposition: FrameDisposition,
    /// State change caused by the measurement carried on the frame
    pub transition: Option<StateTransition>,
}

/// Latest known bus state, updated even while paused
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveReadout {
    pub measurement: Measurement,
    pub measured_at: Option<Timestamp>,
    pub source_pdos: Vec<AdvertisedPdo>,
    pub cable: Option<CableIdentity>,
    pub last_message_type: Option<MessageType>,
    pub last_summary: Option<String>,
}

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub frames_seen: u64,
    pub malformed_frames: u64,
    pub frames_filtered: u64,
    pub frames_while_paused: u64,
    pub records_appended: u64,
    pub records_evicted: u64,
    pub auto_pauses: u64,
}

/// Immutable view of a session handed to readers
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub thresholds: ThresholdConfig,
    pub records: Vec<Arc<CaptureRecord>>,
    pub live: LiveReadout,
    pub stats: SessionStats,
}

/// A capture session
pub struct CaptureSession {
    config: CaptureConfig,
    clock: Arc<dyn Clock>,
    decoder: Decoder,
    store: RecordStore,
    auto_pause: AutoPauseEvaluator,
    running: bool,
    manual_pause: bool,
    /// Session start on the clock
    origin: Option<Timestamp>,
    paused_since: Option<Timestamp>,
    paused_total: chrono::Duration,
    live: LiveReadout,
    stats: SessionStats,
}

impl CaptureSession {
    /// Create an idle session using the system clock
    pub fn new(config: CaptureConfig, vendors: Arc<dyn VendorLookup>) -> Self {
        Self::with_clock(config, vendors, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CaptureConfig,
        vendors: Arc<dyn VendorLookup>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store: RecordStore::new(config.max_records),
            auto_pause: AutoPauseEvaluator::new(config.thresholds),
            decoder: Decoder::with_vendors(vendors),
            config,
            clock,
            running: false,
            manual_pause: false,
            origin: None,
            paused_since: None,
            paused_total: chrono::Duration::zero(),
            live: LiveReadout::default(),
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        if !self.running {
            SessionState::Idle
        } else if self.manual_pause {
            SessionState::ManuallyPaused
        } else if self.auto_pause.is_paused() {
            SessionState::AutoPaused
        } else {
            SessionState::Capturing
        }
    }

    /// Idle -> Capturing; resets the session clock and drops old records
    pub fn start(&mut self) -> Result<StateTransition, SessionError> {
        if self.running {
            log::warn!("start() while {}", self.state());
            return Err(SessionError::AlreadyRunning);
        }

        let now = self.clock.now();
        self.store.reset();
        self.auto_pause.reset();
        self.decoder.reset_negotiation();
        self.live = LiveReadout::default();
        self.stats = SessionStats::default();
        self.origin = Some(now);
        self.paused_since = None;
        self.paused_total = chrono::Duration::zero();
        self.manual_pause = false;
        self.running = true;

        log::info!("Capture started at {}", now);
        Ok(StateTransition {
            from: SessionState::Idle,
            to: SessionState::Capturing,
            at: now,
        })
    }

    /// Set the manual pause cause
    pub fn pause(&mut self) -> Result<Option<StateTransition>, SessionError> {
        self.set_manual_pause(true)
    }

    /// Clear the manual pause cause; an active auto-pause stays in force
    pub fn resume(&mut self) -> Result<Option<StateTransition>, SessionError> {
        self.set_manual_pause(false)
    }

    fn set_manual_pause(&mut self, paused: bool) -> Result<Option<StateTransition>, SessionError> {
        if !self.running {
            log::warn!("{} while idle", if paused { "pause()" } else { "resume()" });
            return Err(SessionError::NotRunning);
        }
        let before = self.state();
        self.manual_pause = paused;
        let now = self.clock.now();
        Ok(self.transition_from(before, now))
    }

    /// Any running state -> Idle
    ///
    /// Frames already handed to the session have been fully processed, so
    /// no partial record can be left behind.
    pub fn stop(&mut self) -> Result<StateTransition, SessionError> {
        if !self.running {
            log::warn!("stop() while idle");
            return Err(SessionError::NotRunning);
        }
        let from = self.state();
        let now = self.clock.now();
        self.running = false;
        self.manual_pause = false;
        self.paused_since = None;
        log::info!(
            "Capture stopped at {}: {} records stored, {} frames seen",
            now,
            self.store.len(),
            self.stats.frames_seen
        );
        Ok(StateTransition {
            from,
            to: SessionState::Idle,
            at: now,
        })
    }

    /// Replace the auto-pause thresholds; only allowed while idle
    pub fn set_thresholds(&mut self, thresholds: ThresholdConfig) -> Result<(), SessionError> {
        if self.running {
            return Err(SessionError::AlreadyRunning);
        }
        self.config.thresholds = thresholds;
        self.auto_pause.set_thresholds(thresholds);
        Ok(())
    }

    /// Drop stored records; indices keep counting
    pub fn clear_records(&mut self) {
        log::info!("Clearing {} records", self.store.len());
        self.store.clear();
    }

    /// Number the next records after `index`, e.g. past an imported export
    pub fn continue_numbering_after(&mut self, index: u64) {
        log::info!("Record numbering continues after {}", index);
        self.store.continue_after(index);
    }

    /// Feed one measurement sample to the live readout and auto-pause
    pub fn ingest_measurement(&mut self, sample: &MeasurementSample) -> Option<StateTransition> {
        self.live.measurement.merge(&sample.measurement);
        self.live.measured_at = Some(sample.timestamp);
        if !self.running {
            return None;
        }

        let before = self.state();
        match self.auto_pause.observe(sample)? {
            AutoPauseChange::Entered => {
                self.stats.auto_pauses += 1;
                log::info!("Auto-pause triggered by {:?}", self.auto_pause.triggered());
            }
            AutoPauseChange::Cleared => log::info!("Auto-pause cleared"),
        }
        self.transition_from(before, sample.timestamp)
    }

    /// Process one frame from the frame source
    pub fn ingest_frame(&mut self, frame: &RawFrame) -> FrameOutcome {
        self.stats.frames_seen += 1;
        let transition = frame
            .sample()
            .and_then(|sample| self.ingest_measurement(&sample));
        let outcome = |disposition| FrameOutcome {
            disposition,
            transition,
        };

        if !self.running {
            return outcome(FrameDisposition::Idle);
        }
        if !self.config.should_process_sop(frame.sop) {
            self.stats.frames_filtered += 1;
            return outcome(FrameDisposition::Filtered);
        }

        let message = match self.decoder.decode_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                log::warn!(
                    "Discarding frame at {} ({} bytes): {}",
                    frame.timestamp,
                    frame.bytes.len(),
                    e
                );
                self.stats.malformed_frames += 1;
                return outcome(FrameDisposition::Malformed);
            }
        };
        self.update_live(frame, &message);

        if !self.config.should_record(&message.header) {
            self.stats.frames_filtered += 1;
            return outcome(FrameDisposition::Filtered);
        }
        if self.state() != SessionState::Capturing {
            self.stats.frames_while_paused += 1;
            return outcome(FrameDisposition::Paused);
        }

        let evicted_before = self.store.evicted();
        let index = self.store.append(NewRecord {
            abs_time: frame.timestamp,
            rel_time: self.relative_time(frame.timestamp),
            direction: frame.direction,
            sop: frame.sop,
            message,
            // Frame readings were merged into the live readout above
            measurement: Some(self.live.measurement).filter(|m| !m.is_empty()),
            raw_bytes: frame.bytes.clone(),
        });
        self.stats.records_appended += 1;
        self.stats.records_evicted += self.store.evicted() - evicted_before;
        outcome(FrameDisposition::Recorded(index))
    }

    fn update_live(&mut self, frame: &RawFrame, message: &DecodedMessage) {
        self.live.last_message_type = Some(message.message_type());
        self.live.last_summary = Some(message.summary());
        self.live.source_pdos = self.decoder.negotiation().pdos().to_vec();
        if frame.sop.is_cable_plug() {
            let identity =
                CableIdentity::from_objects(message.objects.iter().filter_map(|o| o.as_vdm()));
            if let Some(identity) = identity {
                log::info!("Cable identified: {} {}", identity.vendor, identity.product_type);
                self.live.cable = Some(identity);
            }
        }
    }

    /// Pause bookkeeping for a state change observed at `at`
    fn transition_from(&mut self, before: SessionState, at: Timestamp) -> Option<StateTransition> {
        let after = self.state();
        if before == after {
            return None;
        }
        if !before.is_paused() && after.is_paused() {
            self.paused_since = Some(at);
        } else if before.is_paused() && !after.is_paused() {
            if let Some(since) = self.paused_since.take() {
                self.paused_total += (at - since).max(chrono::Duration::zero());
            }
        }
        log::info!("Session {} -> {}", before, after);
        Some(StateTransition {
            from: before,
            to: after,
            at,
        })
    }

    /// Offset from session start with paused intervals excluded
    fn relative_time(&self, at: Timestamp) -> std::time::Duration {
        let Some(origin) = self.origin else {
            return std::time::Duration::ZERO;
        };
        (at - origin - self.paused_total)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.config.thresholds
    }

    /// Read-only view of the record store
    pub fn records(&self) -> &RecordStore {
        &self.store
    }

    pub fn negotiation(&self) -> &NegotiationContext {
        self.decoder.negotiation()
    }

    pub fn live(&self) -> &LiveReadout {
        &self.live
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            thresholds: self.config.thresholds,
            records: self.store.snapshot(),
            live: self.live.clone(),
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::FixedSupplyPdo;
    use crate::types::Direction;
    use crate::vendors::VendorTable;
    use chrono::{Duration, Utc};

    struct Harness {
        clock: ManualClock,
        start: Timestamp,
        session: CaptureSession,
    }

    impl Harness {
        fn new(config: CaptureConfig) -> Self {
            let start = Utc::now();
            let clock = ManualClock::new(start);
            let session = CaptureSession::with_clock(
                config,
                Arc::new(VendorTable::new()),
                Arc::new(clock.clone()),
            );
            Self { clock, start, session }
        }

        fn at(&self, ms: i64) -> Timestamp {
            self.start + Duration::milliseconds(ms)
        }

        fn ps_rdy(&self, ms: i64) -> RawFrame {
            RawFrame::new(self.at(ms), Direction::SourceToSink, vec![0x46, 0x05])
        }

        fn control_at(&self, ms: i64) {
            self.clock.set(self.at(ms));
        }
    }

    #[test]
    fn test_control_errors() {
        let mut h = Harness::new(CaptureConfig::new());
        assert_eq!(h.session.pause(), Err(SessionError::NotRunning));
        assert_eq!(h.session.resume(), Err(SessionError::NotRunning));
        assert_eq!(h.session.stop(), Err(SessionError::NotRunning));

        h.session.start().unwrap();
        assert_eq!(h.session.start(), Err(SessionError::AlreadyRunning));
        assert_eq!(h.session.state(), SessionState::Capturing);
        assert_eq!(
            h.session.set_thresholds(ThresholdConfig::default()),
            Err(SessionError::AlreadyRunning)
        );
    }

    #[test]
    fn test_idle_frames_are_ignored() {
        let mut h = Harness::new(CaptureConfig::new());
        let outcome = h.session.ingest_frame(&h.ps_rdy(0));
        assert_eq!(outcome.disposition, FrameDisposition::Idle);
        assert!(h.session.records().is_empty());
    }

    #[test]
    fn test_pause_decodes_but_does_not_store() {
        let mut h = Harness::new(CaptureConfig::new());
        h.session.start().unwrap();
        assert_eq!(
            h.session.ingest_frame(&h.ps_rdy(10)).disposition,
            FrameDisposition::Recorded(1)
        );

        h.control_at(20);
        let transition = h.session.pause().unwrap().unwrap();
        assert_eq!(transition.to, SessionState::ManuallyPaused);
        assert_eq!(h.session.pause().unwrap(), None);

        let caps = RawFrame::new(
            h.at(30),
            Direction::SourceToSink,
            [
                vec![0xA1, 0x11],
                FixedSupplyPdo::new(5000, 3000).to_word().to_le_bytes().to_vec(),
            ]
            .concat(),
        );
        assert_eq!(h.session.ingest_frame(&caps).disposition, FrameDisposition::Paused);
        assert_eq!(h.session.live().source_pdos.len(), 1);
        assert_eq!(h.session.records().len(), 1);
        assert_eq!(h.session.stats().frames_while_paused, 1);
    }

    #[test]
    fn test_relative_time_excludes_pauses() {
        let mut h = Harness::new(CaptureConfig::new());
        h.session.start().unwrap();
        h.control_at(100);
        h.session.pause().unwrap();
        h.control_at(400);
        h.session.resume().unwrap();

        h.session.ingest_frame(&h.ps_rdy(500));
        let record = h.session.records().get(1).unwrap();
        assert_eq!(record.rel_time, std::time::Duration::from_millis(200));
        assert_eq!(record.abs_time, h.at(500));
    }

    #[test]
    fn test_both_pause_causes_must_clear() {
        let thresholds = ThresholdConfig::new().with_voltage(20_000, 15_000);
        let mut h = Harness::new(CaptureConfig::new().with_thresholds(thresholds));
        h.session.start().unwrap();

        let sample = |ms: i64, mv: u32| MeasurementSample {
            timestamp: h.start + Duration::milliseconds(ms),
            measurement: Measurement::new(Some(mv), None),
        };

        let transition = h.session.ingest_measurement(&sample(0, 21_000)).unwrap();
        assert_eq!(transition.to, SessionState::AutoPaused);

        // Manual pause takes precedence in the resolved state
        let transition = h.session.pause().unwrap().unwrap();
        assert_eq!(transition.to, SessionState::ManuallyPaused);

        // Auto cause clears, manual holds
        assert_eq!(h.session.ingest_measurement(&sample(100, 5_000)), None);
        assert_eq!(h.session.state(), SessionState::ManuallyPaused);
        assert_eq!(h.session.ingest_frame(&h.ps_rdy(150)).disposition, FrameDisposition::Paused);

        // Auto cause returns, then manual resume leaves the session auto-paused
        h.session.ingest_measurement(&sample(200, 21_000));
        let transition = h.session.resume().unwrap().unwrap();
        assert_eq!(transition.to, SessionState::AutoPaused);
        assert_eq!(h.session.ingest_frame(&h.ps_rdy(250)).disposition, FrameDisposition::Paused);

        let transition = h.session.ingest_measurement(&sample(300, 5_000)).unwrap();
        assert_eq!(transition.to, SessionState::Capturing);
        assert!(matches!(
            h.session.ingest_frame(&h.ps_rdy(350)).disposition,
            FrameDisposition::Recorded(_)
        ));
        assert_eq!(h.session.stats().auto_pauses, 2);
    }

    #[test]
    fn test_frame_measurement_drives_auto_pause() {
        let thresholds = ThresholdConfig::new().with_current(3_000, 1_000);
        let mut h = Harness::new(CaptureConfig::new().with_thresholds(thresholds));
        h.session.start().unwrap();

        let frame = h.ps_rdy(10).with_measurement(Some(9_000), Some(3_100));
        let outcome = h.session.ingest_frame(&frame);
        assert_eq!(outcome.disposition, FrameDisposition::Paused);
        assert_eq!(outcome.transition.unwrap().to, SessionState::AutoPaused);
        assert_eq!(h.session.live().measurement.power_mw(), Some(27_900));
    }

    #[test]
    fn test_malformed_frame_is_counted_not_stored() {
        let mut h = Harness::new(CaptureConfig::new());
        h.session.start().unwrap();
        let bad = RawFrame::new(h.at(5), Direction::SinkToSource, vec![0x82, 0x10, 0x00, 0x00]);
        assert_eq!(h.session.ingest_frame(&bad).disposition, FrameDisposition::Malformed);
        assert!(h.session.records().is_empty());
        assert_eq!(h.session.stats().malformed_frames, 1);
        assert_eq!(h.session.state(), SessionState::Capturing);
    }

    #[test]
    fn test_filters() {
        let config = CaptureConfig::new()
            .with_sop_filter(vec![crate::types::Sop::Sop])
            .with_ignore_good_crc(true);
        let mut h = Harness::new(config);
        h.session.start().unwrap();

        let good_crc = RawFrame::new(h.at(1), Direction::SinkToSource, vec![0x81, 0x06]);
        assert_eq!(h.session.ingest_frame(&good_crc).disposition, FrameDisposition::Filtered);
        let cable = h.ps_rdy(2).with_sop(crate::types::Sop::SopPrime);
        assert_eq!(h.session.ingest_frame(&cable).disposition, FrameDisposition::Filtered);
        assert_eq!(h.session.stats().frames_filtered, 2);
    }

    #[test]
    fn test_start_resets_and_clear_keeps_counter() {
        let mut h = Harness::new(CaptureConfig::new().with_max_records(2));
        h.session.start().unwrap();
        for ms in 0..3 {
            h.session.ingest_frame(&h.ps_rdy(ms));
        }
        assert_eq!(h.session.stats().records_evicted, 1);
        h.session.clear_records();
        assert_eq!(h.session.ingest_frame(&h.ps_rdy(4)).disposition, FrameDisposition::Recorded(4));

        let snapshot = h.session.snapshot();
        h.session.stop().unwrap();
        h.session.start().unwrap();
        assert!(h.session.records().is_empty());
        assert_eq!(h.session.ingest_frame(&h.ps_rdy(5)).disposition, FrameDisposition::Recorded(1));
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].index, 4);
    }
}
