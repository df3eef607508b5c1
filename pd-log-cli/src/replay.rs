//! Capture replay
//!
//! Feeds a recorded capture file through the decode worker the same way a
//! live frame source would: frames and measurements go through the bounded
//! queue, control events are applied in file order.

use anyhow::{Context, Result};
use pd_log_decoder::{
    CaptureConfig, CaptureEvent, CaptureRecord, CaptureSession, CaptureSource, CaptureWorker,
    Clock, ControlAction, JsonlReplay, LiveReadout, ManualClock, SessionState, SessionStats,
    StateTransition, VendorTable,
};
use std::path::Path;
use std::sync::Arc;
use std::thread;

/// Outcome of replaying one capture file
#[derive(Debug)]
pub struct ReplaySummary {
    pub records: Vec<Arc<CaptureRecord>>,
    pub transitions: Vec<StateTransition>,
    pub stats: SessionStats,
    pub live: LiveReadout,
    pub batches: usize,
    pub final_state: SessionState,
}

/// Replay `path` through a fresh capture session
///
/// A capture without an explicit `start` control is started at its first
/// event. Control events that do not apply to the current state are logged
/// and skipped. With `continue_after`, record numbering picks up after that
/// index instead of starting at 1.
pub fn replay_capture(
    path: &Path,
    config: CaptureConfig,
    vendors: VendorTable,
    max_frames: Option<usize>,
    continue_after: Option<u64>,
) -> Result<ReplaySummary> {
    let events =
        JsonlReplay::open(path).with_context(|| format!("Failed to open capture: {:?}", path))?;
    let mut events = events.peekable();

    let first_timestamp = match events.peek() {
        Some(Ok(event)) => event.timestamp(),
        _ => chrono::Utc::now(),
    };
    let clock = ManualClock::new(first_timestamp);
    let mut session =
        CaptureSession::with_clock(config, Arc::new(vendors), Arc::new(clock.clone()));
    if let Some(index) = continue_after {
        session.continue_numbering_after(index);
    }

    let mut worker = CaptureWorker::spawn(session).context("Failed to spawn decode worker")?;
    let batches = worker
        .take_batches()
        .context("Batch receiver already taken")?;
    let collector = thread::Builder::new()
        .name("pd-collect".into())
        .spawn(move || batches.into_iter().collect::<Vec<_>>())
        .context("Failed to spawn batch collector")?;

    let feed = worker.feed();
    let mut frames_sent = 0usize;
    let mut started = false;

    for event in events {
        let event = event.with_context(|| format!("Failed to read capture: {:?}", path))?;

        if !started && !matches!(event, CaptureEvent::Control { .. }) {
            log::info!("No start event before first frame, starting capture implicitly");
            clock.set(event.timestamp());
            worker.start()?;
            started = true;
        }

        match event {
            CaptureEvent::Frame(frame) => {
                if max_frames.is_some_and(|max| frames_sent >= max) {
                    log::info!("Reached frame limit ({})", frames_sent);
                    break;
                }
                feed.send_frame(frame)?;
                frames_sent += 1;
            }
            CaptureEvent::Measurement(sample) => feed.send_measurement(sample)?,
            CaptureEvent::Control { timestamp, action } => {
                clock.set(timestamp);
                started |= action == ControlAction::Start;
                let result = match action {
                    ControlAction::Start => worker.start(),
                    ControlAction::Pause => worker.pause(),
                    ControlAction::Resume => worker.resume(),
                    ControlAction::Stop => worker.stop(),
                };
                match result {
                    Ok(Some(transition)) => {
                        log::debug!(
                            "{} at {}: {} -> {}",
                            action,
                            timestamp,
                            transition.from,
                            transition.to
                        )
                    }
                    Ok(None) => log::debug!("{} at {}: no state change", action, timestamp),
                    Err(e) => log::warn!("Ignoring {} at {}: {}", action, timestamp, e),
                }
            }
        }
    }

    let snapshot = worker.snapshot()?;
    if snapshot.state != SessionState::Idle {
        log::debug!("Capture still running at end of file, stopping");
        worker.stop()?;
    }
    log::debug!("Clock at end of replay: {}", clock.now());

    // The worker thread owns the batch sender, so joining it ends the collector
    drop(feed);
    let session = worker.shutdown()?;
    let batches = collector
        .join()
        .map_err(|_| anyhow::anyhow!("Batch collector panicked"))?;

    let transitions = batches
        .iter()
        .flat_map(|batch| batch.transitions.iter().copied())
        .collect();
    log::info!(
        "Replayed {} frames: {} records in {} batches",
        frames_sent,
        session.records().len(),
        batches.len()
    );

    Ok(ReplaySummary {
        records: session.records().snapshot(),
        transitions,
        stats: session.stats(),
        live: session.live().clone(),
        batches: batches.len(),
        final_state: session.state(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn capture(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    /// Replay with the default config and no vendor names
    fn replay_default(
        file: &tempfile::NamedTempFile,
        max_frames: Option<usize>,
        continue_after: Option<u64>,
    ) -> Result<ReplaySummary> {
        let config = CaptureConfig::new();
        replay_capture(file.path(), config, VendorTable::new(), max_frames, continue_after)
    }

    const CAPS: &str = r#"{"kind":"frame","timestamp":"2024-05-01T10:00:00.010Z","direction":"source_to_sink","bytes":"a1212c9101082cd10200"}"#;
    const PS_RDY: &str = r#"{"kind":"frame","timestamp":"2024-05-01T10:00:00.250Z","direction":"source_to_sink","bytes":"4605"}"#;

    #[test]
    fn test_implicit_start_and_stop() {
        let file = capture(&[CAPS, PS_RDY]);
        let summary = replay_default(&file, None, None).unwrap();
        assert_eq!(summary.records.len(), 2);
        assert_eq!(summary.records[0].rel_time, std::time::Duration::ZERO);
        assert_eq!(summary.records[1].rel_time, std::time::Duration::from_millis(240));
        assert_eq!(summary.final_state, SessionState::Idle);
        assert_eq!(summary.live.source_pdos.len(), 2);
        let states: Vec<_> = summary.transitions.iter().map(|t| t.to).collect();
        assert_eq!(states, vec![SessionState::Capturing, SessionState::Idle]);
    }

    #[test]
    fn test_invalid_control_is_not_fatal() {
        let file = capture(&[
            r#"{"kind":"control","timestamp":"2024-05-01T10:00:00Z","action":"resume"}"#,
            r#"{"kind":"control","timestamp":"2024-05-01T10:00:00Z","action":"start"}"#,
            CAPS,
            r#"{"kind":"control","timestamp":"2024-05-01T10:00:00.100Z","action":"start"}"#,
            PS_RDY,
        ]);
        let summary = replay_default(&file, None, None).unwrap();
        assert_eq!(summary.records.len(), 2);
        assert_eq!(summary.stats.frames_seen, 2);
    }

    #[test]
    fn test_frame_limit() {
        let file = capture(&[CAPS, PS_RDY, PS_RDY]);
        let summary = replay_default(&file, Some(1), None).unwrap();
        assert_eq!(summary.records.len(), 1);
    }

    #[test]
    fn test_numbering_continues_after_import() {
        let file = capture(&[CAPS, PS_RDY]);
        let summary = replay_default(&file, None, Some(12)).unwrap();
        let indices: Vec<u64> = summary.records.iter().map(|record| record.index).collect();
        assert_eq!(indices, vec![13, 14]);
    }

    #[test]
    fn test_bad_line_is_an_error() {
        let file = capture(&[CAPS, "{not json"]);
        let err = replay_default(&file, None, None).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
    }

    #[test]
    fn test_sample_capture() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("samples");
        let config = crate::config::load_config(&root.join("config.example.toml")).unwrap();
        let vendors = config.vendor_table().unwrap();
        let summary =
            replay_capture(&root.join("negotiation.jsonl"), config.capture, vendors, None, None)
                .unwrap();

        assert_eq!(summary.stats.frames_seen, 16);
        assert_eq!(summary.stats.malformed_frames, 1);
        assert_eq!(summary.stats.frames_while_paused, 2);
        assert_eq!(summary.stats.auto_pauses, 1);
        assert_eq!(summary.records.len(), 13);

        let states: Vec<_> = summary.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                SessionState::Capturing,
                SessionState::ManuallyPaused,
                SessionState::Capturing,
                SessionState::AutoPaused,
                SessionState::Capturing,
                SessionState::Idle,
            ]
        );

        // 200 ms manual pause plus 800 ms auto-pause excluded
        let get_sink_cap = &summary.records[11];
        assert_eq!(get_sink_cap.summary(), "Get_Sink_Cap");
        assert_eq!(get_sink_cap.rel_time, std::time::Duration::from_millis(1500));

        let cable = summary.live.cable.as_ref().unwrap();
        assert_eq!(cable.vendor.to_string(), "Apple (0x05AC)");
        assert_eq!(cable.product_id, Some(0x1460));
        assert_eq!(summary.live.source_pdos.len(), 3);
    }
}
