//! Decode worker
//!
//! Producer/consumer split: the frame source runs on its own thread and
//! pushes into a bounded queue; a single worker thread owns the capture
//! session and consumes the queue in order. Control commands travel through
//! the same queue, so a `stop()` is applied only after every frame queued
//! before it has been decoded and stored.
//!
//! New records reach consumers in batches, flushed once a batch holds
//! `batch_max_records` records or `batch_interval_ms` has elapsed since the
//! batch was opened. An idle worker blocks on the queue.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ThresholdConfig;
use crate::session::{CaptureSession, FrameDisposition, SessionSnapshot, StateTransition};
use crate::store::CaptureRecord;
use crate::types::{MeasurementSample, RawFrame, SessionError};

/// Records and state changes produced since the previous batch
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<Arc<CaptureRecord>>,
    pub transitions: Vec<StateTransition>,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.transitions.is_empty()
    }
}

enum Control {
    Start,
    Pause,
    Resume,
    Stop,
    SetThresholds(ThresholdConfig),
    ClearRecords,
    Snapshot,
}

enum Reply {
    Transition(Result<Option<StateTransition>, SessionError>),
    Done(Result<(), SessionError>),
    Snapshot(Box<SessionSnapshot>),
}

enum WorkerInput {
    Frame(RawFrame),
    Measurement(MeasurementSample),
    Control(Control, Sender<Reply>),
    Shutdown,
}

/// Producer handle for the frame source thread
#[derive(Clone)]
pub struct FrameFeed {
    input: SyncSender<WorkerInput>,
}

impl FrameFeed {
    /// Queue a frame, blocking while the queue is full
    pub fn send_frame(&self, frame: RawFrame) -> Result<(), SessionError> {
        self.input
            .send(WorkerInput::Frame(frame))
            .map_err(|_| SessionError::WorkerDisconnected)
    }

    /// Queue a standalone measurement sample
    pub fn send_measurement(&self, sample: MeasurementSample) -> Result<(), SessionError> {
        self.input
            .send(WorkerInput::Measurement(sample))
            .map_err(|_| SessionError::WorkerDisconnected)
    }
}

/// Handle to the worker thread owning a capture session
pub struct CaptureWorker {
    input: SyncSender<WorkerInput>,
    batches: Option<Receiver<RecordBatch>>,
    handle: Option<JoinHandle<CaptureSession>>,
}

impl CaptureWorker {
    /// Move the session onto a new worker thread
    pub fn spawn(session: CaptureSession) -> std::io::Result<Self> {
        let config = session.config();
        let (input_tx, input_rx) = mpsc::sync_channel(config.queue_capacity.max(1));
        let (batch_tx, batch_rx) = mpsc::channel();
        let batch_max = config.batch_max_records.max(1);
        let interval = config.batch_interval();

        let handle = thread::Builder::new()
            .name("pd-decode".to_string())
            .spawn(move || run(session, input_rx, batch_tx, batch_max, interval))?;

        log::debug!("Decode worker spawned");
        Ok(Self {
            input: input_tx,
            batches: Some(batch_rx),
            handle: Some(handle),
        })
    }

    /// A cloneable producer handle
    pub fn feed(&self) -> FrameFeed {
        FrameFeed {
            input: self.input.clone(),
        }
    }

    /// Take the batch receiver; only the first call returns it
    pub fn take_batches(&mut self) -> Option<Receiver<RecordBatch>> {
        self.batches.take()
    }

    pub fn start(&self) -> Result<Option<StateTransition>, SessionError> {
        self.transition(Control::Start)
    }

    pub fn pause(&self) -> Result<Option<StateTransition>, SessionError> {
        self.transition(Control::Pause)
    }

    pub fn resume(&self) -> Result<Option<StateTransition>, SessionError> {
        self.transition(Control::Resume)
    }

    /// Stop after draining every frame queued before this call
    pub fn stop(&self) -> Result<Option<StateTransition>, SessionError> {
        self.transition(Control::Stop)
    }

    pub fn set_thresholds(&self, thresholds: ThresholdConfig) -> Result<(), SessionError> {
        match self.request(Control::SetThresholds(thresholds))? {
            Reply::Done(result) => result,
            _ => Err(SessionError::WorkerDisconnected),
        }
    }

    pub fn clear_records(&self) -> Result<(), SessionError> {
        match self.request(Control::ClearRecords)? {
            Reply::Done(result) => result,
            _ => Err(SessionError::WorkerDisconnected),
        }
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        match self.request(Control::Snapshot)? {
            Reply::Snapshot(snapshot) => Ok(*snapshot),
            _ => Err(SessionError::WorkerDisconnected),
        }
    }

    /// Drain the queue, stop the thread and hand the session back
    pub fn shutdown(mut self) -> Result<CaptureSession, SessionError> {
        let _ = self.input.send(WorkerInput::Shutdown);
        let handle = self.handle.take().ok_or(SessionError::WorkerDisconnected)?;
        handle.join().map_err(|_| {
            log::error!("Decode worker panicked");
            SessionError::WorkerDisconnected
        })
    }

    fn transition(&self, control: Control) -> Result<Option<StateTransition>, SessionError> {
        match self.request(control)? {
            Reply::Transition(result) => result,
            _ => Err(SessionError::WorkerDisconnected),
        }
    }

    fn request(&self, control: Control) -> Result<Reply, SessionError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.input
            .send(WorkerInput::Control(control, reply_tx))
            .map_err(|_| SessionError::WorkerDisconnected)?;
        reply_rx.recv().map_err(|_| SessionError::WorkerDisconnected)
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.input.send(WorkerInput::Shutdown);
            let _ = handle.join();
        }
    }
}

fn run(
    mut session: CaptureSession,
    input: Receiver<WorkerInput>,
    batches: Sender<RecordBatch>,
    batch_max: usize,
    interval: Duration,
) -> CaptureSession {
    let mut pending = RecordBatch::default();
    let mut last_flush = Instant::now();

    loop {
        // Nothing to flush, so wait for input without a deadline
        let idle = pending.is_empty();
        let received = if idle {
            input.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            input.recv_timeout(interval.saturating_sub(last_flush.elapsed()))
        };
        if idle {
            last_flush = Instant::now();
        }
        match received {
            Ok(WorkerInput::Frame(frame)) => {
                let outcome = session.ingest_frame(&frame);
                pending.transitions.extend(outcome.transition);
                if let FrameDisposition::Recorded(index) = outcome.disposition {
                    if let Some(record) = session.records().get(index) {
                        pending.records.push(Arc::clone(record));
                    }
                }
            }
            Ok(WorkerInput::Measurement(sample)) => {
                pending.transitions.extend(session.ingest_measurement(&sample));
            }
            Ok(WorkerInput::Control(control, reply)) => {
                let is_stop = matches!(control, Control::Stop);
                let response = apply(&mut session, control);
                if let Reply::Transition(Ok(Some(transition))) = &response {
                    pending.transitions.push(*transition);
                }
                if is_stop {
                    flush(&batches, &mut pending);
                    last_flush = Instant::now();
                }
                let _ = reply.send(response);
            }
            Ok(WorkerInput::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                flush(&batches, &mut pending);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if pending.records.len() >= batch_max || last_flush.elapsed() >= interval {
            flush(&batches, &mut pending);
            last_flush = Instant::now();
        }
    }

    log::debug!("Decode worker exiting");
    session
}

fn apply(session: &mut CaptureSession, control: Control) -> Reply {
    match control {
        Control::Start => Reply::Transition(session.start().map(Some)),
        Control::Pause => Reply::Transition(session.pause()),
        Control::Resume => Reply::Transition(session.resume()),
        Control::Stop => Reply::Transition(session.stop().map(Some)),
        Control::SetThresholds(thresholds) => Reply::Done(session.set_thresholds(thresholds)),
        Control::ClearRecords => {
            session.clear_records();
            Reply::Done(Ok(()))
        }
        Control::Snapshot => Reply::Snapshot(Box::new(session.snapshot())),
    }
}

fn flush(batches: &Sender<RecordBatch>, pending: &mut RecordBatch) {
    if pending.is_empty() {
        return;
    }
    let batch = std::mem::take(pending);
    log::trace!(
        "Flushing batch: {} records, {} transitions",
        batch.records.len(),
        batch.transitions.len()
    );
    if batches.send(batch).is_err() {
        log::trace!("Batch receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;
    use crate::session::SessionState;
    use crate::types::Direction;
    use crate::vendors::VendorTable;
    use chrono::Utc;

    fn worker(config: CaptureConfig) -> CaptureWorker {
        CaptureWorker::spawn(CaptureSession::new(config, Arc::new(VendorTable::new()))).unwrap()
    }

    fn ps_rdy() -> RawFrame {
        RawFrame::new(Utc::now(), Direction::SourceToSink, vec![0x46, 0x05])
    }

    #[test]
    fn test_stop_drains_queued_frames() {
        let mut worker = worker(CaptureConfig::new().with_batching(1000, 60_000));
        let batches = worker.take_batches().unwrap();
        assert!(worker.take_batches().is_none());

        worker.start().unwrap();
        let feed = worker.feed();
        let producer = thread::spawn(move || {
            for _ in 0..50 {
                feed.send_frame(ps_rdy()).unwrap();
            }
        });
        producer.join().unwrap();

        let transition = worker.stop().unwrap().unwrap();
        assert_eq!(transition.to, SessionState::Idle);

        let records: Vec<u64> = batches
            .try_iter()
            .flat_map(|batch| batch.records)
            .map(|record| record.index)
            .collect();
        assert_eq!(records, (1..=50).collect::<Vec<_>>());

        let session = worker.shutdown().unwrap();
        assert_eq!(session.records().len(), 50);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_batches_respect_size_limit() {
        let mut worker = worker(CaptureConfig::new().with_batching(10, 60_000));
        let batches = worker.take_batches().unwrap();
        worker.start().unwrap();
        let feed = worker.feed();
        for _ in 0..25 {
            feed.send_frame(ps_rdy()).unwrap();
        }
        worker.stop().unwrap();

        let sizes: Vec<usize> = batches.try_iter().map(|batch| batch.records.len()).collect();
        assert!(sizes.iter().all(|&n| n <= 10));
        assert_eq!(sizes.iter().sum::<usize>(), 25);
    }

    #[test]
    fn test_control_errors_cross_the_thread() {
        let worker = worker(CaptureConfig::new());
        assert_eq!(worker.pause(), Err(SessionError::NotRunning));
        worker.start().unwrap();
        assert_eq!(worker.start(), Err(SessionError::AlreadyRunning));
        assert_eq!(
            worker.set_thresholds(ThresholdConfig::default()),
            Err(SessionError::AlreadyRunning)
        );
        assert_eq!(worker.snapshot().unwrap().state, SessionState::Capturing);
    }

    #[test]
    fn test_snapshot_and_clear() {
        let worker = worker(CaptureConfig::new());
        worker.start().unwrap();
        let feed = worker.feed();
        feed.send_frame(ps_rdy()).unwrap();
        feed.send_frame(ps_rdy()).unwrap();

        let snapshot = worker.snapshot().unwrap();
        assert_eq!(snapshot.records.len(), 2);
        worker.clear_records().unwrap();
        assert!(worker.snapshot().unwrap().records.is_empty());
        assert_eq!(snapshot.records.len(), 2);
    }

    #[test]
    fn test_zero_interval_still_delivers() {
        let mut worker = worker(CaptureConfig::new().with_batching(1000, 0));
        let batches = worker.take_batches().unwrap();
        worker.start().unwrap();
        let feed = worker.feed();
        feed.send_frame(ps_rdy()).unwrap();

        let mut delivered = Vec::new();
        while delivered.is_empty() {
            let batch = batches.recv_timeout(Duration::from_secs(5)).unwrap();
            delivered.extend(batch.records.iter().map(|record| record.index));
        }
        assert_eq!(delivered, vec![1]);

        // Idle worker still answers control requests
        thread::sleep(Duration::from_millis(20));
        assert_eq!(worker.snapshot().unwrap().records.len(), 1);
    }

    #[test]
    fn test_feed_after_shutdown_reports_disconnect() {
        let worker = worker(CaptureConfig::new());
        let feed = worker.feed();
        worker.shutdown().unwrap();
        assert_eq!(feed.send_frame(ps_rdy()), Err(SessionError::WorkerDisconnected));
    }
}
