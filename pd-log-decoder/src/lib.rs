//! PD Log Decoder Library
//!
//! Decodes USB Power Delivery traffic sniffed from the CC line and records
//! it in a capture session.
//!
//! # Architecture
//!
//! - Header and data object decoding is pure: bytes plus an explicit
//!   negotiation context in, typed messages out
//! - A [`Decoder`] threads the negotiation context from one message to the
//!   next and resolves vendor ids through an injected lookup table
//! - A [`CaptureSession`] owns the session state, auto-pause thresholds and
//!   a ring-buffer [`RecordStore`]
//! - A [`CaptureWorker`] runs the session on a dedicated thread behind a
//!   bounded frame queue and hands out record batches
//!
//! Rendering and export live in the application layer (pd-log-cli).
//!
//! # Example Usage
//!
//! ```
//! use pd_log_decoder::{
//!     CaptureConfig, CaptureSession, Direction, FrameDisposition, RawFrame, VendorTable,
//! };
//! use chrono::Utc;
//! use std::sync::Arc;
//!
//! let mut session = CaptureSession::new(CaptureConfig::new(), Arc::new(VendorTable::new()));
//! session.start().unwrap();
//!
//! // PS_RDY from the source
//! let frame = RawFrame::new(Utc::now(), Direction::SourceToSink, vec![0x46, 0x05]);
//! let outcome = session.ingest_frame(&frame);
//! assert_eq!(outcome.disposition, FrameDisposition::Recorded(1));
//!
//! for record in session.records().range(1, 2) {
//!     println!("{} {} {}", record.index, record.message_type(), record.summary());
//! }
//! ```

// Public modules
pub mod config;
pub mod decoder;
pub mod formats;
pub mod header;
pub mod message_decoder;
pub mod negotiation;
pub mod objects;
pub mod session;
pub mod store;
pub mod types;
pub mod vendors;
pub mod worker;

// Re-export main types for convenience
pub use config::{CaptureConfig, ThresholdConfig};
pub use decoder::{Decoder, DecodingIterator};
pub use formats::{CaptureEvent, CaptureSource, ControlAction, JsonlReplay};
pub use header::{decode_header, Header, MessageType};
pub use message_decoder::{DecodeNote, DecodedMessage, MessageDecoder};
pub use negotiation::{AdvertisedPdo, NegotiationContext};
pub use objects::{classify_object, DataObject, ObjectContext};
pub use session::{
    CaptureSession, Clock, FrameDisposition, FrameOutcome, LiveReadout, ManualClock,
    SessionSnapshot, SessionState, SessionStats, StateTransition, SystemClock,
};
pub use store::{CaptureRecord, RecordStore};
pub use types::{
    DecoderError, Direction, Measurement, MeasurementSample, RawFrame, Result, SessionError, Sop,
    Timestamp,
};
pub use vendors::{VendorLabel, VendorLookup, VendorTable};
pub use worker::{CaptureWorker, FrameFeed, RecordBatch};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        let decoder = Decoder::new();
        assert!(decoder.negotiation().is_empty());
        assert!(!VERSION.is_empty());
    }
}
