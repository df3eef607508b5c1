//! Record store
//!
//! Bounded ring buffer of capture records. Indices come from a counter that
//! is independent of occupancy: eviction drops the oldest record but never
//! renumbers the remaining ones, so exported references stay valid.

use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::header::MessageType;
use crate::message_decoder::DecodedMessage;
use crate::types::{Direction, Measurement, Sop, Timestamp};

/// Index of the first record of a session
pub const FIRST_INDEX: u64 = 1;

/// One captured and decoded message
///
/// Immutable once stored; shared with readers through `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureRecord {
    pub index: u64,
    pub abs_time: Timestamp,
    /// Offset from session start with paused intervals excluded
    #[serde(serialize_with = "serialize_secs")]
    pub rel_time: Duration,
    pub direction: Direction,
    pub sop: Sop,
    pub message: DecodedMessage,
    /// Last known VBUS measurement when the frame arrived
    pub measurement: Option<Measurement>,
    #[serde(serialize_with = "serialize_hex")]
    pub raw_bytes: Vec<u8>,
}

impl CaptureRecord {
    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    pub fn summary(&self) -> String {
        self.message.summary()
    }
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

fn serialize_hex<T: AsRef<[u8]>, S: Serializer>(
    bytes: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes.as_ref()))
}

/// Record contents before the store assigns an index
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub abs_time: Timestamp,
    pub rel_time: Duration,
    pub direction: Direction,
    pub sop: Sop,
    pub message: DecodedMessage,
    pub measurement: Option<Measurement>,
    pub raw_bytes: Vec<u8>,
}

/// Ring buffer of capture records
#[derive(Debug)]
pub struct RecordStore {
    records: VecDeque<Arc<CaptureRecord>>,
    capacity: usize,
    next_index: u64,
    /// Where numbering restarts on `reset`
    restart_index: u64,
    evicted: u64,
}

impl RecordStore {
    /// Create a store holding at most `capacity` records (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            next_index: FIRST_INDEX,
            restart_index: FIRST_INDEX,
            evicted: 0,
        }
    }

    /// Store a record and return its index, evicting the oldest on overflow
    pub fn append(&mut self, record: NewRecord) -> u64 {
        let index = self.next_index;
        self.next_index += 1;

        if self.records.len() == self.capacity {
            if let Some(oldest) = self.records.pop_front() {
                log::trace!("Evicting record {}", oldest.index);
                self.evicted += 1;
            }
        }

        self.records.push_back(Arc::new(CaptureRecord {
            index,
            abs_time: record.abs_time,
            rel_time: record.rel_time,
            direction: record.direction,
            sop: record.sop,
            message: record.message,
            measurement: record.measurement,
            raw_bytes: record.raw_bytes,
        }));
        index
    }

    /// Records with `lo <= index < hi`, oldest first
    ///
    /// The returned iterator is lazy and can be cloned to restart it.
    pub fn range(
        &self,
        lo: u64,
        hi: u64,
    ) -> impl Iterator<Item = &Arc<CaptureRecord>> + Clone + '_ {
        let (start, end) = match self.first_index() {
            // Stored indices are contiguous, so offsets follow from the first one
            Some(first) => {
                let offset = |index: u64| {
                    (index.saturating_sub(first) as usize).min(self.records.len())
                };
                let start = offset(lo);
                (start, offset(hi).max(start))
            }
            None => (0, 0),
        };
        self.records.range(start..end)
    }

    pub fn get(&self, index: u64) -> Option<&Arc<CaptureRecord>> {
        let first = self.first_index()?;
        let offset = index.checked_sub(first)?;
        self.records.get(offset as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CaptureRecord>> + Clone + '_ {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn first_index(&self) -> Option<u64> {
        self.records.front().map(|record| record.index)
    }

    pub fn last_index(&self) -> Option<u64> {
        self.records.back().map(|record| record.index)
    }

    /// Index the next appended record will get
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Drop stored records and number new ones after `index`
    ///
    /// Used when earlier records were imported from an export, so new ones
    /// do not reuse their indices. The offset survives a later `reset`.
    pub fn continue_after(&mut self, index: u64) {
        self.records.clear();
        self.restart_index = index.saturating_add(1).max(FIRST_INDEX);
        self.next_index = self.restart_index;
    }

    /// Records dropped by the ring buffer so far
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Drop every stored record; the index counter keeps counting
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Drop every record and restart numbering for a new session
    pub fn reset(&mut self) {
        self.records.clear();
        self.next_index = self.restart_index;
        self.evicted = 0;
    }

    /// Immutable view of the current contents
    pub fn snapshot(&self) -> Vec<Arc<CaptureRecord>> {
        self.records.iter().cloned().collect()
    }
}
