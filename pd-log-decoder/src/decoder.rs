//! Main decoder API
//!
//! The Decoder struct owns the state that links consecutive messages: the
//! negotiation context built from the last Source Capabilities, and the
//! injected vendor table. Everything below it is a pure function of the
//! frame bytes plus that state.

use std::path::Path;
use std::sync::Arc;

use crate::formats::{frames, CaptureSource, JsonlReplay};
use crate::header::{DataMessage, MessageType};
use crate::message_decoder::{DecodedMessage, MessageDecoder};
use crate::negotiation::NegotiationContext;
use crate::types::{DecoderError, RawFrame, Result, Sop};
use crate::vendors::{VendorLookup, VendorTable};

/// Stateful frame decoder - entry point for decoding captured traffic
pub struct Decoder {
    /// Vendor id lookup, shared read-only
    vendors: Arc<dyn VendorLookup>,
    /// Source capabilities the next request will be matched against
    negotiation: NegotiationContext,
    frames_decoded: u64,
}

impl Decoder {
    /// Create a decoder with an empty vendor table
    pub fn new() -> Self {
        Self::with_vendors(Arc::new(VendorTable::new()))
    }

    /// Create a decoder resolving vendor ids through `vendors`
    pub fn with_vendors(vendors: Arc<dyn VendorLookup>) -> Self {
        Self {
            vendors,
            negotiation: NegotiationContext::new(),
            frames_decoded: 0,
        }
    }

    /// Decode one frame and update the negotiation context
    ///
    /// A Source Capabilities message on SOP replaces the context used for
    /// the requests that follow it.
    ///
    /// # Example
    /// ```
    /// use pd_log_decoder::{Decoder, Direction, RawFrame};
    /// use chrono::Utc;
    ///
    /// let mut decoder = Decoder::new();
    /// let bytes = vec![0xA1, 0x11, 0x2C, 0x91, 0x01, 0x08];
    /// let caps = RawFrame::new(Utc::now(), Direction::SourceToSink, bytes);
    /// let message = decoder.decode_frame(&caps).unwrap();
    /// assert_eq!(message.summary(), "Fixed 5.00V 3.00A");
    /// assert_eq!(decoder.negotiation().pdos().len(), 1);
    /// ```
    pub fn decode_frame(&mut self, frame: &RawFrame) -> Result<DecodedMessage> {
        let message = MessageDecoder::decode(
            &frame.bytes,
            frame.sop,
            &self.negotiation,
            self.vendors.as_ref(),
        )?;
        self.frames_decoded += 1;

        log::debug!(
            "{} {} {}: {}",
            frame.direction,
            frame.sop,
            message.message_type(),
            message.summary()
        );

        if frame.sop == Sop::Sop
            && message.message_type() == MessageType::Data(DataMessage::SourceCapabilities)
        {
            self.negotiation = NegotiationContext::from_capabilities(&message.objects);
            log::debug!(
                "Negotiation context updated: {} source PDOs",
                self.negotiation.pdos().len()
            );
        }

        Ok(message)
    }

    /// Decode every frame of a capture file
    ///
    /// Returns an iterator that lazily decodes the file; non-frame events
    /// are skipped. Malformed frames come out as errors and iteration
    /// continues with the next frame.
    pub fn decode_file<'a>(
        &'a mut self,
        path: &Path,
    ) -> Result<Box<dyn Iterator<Item = Result<(RawFrame, DecodedMessage)>> + 'a>> {
        log::info!("Decoding capture file: {:?}", path);

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());

        match extension.as_deref() {
            Some("jsonl") | Some("ndjson") | Some("json") => {
                let events = JsonlReplay::open(path)?;
                Ok(Box::new(DecodingIterator::new(frames(events), self)))
            }
            _ => Err(DecoderError::ReplayParse {
                line: 0,
                reason: format!("unsupported capture format: {:?}", extension),
            }),
        }
    }

    /// Wrap a frame iterator so each frame is decoded as it is pulled
    pub fn decode_frames<'a, I>(&'a mut self, frames: I) -> DecodingIterator<'a, I>
    where
        I: Iterator<Item = Result<RawFrame>>,
    {
        DecodingIterator::new(frames, self)
    }

    pub fn negotiation(&self) -> &NegotiationContext {
        &self.negotiation
    }

    /// Forget the last source capabilities
    pub fn reset_negotiation(&mut self) {
        self.negotiation = NegotiationContext::new();
    }

    pub fn vendors(&self) -> &Arc<dyn VendorLookup> {
        &self.vendors
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator that decodes raw frames into messages
pub struct DecodingIterator<'a, I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    frame_iter: I,
    decoder: &'a mut Decoder,
}

impl<'a, I> DecodingIterator<'a, I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    fn new(frame_iter: I, decoder: &'a mut Decoder) -> Self {
        Self {
            frame_iter,
            decoder,
        }
    }
}

impl<'a, I> Iterator for DecodingIterator<'a, I>
where
    I: Iterator<Item = Result<RawFrame>>,
{
    type Item = Result<(RawFrame, DecodedMessage)>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = match self.frame_iter.next()? {
            Ok(frame) => frame,
            Err(e) => return Some(Err(e)),
        };
        match self.decoder.decode_frame(&frame) {
            Ok(message) => Some(Ok((frame, message))),
            Err(e) => {
                log::warn!("Skipping frame at {}: {}", frame.timestamp, e);
                Some(Err(e))
            }
        }
    }
}
