//! Binary codec for history files.
//!
//! This module implements the versioned wire format shared by both storage
//! strategies. All multi-byte integers are big-endian; doubles are written
//! as their raw IEEE-754 bit pattern, so NaN payloads and infinities
//! round-trip exactly.
//!
//! # Wire Format
//!
//! ```text
//! header      := magic "TSDH" | u16 major | u16 minor | u8 strategy
//! string      := u32 length | UTF-8 bytes
//! path        := u32 segment count | string...
//! tags        := u32 count | (string key, value)...      (key order)
//! value       := u8 discriminator | payload
//!                  0 Empty  (no payload)
//!                  1 Bool   (u8, 0 or 1)
//!                  2 Int    (i64)
//!                  3 Dbl    (f64 bits)
//!                  4 Str    (string)
//!                  5 Hist   (histogram)
//! histogram   := u32 bucket count | (f64 lower, f64 upper, i64 count)...
//! collection  := i64 timestamp millis | u32 group count |
//!                (path, tags, u32 metric count, (path, value)...)...
//! ```
//!
//! Groups are encoded in group-name order and metrics in metric-name order,
//! so encoding is deterministic regardless of construction order. Decoding
//! a truncated or structurally inconsistent stream fails with a
//! [`CodecError`] carrying the byte offset; an unrecognized discriminator
//! is corrupt data, never undefined behavior.

use crate::collection::{TimeSeriesCollection, TimeSeriesValue, Timestamp};
use crate::error::{CodecError, TsdError};
use crate::name::{GroupName, GroupPath, MetricName, Tags};
use crate::strategy::StrategyKind;
use crate::value::{Histogram, MetricValue, RangeWithCount};

/// Magic bytes identifying a history file or segment.
pub(crate) const MAGIC: [u8; 4] = *b"TSDH";

/// Major version of the wire format produced by this encoder.
pub const FORMAT_MAJOR: u16 = 2;

/// Minor version of the wire format produced by this encoder.
pub const FORMAT_MINOR: u16 = 0;

/// Encoded length of the file header in bytes.
pub(crate) const HEADER_LEN: usize = 9;

/// Value variant discriminators.
const KIND_EMPTY: u8 = 0;
const KIND_BOOL: u8 = 1;
const KIND_INT: u8 = 2;
const KIND_DBL: u8 = 3;
const KIND_STR: u8 = 4;
const KIND_HIST: u8 = 5;

/// Header written at the start of every history artifact and segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Wire format major version.
    pub major: u16,
    /// Wire format minor version.
    pub minor: u16,
    /// Storage strategy that produced the file.
    pub strategy: StrategyKind,
}

impl FileHeader {
    /// Creates a header for the current format version.
    pub fn current(strategy: StrategyKind) -> Self {
        Self {
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR,
            strategy,
        }
    }
}

/// Serializes model entities into an in-memory byte buffer.
///
/// Appends are complete-or-fail at the storage layer, so the encoder always
/// works against a buffer that is written out in a single call.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Creates an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the encoder, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Returns the encoded bytes so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    fn put_bool(&mut self, v: bool) {
        self.put_u8(u8::from(v));
    }

    fn put_str(&mut self, s: &str) {
        #[allow(clippy::cast_possible_truncation)] // segment/string lengths fit u32
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn put_segments(&mut self, segments: &[String]) {
        #[allow(clippy::cast_possible_truncation)]
        self.put_u32(segments.len() as u32);
        for segment in segments {
            self.put_str(segment);
        }
    }

    /// Encodes a file header.
    pub fn put_header(&mut self, header: &FileHeader) {
        self.buf.extend_from_slice(&MAGIC);
        self.put_u16(header.major);
        self.put_u16(header.minor);
        self.put_u8(header.strategy.as_byte());
    }

    /// Encodes a group path.
    pub fn put_group_path(&mut self, path: &GroupPath) {
        self.put_segments(path.segments());
    }

    /// Encodes a metric name.
    pub fn put_metric_name(&mut self, name: &MetricName) {
        self.put_segments(name.segments());
    }

    /// Encodes a tag set, in key order.
    pub fn put_tags(&mut self, tags: &Tags) {
        #[allow(clippy::cast_possible_truncation)]
        self.put_u32(tags.len() as u32);
        for (key, value) in tags.iter() {
            self.put_str(key);
            self.put_value(value);
        }
    }

    /// Encodes a histogram, preserving bucket order exactly.
    pub fn put_histogram(&mut self, hist: &Histogram) {
        #[allow(clippy::cast_possible_truncation)]
        self.put_u32(hist.len() as u32);
        for bucket in hist.buckets() {
            self.put_f64(bucket.lower);
            self.put_f64(bucket.upper);
            self.put_i64(bucket.count);
        }
    }

    /// Encodes a metric value as discriminator byte plus payload.
    pub fn put_value(&mut self, value: &MetricValue) {
        match value {
            MetricValue::Empty => self.put_u8(KIND_EMPTY),
            MetricValue::Bool(b) => {
                self.put_u8(KIND_BOOL);
                self.put_bool(*b);
            }
            MetricValue::Int(v) => {
                self.put_u8(KIND_INT);
                self.put_i64(*v);
            }
            MetricValue::Dbl(v) => {
                self.put_u8(KIND_DBL);
                self.put_f64(*v);
            }
            MetricValue::Str(s) => {
                self.put_u8(KIND_STR);
                self.put_str(s);
            }
            MetricValue::Hist(h) => {
                self.put_u8(KIND_HIST);
                self.put_histogram(h);
            }
        }
    }

    /// Encodes one collection record.
    ///
    /// Entries are already sorted by group name (a collection invariant),
    /// and metric maps iterate in name order, so the output is canonical.
    pub fn put_collection(&mut self, collection: &TimeSeriesCollection) {
        self.put_i64(collection.timestamp().as_unix_millis());
        #[allow(clippy::cast_possible_truncation)]
        self.put_u32(collection.len() as u32);
        for entry in collection.entries() {
            self.put_group_path(entry.group().path());
            self.put_tags(entry.group().tags());
            #[allow(clippy::cast_possible_truncation)]
            self.put_u32(entry.metrics().len() as u32);
            for (name, value) in entry.metrics() {
                self.put_metric_name(name);
                self.put_value(value);
            }
        }
    }
}

/// Encodes a single collection record to bytes.
pub fn encode_collection(collection: &TimeSeriesCollection) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.put_collection(collection);
    enc.into_bytes()
}

/// Deserializes model entities from a byte slice.
///
/// The decoder tracks its position; errors report the absolute byte offset
/// (`base_offset` plus position) so corruption in mid-file segments is
/// diagnosable.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    base_offset: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self::with_base_offset(buf, 0)
    }

    /// Creates a decoder whose error offsets are shifted by `base_offset`.
    pub fn with_base_offset(buf: &'a [u8], base_offset: usize) -> Self {
        Self {
            buf,
            pos: 0,
            base_offset,
        }
    }

    /// Returns the absolute offset of the next unread byte.
    pub fn offset(&self) -> usize {
        self.base_offset + self.pos
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    pub fn is_at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn corrupt(&self, reason: impl Into<String>) -> CodecError {
        CodecError::Corrupt {
            offset: self.offset(),
            reason: reason.into(),
        }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < needed {
            return Err(CodecError::Truncated {
                offset: self.offset(),
                needed,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(bytes)
    }

    /// Rejects repetition counts that could not possibly fit the remaining
    /// bytes, before any allocation happens.
    fn check_count(&self, count: u32, min_item_len: usize) -> Result<usize, CodecError> {
        let count = count as usize;
        let needed = count.saturating_mul(min_item_len);
        if needed > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.offset(),
                needed,
                available: self.remaining(),
            });
        }
        Ok(count)
    }

    fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn get_u16(&mut self) -> Result<u16, CodecError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn get_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn get_i64(&mut self) -> Result<i64, CodecError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(raw))
    }

    fn get_f64(&mut self) -> Result<f64, CodecError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_bits(u64::from_be_bytes(raw)))
    }

    fn get_bool(&mut self) -> Result<bool, CodecError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.corrupt(format!("invalid boolean byte {other:#04x}"))),
        }
    }

    fn get_str(&mut self) -> Result<String, CodecError> {
        let len = self.get_u32()? as usize;
        let start = self.offset();
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Corrupt {
            offset: start,
            reason: format!("invalid UTF-8 in string: {e}"),
        })
    }

    fn get_segments(&mut self) -> Result<Vec<String>, CodecError> {
        let raw_count = self.get_u32()?;
        let count = self.check_count(raw_count, 4)?;
        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            segments.push(self.get_str()?);
        }
        Ok(segments)
    }

    /// Wraps a construction failure as corrupt data at the given offset.
    fn model_corrupt(offset: usize, err: TsdError) -> CodecError {
        let reason = match err {
            TsdError::Model(model) => model.to_string(),
            other => other.to_string(),
        };
        CodecError::Corrupt { offset, reason }
    }

    /// Decodes and validates a file header.
    pub fn get_header(&mut self) -> Result<FileHeader, CodecError> {
        let start = self.offset();
        let magic = self.take(4)?;
        if magic != MAGIC {
            return Err(CodecError::Corrupt {
                offset: start,
                reason: format!("invalid magic bytes: expected {MAGIC:?}, found {magic:?}"),
            });
        }
        let major = self.get_u16()?;
        let minor = self.get_u16()?;
        if major != FORMAT_MAJOR {
            return Err(CodecError::UnsupportedVersion {
                major,
                minor,
                supported_major: FORMAT_MAJOR,
            });
        }
        let strategy_byte = self.get_u8()?;
        let strategy = StrategyKind::from_byte(strategy_byte)
            .ok_or_else(|| self.corrupt(format!("unknown strategy byte {strategy_byte:#04x}")))?;
        Ok(FileHeader {
            major,
            minor,
            strategy,
        })
    }

    /// Reads a u32-length-prefixed opaque byte block (the manifest body).
    pub(crate) fn get_block(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    /// Decodes a group path.
    pub fn get_group_path(&mut self) -> Result<GroupPath, CodecError> {
        let start = self.offset();
        let segments = self.get_segments()?;
        GroupPath::new(segments).map_err(|e| Self::model_corrupt(start, e))
    }

    /// Decodes a metric name.
    pub fn get_metric_name(&mut self) -> Result<MetricName, CodecError> {
        let start = self.offset();
        let segments = self.get_segments()?;
        MetricName::new(segments).map_err(|e| Self::model_corrupt(start, e))
    }

    /// Decodes a tag set.
    pub fn get_tags(&mut self) -> Result<Tags, CodecError> {
        let start = self.offset();
        let raw_count = self.get_u32()?;
        let count = self.check_count(raw_count, 5)?;
        let mut pairs = Vec::with_capacity(count);
        for _ in 0..count {
            let key = self.get_str()?;
            let value = self.get_value()?;
            pairs.push((key, value));
        }
        Tags::from_pairs(pairs).map_err(|e| Self::model_corrupt(start, e))
    }

    /// Decodes a histogram.
    pub fn get_histogram(&mut self) -> Result<Histogram, CodecError> {
        let start = self.offset();
        let raw_count = self.get_u32()?;
        let count = self.check_count(raw_count, 24)?;
        let mut buckets = Vec::with_capacity(count);
        for _ in 0..count {
            let lower = self.get_f64()?;
            let upper = self.get_f64()?;
            let bucket_count = self.get_i64()?;
            buckets.push(RangeWithCount {
                lower,
                upper,
                count: bucket_count,
            });
        }
        Histogram::new(buckets).map_err(|e| Self::model_corrupt(start, e))
    }

    /// Decodes a metric value.
    ///
    /// An out-of-range discriminator byte is reported as corrupt data.
    pub fn get_value(&mut self) -> Result<MetricValue, CodecError> {
        let start = self.offset();
        match self.get_u8()? {
            KIND_EMPTY => Ok(MetricValue::Empty),
            KIND_BOOL => Ok(MetricValue::Bool(self.get_bool()?)),
            KIND_INT => Ok(MetricValue::Int(self.get_i64()?)),
            KIND_DBL => Ok(MetricValue::Dbl(self.get_f64()?)),
            KIND_STR => Ok(MetricValue::Str(self.get_str()?)),
            KIND_HIST => Ok(MetricValue::Hist(self.get_histogram()?)),
            other => Err(CodecError::Corrupt {
                offset: start,
                reason: format!("unknown metric value discriminator {other:#04x}"),
            }),
        }
    }

    /// Decodes one collection record.
    pub fn get_collection(&mut self) -> Result<TimeSeriesCollection, CodecError> {
        let start = self.offset();
        let timestamp = Timestamp::from_unix_millis(self.get_i64()?);
        let raw_count = self.get_u32()?;
        let count = self.check_count(raw_count, 12)?;
        let mut builder = TimeSeriesCollection::builder(timestamp);
        for _ in 0..count {
            let path = self.get_group_path()?;
            let tags = self.get_tags()?;
            let group = GroupName::new(path, tags);
            let metric_start = self.offset();
            let raw_metrics = self.get_u32()?;
            let metric_count = self.check_count(raw_metrics, 5)?;
            let mut metrics = Vec::with_capacity(metric_count);
            for _ in 0..metric_count {
                let name = self.get_metric_name()?;
                let value = self.get_value()?;
                metrics.push((name, value));
            }
            let entry = TimeSeriesValue::from_metrics(group, metrics)
                .map_err(|e| Self::model_corrupt(metric_start, e))?;
            builder.add(entry);
        }
        builder.build().map_err(|e| Self::model_corrupt(start, e))
    }
}
