//! Companion encoder producing streams the decoder reads back.

use crate::bytes::put_varint;
use crate::{Record, SourceLocation, VersionHeader};

/// Appends encoded records to a byte buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    /// A writer for a headerless fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// A writer for a top-level stream, starting with `header`.
    pub fn with_header(header: &VersionHeader) -> Self {
        let mut writer = Self::new();
        header.encode(&mut writer.buf);
        writer
    }

    /// Current length of the output, which is the position the next
    /// record will start at.
    #[inline]
    pub fn position(&self) -> u64 {
        self.buf.len() as u64
    }

    pub fn write(&mut self, record: &Record) {
        let kind = record.kind();
        self.buf.push(kind.tag());
        match kind.fixed_payload_len() {
            Some(len) => {
                let before = self.buf.len();
                record.encode_payload(&mut self.buf);
                debug_assert_eq!(self.buf.len() - before, len, "{kind} payload size");
            }
            None => {
                let mut payload = Vec::new();
                record.encode_payload(&mut payload);
                put_varint(&mut self.buf, payload.len() as u32);
                self.buf.extend_from_slice(&payload);
            }
        }
    }

    /// Write `record` followed by a companion debug record.
    pub fn write_at(&mut self, record: &Record, location: SourceLocation) {
        self.write(record);
        self.write(&Record::LineNumberAndPosition {
            line: location.line,
            position: location.position,
        });
    }

    /// Append raw, already encoded bytes.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
