//! Pull decoder over an incrementally fed byte buffer.

use tracing::trace;

use crate::bytes::{Cursor, Shortfall};
use crate::{DecodeError, Record, RecordKind, SourceLocation, Version, VersionHeader};

/// A record together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedRecord {
    pub record: Record,
    /// Stream position of the record's tag byte.
    pub offset: u64,
    /// Location from the companion debug record, if one followed.
    pub location: Option<SourceLocation>,
}

/// Outcome of [`RecordDecoder::next_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Record(LocatedRecord),
    /// Not enough bytes buffered yet. The position is unchanged.
    Pending,
    /// The source is closed and the position is at a record boundary.
    End,
}

enum Step {
    Incomplete { needed: usize },
    Complete { record: Record, end: usize },
}

/// Reads self-delimited records from a byte buffer.
///
/// Bytes arrive through [`feed`](Self::feed); the decoder never blocks. A
/// record that is only partly buffered yields [`Decoded::Pending`] while the
/// source is open, and [`DecodeError::TruncatedStream`] once it is closed.
///
/// Instrumentable records may be followed by a debug record carrying the
/// source location. The decoder always looks one record ahead for it, so an
/// instrumentable record is only yielded once the following byte is
/// buffered or the source is closed.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    buf: Vec<u8>,
    pos: usize,
    closed: bool,
    header: Option<VersionHeader>,
    expects_header: bool,
    location: Option<SourceLocation>,
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordDecoder {
    /// An open decoder for a top-level stream, which starts with a
    /// [`VersionHeader`].
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            closed: false,
            header: None,
            expects_header: true,
            location: None,
        }
    }

    /// A closed decoder over a complete top-level stream.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let mut decoder = Self::new();
        decoder.buf = bytes.into();
        decoder.closed = true;
        decoder
    }

    /// A closed decoder over a headerless fragment, such as the values
    /// section of a deferred dictionary.
    pub fn headerless(bytes: impl Into<Vec<u8>>) -> Self {
        let mut decoder = Self::from_bytes(bytes);
        decoder.expects_header = false;
        decoder
    }

    /// Append bytes to the buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        debug_assert!(!self.closed, "feeding a closed decoder");
        self.buf.extend_from_slice(bytes);
    }

    /// Mark the end of the source.
    pub fn close(&mut self) {
        self.closed = true;
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Absolute position of the next unread byte, header included.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Absolute position one past the last buffered byte.
    #[inline]
    pub fn buffered_end(&self) -> u64 {
        self.buf.len() as u64
    }

    /// The header, once it has been read.
    pub fn header(&self) -> Option<&VersionHeader> {
        self.header.as_ref()
    }

    /// Most recent location seen in a debug record.
    pub fn last_location(&self) -> Option<SourceLocation> {
        self.location
    }

    /// Move back to an earlier record boundary.
    pub fn rewind_to(&mut self, position: u64) {
        debug_assert!(position <= self.pos as u64);
        self.pos = position as usize;
    }

    /// Move to an absolute position inside the buffered range.
    pub fn seek(&mut self, position: u64) -> Result<(), DecodeError> {
        if position > self.buffered_end() {
            return Err(DecodeError::TruncatedStream {
                offset: self.pos as u64,
                needed: (position - self.pos as u64) as usize,
                available: self.buf.len() - self.pos,
            });
        }
        self.pos = position as usize;
        Ok(())
    }

    /// Buffered bytes in `start..end`, if all of them are buffered.
    pub fn slice(&self, start: u64, end: u64) -> Option<&[u8]> {
        self.buf.get(start as usize..end as usize)
    }

    /// Read the header if it has not been read yet.
    ///
    /// Returns `Ok(false)` when more bytes are needed.
    pub fn read_header(&mut self) -> Result<bool, DecodeError> {
        if !self.expects_header || self.header.is_some() {
            return Ok(true);
        }
        let mut cursor = Cursor::new(&self.buf[self.pos..]);
        match VersionHeader::parse(&mut cursor) {
            Ok(header) => {
                if !header.is_readable() {
                    return Err(DecodeError::UnsupportedFormatVersion {
                        found: header.reader,
                        supported: Version::CURRENT,
                    });
                }
                trace!(reader = %header.reader, writer = %header.writer, "read header");
                self.pos += cursor.pos();
                self.header = Some(header);
                Ok(true)
            }
            Err(Shortfall::Incomplete { needed }) => {
                if self.closed {
                    Err(DecodeError::TruncatedStream {
                        offset: self.pos as u64,
                        needed,
                        available: self.buf.len() - self.pos,
                    })
                } else {
                    Ok(false)
                }
            }
            Err(Shortfall::Invalid(reason)) => Err(DecodeError::InvalidHeader { reason }),
        }
    }

    /// Decode the next logical record.
    pub fn next_record(&mut self) -> Result<Decoded, DecodeError> {
        if !self.read_header()? {
            return Ok(Decoded::Pending);
        }
        loop {
            let start = self.pos;
            if start == self.buf.len() {
                return Ok(if self.closed {
                    Decoded::End
                } else {
                    Decoded::Pending
                });
            }
            let (record, mut end) = match self.step(start)? {
                Step::Complete { record, end } => (record, end),
                Step::Incomplete { needed } => return self.incomplete(start, needed),
            };
            let kind = record.kind();

            if kind.is_debug() {
                // a stray debug record only moves the running location
                self.fold_location(&record);
                self.pos = end;
                continue;
            }

            let mut location = None;
            if kind.has_debug_extension() {
                if end == self.buf.len() {
                    if !self.closed {
                        return Ok(Decoded::Pending);
                    }
                } else if RecordKind::from_tag(self.buf[end]).is_some_and(RecordKind::is_debug) {
                    match self.step(end)? {
                        Step::Complete {
                            record: debug,
                            end: debug_end,
                        } => {
                            location = Some(self.fold_location(&debug));
                            end = debug_end;
                        }
                        Step::Incomplete { needed } => return self.incomplete(end, needed),
                    }
                }
            }

            self.pos = end;
            return Ok(Decoded::Record(LocatedRecord {
                record,
                offset: start as u64,
                location,
            }));
        }
    }

    fn incomplete(&self, start: usize, needed: usize) -> Result<Decoded, DecodeError> {
        if self.closed {
            Err(DecodeError::TruncatedStream {
                offset: start as u64,
                needed,
                available: self.buf.len() - start,
            })
        } else {
            Ok(Decoded::Pending)
        }
    }

    fn fold_location(&mut self, debug: &Record) -> SourceLocation {
        let location = match *debug {
            Record::LineNumberAndPosition { line, position } => SourceLocation { line, position },
            Record::LinePosition { position } => SourceLocation {
                line: self.location.map_or(0, |l| l.line),
                position,
            },
            _ => unreachable!("not a debug record"),
        };
        self.location = Some(location);
        location
    }

    /// Decode one physical record starting at `start` without moving.
    fn step(&self, start: usize) -> Result<Step, DecodeError> {
        let mut cursor = Cursor::new(&self.buf[start..]);
        let tag = match cursor.u8() {
            Ok(tag) => tag,
            Err(_) => return Ok(Step::Incomplete { needed: 1 }),
        };
        let kind = RecordKind::from_tag(tag).ok_or(DecodeError::UnknownRecordKind {
            tag,
            offset: start as u64,
        })?;
        let malformed = |reason: String| DecodeError::MalformedRecord {
            kind,
            offset: start as u64,
            reason,
        };

        let payload_len = match kind.fixed_payload_len() {
            Some(len) => len,
            None => match cursor.varint() {
                Ok(len) => len as usize,
                Err(Shortfall::Incomplete { needed }) => return Ok(Step::Incomplete { needed }),
                Err(Shortfall::Invalid(reason)) => return Err(malformed(reason)),
            },
        };
        let payload = match cursor.take(payload_len) {
            Ok(payload) => payload,
            Err(Shortfall::Incomplete { needed }) => return Ok(Step::Incomplete { needed }),
            Err(Shortfall::Invalid(reason)) => return Err(malformed(reason)),
        };
        let record = Record::decode(kind, payload).map_err(|shortfall| match shortfall {
            Shortfall::Incomplete { needed } => {
                malformed(format!("payload of {payload_len} bytes, kind needs {needed}"))
            }
            Shortfall::Invalid(reason) => malformed(reason),
        })?;
        Ok(Step::Complete {
            record,
            end: start + cursor.pos(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttributeId, ElementFlags, RecordWriter, TypeId};
    use facet_testhelpers::test;

    fn element(type_id: i16) -> Record {
        Record::ElementStart {
            type_id: TypeId(type_id),
            flags: ElementFlags::default(),
        }
    }

    fn expect_record(decoder: &mut RecordDecoder) -> LocatedRecord {
        match decoder.next_record() {
            Ok(Decoded::Record(record)) => record,
            other => panic!("expected a record, got {other:?}"),
        }
    }

    #[test]
    fn test_reads_header_and_records() {
        let mut writer = RecordWriter::with_header(&VersionHeader::default());
        writer.write(&element(7));
        writer.write(&Record::ElementEnd);
        writer.write(&Record::DocumentEnd);
        let mut decoder = RecordDecoder::from_bytes(writer.into_bytes());

        let first = expect_record(&mut decoder);
        assert_eq!(first.record, element(7));
        assert_eq!(first.offset, 28);
        assert_eq!(first.location, None);
        assert_eq!(expect_record(&mut decoder).record, Record::ElementEnd);
        assert_eq!(expect_record(&mut decoder).record, Record::DocumentEnd);
        assert_eq!(decoder.next_record(), Ok(Decoded::End));
        assert_eq!(decoder.header(), Some(&VersionHeader::default()));
    }

    #[test]
    fn test_folds_debug_record() {
        let mut writer = RecordWriter::new();
        writer.write_at(&element(1), SourceLocation::new(4, 9));
        writer.write(&Record::Property {
            attribute: AttributeId(2),
            value: "x".into(),
        });
        writer.write(&Record::LinePosition { position: 17 });
        let mut decoder = RecordDecoder::headerless(writer.into_bytes());

        let start = expect_record(&mut decoder);
        assert_eq!(start.location, Some(SourceLocation::new(4, 9)));
        let property = expect_record(&mut decoder);
        // LinePosition keeps the previous line
        assert_eq!(property.location, Some(SourceLocation::new(4, 17)));
        assert_eq!(decoder.next_record(), Ok(Decoded::End));
    }

    #[test]
    fn test_debug_record_after_uninstrumented_kind_is_skipped() {
        let mut writer = RecordWriter::new();
        writer.write(&Record::ElementEnd);
        writer.write(&Record::LineNumberAndPosition {
            line: 3,
            position: 1,
        });
        writer.write(&Record::DocumentEnd);
        let mut decoder = RecordDecoder::headerless(writer.into_bytes());

        let end = expect_record(&mut decoder);
        assert_eq!(end.record, Record::ElementEnd);
        assert_eq!(end.location, None);
        assert_eq!(expect_record(&mut decoder).record, Record::DocumentEnd);
        assert_eq!(decoder.last_location(), Some(SourceLocation::new(3, 1)));
    }

    #[test]
    fn test_pending_leaves_position_unchanged() {
        let mut writer = RecordWriter::with_header(&VersionHeader::default());
        writer.write(&Record::Text {
            value: "hello".into(),
        });
        let bytes = writer.into_bytes();

        let mut decoder = RecordDecoder::new();
        decoder.feed(&bytes[..10]);
        assert_eq!(decoder.next_record(), Ok(Decoded::Pending));
        assert_eq!(decoder.position(), 0);

        decoder.feed(&bytes[10..bytes.len() - 2]);
        assert_eq!(decoder.next_record(), Ok(Decoded::Pending));
        assert_eq!(decoder.position(), 28);

        decoder.feed(&bytes[bytes.len() - 2..]);
        // complete, but the debug lookahead needs one more byte or a close
        assert_eq!(decoder.next_record(), Ok(Decoded::Pending));
        assert_eq!(decoder.position(), 28);

        decoder.close();
        assert_eq!(
            expect_record(&mut decoder).record,
            Record::Text {
                value: "hello".into()
            }
        );
        assert_eq!(decoder.next_record(), Ok(Decoded::End));
    }

    #[test]
    fn test_truncated_when_closed_mid_record() {
        let mut writer = RecordWriter::new();
        writer.write(&Record::DeferableContentStart { content_size: 9 });
        let bytes = writer.into_bytes();
        let mut decoder = RecordDecoder::headerless(&bytes[..3]);
        assert_eq!(
            decoder.next_record(),
            Err(DecodeError::TruncatedStream {
                offset: 0,
                needed: 5,
                available: 3,
            })
        );
    }

    #[test]
    fn test_truncated_debug_companion() {
        let mut writer = RecordWriter::new();
        writer.write_at(&element(1), SourceLocation::new(1, 1));
        let bytes = writer.into_bytes();
        let mut decoder = RecordDecoder::headerless(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            decoder.next_record(),
            Err(DecodeError::TruncatedStream { offset: 4, .. })
        ));
    }

    #[test]
    fn test_unknown_record_kind() {
        let mut decoder = RecordDecoder::headerless(vec![4u8, 15]);
        assert_eq!(expect_record(&mut decoder).record, Record::ElementEnd);
        assert_eq!(
            decoder.next_record(),
            Err(DecodeError::UnknownRecordKind { tag: 15, offset: 1 })
        );
    }

    #[test]
    fn test_malformed_payload() {
        // DefAttribute with usage byte 9
        let mut decoder = RecordDecoder::headerless(vec![25u8, 2, 9, 0]);
        assert!(matches!(
            decoder.next_record(),
            Err(DecodeError::MalformedRecord {
                kind: RecordKind::DefAttribute,
                offset: 0,
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_newer_major_version() {
        let header = VersionHeader {
            reader: Version::new(1, 0),
            ..VersionHeader::default()
        };
        let mut decoder = RecordDecoder::from_bytes(RecordWriter::with_header(&header).into_bytes());
        assert_eq!(
            decoder.next_record(),
            Err(DecodeError::UnsupportedFormatVersion {
                found: Version::new(1, 0),
                supported: Version::CURRENT,
            })
        );
    }

    #[test]
    fn test_accepts_newer_minor_version() {
        let header = VersionHeader {
            reader: Version::new(0, 99),
            ..VersionHeader::default()
        };
        let mut writer = RecordWriter::with_header(&header);
        writer.write(&Record::DocumentEnd);
        let mut decoder = RecordDecoder::from_bytes(writer.into_bytes());
        assert_eq!(expect_record(&mut decoder).record, Record::DocumentEnd);
    }

    #[test]
    fn test_seek_and_slice() {
        let mut writer = RecordWriter::new();
        writer.write(&Record::ElementEnd);
        writer.write(&Record::ElementEnd);
        writer.write(&Record::DocumentEnd);
        let mut decoder = RecordDecoder::headerless(writer.into_bytes());
        assert_eq!(decoder.slice(1, 3), Some(&[4u8, 2][..]));
        assert_eq!(decoder.slice(2, 4), None);
        decoder.seek(2).unwrap();
        assert_eq!(expect_record(&mut decoder).record, Record::DocumentEnd);
        assert!(decoder.seek(4).is_err());
    }
}
