//! Errors raised while decoding the record stream.

use std::fmt;

use crate::{RecordKind, Version};

/// Error produced by [`RecordDecoder`](crate::RecordDecoder).
///
/// Only ever produced for bytes that are actually available: a record that
/// is merely incomplete on a still-open source is reported as
/// [`Decoded::Pending`](crate::Decoded::Pending), never as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The source was closed in the middle of a record.
    TruncatedStream {
        offset: u64,
        needed: usize,
        available: usize,
    },
    /// The header declares a reader version this crate cannot read.
    UnsupportedFormatVersion { found: Version, supported: Version },
    /// The header is not a BAML header at all.
    InvalidHeader { reason: String },
    /// A tag byte outside the known set.
    UnknownRecordKind { tag: u8, offset: u64 },
    /// A record whose payload does not parse as its kind requires.
    MalformedRecord {
        kind: RecordKind,
        offset: u64,
        reason: String,
    },
}

impl DecodeError {
    /// Stream offset the error refers to, when it has one.
    pub fn offset(&self) -> Option<u64> {
        match self {
            DecodeError::TruncatedStream { offset, .. }
            | DecodeError::UnknownRecordKind { offset, .. }
            | DecodeError::MalformedRecord { offset, .. } => Some(*offset),
            DecodeError::UnsupportedFormatVersion { .. } | DecodeError::InvalidHeader { .. } => {
                None
            }
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TruncatedStream {
                offset,
                needed,
                available,
            } => write!(
                f,
                "stream truncated at offset {offset}: needed {needed} bytes, {available} available"
            ),
            DecodeError::UnsupportedFormatVersion { found, supported } => write!(
                f,
                "unsupported format version {found} (this reader supports {supported})"
            ),
            DecodeError::InvalidHeader { reason } => write!(f, "invalid header: {reason}"),
            DecodeError::UnknownRecordKind { tag, offset } => {
                write!(f, "unknown record kind {tag} at offset {offset}")
            }
            DecodeError::MalformedRecord {
                kind,
                offset,
                reason,
            } => write!(f, "malformed {kind} record at offset {offset}: {reason}"),
        }
    }
}

impl std::error::Error for DecodeError {}
