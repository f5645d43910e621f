//! Errors raised while rebuilding a tree.

use std::fmt;

use baml_records::{DecodeError, RecordKind, SourceLocation, TypeId, Version};

use crate::model::ModelError;

/// Result alias used throughout the reader.
pub type Result<T, E = ReadError> = std::result::Result<T, E>;

/// Failure of a read.
///
/// `Fatal` carries faults the object model flagged as critical. They are
/// never wrapped, located, or replaced by a fallback value on their way
/// out.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadError {
    Fatal(Fault),
    Recoverable(Box<Diagnostic>),
}

/// A critical fault reported by the object model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
}

/// A parse failure with the context needed to reproduce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    /// Location from the most recent debug record.
    pub location: Option<SourceLocation>,
    /// Stream offset of the record being handled.
    pub offset: Option<u64>,
    pub record: Option<RecordKind>,
}

/// What went wrong.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    TruncatedStream { detail: String },
    UnsupportedFormatVersion { found: Version, supported: Version },
    InvalidHeader { reason: String },
    UnknownRecordKind { tag: u8 },
    MalformedStream { reason: String },
    UnresolvedType { type_id: TypeId },
    UnresolvedMember { owner: String, attribute: String },
    NoMatchingConstructor { type_name: String, arg_count: usize },
    ConstructorInvocationFailed { type_name: String, message: String },
    NoInsertionTarget { parent_type: String },
    MissingDictionaryKey { type_name: String },
    PropertyCollectionClosed { property: String },
    IncompatibleNullableAssignment {
        property: String,
        expected: String,
        found: String,
    },
    TypeConversionFailed {
        value: String,
        target: String,
        property: Option<String>,
        message: String,
    },
    ResourceNotFound { key: String },
    /// A non-critical failure reported by the object model.
    Model { message: String },
}

impl ReadError {
    /// A recoverable error with no context yet.
    pub fn new(kind: ErrorKind) -> Self {
        ReadError::Recoverable(Box::new(Diagnostic {
            kind,
            location: None,
            offset: None,
            record: None,
        }))
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedStream {
            reason: reason.into(),
        })
    }

    pub fn truncated(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::TruncatedStream {
            detail: detail.into(),
        })
    }

    /// Convert a model failure, classifying non-critical ones with `kind`.
    pub fn from_model(error: ModelError, kind: impl FnOnce(String) -> ErrorKind) -> Self {
        if error.critical {
            ReadError::Fatal(Fault {
                message: error.message,
            })
        } else {
            Self::new(kind(error.message))
        }
    }

    /// The kind, unless this is a fatal fault.
    pub fn kind(&self) -> Option<&ErrorKind> {
        match self {
            ReadError::Fatal(_) => None,
            ReadError::Recoverable(diagnostic) => Some(&diagnostic.kind),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ReadError::Fatal(_))
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            ReadError::Fatal(_) => None,
            ReadError::Recoverable(diagnostic) => Some(diagnostic),
        }
    }

    /// Fill in context the error does not carry yet. Fatal faults pass
    /// through untouched.
    pub(crate) fn at(
        mut self,
        location: Option<SourceLocation>,
        offset: u64,
        record: RecordKind,
    ) -> Self {
        if let ReadError::Recoverable(diagnostic) = &mut self {
            diagnostic.location = diagnostic.location.or(location);
            diagnostic.offset = diagnostic.offset.or(Some(offset));
            diagnostic.record = diagnostic.record.or(Some(record));
        }
        self
    }

    /// Like [`ReadError::at`], for failures not tied to one record.
    pub(crate) fn located(mut self, location: Option<SourceLocation>, offset: u64) -> Self {
        if let ReadError::Recoverable(diagnostic) = &mut self {
            diagnostic.location = diagnostic.location.or(location);
            diagnostic.offset = diagnostic.offset.or(Some(offset));
        }
        self
    }
}

impl From<DecodeError> for ReadError {
    fn from(error: DecodeError) -> Self {
        let offset = error.offset();
        let kind = match error {
            DecodeError::TruncatedStream {
                needed, available, ..
            } => ErrorKind::TruncatedStream {
                detail: format!("needed {needed} bytes, {available} available"),
            },
            DecodeError::UnsupportedFormatVersion { found, supported } => {
                ErrorKind::UnsupportedFormatVersion { found, supported }
            }
            DecodeError::InvalidHeader { reason } => ErrorKind::InvalidHeader { reason },
            DecodeError::UnknownRecordKind { tag, .. } => ErrorKind::UnknownRecordKind { tag },
            DecodeError::MalformedRecord { kind, reason, .. } => ErrorKind::MalformedStream {
                reason: format!("{kind} record: {reason}"),
            },
        };
        ReadError::Recoverable(Box::new(Diagnostic {
            kind,
            location: None,
            offset,
            record: None,
        }))
    }
}

impl From<ModelError> for ReadError {
    fn from(error: ModelError) -> Self {
        Self::from_model(error, |message| ErrorKind::Model { message })
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Fatal(fault) => write!(f, "fatal: {}", fault.message),
            ReadError::Recoverable(diagnostic) => diagnostic.fmt(f),
        }
    }
}

impl std::error::Error for ReadError {}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(record) = self.record {
            write!(f, " in {record} record")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " at offset {offset}")?;
        }
        if let Some(location) = self.location {
            write!(f, " (line {}, position {})", location.line, location.position)?;
        }
        Ok(())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TruncatedStream { detail } => write!(f, "truncated stream: {detail}"),
            ErrorKind::UnsupportedFormatVersion { found, supported } => write!(
                f,
                "unsupported format version {found}, this reader supports {supported}"
            ),
            ErrorKind::InvalidHeader { reason } => write!(f, "invalid header: {reason}"),
            ErrorKind::UnknownRecordKind { tag } => write!(f, "unknown record kind {tag}"),
            ErrorKind::MalformedStream { reason } => write!(f, "malformed stream: {reason}"),
            ErrorKind::UnresolvedType { type_id } => write!(f, "cannot resolve {type_id}"),
            ErrorKind::UnresolvedMember { owner, attribute } => {
                write!(f, "'{owner}' has no member '{attribute}'")
            }
            ErrorKind::NoMatchingConstructor {
                type_name,
                arg_count,
            } => write!(
                f,
                "'{type_name}' has no constructor taking {arg_count} arguments"
            ),
            ErrorKind::ConstructorInvocationFailed { type_name, message } => {
                write!(f, "constructing '{type_name}' failed: {message}")
            }
            ErrorKind::NoInsertionTarget { parent_type } => {
                write!(f, "'{parent_type}' cannot accept child content")
            }
            ErrorKind::MissingDictionaryKey { type_name } => {
                write!(f, "dictionary entry of type '{type_name}' has no key")
            }
            ErrorKind::PropertyCollectionClosed { property } => write!(
                f,
                "'{property}' was already set by an explicit collection element"
            ),
            ErrorKind::IncompatibleNullableAssignment {
                property,
                expected,
                found,
            } => write!(
                f,
                "cannot assign '{found}' to '{property}', which expects an optional '{expected}'"
            ),
            ErrorKind::TypeConversionFailed {
                value,
                target,
                property,
                message,
            } => {
                write!(f, "cannot convert '{value}' to '{target}'")?;
                if let Some(property) = property {
                    write!(f, " for '{property}'")?;
                }
                write!(f, ": {message}")
            }
            ErrorKind::ResourceNotFound { key } => write!(f, "resource '{key}' not found"),
            ErrorKind::Model { message } => f.write_str(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    #[test]
    fn test_context_is_filled_once() {
        let error = ReadError::malformed("boom")
            .at(Some(SourceLocation::new(3, 4)), 40, RecordKind::ElementEnd)
            .at(Some(SourceLocation::new(9, 9)), 99, RecordKind::DocumentEnd);
        let diagnostic = error.diagnostic().unwrap();
        assert_eq!(diagnostic.location, Some(SourceLocation::new(3, 4)));
        assert_eq!(diagnostic.offset, Some(40));
        assert_eq!(diagnostic.record, Some(RecordKind::ElementEnd));
        insta::assert_snapshot!(
            error.to_string(),
            @"malformed stream: boom in ElementEnd record at offset 40 (line 3, position 4)"
        );
    }

    #[test]
    fn test_critical_model_errors_are_fatal() {
        let error: ReadError = ModelError::critical("out of memory").into();
        assert!(error.is_fatal());
        let located = error.clone().at(None, 1, RecordKind::ElementEnd);
        assert_eq!(located, error);
        assert_eq!(located.kind(), None);
    }
}
