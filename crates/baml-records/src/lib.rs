#![doc = include_str!("../README.md")]
//! Record layer for BAML, the binary form of compiled UI markup.
//!
//! A stream is a [`VersionHeader`] followed by self-delimited records. Each
//! record is a one-byte [`RecordKind`] tag and a payload that is either of
//! fixed size or prefixed with a 7-bit encoded length. [`RecordDecoder`]
//! reads them one at a time from an incrementally fed buffer, and
//! [`RecordWriter`] produces them.

mod bytes;
mod decoder;
mod error;
mod header;
mod kind;
mod location;
mod record;
mod symbols;
mod writer;

pub use decoder::{Decoded, LocatedRecord, RecordDecoder};
pub use error::DecodeError;
pub use header::{FEATURE_ID, Version, VersionHeader};
pub use kind::RecordKind;
pub use location::SourceLocation;
pub use record::{
    AssemblyId, AssemblyInfo, AttributeId, AttributeInfo, DefUsage, ElementFlags,
    ExtensionFlags, KeyPlacement, PiMapping, Record, StringId, TypeId, TypeInfo,
};
pub use symbols::{MapTable, SymbolTable};
pub use writer::RecordWriter;
