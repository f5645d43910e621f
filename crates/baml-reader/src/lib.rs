#![doc = include_str!("../README.md")]
//! Object reconstruction from BAML record streams.
//!
//! [`RecordReader`] dispatches records onto a [`ContextStack`] of frames and
//! builds objects through the caller's [`ObjectModel`], resolving ids with
//! a [`TypeCatalog`] and a [`SymbolTable`](baml_records::SymbolTable).

mod catalog;
mod constructor;
mod deferred;
mod diagnostic;
mod error;
mod holder;
mod model;
mod reader;
mod scope;
mod stack;

pub use catalog::{
    CollectionKind, ConstructorSig, KnownExtension, MemberKind, MemberRef, SerializerHandle,
    TypeCatalog, TypeDescriptor, TypeRef, object_type, string_type, type_type,
};
pub use constructor::ConstructorArgs;
pub use deferred::{DeferredContent, DeferredKey};
pub use error::{Diagnostic, ErrorKind, Fault, ReadError, Result};
pub use holder::{HolderKind, ResourceHolder};
pub use model::{
    DeferredReference, DictionaryEntry, ModelError, ModelResult, ObjectModel, Provided,
    ProvideValueTarget, RecordSource, Value,
};
pub use reader::{ReadStatus, ReaderOptions, RecordReader, Services, read_document};
pub use scope::{Lookup, ResourceScope, ScopeEntry};
pub use stack::{ContextStack, Facets, Frame, FrameKind};
