//! The object model the reader builds into.

use std::fmt;
use std::sync::Arc;

use baml_records::{LocatedRecord, SymbolTable, TypeId};

use crate::catalog::{ConstructorSig, KnownExtension, MemberRef, SerializerHandle, TypeRef};
use crate::deferred::DeferredContent;
use crate::error::ReadError;

/// A value flowing through the reader.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<O> {
    Null,
    Text(String),
    Type(TypeRef),
    Object(O),
    /// A resource found in a dictionary whose value has not been built,
    /// returned when the lookup asked not to force it.
    Deferred(DeferredReference<O>),
}

/// Names a not yet realized dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredReference<O> {
    pub dictionary: O,
    pub key: Box<Value<O>>,
}

impl<O> Value<O> {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&O> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<O> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl<O: fmt::Debug> Value<O> {
    /// Short rendering for error messages.
    pub fn describe(&self) -> String {
        match self {
            Value::Null => "null".to_owned(),
            Value::Text(text) => text.clone(),
            Value::Type(ty) => ty.name.clone(),
            Value::Object(object) => format!("{object:?}"),
            Value::Deferred(reference) => format!("deferred {}", reference.key.describe()),
        }
    }
}

/// Failure reported by an [`ObjectModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelError {
    pub message: String,
    /// Out-of-memory class conditions. The reader propagates these as
    /// [`ReadError::Fatal`] without wrapping or recovery.
    pub critical: bool,
}

impl ModelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            critical: false,
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            critical: true,
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ModelError {}

pub type ModelResult<T> = std::result::Result<T, ModelError>;

/// What a markup extension is being evaluated for.
#[derive(Debug, Clone)]
pub struct ProvideValueTarget<O> {
    pub object: Option<O>,
    pub member: Option<MemberRef>,
}

impl<O> ProvideValueTarget<O> {
    pub fn none() -> Self {
        Self {
            object: None,
            member: None,
        }
    }
}

/// Result of evaluating a markup extension.
#[derive(Debug, Clone)]
pub enum Provided<O> {
    Value(Value<O>),
    /// The extension wants a resource; the reader walks its scopes for
    /// `key`. With `defer`, an unrealized hit is returned as
    /// [`Value::Deferred`] instead of being built.
    Resource { key: Value<O>, defer: bool },
}

/// Answer to a dictionary lookup.
#[derive(Debug, Clone)]
pub enum DictionaryEntry<O> {
    Missing,
    Value(Value<O>),
    /// The key comes from deferred content and its value was never built.
    Unrealized {
        content: Arc<DeferredContent<O>>,
        index: usize,
    },
}

/// Records handed to a custom serializer. The serializer reads up to and
/// including the `ElementEnd` that closes its element.
pub trait RecordSource {
    fn next_record(&mut self) -> Result<Option<LocatedRecord>, ReadError>;
    fn symbols(&self) -> &dyn SymbolTable;
}

/// The runtime the reader builds objects in.
///
/// `Object` is a cheap handle; the reader clones it freely and never
/// inspects it except through these methods.
pub trait ObjectModel {
    type Object: Clone + fmt::Debug;

    fn create_instance(&mut self, ty: &TypeRef) -> ModelResult<Self::Object>;

    fn type_of(&self, object: &Self::Object) -> TypeRef;

    fn begin_init(&mut self, _object: &Self::Object) -> ModelResult<()> {
        Ok(())
    }

    fn end_init(&mut self, _object: &Self::Object) -> ModelResult<()> {
        Ok(())
    }

    /// Value to use for `member` of `parent` when the element meant for it
    /// failed to finish initializing.
    fn fallback_value(
        &mut self,
        _parent: &Self::Object,
        _member: &MemberRef,
    ) -> Option<Value<Self::Object>> {
        None
    }

    /// Called after construction, before the object is attached.
    fn freeze_if_required(&mut self, _object: &Self::Object) -> ModelResult<()> {
        Ok(())
    }

    fn get_value(
        &mut self,
        object: &Self::Object,
        member: &MemberRef,
    ) -> ModelResult<Value<Self::Object>>;

    fn set_value(
        &mut self,
        object: &Self::Object,
        member: &MemberRef,
        value: Value<Self::Object>,
    ) -> ModelResult<()>;

    /// Convert markup text to `target`, through `converter` when the
    /// stream names one.
    fn convert_from_text(
        &mut self,
        text: &str,
        target: &TypeRef,
        converter: Option<&TypeRef>,
        context: &ProvideValueTarget<Self::Object>,
    ) -> ModelResult<Value<Self::Object>>;

    fn convert_value(
        &mut self,
        value: Value<Self::Object>,
        target: &TypeRef,
    ) -> ModelResult<Value<Self::Object>>;

    fn invoke_constructor(
        &mut self,
        ty: &TypeRef,
        signature: &ConstructorSig,
        args: Vec<Value<Self::Object>>,
    ) -> ModelResult<Self::Object>;

    /// Build one of the well-known one-argument extensions directly.
    fn construct_known(
        &mut self,
        extension: KnownExtension,
        arg: Value<Self::Object>,
    ) -> ModelResult<Self::Object>;

    fn provide_value(
        &mut self,
        extension: &Self::Object,
        target: &ProvideValueTarget<Self::Object>,
    ) -> ModelResult<Provided<Self::Object>>;

    fn create_array(
        &mut self,
        element: &TypeRef,
        items: Vec<Value<Self::Object>>,
    ) -> ModelResult<Self::Object>;

    fn add_item(&mut self, collection: &Self::Object, item: Value<Self::Object>)
    -> ModelResult<()>;

    fn add_entry(
        &mut self,
        dictionary: &Self::Object,
        key: Value<Self::Object>,
        value: Value<Self::Object>,
    ) -> ModelResult<()>;

    fn add_child(&mut self, parent: &Self::Object, child: Value<Self::Object>) -> ModelResult<()>;

    /// Hand a dictionary its lazily parsed keys and value bytes.
    fn set_deferred_content(
        &mut self,
        dictionary: &Self::Object,
        content: Arc<DeferredContent<Self::Object>>,
    ) -> ModelResult<()>;

    fn lookup_entry(
        &mut self,
        dictionary: &Self::Object,
        key: &Value<Self::Object>,
    ) -> ModelResult<DictionaryEntry<Self::Object>>;

    /// Replace an unrealized entry with the value built for it.
    fn store_realized(
        &mut self,
        dictionary: &Self::Object,
        key: Value<Self::Object>,
        value: Value<Self::Object>,
    ) -> ModelResult<()>;

    /// Resources exposed by a style- or template-like owner.
    fn owned_resource(
        &mut self,
        _owner: &Self::Object,
        _key: &Value<Self::Object>,
    ) -> ModelResult<DictionaryEntry<Self::Object>> {
        Ok(DictionaryEntry::Missing)
    }

    /// Application and theme level resources, consulted last.
    fn ambient_resource(
        &mut self,
        _key: &Value<Self::Object>,
    ) -> ModelResult<Option<Value<Self::Object>>> {
        Ok(None)
    }

    fn push_scope(&mut self) {}

    fn pop_scope(&mut self) {}

    fn register_name(&mut self, _name: &str, _object: &Self::Object) -> ModelResult<()> {
        Ok(())
    }

    fn set_uid(&mut self, _uid: &str, _object: &Self::Object) -> ModelResult<()> {
        Ok(())
    }

    fn add_event_handler(
        &mut self,
        _object: &Self::Object,
        _event: &MemberRef,
        _handler: &str,
    ) -> ModelResult<()> {
        Ok(())
    }

    fn connect(&mut self, _connection_id: i32, _object: &Self::Object) -> ModelResult<()> {
        Ok(())
    }

    /// Read a whole element subtree with a custom serializer.
    fn read_with_serializer(
        &mut self,
        _serializer: SerializerHandle,
        ty: &TypeRef,
        _source: &mut dyn RecordSource,
    ) -> ModelResult<Self::Object> {
        Err(ModelError::new(format!("no serializer available for '{ty}'")))
    }

    /// Decode the payload of a `PropertyCustom` record.
    fn decode_custom_value(
        &mut self,
        serializer: TypeId,
        _data: &[u8],
        _member: &MemberRef,
    ) -> ModelResult<Value<Self::Object>> {
        Err(ModelError::new(format!("no custom value decoder for {serializer}")))
    }
}
