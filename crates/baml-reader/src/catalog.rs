//! Type descriptors and the catalog that resolves ids to them.

use std::fmt;
use std::sync::{Arc, LazyLock};

use baml_records::{AttributeId, SymbolTable, TypeId};

/// Shared handle to a [`TypeDescriptor`].
pub type TypeRef = Arc<TypeDescriptor>;

/// How values of a type hold other values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionKind {
    #[default]
    None,
    List,
    Dictionary,
    Array,
}

/// A public instance constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorSig {
    pub params: Vec<TypeRef>,
}

/// Everything the reader needs to know about a runtime type.
///
/// Built with the chained setters, then frozen with [`build`](Self::build).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    /// Names of base types and interfaces values of this type convert to.
    pub assignable_to: Vec<String>,
    pub platform_object: bool,
    pub collection: CollectionKind,
    /// Item type for arrays.
    pub element_type: Option<TypeRef>,
    pub add_child: bool,
    pub content_property: Option<String>,
    /// Member whose value keys an instance added to a dictionary without
    /// an explicit key.
    pub dictionary_key_property: Option<String>,
    pub constructors: Vec<ConstructorSig>,
    pub default_constructible: bool,
    pub markup_extension: bool,
    /// Supports begin/end init around property assignment.
    pub staged_init: bool,
    /// Exposes its own resources (styles, templates).
    pub resource_owner: bool,
    /// Set when this type is an optional wrapper of another type.
    pub nullable_of: Option<TypeRef>,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assignable_to: Vec::new(),
            platform_object: false,
            collection: CollectionKind::None,
            element_type: None,
            add_child: false,
            content_property: None,
            dictionary_key_property: None,
            constructors: Vec::new(),
            default_constructible: true,
            markup_extension: false,
            staged_init: false,
            resource_owner: false,
            nullable_of: None,
        }
    }

    pub fn assignable_to(mut self, name: impl Into<String>) -> Self {
        self.assignable_to.push(name.into());
        self
    }

    pub fn platform(mut self) -> Self {
        self.platform_object = true;
        self
    }

    pub fn collection(mut self, kind: CollectionKind) -> Self {
        self.collection = kind;
        self
    }

    pub fn array_of(mut self, element: TypeRef) -> Self {
        self.collection = CollectionKind::Array;
        self.element_type = Some(element);
        self
    }

    pub fn add_child(mut self) -> Self {
        self.add_child = true;
        self
    }

    pub fn content_property(mut self, name: impl Into<String>) -> Self {
        self.content_property = Some(name.into());
        self
    }

    pub fn dictionary_key_property(mut self, name: impl Into<String>) -> Self {
        self.dictionary_key_property = Some(name.into());
        self
    }

    pub fn constructor(mut self, params: Vec<TypeRef>) -> Self {
        self.constructors.push(ConstructorSig { params });
        self
    }

    pub fn no_default_constructor(mut self) -> Self {
        self.default_constructible = false;
        self
    }

    pub fn markup_extension(mut self) -> Self {
        self.markup_extension = true;
        self
    }

    pub fn staged_init(mut self) -> Self {
        self.staged_init = true;
        self
    }

    pub fn resource_owner(mut self) -> Self {
        self.resource_owner = true;
        self
    }

    pub fn nullable_of(mut self, inner: TypeRef) -> Self {
        self.nullable_of = Some(inner);
        self
    }

    pub fn build(self) -> TypeRef {
        Arc::new(self)
    }

    /// Whether a value of this type can be stored where `target` is
    /// expected. Everything is assignable to `Object`.
    pub fn is_assignable_to(&self, target: &TypeDescriptor) -> bool {
        self.name == target.name
            || target.name == OBJECT.name
            || self.assignable_to.iter().any(|name| *name == target.name)
    }

    pub fn is_string(&self) -> bool {
        self.name == STRING.name
    }

    pub fn is_object(&self) -> bool {
        self.name == OBJECT.name
    }

    /// The constructor taking exactly `arity` arguments. A default
    /// constructible type always has one of arity zero.
    pub fn constructor_with_arity(&self, arity: usize) -> Option<ConstructorSig> {
        self.constructors
            .iter()
            .find(|sig| sig.params.len() == arity)
            .cloned()
            .or_else(|| {
                (arity == 0 && self.default_constructible).then(|| ConstructorSig { params: vec![] })
            })
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

static STRING: LazyLock<TypeRef> = LazyLock::new(|| TypeDescriptor::new("String").build());
static OBJECT: LazyLock<TypeRef> = LazyLock::new(|| TypeDescriptor::new("Object").build());
static TYPE: LazyLock<TypeRef> = LazyLock::new(|| TypeDescriptor::new("Type").build());

/// The type of text values.
pub fn string_type() -> TypeRef {
    STRING.clone()
}

/// The root of every type.
pub fn object_type() -> TypeRef {
    OBJECT.clone()
}

/// The type of type references.
pub fn type_type() -> TypeRef {
    TYPE.clone()
}

/// How a member is backed on its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    PlatformProperty,
    ReflectedProperty,
    AttachedGetterSetter,
    Event,
}

/// A resolved member of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub kind: MemberKind,
    pub name: String,
    pub owner: TypeRef,
    pub property_type: TypeRef,
    pub read_only: bool,
}

impl MemberRef {
    pub fn new(kind: MemberKind, owner: TypeRef, name: impl Into<String>, property_type: TypeRef) -> Self {
        Self {
            kind,
            name: name.into(),
            owner,
            property_type,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner.name, self.name)
    }
}

/// Opaque handle to a serializer that reads an element's whole subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerializerHandle(pub u32);

/// One-argument indirection types the reader builds without constructor
/// lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownExtension {
    StaticResource,
    DynamicResource,
    TemplateBinding,
    Type,
    Static,
}

/// Resolves stream ids to runtime types and members.
///
/// Any caching is the implementation's business; the reader calls these
/// as often as it needs to.
pub trait TypeCatalog {
    fn resolve_type(&self, id: TypeId, symbols: &dyn SymbolTable) -> Option<TypeRef>;

    /// Look up a member by attribute id. Implementations try platform
    /// properties, then reflected properties, then attached accessors and
    /// events.
    fn resolve_member(
        &self,
        owner: &TypeRef,
        attribute: AttributeId,
        symbols: &dyn SymbolTable,
    ) -> Option<MemberRef>;

    /// Look up a member of `owner` by name, for content and key properties.
    fn member_named(&self, owner: &TypeRef, name: &str) -> Option<MemberRef>;

    fn custom_serializer(&self, _id: TypeId) -> Option<SerializerHandle> {
        None
    }

    fn known_constructor_shortcut(&self, _id: TypeId) -> Option<KnownExtension> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignability() {
        let panel = TypeDescriptor::new("Panel").build();
        let grid = TypeDescriptor::new("Grid").assignable_to("Panel").build();
        assert!(grid.is_assignable_to(&panel));
        assert!(!panel.is_assignable_to(&grid));
        assert!(panel.is_assignable_to(&object_type()));
        assert!(string_type().is_string());
    }

    #[test]
    fn test_constructor_with_arity() {
        let point = TypeDescriptor::new("Point")
            .constructor(vec![string_type()])
            .constructor(vec![string_type(), string_type()])
            .build();
        assert_eq!(point.constructor_with_arity(2).map(|c| c.params.len()), Some(2));
        assert_eq!(point.constructor_with_arity(0).map(|c| c.params.len()), Some(0));
        assert!(point.constructor_with_arity(3).is_none());

        let fixed = TypeDescriptor::new("Fixed").no_default_constructor().build();
        assert!(fixed.constructor_with_arity(0).is_none());
    }
}
