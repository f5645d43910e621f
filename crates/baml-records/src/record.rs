//! The record model: one variant per [`RecordKind`].

use std::fmt;

use crate::RecordKind;
use crate::bytes::{Cursor, Shortfall, put_string};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "facet", derive(facet::Facet))]
        pub struct $name(pub i16);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, " #{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Identifies a type. Negative values name well-known types.
    TypeId,
    "type"
);
id_type!(
    /// Identifies a member (property or event) of a type.
    AttributeId,
    "attribute"
);
id_type!(
    /// Identifies an interned string.
    StringId,
    "string"
);
id_type!(
    /// Identifies an assembly.
    AssemblyId,
    "assembly"
);

/// Flags on `ElementStart` and `StaticResourceStart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ElementFlags {
    /// The instance is produced by converting the element's text content.
    pub via_type_converter: bool,
    /// The element was synthesized by the compiler.
    pub injected: bool,
}

impl ElementFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            via_type_converter: bits & 0b01 != 0,
            injected: bits & 0b10 != 0,
        }
    }

    pub fn bits(self) -> u8 {
        u8::from(self.via_type_converter) | (u8::from(self.injected) << 1)
    }
}

/// Flags on `PropertyWithExtension` and `OptimizedStaticResource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ExtensionFlags {
    /// The value id names a type.
    pub value_is_type: bool,
    /// The value id names a static member (an attribute).
    pub value_is_static: bool,
}

impl ExtensionFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            value_is_type: bits & 0b01 != 0,
            value_is_static: bits & 0b10 != 0,
        }
    }

    pub fn bits(self) -> u8 {
        u8::from(self.value_is_type) | (u8::from(self.value_is_static) << 1)
    }
}

/// Where a deferred key's value lives, relative to the values section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct KeyPlacement {
    pub value_position: u32,
    pub shared: bool,
    pub shared_set: bool,
}

/// The role of a `DefAttribute` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefUsage {
    Key,
    Name,
    Uid,
}

impl DefUsage {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(DefUsage::Key),
            1 => Some(DefUsage::Name),
            2 => Some(DefUsage::Uid),
            _ => None,
        }
    }

    fn byte(self) -> u8 {
        match self {
            DefUsage::Key => 0,
            DefUsage::Name => 1,
            DefUsage::Uid => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyInfo {
    pub id: AssemblyId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub id: TypeId,
    pub assembly: AssemblyId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub id: AttributeId,
    pub owner: TypeId,
    pub usage: u8,
    pub name: String,
}

/// Maps an XML namespace onto a CLR namespace in an assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiMapping {
    pub xml_namespace: String,
    pub clr_namespace: String,
    pub assembly: AssemblyId,
}

/// One logical record. Debug records never reach consumers of
/// [`RecordDecoder`](crate::RecordDecoder); they are folded into
/// [`LocatedRecord::location`](crate::LocatedRecord) instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    DocumentStart {
        load_async: bool,
        max_async_records: i32,
        debug_baml: bool,
    },
    DocumentEnd,
    ElementStart {
        type_id: TypeId,
        flags: ElementFlags,
    },
    ElementEnd,
    Property {
        attribute: AttributeId,
        value: String,
    },
    PropertyCustom {
        attribute: AttributeId,
        serializer_type: TypeId,
        data: Vec<u8>,
    },
    PropertyComplexStart {
        attribute: AttributeId,
    },
    PropertyComplexEnd,
    PropertyArrayStart {
        attribute: AttributeId,
    },
    PropertyArrayEnd,
    PropertyIListStart {
        attribute: AttributeId,
    },
    PropertyIListEnd,
    PropertyIDictionaryStart {
        attribute: AttributeId,
    },
    PropertyIDictionaryEnd,
    Text {
        value: String,
    },
    TextWithConverter {
        value: String,
        converter: TypeId,
    },
    RoutedEvent {
        attribute: AttributeId,
        handler: String,
    },
    ClrEvent {
        attribute: AttributeId,
        handler: String,
    },
    XmlnsProperty {
        prefix: String,
        namespace: String,
        assemblies: Vec<AssemblyId>,
    },
    DefAttribute {
        usage: DefUsage,
        value: String,
    },
    PiMapping(PiMapping),
    AssemblyInfo(AssemblyInfo),
    TypeInfo(TypeInfo),
    AttributeInfo(AttributeInfo),
    StringInfo {
        id: StringId,
        value: String,
    },
    PropertyStringReference {
        attribute: AttributeId,
        string: StringId,
    },
    PropertyTypeReference {
        attribute: AttributeId,
        type_id: TypeId,
    },
    PropertyWithExtension {
        attribute: AttributeId,
        extension: TypeId,
        flags: ExtensionFlags,
        value_id: i16,
    },
    PropertyWithConverter {
        attribute: AttributeId,
        value: String,
        converter: TypeId,
    },
    DeferableContentStart {
        content_size: u32,
    },
    DefAttributeKeyString {
        string: StringId,
        placement: KeyPlacement,
    },
    DefAttributeKeyType {
        type_id: TypeId,
        placement: KeyPlacement,
    },
    KeyElementStart {
        type_id: TypeId,
        placement: KeyPlacement,
    },
    KeyElementEnd,
    ConstructorParametersStart,
    ConstructorParametersEnd,
    ConstructorParameterType {
        type_id: TypeId,
    },
    ConnectionId {
        id: i32,
    },
    ContentProperty {
        attribute: AttributeId,
    },
    StaticResourceStart {
        type_id: TypeId,
        flags: ElementFlags,
    },
    StaticResourceEnd,
    StaticResourceId {
        index: u16,
    },
    TextWithId {
        string: StringId,
    },
    LineNumberAndPosition {
        line: u32,
        position: u32,
    },
    LinePosition {
        position: u32,
    },
    OptimizedStaticResource {
        flags: ExtensionFlags,
        value_id: i16,
    },
    PropertyWithStaticResourceId {
        attribute: AttributeId,
        index: u16,
    },
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        use RecordKind as K;
        match self {
            Record::DocumentStart { .. } => K::DocumentStart,
            Record::DocumentEnd => K::DocumentEnd,
            Record::ElementStart { .. } => K::ElementStart,
            Record::ElementEnd => K::ElementEnd,
            Record::Property { .. } => K::Property,
            Record::PropertyCustom { .. } => K::PropertyCustom,
            Record::PropertyComplexStart { .. } => K::PropertyComplexStart,
            Record::PropertyComplexEnd => K::PropertyComplexEnd,
            Record::PropertyArrayStart { .. } => K::PropertyArrayStart,
            Record::PropertyArrayEnd => K::PropertyArrayEnd,
            Record::PropertyIListStart { .. } => K::PropertyIListStart,
            Record::PropertyIListEnd => K::PropertyIListEnd,
            Record::PropertyIDictionaryStart { .. } => K::PropertyIDictionaryStart,
            Record::PropertyIDictionaryEnd => K::PropertyIDictionaryEnd,
            Record::Text { .. } => K::Text,
            Record::TextWithConverter { .. } => K::TextWithConverter,
            Record::RoutedEvent { .. } => K::RoutedEvent,
            Record::ClrEvent { .. } => K::ClrEvent,
            Record::XmlnsProperty { .. } => K::XmlnsProperty,
            Record::DefAttribute { .. } => K::DefAttribute,
            Record::PiMapping(_) => K::PiMapping,
            Record::AssemblyInfo(_) => K::AssemblyInfo,
            Record::TypeInfo(_) => K::TypeInfo,
            Record::AttributeInfo(_) => K::AttributeInfo,
            Record::StringInfo { .. } => K::StringInfo,
            Record::PropertyStringReference { .. } => K::PropertyStringReference,
            Record::PropertyTypeReference { .. } => K::PropertyTypeReference,
            Record::PropertyWithExtension { .. } => K::PropertyWithExtension,
            Record::PropertyWithConverter { .. } => K::PropertyWithConverter,
            Record::DeferableContentStart { .. } => K::DeferableContentStart,
            Record::DefAttributeKeyString { .. } => K::DefAttributeKeyString,
            Record::DefAttributeKeyType { .. } => K::DefAttributeKeyType,
            Record::KeyElementStart { .. } => K::KeyElementStart,
            Record::KeyElementEnd => K::KeyElementEnd,
            Record::ConstructorParametersStart => K::ConstructorParametersStart,
            Record::ConstructorParametersEnd => K::ConstructorParametersEnd,
            Record::ConstructorParameterType { .. } => K::ConstructorParameterType,
            Record::ConnectionId { .. } => K::ConnectionId,
            Record::ContentProperty { .. } => K::ContentProperty,
            Record::StaticResourceStart { .. } => K::StaticResourceStart,
            Record::StaticResourceEnd => K::StaticResourceEnd,
            Record::StaticResourceId { .. } => K::StaticResourceId,
            Record::TextWithId { .. } => K::TextWithId,
            Record::LineNumberAndPosition { .. } => K::LineNumberAndPosition,
            Record::LinePosition { .. } => K::LinePosition,
            Record::OptimizedStaticResource { .. } => K::OptimizedStaticResource,
            Record::PropertyWithStaticResourceId { .. } => K::PropertyWithStaticResourceId,
        }
    }

    /// The attribute a property-like record targets.
    pub fn attribute(&self) -> Option<AttributeId> {
        match self {
            Record::Property { attribute, .. }
            | Record::PropertyCustom { attribute, .. }
            | Record::PropertyComplexStart { attribute }
            | Record::PropertyArrayStart { attribute }
            | Record::PropertyIListStart { attribute }
            | Record::PropertyIDictionaryStart { attribute }
            | Record::RoutedEvent { attribute, .. }
            | Record::ClrEvent { attribute, .. }
            | Record::PropertyStringReference { attribute, .. }
            | Record::PropertyTypeReference { attribute, .. }
            | Record::PropertyWithExtension { attribute, .. }
            | Record::PropertyWithConverter { attribute, .. }
            | Record::ContentProperty { attribute }
            | Record::PropertyWithStaticResourceId { attribute, .. } => Some(*attribute),
            _ => None,
        }
    }

    /// Decode the payload of a record of `kind`. The payload must be
    /// consumed exactly.
    pub(crate) fn decode(kind: RecordKind, payload: &[u8]) -> Result<Record, Shortfall> {
        let mut c = Cursor::new(payload);
        let c = &mut c;
        let record = match kind {
            RecordKind::DocumentStart => Record::DocumentStart {
                load_async: c.bool()?,
                max_async_records: c.i32()?,
                debug_baml: c.bool()?,
            },
            RecordKind::DocumentEnd => Record::DocumentEnd,
            RecordKind::ElementStart => Record::ElementStart {
                type_id: TypeId(c.i16()?),
                flags: ElementFlags::from_bits(c.u8()?),
            },
            RecordKind::ElementEnd => Record::ElementEnd,
            RecordKind::Property => Record::Property {
                attribute: AttributeId(c.i16()?),
                value: c.string()?,
            },
            RecordKind::PropertyCustom => Record::PropertyCustom {
                attribute: AttributeId(c.i16()?),
                serializer_type: TypeId(c.i16()?),
                data: c.rest().to_vec(),
            },
            RecordKind::PropertyComplexStart => Record::PropertyComplexStart {
                attribute: AttributeId(c.i16()?),
            },
            RecordKind::PropertyComplexEnd => Record::PropertyComplexEnd,
            RecordKind::PropertyArrayStart => Record::PropertyArrayStart {
                attribute: AttributeId(c.i16()?),
            },
            RecordKind::PropertyArrayEnd => Record::PropertyArrayEnd,
            RecordKind::PropertyIListStart => Record::PropertyIListStart {
                attribute: AttributeId(c.i16()?),
            },
            RecordKind::PropertyIListEnd => Record::PropertyIListEnd,
            RecordKind::PropertyIDictionaryStart => Record::PropertyIDictionaryStart {
                attribute: AttributeId(c.i16()?),
            },
            RecordKind::PropertyIDictionaryEnd => Record::PropertyIDictionaryEnd,
            RecordKind::Text => Record::Text { value: c.string()? },
            RecordKind::TextWithConverter => Record::TextWithConverter {
                value: c.string()?,
                converter: TypeId(c.i16()?),
            },
            RecordKind::RoutedEvent => Record::RoutedEvent {
                attribute: AttributeId(c.i16()?),
                handler: c.string()?,
            },
            RecordKind::ClrEvent => Record::ClrEvent {
                attribute: AttributeId(c.i16()?),
                handler: c.string()?,
            },
            RecordKind::XmlnsProperty => {
                let prefix = c.string()?;
                let namespace = c.string()?;
                let count = c.u16()?;
                let assemblies = (0..count)
                    .map(|_| c.i16().map(AssemblyId))
                    .collect::<Result<_, _>>()?;
                Record::XmlnsProperty {
                    prefix,
                    namespace,
                    assemblies,
                }
            }
            RecordKind::DefAttribute => {
                let byte = c.u8()?;
                let usage = DefUsage::from_byte(byte)
                    .ok_or_else(|| Shortfall::Invalid(format!("unknown attribute usage {byte}")))?;
                Record::DefAttribute {
                    usage,
                    value: c.string()?,
                }
            }
            RecordKind::PiMapping => Record::PiMapping(PiMapping {
                xml_namespace: c.string()?,
                clr_namespace: c.string()?,
                assembly: AssemblyId(c.i16()?),
            }),
            RecordKind::AssemblyInfo => Record::AssemblyInfo(AssemblyInfo {
                id: AssemblyId(c.i16()?),
                name: c.string()?,
            }),
            RecordKind::TypeInfo => Record::TypeInfo(TypeInfo {
                id: TypeId(c.i16()?),
                assembly: AssemblyId(c.i16()?),
                name: c.string()?,
            }),
            RecordKind::AttributeInfo => Record::AttributeInfo(AttributeInfo {
                id: AttributeId(c.i16()?),
                owner: TypeId(c.i16()?),
                usage: c.u8()?,
                name: c.string()?,
            }),
            RecordKind::StringInfo => Record::StringInfo {
                id: StringId(c.i16()?),
                value: c.string()?,
            },
            RecordKind::PropertyStringReference => Record::PropertyStringReference {
                attribute: AttributeId(c.i16()?),
                string: StringId(c.i16()?),
            },
            RecordKind::PropertyTypeReference => Record::PropertyTypeReference {
                attribute: AttributeId(c.i16()?),
                type_id: TypeId(c.i16()?),
            },
            RecordKind::PropertyWithExtension => Record::PropertyWithExtension {
                attribute: AttributeId(c.i16()?),
                extension: TypeId(c.i16()?),
                flags: ExtensionFlags::from_bits(c.u8()?),
                value_id: c.i16()?,
            },
            RecordKind::PropertyWithConverter => Record::PropertyWithConverter {
                attribute: AttributeId(c.i16()?),
                value: c.string()?,
                converter: TypeId(c.i16()?),
            },
            RecordKind::DeferableContentStart => Record::DeferableContentStart {
                content_size: c.u32()?,
            },
            RecordKind::DefAttributeKeyString => Record::DefAttributeKeyString {
                string: StringId(c.i16()?),
                placement: placement(c)?,
            },
            RecordKind::DefAttributeKeyType => Record::DefAttributeKeyType {
                type_id: TypeId(c.i16()?),
                placement: placement(c)?,
            },
            RecordKind::KeyElementStart => Record::KeyElementStart {
                type_id: TypeId(c.i16()?),
                placement: placement(c)?,
            },
            RecordKind::KeyElementEnd => Record::KeyElementEnd,
            RecordKind::ConstructorParametersStart => Record::ConstructorParametersStart,
            RecordKind::ConstructorParametersEnd => Record::ConstructorParametersEnd,
            RecordKind::ConstructorParameterType => Record::ConstructorParameterType {
                type_id: TypeId(c.i16()?),
            },
            RecordKind::ConnectionId => Record::ConnectionId { id: c.i32()? },
            RecordKind::ContentProperty => Record::ContentProperty {
                attribute: AttributeId(c.i16()?),
            },
            RecordKind::StaticResourceStart => Record::StaticResourceStart {
                type_id: TypeId(c.i16()?),
                flags: ElementFlags::from_bits(c.u8()?),
            },
            RecordKind::StaticResourceEnd => Record::StaticResourceEnd,
            RecordKind::StaticResourceId => Record::StaticResourceId { index: c.u16()? },
            RecordKind::TextWithId => Record::TextWithId {
                string: StringId(c.i16()?),
            },
            RecordKind::LineNumberAndPosition => Record::LineNumberAndPosition {
                line: c.u32()?,
                position: c.u32()?,
            },
            RecordKind::LinePosition => Record::LinePosition {
                position: c.u32()?,
            },
            RecordKind::OptimizedStaticResource => Record::OptimizedStaticResource {
                flags: ExtensionFlags::from_bits(c.u8()?),
                value_id: c.i16()?,
            },
            RecordKind::PropertyWithStaticResourceId => Record::PropertyWithStaticResourceId {
                attribute: AttributeId(c.i16()?),
                index: c.u16()?,
            },
        };
        c.finish()?;
        Ok(record)
    }

    /// Append the payload (without tag or length prefix).
    pub(crate) fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Record::DocumentStart {
                load_async,
                max_async_records,
                debug_baml,
            } => {
                out.push(u8::from(*load_async));
                out.extend_from_slice(&max_async_records.to_le_bytes());
                out.push(u8::from(*debug_baml));
            }
            Record::DocumentEnd
            | Record::ElementEnd
            | Record::PropertyComplexEnd
            | Record::PropertyArrayEnd
            | Record::PropertyIListEnd
            | Record::PropertyIDictionaryEnd
            | Record::KeyElementEnd
            | Record::ConstructorParametersStart
            | Record::ConstructorParametersEnd
            | Record::StaticResourceEnd => {}
            Record::ElementStart { type_id, flags }
            | Record::StaticResourceStart { type_id, flags } => {
                put_i16(out, type_id.0);
                out.push(flags.bits());
            }
            Record::Property { attribute, value } => {
                put_i16(out, attribute.0);
                put_string(out, value);
            }
            Record::PropertyCustom {
                attribute,
                serializer_type,
                data,
            } => {
                put_i16(out, attribute.0);
                put_i16(out, serializer_type.0);
                out.extend_from_slice(data);
            }
            Record::PropertyComplexStart { attribute }
            | Record::PropertyArrayStart { attribute }
            | Record::PropertyIListStart { attribute }
            | Record::PropertyIDictionaryStart { attribute }
            | Record::ContentProperty { attribute } => put_i16(out, attribute.0),
            Record::Text { value } => put_string(out, value),
            Record::TextWithConverter { value, converter } => {
                put_string(out, value);
                put_i16(out, converter.0);
            }
            Record::RoutedEvent { attribute, handler } | Record::ClrEvent { attribute, handler } => {
                put_i16(out, attribute.0);
                put_string(out, handler);
            }
            Record::XmlnsProperty {
                prefix,
                namespace,
                assemblies,
            } => {
                put_string(out, prefix);
                put_string(out, namespace);
                out.extend_from_slice(&(assemblies.len() as u16).to_le_bytes());
                for assembly in assemblies {
                    put_i16(out, assembly.0);
                }
            }
            Record::DefAttribute { usage, value } => {
                out.push(usage.byte());
                put_string(out, value);
            }
            Record::PiMapping(mapping) => {
                put_string(out, &mapping.xml_namespace);
                put_string(out, &mapping.clr_namespace);
                put_i16(out, mapping.assembly.0);
            }
            Record::AssemblyInfo(info) => {
                put_i16(out, info.id.0);
                put_string(out, &info.name);
            }
            Record::TypeInfo(info) => {
                put_i16(out, info.id.0);
                put_i16(out, info.assembly.0);
                put_string(out, &info.name);
            }
            Record::AttributeInfo(info) => {
                put_i16(out, info.id.0);
                put_i16(out, info.owner.0);
                out.push(info.usage);
                put_string(out, &info.name);
            }
            Record::StringInfo { id, value } => {
                put_i16(out, id.0);
                put_string(out, value);
            }
            Record::PropertyStringReference { attribute, string } => {
                put_i16(out, attribute.0);
                put_i16(out, string.0);
            }
            Record::PropertyTypeReference { attribute, type_id } => {
                put_i16(out, attribute.0);
                put_i16(out, type_id.0);
            }
            Record::PropertyWithExtension {
                attribute,
                extension,
                flags,
                value_id,
            } => {
                put_i16(out, attribute.0);
                put_i16(out, extension.0);
                out.push(flags.bits());
                put_i16(out, *value_id);
            }
            Record::PropertyWithConverter {
                attribute,
                value,
                converter,
            } => {
                put_i16(out, attribute.0);
                put_string(out, value);
                put_i16(out, converter.0);
            }
            Record::DeferableContentStart { content_size } => {
                out.extend_from_slice(&content_size.to_le_bytes())
            }
            Record::DefAttributeKeyString { string, placement } => {
                put_i16(out, string.0);
                put_placement(out, placement);
            }
            Record::DefAttributeKeyType { type_id, placement }
            | Record::KeyElementStart { type_id, placement } => {
                put_i16(out, type_id.0);
                put_placement(out, placement);
            }
            Record::ConstructorParameterType { type_id } => put_i16(out, type_id.0),
            Record::ConnectionId { id } => out.extend_from_slice(&id.to_le_bytes()),
            Record::StaticResourceId { index } => out.extend_from_slice(&index.to_le_bytes()),
            Record::TextWithId { string } => put_i16(out, string.0),
            Record::LineNumberAndPosition { line, position } => {
                out.extend_from_slice(&line.to_le_bytes());
                out.extend_from_slice(&position.to_le_bytes());
            }
            Record::LinePosition { position } => out.extend_from_slice(&position.to_le_bytes()),
            Record::OptimizedStaticResource { flags, value_id } => {
                out.push(flags.bits());
                put_i16(out, *value_id);
            }
            Record::PropertyWithStaticResourceId { attribute, index } => {
                put_i16(out, attribute.0);
                out.extend_from_slice(&index.to_le_bytes());
            }
        }
    }
}

fn placement(c: &mut Cursor<'_>) -> Result<KeyPlacement, Shortfall> {
    Ok(KeyPlacement {
        value_position: c.u32()?,
        shared: c.bool()?,
        shared_set: c.bool()?,
    })
}

fn put_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_placement(out: &mut Vec<u8>, placement: &KeyPlacement) {
    out.extend_from_slice(&placement.value_position.to_le_bytes());
    out.push(u8::from(placement.shared));
    out.push(u8::from(placement.shared_set));
}
