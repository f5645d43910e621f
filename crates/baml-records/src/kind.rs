//! Record kind tags.

/// The closed set of record kinds a BAML stream may contain.
///
/// Discriminants are the on-wire tag bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    DocumentStart = 1,
    DocumentEnd = 2,
    ElementStart = 3,
    ElementEnd = 4,
    Property = 5,
    PropertyCustom = 6,
    PropertyComplexStart = 7,
    PropertyComplexEnd = 8,
    PropertyArrayStart = 9,
    PropertyArrayEnd = 10,
    PropertyIListStart = 11,
    PropertyIListEnd = 12,
    PropertyIDictionaryStart = 13,
    PropertyIDictionaryEnd = 14,
    Text = 16,
    TextWithConverter = 17,
    RoutedEvent = 18,
    ClrEvent = 19,
    XmlnsProperty = 20,
    DefAttribute = 25,
    PiMapping = 27,
    AssemblyInfo = 28,
    TypeInfo = 29,
    AttributeInfo = 31,
    StringInfo = 32,
    PropertyStringReference = 33,
    PropertyTypeReference = 34,
    PropertyWithExtension = 35,
    PropertyWithConverter = 36,
    DeferableContentStart = 37,
    DefAttributeKeyString = 38,
    DefAttributeKeyType = 39,
    KeyElementStart = 40,
    KeyElementEnd = 41,
    ConstructorParametersStart = 42,
    ConstructorParametersEnd = 43,
    ConstructorParameterType = 44,
    ConnectionId = 45,
    ContentProperty = 46,
    StaticResourceStart = 48,
    StaticResourceEnd = 49,
    StaticResourceId = 50,
    TextWithId = 51,
    LineNumberAndPosition = 53,
    LinePosition = 54,
    OptimizedStaticResource = 55,
    PropertyWithStaticResourceId = 56,
}

impl RecordKind {
    /// Map a tag byte back to its kind.
    pub fn from_tag(tag: u8) -> Option<Self> {
        use RecordKind::*;
        Some(match tag {
            1 => DocumentStart,
            2 => DocumentEnd,
            3 => ElementStart,
            4 => ElementEnd,
            5 => Property,
            6 => PropertyCustom,
            7 => PropertyComplexStart,
            8 => PropertyComplexEnd,
            9 => PropertyArrayStart,
            10 => PropertyArrayEnd,
            11 => PropertyIListStart,
            12 => PropertyIListEnd,
            13 => PropertyIDictionaryStart,
            14 => PropertyIDictionaryEnd,
            16 => Text,
            17 => TextWithConverter,
            18 => RoutedEvent,
            19 => ClrEvent,
            20 => XmlnsProperty,
            25 => DefAttribute,
            27 => PiMapping,
            28 => AssemblyInfo,
            29 => TypeInfo,
            31 => AttributeInfo,
            32 => StringInfo,
            33 => PropertyStringReference,
            34 => PropertyTypeReference,
            35 => PropertyWithExtension,
            36 => PropertyWithConverter,
            37 => DeferableContentStart,
            38 => DefAttributeKeyString,
            39 => DefAttributeKeyType,
            40 => KeyElementStart,
            41 => KeyElementEnd,
            42 => ConstructorParametersStart,
            43 => ConstructorParametersEnd,
            44 => ConstructorParameterType,
            45 => ConnectionId,
            46 => ContentProperty,
            48 => StaticResourceStart,
            49 => StaticResourceEnd,
            50 => StaticResourceId,
            51 => TextWithId,
            53 => LineNumberAndPosition,
            54 => LinePosition,
            55 => OptimizedStaticResource,
            56 => PropertyWithStaticResourceId,
            _ => return None,
        })
    }

    /// The on-wire tag byte.
    #[inline]
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Payload size for fixed-size kinds; `None` for kinds that carry a
    /// length prefix.
    pub fn fixed_payload_len(self) -> Option<usize> {
        use RecordKind::*;
        match self {
            DocumentStart => Some(6),
            DocumentEnd | ElementEnd | PropertyComplexEnd | PropertyArrayEnd | PropertyIListEnd
            | PropertyIDictionaryEnd | KeyElementEnd | ConstructorParametersStart
            | ConstructorParametersEnd | StaticResourceEnd => Some(0),
            ElementStart | StaticResourceStart | OptimizedStaticResource => Some(3),
            PropertyComplexStart | PropertyArrayStart | PropertyIListStart
            | PropertyIDictionaryStart | ConstructorParameterType | ContentProperty
            | StaticResourceId | TextWithId => Some(2),
            PropertyStringReference | PropertyTypeReference | DeferableContentStart
            | ConnectionId | LinePosition | PropertyWithStaticResourceId => Some(4),
            PropertyWithExtension => Some(7),
            DefAttributeKeyString | DefAttributeKeyType | KeyElementStart
            | LineNumberAndPosition => Some(8),
            Property | PropertyCustom | Text | TextWithConverter | RoutedEvent | ClrEvent
            | XmlnsProperty | DefAttribute | PiMapping | AssemblyInfo | TypeInfo
            | AttributeInfo | StringInfo | PropertyWithConverter => None,
        }
    }

    /// Whether a companion debug record may follow this kind.
    pub fn has_debug_extension(self) -> bool {
        use RecordKind::*;
        matches!(
            self,
            ElementStart
                | Property
                | PropertyCustom
                | PropertyWithConverter
                | PropertyStringReference
                | PropertyTypeReference
                | PropertyWithExtension
                | PropertyWithStaticResourceId
                | PropertyComplexStart
                | PropertyArrayStart
                | PropertyIListStart
                | PropertyIDictionaryStart
                | Text
                | TextWithConverter
                | TextWithId
                | RoutedEvent
                | ClrEvent
                | DefAttribute
                | KeyElementStart
                | ConstructorParametersStart
                | StaticResourceStart
                | ContentProperty
        )
    }

    /// Whether this kind is one of the out-of-band debug records.
    #[inline]
    pub fn is_debug(self) -> bool {
        matches!(self, RecordKind::LineNumberAndPosition | RecordKind::LinePosition)
    }

    /// Whether this kind belongs to the key table of a deferred section.
    pub fn is_deferred_key(self) -> bool {
        use RecordKind::*;
        matches!(
            self,
            DefAttributeKeyString
                | DefAttributeKeyType
                | KeyElementStart
                | StaticResourceStart
                | StaticResourceId
                | OptimizedStaticResource
        )
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    #[test]
    fn test_tags_round_trip() {
        for tag in 0..=u8::MAX {
            if let Some(kind) = RecordKind::from_tag(tag) {
                assert_eq!(kind.tag(), tag);
            }
        }
        assert_eq!(RecordKind::from_tag(0), None);
        assert_eq!(RecordKind::from_tag(15), None);
        assert_eq!(RecordKind::from_tag(57), None);
    }

    #[test]
    fn test_debug_kinds_are_not_instrumented() {
        assert!(!RecordKind::LineNumberAndPosition.has_debug_extension());
        assert!(!RecordKind::LinePosition.has_debug_extension());
        assert!(RecordKind::ElementStart.has_debug_extension());
        assert!(!RecordKind::ElementEnd.has_debug_extension());
    }
}
