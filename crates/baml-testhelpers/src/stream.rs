//! Builders for record streams.

use baml_records::{
    AttributeId, ElementFlags, KeyPlacement, Record, RecordWriter, SourceLocation, StringId, TypeId,
    VersionHeader,
};

/// Writes a stream record by record.
///
/// ```ignore
/// let bytes = StreamBuilder::new()
///     .element(types::BUTTON)
///     .property(attributes::CONTENT, "OK")
///     .end_element()
///     .finish();
/// ```
#[derive(Debug, Clone)]
pub struct StreamBuilder {
    writer: RecordWriter,
}

impl Default for StreamBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBuilder {
    /// A top-level stream: the default header and a `DocumentStart`.
    pub fn new() -> Self {
        let mut writer = RecordWriter::with_header(&VersionHeader::default());
        writer.write(&Record::DocumentStart {
            load_async: false,
            max_async_records: -1,
            debug_baml: false,
        });
        Self { writer }
    }

    /// A headerless fragment, as found inside deferred sections.
    pub fn fragment() -> Self {
        Self {
            writer: RecordWriter::new(),
        }
    }

    pub fn position(&self) -> u64 {
        self.writer.position()
    }

    pub fn record(mut self, record: Record) -> Self {
        self.writer.write(&record);
        self
    }

    pub fn record_at(mut self, record: Record, line: u32, position: u32) -> Self {
        self.writer.write_at(&record, SourceLocation::new(line, position));
        self
    }

    pub fn string_info(self, id: StringId, value: &str) -> Self {
        self.record(Record::StringInfo {
            id,
            value: value.to_owned(),
        })
    }

    pub fn element(self, type_id: TypeId) -> Self {
        self.record(Record::ElementStart {
            type_id,
            flags: ElementFlags::default(),
        })
    }

    /// An element built by converting its text content.
    pub fn converted_element(self, type_id: TypeId) -> Self {
        self.record(Record::ElementStart {
            type_id,
            flags: ElementFlags {
                via_type_converter: true,
                injected: false,
            },
        })
    }

    pub fn end_element(self) -> Self {
        self.record(Record::ElementEnd)
    }

    pub fn property(self, attribute: AttributeId, value: &str) -> Self {
        self.record(Record::Property {
            attribute,
            value: value.to_owned(),
        })
    }

    pub fn text(self, value: &str) -> Self {
        self.record(Record::Text {
            value: value.to_owned(),
        })
    }

    pub fn key(self, value: &str) -> Self {
        self.record(Record::DefAttribute {
            usage: baml_records::DefUsage::Key,
            value: value.to_owned(),
        })
    }

    pub fn complex(self, attribute: AttributeId) -> Self {
        self.record(Record::PropertyComplexStart { attribute })
    }

    pub fn end_complex(self) -> Self {
        self.record(Record::PropertyComplexEnd)
    }

    pub fn list(self, attribute: AttributeId) -> Self {
        self.record(Record::PropertyIListStart { attribute })
    }

    pub fn end_list(self) -> Self {
        self.record(Record::PropertyIListEnd)
    }

    pub fn dictionary(self, attribute: AttributeId) -> Self {
        self.record(Record::PropertyIDictionaryStart { attribute })
    }

    pub fn end_dictionary(self) -> Self {
        self.record(Record::PropertyIDictionaryEnd)
    }

    pub fn array(self, attribute: AttributeId) -> Self {
        self.record(Record::PropertyArrayStart { attribute })
    }

    pub fn end_array(self) -> Self {
        self.record(Record::PropertyArrayEnd)
    }

    pub fn key_element(self, type_id: TypeId) -> Self {
        self.record(Record::KeyElementStart {
            type_id,
            placement: KeyPlacement::default(),
        })
    }

    pub fn end_key_element(self) -> Self {
        self.record(Record::KeyElementEnd)
    }

    pub fn constructor_params(self) -> Self {
        self.record(Record::ConstructorParametersStart)
    }

    pub fn end_constructor_params(self) -> Self {
        self.record(Record::ConstructorParametersEnd)
    }

    /// A `DeferableContentStart` followed by the encoded section.
    pub fn deferred(mut self, section: &DeferredSection) -> Self {
        let body = section.encode();
        self.writer.write(&Record::DeferableContentStart {
            content_size: body.len() as u32,
        });
        self.writer.append(&body);
        self
    }

    pub fn append(mut self, bytes: &[u8]) -> Self {
        self.writer.append(bytes);
        self
    }

    /// Close the document and return its bytes.
    pub fn finish(self) -> Vec<u8> {
        self.record(Record::DocumentEnd).into_bytes()
    }

    /// The bytes written so far.
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }
}

/// The key of one deferred entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKey {
    String(StringId),
    Type(TypeId),
}

/// Entries of a deferred dictionary section.
///
/// Each entry's value is a headerless fragment; [`DeferredSection::encode`]
/// lays the keys out first and computes their value positions.
#[derive(Debug, Clone, Default)]
pub struct DeferredSection {
    entries: Vec<(SectionKey, Vec<u8>, Vec<u8>)>,
}

impl DeferredSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(self, key: SectionKey, value: StreamBuilder) -> Self {
        self.entry_with_resources(key, StreamBuilder::fragment(), value)
    }

    /// An entry whose key is followed by `resources`, the resource
    /// references its value refers to by index.
    pub fn entry_with_resources(
        mut self,
        key: SectionKey,
        resources: StreamBuilder,
        value: StreamBuilder,
    ) -> Self {
        self.entries
            .push((key, resources.into_bytes(), value.into_bytes()));
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut keys = RecordWriter::new();
        let mut value_position = 0u32;
        for (key, resources, value) in &self.entries {
            let placement = KeyPlacement {
                value_position,
                shared: false,
                shared_set: false,
            };
            keys.write(&match *key {
                SectionKey::String(string) => Record::DefAttributeKeyString { string, placement },
                SectionKey::Type(type_id) => Record::DefAttributeKeyType { type_id, placement },
            });
            keys.append(resources);
            value_position += value.len() as u32;
        }
        for (_, _, value) in &self.entries {
            keys.append(value);
        }
        keys.into_bytes()
    }
}
