//! Deferred dictionary sections and resource lookup.

use baml_reader::{
    DictionaryEntry, ErrorKind, Lookup, ObjectModel, ReadStatus, ReaderOptions, RecordReader,
    ResourceScope, ScopeEntry, Services, Value,
};
use baml_records::{ExtensionFlags, Record, StringId};
use baml_testhelpers::{
    DeferredSection, Fixture, Handle, SectionKey, StreamBuilder, attributes as a, types as t,
};
use facet_testhelpers::test;

const RED: StringId = StringId(1);
const GREEN: StringId = StringId(2);
const BLUE: StringId = StringId(3);

fn text(value: &str) -> Value<Handle> {
    Value::Text(value.to_owned())
}

fn brush(color: &str) -> StreamBuilder {
    StreamBuilder::fragment()
        .element(t::SOLID_COLOR_BRUSH)
        .property(a::COLOR, color)
        .end_element()
}

fn three_brushes() -> DeferredSection {
    DeferredSection::new()
        .entry(SectionKey::String(RED), brush("Red"))
        .entry(SectionKey::String(GREEN), brush("Green"))
        .entry(SectionKey::String(BLUE), brush("Blue"))
}

fn with_key_strings(builder: StreamBuilder) -> StreamBuilder {
    builder
        .string_info(RED, "Red")
        .string_info(GREEN, "Green")
        .string_info(BLUE, "Blue")
}

/// The dictionary the read stored in `Grid.Resources`.
fn resources(fx: &Fixture, grid: Handle) -> Handle {
    fx.model.object_property(grid, "Resources")
}

fn color_of(fx: &Fixture, value: &Value<Handle>) -> String {
    let Value::Object(brush) = value else {
        panic!("expected a brush, got {value:?}");
    };
    let color = fx.model.property(*brush, "Color").cloned().unwrap();
    fx.model.scalar(&color).unwrap()
}

#[test]
fn test_section_reads_only_its_keys() {
    let mut fx = Fixture::new();
    let section = three_brushes();
    let bytes = with_key_strings(StreamBuilder::new())
        .element(t::GRID)
        .dictionary(a::RESOURCES)
        .deferred(&section)
        .end_dictionary()
        .end_element()
        .finish();

    let grid = fx.read_root(bytes);
    let dictionary = resources(&fx, grid);
    let node = fx.model.node(dictionary);
    assert!(node.entries.is_empty());
    assert_eq!(node.deferred.len(), 1);

    let content = &node.deferred[0];
    let keys: Vec<_> = content.keys.iter().map(|entry| entry.key.clone()).collect();
    assert_eq!(keys, vec![text("Red"), text("Green"), text("Blue")]);
    let value_bytes: usize = ["Red", "Green", "Blue"]
        .into_iter()
        .map(|color| brush(color).into_bytes().len())
        .sum();
    assert_eq!(content.values.len(), value_bytes);

    // no value was built
    assert_eq!(fx.model.logged("create SolidColorBrush"), 0);
    assert_eq!(fx.model.logged("deferred 3 keys"), 1);
}

#[test]
fn test_section_advances_past_its_declared_size() {
    let mut fx = Fixture::new();
    let section = three_brushes();
    let before = with_key_strings(StreamBuilder::new())
        .element(t::GRID)
        .dictionary(a::RESOURCES);
    let section_start = before.position();
    let with_section = before.deferred(&section);
    let section_end = with_section.position();
    let after_dictionary = with_section.end_dictionary();
    let dictionary_end = after_dictionary.position();
    let bytes = after_dictionary.end_element().finish();

    // tag byte and four byte size, then exactly the section
    assert_eq!(section_end - section_start, 5 + section.encode().len() as u64);

    let mut reader = RecordReader::new();
    let mut cx = Services::new(&fx.catalog, &mut fx.symbols, &mut fx.model);

    // the whole section is buffered, but nothing after it
    reader.feed(&bytes[..section_end as usize]);
    assert_eq!(reader.read(&mut cx).unwrap(), ReadStatus::Pending);
    assert_eq!(reader.position(), section_start);

    reader.feed(&bytes[section_end as usize..dictionary_end as usize]);
    assert_eq!(reader.read(&mut cx).unwrap(), ReadStatus::Pending);
    assert_eq!(reader.position(), dictionary_end);

    reader.feed(&bytes[dictionary_end as usize..]);
    reader.close();
    assert_eq!(reader.read(&mut cx).unwrap(), ReadStatus::Complete);
    assert_eq!(reader.roots().len(), 1);
    assert_eq!(fx.model.logged("deferred 3 keys"), 1);
}

#[test]
fn test_lookup_realizes_one_entry() {
    let mut fx = Fixture::new();
    let bytes = with_key_strings(StreamBuilder::new())
        .element(t::RESOURCE_DICTIONARY)
        .deferred(&three_brushes())
        .end_element()
        .finish();

    let dictionary = fx.read_root(bytes);
    let scope = ResourceScope::new(vec![ScopeEntry::Dictionary(dictionary)]);

    let found = scope.lookup(&text("Green"), false, &mut fx.services()).unwrap();
    let Lookup::Found(value) = found else {
        panic!("Green not found");
    };
    assert_eq!(color_of(&fx, &value), "Green");
    assert_eq!(fx.model.logged("create SolidColorBrush"), 1);

    // the realized value replaced the deferred one
    let again = scope.lookup(&text("Green"), false, &mut fx.services()).unwrap();
    assert_eq!(again, Lookup::Found(value));
    assert_eq!(fx.model.logged("create SolidColorBrush"), 1);

    let missing = scope.lookup(&text("Purple"), false, &mut fx.services()).unwrap();
    assert_eq!(missing, Lookup::NotFound);
}

#[test]
fn test_realize_by_index() {
    let mut fx = Fixture::new();
    let bytes = with_key_strings(StreamBuilder::new())
        .element(t::RESOURCE_DICTIONARY)
        .deferred(&three_brushes())
        .end_element()
        .finish();

    let dictionary = fx.read_root(bytes);
    let content = fx.model.node(dictionary).deferred[0].clone();
    let value = content.realize(2, &mut fx.services()).unwrap();
    assert_eq!(color_of(&fx, &value), "Blue");
    assert!(content.realize(3, &mut fx.services()).is_err());
}

#[test]
fn test_realize_keeps_the_reading_options() {
    let mut fx = Fixture::new();
    let bytes = with_key_strings(StreamBuilder::new())
        .element(t::RESOURCE_DICTIONARY)
        .deferred(&three_brushes())
        .end_element()
        .finish();

    let mut reader = RecordReader::from_bytes(bytes).with_options(ReaderOptions::new().max_depth(1));
    let mut cx = Services::new(&fx.catalog, &mut fx.symbols, &mut fx.model);
    assert_eq!(reader.read(&mut cx).unwrap(), ReadStatus::Complete);
    let [Value::Object(dictionary)] = reader.roots() else {
        panic!("expected one root, got {:?}", reader.roots());
    };
    let dictionary = *dictionary;

    let content = fx.model.node(dictionary).deferred[0].clone();
    assert_eq!(content.options.max_depth, 1);
    // the brush element does not fit under the entry placeholder
    let error = content.realize(0, &mut fx.services()).unwrap_err();
    assert!(error.to_string().contains("nesting deeper than 1 frames"), "{error}");
    assert_eq!(fx.model.scope_depth, 0);
}

#[test]
fn test_deferred_entries_reference_each_other() {
    let mut fx = Fixture::new();
    let accent = StringId(10);
    let button = StringId(11);
    // the button's background refers to the accent brush by resource id
    let section = DeferredSection::new()
        .entry(SectionKey::String(accent), brush("Orange"))
        .entry_with_resources(
            SectionKey::String(button),
            StreamBuilder::fragment().record(Record::OptimizedStaticResource {
                flags: ExtensionFlags::default(),
                value_id: accent.0,
            }),
            StreamBuilder::fragment()
                .element(t::BUTTON)
                .record(Record::PropertyWithStaticResourceId {
                    attribute: a::BACKGROUND,
                    index: 0,
                })
                .end_element(),
        );
    let bytes = StreamBuilder::new()
        .string_info(accent, "Accent")
        .string_info(button, "OkButton")
        .element(t::RESOURCE_DICTIONARY)
        .deferred(&section)
        .end_element()
        .finish();

    let dictionary = fx.read_root(bytes);
    let content = fx.model.node(dictionary).deferred[0].clone();
    assert_eq!(content.keys[1].static_resources.len(), 1);
    assert!(content.keys[0].static_resources.is_empty());

    let scope = ResourceScope::new(vec![ScopeEntry::Dictionary(dictionary)]);
    let Lookup::Found(Value::Object(ok)) = scope.lookup(&text("OkButton"), false, &mut fx.services()).unwrap()
    else {
        panic!("OkButton not found");
    };
    let background = fx.model.property(ok, "Background").cloned().unwrap();
    assert_eq!(color_of(&fx, &background), "Orange");

    // both entries were realized and stored
    let realized: Vec<_> = fx.model.node(dictionary).entries.iter().map(|(key, _)| key.clone()).collect();
    assert_eq!(realized, vec![text("Accent"), text("OkButton")]);
}

#[test]
fn test_static_resource_realizes_from_an_enclosing_element() {
    let mut fx = Fixture::new();
    let bytes = with_key_strings(StreamBuilder::new())
        .element(t::GRID)
        .dictionary(a::RESOURCES)
        .deferred(&three_brushes())
        .end_dictionary()
        .element(t::BUTTON)
        .record(Record::PropertyWithExtension {
            attribute: a::BACKGROUND,
            extension: t::STATIC_RESOURCE,
            flags: ExtensionFlags::default(),
            value_id: BLUE.0,
        })
        .end_element()
        .end_element()
        .finish();

    let grid = fx.read_root(bytes);
    let children = fx.model.object_property(grid, "Children");
    let Value::Object(button) = fx.model.node(children).items[0] else {
        panic!("expected a button");
    };
    let background = fx.model.property(button, "Background").cloned().unwrap();
    assert_eq!(color_of(&fx, &background), "Blue");
    assert_eq!(fx.model.logged("create SolidColorBrush"), 1);
}

#[test]
fn test_dynamic_resource_stays_deferred() {
    let mut fx = Fixture::new();
    let bytes = with_key_strings(StreamBuilder::new())
        .element(t::GRID)
        .dictionary(a::RESOURCES)
        .deferred(&three_brushes())
        .end_dictionary()
        .element(t::BUTTON)
        .record(Record::PropertyWithExtension {
            attribute: a::BACKGROUND,
            extension: t::DYNAMIC_RESOURCE,
            flags: ExtensionFlags::default(),
            value_id: RED.0,
        })
        .end_element()
        .end_element()
        .finish();

    let grid = fx.read_root(bytes);
    let children = fx.model.object_property(grid, "Children");
    let Value::Object(button) = fx.model.node(children).items[0] else {
        panic!("expected a button");
    };
    let Some(Value::Deferred(reference)) = fx.model.property(button, "Background") else {
        panic!("expected a deferred reference");
    };
    assert_eq!(*reference.key, text("Red"));
    assert_eq!(fx.model.logged("create SolidColorBrush"), 0);
}

#[test]
fn test_missing_resource_is_an_error() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .string_info(StringId(1), "Accent")
        .element(t::BUTTON)
        .record(Record::PropertyWithExtension {
            attribute: a::BACKGROUND,
            extension: t::STATIC_RESOURCE,
            flags: ExtensionFlags::default(),
            value_id: 1,
        })
        .end_element()
        .finish();

    let error = fx.read(bytes).unwrap_err();
    assert_eq!(
        error.kind(),
        Some(&ErrorKind::ResourceNotFound {
            key: "Accent".into()
        })
    );
    assert_eq!(fx.model.scope_depth, 0);
}

#[test]
fn test_ambient_resources_are_consulted_last() {
    let mut fx = Fixture::new();
    let ambient = fx.model.create_instance(&fx.catalog.ty("Button")).unwrap();
    fx.model.ambient.push((text("Theme"), Value::Object(ambient)));
    let scope = ResourceScope::<Handle>::new(Vec::new());

    let found = scope.lookup(&text("Theme"), false, &mut fx.services()).unwrap();
    assert_eq!(found, Lookup::Found(Value::Object(ambient)));
}

#[test]
fn test_type_keys() {
    let mut fx = Fixture::new();
    let section = DeferredSection::new().entry(SectionKey::Type(t::BUTTON), brush("Teal"));
    let bytes = StreamBuilder::new()
        .element(t::RESOURCE_DICTIONARY)
        .deferred(&section)
        .end_element()
        .finish();

    let dictionary = fx.read_root(bytes);
    let key = Value::Type(fx.catalog.ty("Button"));
    let entry = fx.model.lookup_entry(&dictionary, &key).unwrap();
    assert!(matches!(entry, DictionaryEntry::Unrealized { index: 0, .. }));
}
