//! Object reconstruction from complete streams.

use baml_reader::{
    ContextStack, Frame, FrameKind, HolderKind, ObjectModel, ReadStatus, ReaderOptions,
    RecordReader, ResourceHolder, Services, TypeCatalog, Value,
};
use baml_records::{AttributeId, DefUsage, ExtensionFlags, Record, StringId};
use baml_testhelpers::{Fixture, StreamBuilder, attributes as a, types as t};
use facet_testhelpers::test;

fn text(value: &str) -> Value<baml_testhelpers::Handle> {
    Value::Text(value.to_owned())
}

#[test]
fn test_button_with_content() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .property(a::CONTENT, "OK")
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    assert_eq!(fx.model.type_name(button), "Button");
    assert_eq!(fx.model.property(button, "Content"), Some(&text("OK")));
    assert_eq!(fx.model.logged("end_init Button"), 1);
    assert_eq!(fx.model.scope_depth, 0);
}

#[test]
fn test_content_property_receives_child_elements() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::GRID)
        .element(t::BUTTON)
        .end_element()
        .element(t::BORDER)
        .element(t::BUTTON)
        .end_element()
        .end_element()
        .end_element()
        .finish();

    let grid = fx.read_root(bytes);
    // Children is read-only; items go into the existing collection
    let children = fx.model.object_property(grid, "Children");
    assert_eq!(fx.model.type_name(children), "UIElementCollection");
    let items = &fx.model.node(children).items;
    assert_eq!(items.len(), 2);

    let Value::Object(border) = items[1] else {
        panic!("expected an object, got {:?}", items[1]);
    };
    let child = fx.model.object_property(border, "Child");
    assert_eq!(fx.model.type_name(child), "Button");
}

#[test]
fn test_text_content_goes_to_the_content_property() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::TEXT_HOLDER)
        .text("hello")
        .end_element()
        .finish();

    let holder = fx.read_root(bytes);
    assert_eq!(fx.model.property(holder, "Text"), Some(&text("hello")));
}

#[test]
fn test_add_child_parents_take_positional_children() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::CHILD_HOST)
        .element(t::BUTTON)
        .end_element()
        .text("tail")
        .end_element()
        .finish();

    let host = fx.read_root(bytes);
    let items = &fx.model.node(host).items;
    assert_eq!(items.len(), 2);
    assert_eq!(items[1], text("tail"));
    assert_eq!(fx.model.logged("add child to ChildHost"), 2);
}

#[test]
fn test_converted_property_values() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .property(a::WIDTH, "120")
        .property(a::BACKGROUND, "Red")
        .property(a::MARGIN, "4,8")
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    let width = fx.model.property(button, "Width").cloned().unwrap();
    assert_eq!(fx.model.scalar(&width).as_deref(), Some("120"));

    let brush = fx.model.object_property(button, "Background");
    assert_eq!(fx.model.type_name(brush), "SolidColorBrush");
    let color = fx.model.property(brush, "Color").cloned().unwrap();
    assert_eq!(fx.model.scalar(&color).as_deref(), Some("Red"));

    let margin = fx.model.object_property(button, "Margin");
    assert_eq!(fx.model.node(margin).args.len(), 2);
}

#[test]
fn test_complex_property_assigns_the_element() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .complex(a::BACKGROUND)
        .element(t::SOLID_COLOR_BRUSH)
        .property(a::COLOR, "Blue")
        .end_element()
        .end_complex()
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    let brush = fx.model.object_property(button, "Background");
    assert_eq!(fx.model.type_name(brush), "SolidColorBrush");
    // brushes are frozen before they are attached
    assert_eq!(fx.model.logged("freeze SolidColorBrush"), 1);
}

#[test]
fn test_dictionary_entries_keep_key_order() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::RESOURCE_DICTIONARY)
        .key_element(t::STRING)
        .text("first")
        .end_key_element()
        .element(t::SOLID_COLOR_BRUSH)
        .property(a::COLOR, "Red")
        .end_element()
        .key_element(t::STRING)
        .text("second")
        .end_key_element()
        .element(t::SOLID_COLOR_BRUSH)
        .property(a::COLOR, "Green")
        .end_element()
        .end_element()
        .finish();

    let dictionary = fx.read_root(bytes);
    let keys: Vec<_> = fx
        .model
        .node(dictionary)
        .entries
        .iter()
        .map(|(key, _)| key.clone())
        .collect();
    assert_eq!(keys, vec![text("first"), text("second")]);
}

#[test]
fn test_dictionary_keys_from_attributes_and_key_properties() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::RESOURCE_DICTIONARY)
        .element(t::SOLID_COLOR_BRUSH)
        .key("Accent")
        .property(a::COLOR, "Red")
        .end_element()
        .element(t::NAMED_ITEM)
        .property(a::ID, "implicit")
        .end_element()
        .end_element()
        .finish();

    let dictionary = fx.read_root(bytes);
    let entries = &fx.model.node(dictionary).entries;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].0, text("Accent"));
    assert_eq!(entries[1].0, text("implicit"));
}

#[test]
fn test_explicit_collection_element_replaces_the_collection() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::ITEMS_CONTROL)
        .list(a::ITEMS)
        .element(t::ITEM_LIST)
        .element(t::BUTTON)
        .end_element()
        .end_element()
        .end_list()
        .end_element()
        .finish();

    let control = fx.read_root(bytes);
    let list = fx.model.object_property(control, "Items");
    assert_eq!(fx.model.type_name(list), "ItemList");
    assert_eq!(fx.model.node(list).items.len(), 1);
    // the tag itself was assigned, nothing was created for the property
    assert_eq!(fx.model.objects_of("ItemList").len(), 1);
    assert_eq!(fx.model.logged("set ItemsControl.Items"), 1);
}

#[test]
fn test_implicit_collection_is_created_and_assigned_once() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::ITEMS_CONTROL)
        .list(a::ITEMS)
        .element(t::BUTTON)
        .end_element()
        .element(t::BUTTON)
        .end_element()
        .end_list()
        .end_element()
        .finish();

    let control = fx.read_root(bytes);
    let list = fx.model.object_property(control, "Items");
    assert_eq!(fx.model.node(list).items.len(), 2);
    assert_eq!(fx.model.logged("set ItemsControl.Items"), 1);
}

#[test]
fn test_array_property_is_built_at_the_end() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::PATH)
        .array(a::STOPS)
        .converted_element(t::DOUBLE)
        .text("0.25")
        .end_element()
        .converted_element(t::DOUBLE)
        .text("0.75")
        .end_element()
        .end_array()
        .end_element()
        .finish();

    let path = fx.read_root(bytes);
    let stops = fx.model.object_property(path, "Stops");
    assert_eq!(fx.model.type_name(stops), "Double[]");
    let values: Vec<_> = fx
        .model
        .node(stops)
        .items
        .iter()
        .map(|item| fx.model.scalar(item).unwrap())
        .collect();
    assert_eq!(values, vec!["0.25", "0.75"]);
    assert_eq!(fx.model.logged("array Double[2]"), 1);
}

#[test]
fn test_finalize_is_idempotent() {
    let mut fx = Fixture::new();
    let ty = fx.catalog.ty("ItemsControl");
    let member = fx.catalog.member_named(&ty, "Items").unwrap();
    let owner = fx.model.create_instance(&ty).unwrap();

    let mut holder = ResourceHolder::new(HolderKind::List, owner, member);
    holder.insert(text("one"), None, &mut fx.model).unwrap();
    holder.finalize(&mut fx.model).unwrap();
    holder.finalize(&mut fx.model).unwrap();

    assert_eq!(fx.model.logged("set ItemsControl.Items"), 1);
    assert_eq!(fx.model.objects_of("ItemList").len(), 1);
}

#[test]
fn test_constructor_parameters_pick_the_arity() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::THICKNESS)
        .constructor_params()
        .text("1")
        .text("2")
        .end_constructor_params()
        .end_element()
        .finish();

    let thickness = fx.read_root(bytes);
    let args: Vec<_> = fx
        .model
        .node(thickness)
        .args
        .iter()
        .map(|arg| fx.model.scalar(arg).unwrap())
        .collect();
    assert_eq!(args, vec!["1", "2"]);
    assert_eq!(fx.model.logged("construct Thickness/2"), 1);
    // no default instance is built ahead of the arguments
    assert_eq!(fx.model.logged("create Thickness"), 0);
    assert_eq!(fx.model.objects_of("Thickness").len(), 1);
}

#[test]
fn test_constructor_parameters_build_types_without_default_constructor() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::POINT)
        .constructor_params()
        .text("3")
        .text("4")
        .end_constructor_params()
        .end_element()
        .finish();

    let point = fx.read_root(bytes);
    assert_eq!(fx.model.type_name(point), "Point");
    assert_eq!(fx.model.logged("create Point"), 0);
}

#[test]
fn test_type_extension_uses_the_known_constructor() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .record(Record::PropertyWithExtension {
            attribute: a::CONTENT,
            extension: t::TYPE_EXTENSION,
            flags: ExtensionFlags {
                value_is_type: true,
                value_is_static: false,
            },
            value_id: t::GRID.0,
        })
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    let Some(Value::Type(ty)) = fx.model.property(button, "Content") else {
        panic!("expected a type, got {:?}", fx.model.property(button, "Content"));
    };
    assert_eq!(ty.name, "Grid");
    assert_eq!(fx.model.logged("construct known TypeExtension"), 1);
}

#[test]
fn test_nullable_property_accepts_its_inner_type() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .complex(a::TAG)
        .converted_element(t::INT32)
        .text("7")
        .end_element()
        .end_complex()
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    let tag = fx.model.property(button, "Tag").cloned().unwrap();
    assert_eq!(fx.model.scalar(&tag).as_deref(), Some("7"));
}

#[test]
fn test_nullable_property_accepts_null() {
    let mut fx = Fixture::new();
    fx.model.ambient.push((text("Nothing"), Value::Null));
    let bytes = StreamBuilder::new()
        .string_info(StringId(1), "Nothing")
        .element(t::BUTTON)
        .record(Record::PropertyWithExtension {
            attribute: a::TAG,
            extension: t::STATIC_RESOURCE,
            flags: ExtensionFlags::default(),
            value_id: 1,
        })
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    assert_eq!(fx.model.property(button, "Tag"), Some(&Value::Null));
}

#[test]
fn test_nullable_property_takes_extension_values_unchecked() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .string_info(StringId(1), "w")
        .element(t::GRID)
        .dictionary(a::RESOURCES)
        .converted_element(t::DOUBLE)
        .key("w")
        .text("2.5")
        .end_element()
        .end_dictionary()
        .element(t::BUTTON)
        .record(Record::PropertyWithExtension {
            attribute: a::TAG,
            extension: t::STATIC_RESOURCE,
            flags: ExtensionFlags::default(),
            value_id: 1,
        })
        .end_element()
        .end_element()
        .finish();

    let grid = fx.read_root(bytes);
    let children = fx.model.object_property(grid, "Children");
    let Value::Object(button) = fx.model.node(children).items[0] else {
        panic!("expected the button");
    };
    let tag = fx.model.property(button, "Tag").cloned().unwrap();
    assert_eq!(fx.model.scalar(&tag).as_deref(), Some("2.5"));
}

#[test]
fn test_custom_property_payload() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .record(Record::PropertyCustom {
            attribute: a::TAG,
            serializer_type: t::INT32,
            data: 42i32.to_le_bytes().to_vec(),
        })
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    let tag = fx.model.property(button, "Tag").cloned().unwrap();
    assert_eq!(fx.model.scalar(&tag).as_deref(), Some("42"));
}

#[test]
fn test_custom_serializer_reads_the_subtree() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::PATH)
        .complex(a::DATA)
        .element(t::GEOMETRY)
        .text("M 0 0")
        .text("L 10 10")
        .end_element()
        .end_complex()
        .property(a::WIDTH, "3")
        .end_element()
        .finish();

    let path = fx.read_root(bytes);
    let data = fx.model.object_property(path, "Data");
    assert_eq!(fx.model.node(data).scalar.as_deref(), Some("M 0 0 L 10 10"));
    assert_eq!(fx.model.logged("serializer 1 for Geometry"), 1);
    // the reader resumes after the subtree
    assert!(fx.model.property(path, "Width").is_some());
}

#[test]
fn test_names_events_and_connections() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .record(Record::DefAttribute {
            usage: DefUsage::Name,
            value: "okButton".into(),
        })
        .record(Record::RoutedEvent {
            attribute: a::CLICK,
            handler: "OnOk".into(),
        })
        .record(Record::ConnectionId { id: 3 })
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    assert_eq!(fx.model.names.get("okButton"), Some(&button));
    assert_eq!(
        fx.model.node(button).handlers,
        vec![("Click".to_owned(), "OnOk".to_owned())]
    );
    assert_eq!(fx.model.connections, vec![(3, button)]);
}

#[test]
fn test_content_property_record_redirects_children() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .record(Record::ContentProperty {
            attribute: a::BACKGROUND,
        })
        .element(t::SOLID_COLOR_BRUSH)
        .property(a::COLOR, "Red")
        .end_element()
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    let background = fx.model.object_property(button, "Background");
    assert_eq!(fx.model.type_name(background), "SolidColorBrush");
    assert_eq!(fx.model.property(button, "Content"), None);
}

#[test]
fn test_attached_property_on_any_element() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .property(a::GRID_ROW, "2")
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    let row = fx.model.property(button, "Row").cloned().unwrap();
    assert_eq!(fx.model.scalar(&row).as_deref(), Some("2"));
}

#[test]
fn test_members_declared_by_info_records() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .record(Record::AttributeInfo(baml_records::AttributeInfo {
            id: AttributeId(200),
            owner: t::BUTTON,
            usage: 0,
            name: "Width".into(),
        }))
        .element(t::BUTTON)
        .property(AttributeId(200), "64")
        .end_element()
        .finish();

    let button = fx.read_root(bytes);
    assert!(fx.model.property(button, "Width").is_some());
}

#[test]
fn test_forest_root_is_merged() {
    let mut fx = Fixture::new();
    let ty = fx.catalog.ty("Button");
    let existing = fx.model.create_instance(&ty).unwrap();
    let bytes = StreamBuilder::new()
        .element(t::BUTTON)
        .property(a::CONTENT, "merged")
        .end_element()
        .finish();

    let mut reader = RecordReader::from_bytes(bytes).with_root(existing);
    let mut cx = Services::new(&fx.catalog, &mut fx.symbols, &mut fx.model);
    assert_eq!(reader.read(&mut cx).unwrap(), ReadStatus::Complete);
    assert_eq!(reader.roots(), &[Value::Object(existing)]);

    assert_eq!(fx.model.property(existing, "Content"), Some(&text("merged")));
    assert_eq!(fx.model.logged("create Button"), 1);
}

#[test]
fn test_stack_accessors() {
    let mut fx = Fixture::new();
    let mut stack = ContextStack::new(8);
    for label in ["root", "middle", "leaf"] {
        stack.push(Frame::new(FrameKind::TargetIsPlainObject, label), &mut fx.model).unwrap();
    }
    stack.push(Frame::new(FrameKind::Unknown, "top"), &mut fx.model).unwrap();

    assert_eq!(stack.depth(), 4);
    assert_eq!(stack.current().map(|f| f.label.as_str()), Some("top"));
    assert_eq!(stack.parent().map(|f| f.label.as_str()), Some("leaf"));
    assert_eq!(stack.grandparent().map(|f| f.label.as_str()), Some("middle"));
    assert_eq!(stack.great_grandparent().map(|f| f.label.as_str()), Some("root"));
    assert_eq!(fx.model.scope_depth, 4);

    stack.unwind(&mut fx.model);
    assert_eq!(stack.depth(), 0);
    assert!(stack.current().is_none());
    assert_eq!(fx.model.scope_depth, 0);
}

#[test]
fn test_max_depth_bounds_nesting() {
    let mut fx = Fixture::new();
    let bytes = StreamBuilder::new()
        .element(t::BORDER)
        .element(t::BORDER)
        .element(t::BORDER)
        .end_element()
        .end_element()
        .end_element()
        .finish();

    let mut reader = RecordReader::from_bytes(bytes).with_options(ReaderOptions::new().max_depth(2));
    let mut cx = Services::new(&fx.catalog, &mut fx.symbols, &mut fx.model);
    let error = reader.read(&mut cx).unwrap_err();
    assert!(error.to_string().contains("nesting deeper than 2 frames"), "{error}");
    assert_eq!(fx.model.scope_depth, 0);
}
