//! A fixed catalog of UI-like types.

use std::collections::HashMap;

use baml_reader::{
    CollectionKind, KnownExtension, MemberKind, MemberRef, SerializerHandle, TypeCatalog,
    TypeDescriptor, TypeRef, object_type, string_type, type_type,
};
use baml_records::{AttributeId, SymbolTable, TypeId};

/// Type ids known without a `TypeInfo` record.
pub mod types {
    use baml_records::TypeId;

    pub const OBJECT: TypeId = TypeId(1);
    pub const STRING: TypeId = TypeId(2);
    pub const INT32: TypeId = TypeId(3);
    pub const DOUBLE: TypeId = TypeId(4);
    pub const NULLABLE_INT32: TypeId = TypeId(5);
    pub const TYPE: TypeId = TypeId(6);
    pub const BUTTON: TypeId = TypeId(10);
    pub const GRID: TypeId = TypeId(11);
    pub const BORDER: TypeId = TypeId(12);
    pub const ITEMS_CONTROL: TypeId = TypeId(13);
    pub const RESOURCE_DICTIONARY: TypeId = TypeId(14);
    pub const BRUSH: TypeId = TypeId(15);
    pub const SOLID_COLOR_BRUSH: TypeId = TypeId(16);
    pub const COLOR: TypeId = TypeId(17);
    pub const THICKNESS: TypeId = TypeId(18);
    pub const ITEM_LIST: TypeId = TypeId(19);
    pub const UI_ELEMENT_COLLECTION: TypeId = TypeId(20);
    pub const STYLE: TypeId = TypeId(21);
    pub const STATIC_RESOURCE: TypeId = TypeId(22);
    pub const DYNAMIC_RESOURCE: TypeId = TypeId(23);
    pub const TYPE_EXTENSION: TypeId = TypeId(24);
    pub const FAULTY_CONTROL: TypeId = TypeId(25);
    pub const GEOMETRY: TypeId = TypeId(26);
    pub const PATH: TypeId = TypeId(27);
    pub const NAMED_ITEM: TypeId = TypeId(28);
    pub const TEXT_HOLDER: TypeId = TypeId(29);
    pub const CHILD_HOST: TypeId = TypeId(30);
    pub const POINT: TypeId = TypeId(31);
    pub const DOUBLE_ARRAY: TypeId = TypeId(32);
}

/// Attribute ids known without an `AttributeInfo` record.
pub mod attributes {
    use baml_records::AttributeId;

    pub const CONTENT: AttributeId = AttributeId(1);
    pub const BACKGROUND: AttributeId = AttributeId(2);
    pub const CHILDREN: AttributeId = AttributeId(3);
    pub const RESOURCES: AttributeId = AttributeId(4);
    pub const WIDTH: AttributeId = AttributeId(5);
    pub const TAG: AttributeId = AttributeId(6);
    pub const ITEMS: AttributeId = AttributeId(7);
    pub const MARGIN: AttributeId = AttributeId(8);
    pub const COLOR: AttributeId = AttributeId(9);
    pub const CLICK: AttributeId = AttributeId(10);
    pub const CHILD: AttributeId = AttributeId(11);
    pub const ID: AttributeId = AttributeId(12);
    pub const GRID_ROW: AttributeId = AttributeId(13);
    pub const STYLE: AttributeId = AttributeId(14);
    pub const STYLE_RESOURCES: AttributeId = AttributeId(15);
    pub const TEXT: AttributeId = AttributeId(16);
    pub const DATA: AttributeId = AttributeId(17);
    pub const STOPS: AttributeId = AttributeId(18);
}

struct MemberDef {
    declaring: &'static str,
    name: &'static str,
    property_type: TypeRef,
    kind: MemberKind,
    read_only: bool,
}

/// A [`TypeCatalog`] over the types in [`types`].
///
/// Ids missing from the fixed tables are looked up by name through the
/// symbol table, so streams may also declare them with info records.
pub struct TestCatalog {
    types: HashMap<TypeId, TypeRef>,
    by_name: HashMap<String, TypeRef>,
    members: HashMap<AttributeId, MemberDef>,
}

impl Default for TestCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCatalog {
    pub fn new() -> Self {
        let mut catalog = TestCatalog {
            types: HashMap::new(),
            by_name: HashMap::new(),
            members: HashMap::new(),
        };
        catalog.populate();
        catalog
    }

    /// The type named `name`.
    ///
    /// # Panics
    ///
    /// Panics for names the catalog does not know.
    pub fn ty(&self, name: &str) -> TypeRef {
        self.by_name
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("unknown test type '{name}'"))
    }

    /// Every type, for models that need to build scalars.
    pub fn types(&self) -> impl Iterator<Item = &TypeRef> {
        self.by_name.values()
    }

    fn add(&mut self, id: TypeId, ty: TypeRef) -> TypeRef {
        self.by_name.insert(ty.name.clone(), ty.clone());
        self.types.insert(id, ty.clone());
        ty
    }

    fn member(
        &mut self,
        id: AttributeId,
        declaring: &'static str,
        name: &'static str,
        property_type: &TypeRef,
        kind: MemberKind,
    ) -> &mut MemberDef {
        self.members
            .entry(id)
            .insert_entry(MemberDef {
                declaring,
                name,
                property_type: property_type.clone(),
                kind,
                read_only: false,
            })
            .into_mut()
    }

    fn populate(&mut self) {
        use types::*;

        const ELEMENT: [&str; 2] = ["FrameworkElement", "UIElement"];
        let element = |name: &str, extra: &[&str]| {
            let mut ty = TypeDescriptor::new(name).platform().staged_init();
            for base in extra.iter().chain(ELEMENT.iter()) {
                ty = ty.assignable_to(*base);
            }
            ty
        };

        let object = self.add(OBJECT, object_type());
        let string = self.add(STRING, string_type());
        self.add(TYPE, type_type());
        let int32 = self.add(INT32, TypeDescriptor::new("Int32").assignable_to("ValueType").build());
        let double = self.add(DOUBLE, TypeDescriptor::new("Double").assignable_to("ValueType").build());
        let nullable_int32 = self.add(
            NULLABLE_INT32,
            TypeDescriptor::new("Nullable<Int32>").nullable_of(int32.clone()).build(),
        );
        let color = self.add(COLOR, TypeDescriptor::new("Color").assignable_to("ValueType").build());
        let brush = self.add(
            BRUSH,
            TypeDescriptor::new("Brush")
                .assignable_to("Freezable")
                .no_default_constructor()
                .build(),
        );
        self.add(
            SOLID_COLOR_BRUSH,
            TypeDescriptor::new("SolidColorBrush")
                .assignable_to("Brush")
                .assignable_to("Freezable")
                .constructor(vec![color.clone()])
                .build(),
        );
        let thickness = self.add(
            THICKNESS,
            TypeDescriptor::new("Thickness")
                .assignable_to("ValueType")
                .constructor(vec![double.clone()])
                .constructor(vec![double.clone(), double.clone()])
                .build(),
        );
        self.add(
            POINT,
            TypeDescriptor::new("Point")
                .constructor(vec![double.clone(), double.clone()])
                .no_default_constructor()
                .build(),
        );
        let item_list = self.add(
            ITEM_LIST,
            TypeDescriptor::new("ItemList")
                .assignable_to("IList")
                .collection(CollectionKind::List)
                .build(),
        );
        let children = self.add(
            UI_ELEMENT_COLLECTION,
            TypeDescriptor::new("UIElementCollection")
                .assignable_to("IList")
                .collection(CollectionKind::List)
                .build(),
        );
        let dictionary = self.add(
            RESOURCE_DICTIONARY,
            TypeDescriptor::new("ResourceDictionary")
                .assignable_to("IDictionary")
                .collection(CollectionKind::Dictionary)
                .build(),
        );
        let double_array = self.add(
            DOUBLE_ARRAY,
            TypeDescriptor::new("Double[]")
                .collection(CollectionKind::Array)
                .array_of(double.clone())
                .build(),
        );
        let style = self.add(STYLE, TypeDescriptor::new("Style").resource_owner().build());
        let geometry = self.add(GEOMETRY, TypeDescriptor::new("Geometry").assignable_to("Freezable").build());

        self.add(
            BUTTON,
            element("Button", &["ContentControl", "Control"]).content_property("Content").build(),
        );
        self.add(GRID, element("Grid", &["Panel"]).content_property("Children").build());
        self.add(BORDER, element("Border", &[]).content_property("Child").build());
        self.add(
            ITEMS_CONTROL,
            element("ItemsControl", &["Control"]).content_property("Items").build(),
        );
        self.add(FAULTY_CONTROL, element("FaultyControl", &["Control"]).build());
        self.add(PATH, element("Path", &[]).content_property("Data").build());
        self.add(
            TEXT_HOLDER,
            TypeDescriptor::new("TextHolder").content_property("Text").build(),
        );
        self.add(CHILD_HOST, TypeDescriptor::new("ChildHost").add_child().build());
        self.add(
            NAMED_ITEM,
            TypeDescriptor::new("NamedItem").dictionary_key_property("Id").build(),
        );

        let extension = |name: &str, param: &TypeRef| {
            TypeDescriptor::new(name)
                .assignable_to("MarkupExtension")
                .markup_extension()
                .constructor(vec![param.clone()])
                .build()
        };
        self.add(STATIC_RESOURCE, extension("StaticResourceExtension", &object));
        self.add(DYNAMIC_RESOURCE, extension("DynamicResourceExtension", &object));
        self.add(TYPE_EXTENSION, extension("TypeExtension", &type_type()));

        use MemberKind::*;
        use attributes as a;
        self.member(a::CONTENT, "ContentControl", "Content", &object, PlatformProperty);
        self.member(a::BACKGROUND, "Control", "Background", &brush, PlatformProperty);
        self.member(a::CHILDREN, "Panel", "Children", &children, PlatformProperty).read_only = true;
        self.member(a::RESOURCES, "FrameworkElement", "Resources", &dictionary, PlatformProperty);
        self.member(a::WIDTH, "FrameworkElement", "Width", &double, PlatformProperty);
        self.member(a::TAG, "FrameworkElement", "Tag", &nullable_int32, ReflectedProperty);
        self.member(a::ITEMS, "ItemsControl", "Items", &item_list, PlatformProperty);
        self.member(a::MARGIN, "FrameworkElement", "Margin", &thickness, PlatformProperty);
        self.member(a::COLOR, "SolidColorBrush", "Color", &color, PlatformProperty);
        self.member(a::CLICK, "Button", "Click", &object, Event);
        self.member(a::CHILD, "Border", "Child", &object, PlatformProperty);
        self.member(a::ID, "NamedItem", "Id", &string, ReflectedProperty);
        self.member(a::GRID_ROW, "Grid", "Row", &int32, AttachedGetterSetter);
        self.member(a::STYLE, "FrameworkElement", "Style", &style, PlatformProperty);
        self.member(a::STYLE_RESOURCES, "Style", "Resources", &dictionary, ReflectedProperty);
        self.member(a::TEXT, "TextHolder", "Text", &string, ReflectedProperty);
        self.member(a::DATA, "Path", "Data", &geometry, PlatformProperty);
        self.member(a::STOPS, "Path", "Stops", &double_array, ReflectedProperty);
    }

    fn member_ref(&self, def: &MemberDef) -> MemberRef {
        let declaring = self
            .by_name
            .get(def.declaring)
            .cloned()
            .unwrap_or_else(|| TypeDescriptor::new(def.declaring).build());
        let mut member = MemberRef::new(def.kind, declaring, def.name, def.property_type.clone());
        member.read_only = def.read_only;
        member
    }

    fn declares(owner: &TypeRef, def: &MemberDef) -> bool {
        def.kind == MemberKind::AttachedGetterSetter
            || owner.name == def.declaring
            || owner.assignable_to.iter().any(|base| base == def.declaring)
    }
}

impl TypeCatalog for TestCatalog {
    fn resolve_type(&self, id: TypeId, symbols: &dyn SymbolTable) -> Option<TypeRef> {
        if let Some(ty) = self.types.get(&id) {
            return Some(ty.clone());
        }
        let info = symbols.type_at(id)?;
        self.by_name.get(&info.name).cloned()
    }

    fn resolve_member(
        &self,
        owner: &TypeRef,
        attribute: AttributeId,
        symbols: &dyn SymbolTable,
    ) -> Option<MemberRef> {
        if let Some(def) = self.members.get(&attribute) {
            return Self::declares(owner, def).then(|| self.member_ref(def));
        }
        let info = symbols.attribute_at(attribute)?;
        self.member_named(owner, &info.name)
    }

    fn member_named(&self, owner: &TypeRef, name: &str) -> Option<MemberRef> {
        self.members
            .values()
            .filter(|def| def.kind != MemberKind::AttachedGetterSetter)
            .find(|def| def.name == name && Self::declares(owner, def))
            .map(|def| self.member_ref(def))
    }

    fn custom_serializer(&self, id: TypeId) -> Option<SerializerHandle> {
        (id == types::GEOMETRY).then_some(SerializerHandle(1))
    }

    fn known_constructor_shortcut(&self, id: TypeId) -> Option<KnownExtension> {
        match id {
            types::STATIC_RESOURCE => Some(KnownExtension::StaticResource),
            types::DYNAMIC_RESOURCE => Some(KnownExtension::DynamicResource),
            types::TYPE_EXTENSION => Some(KnownExtension::Type),
            _ => None,
        }
    }
}
