//! An arena-backed object model that records what the reader asks of it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use baml_reader::{
    ConstructorSig, DeferredContent, DictionaryEntry, KnownExtension, MemberRef, ModelError,
    ModelResult, ObjectModel, ProvideValueTarget, Provided, RecordSource, SerializerHandle,
    TypeDescriptor, TypeRef, Value,
};
use baml_records::{Record, TypeId};
use tracing::trace;

use crate::TestCatalog;

/// Index of a [`Node`] in a [`TestModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(pub usize);

/// One object.
#[derive(Debug, Clone)]
pub struct Node {
    pub ty: TypeRef,
    /// Text of scalar values such as numbers and colors.
    pub scalar: Option<String>,
    /// Constructor arguments, for objects built from them.
    pub args: Vec<Value<Handle>>,
    /// Properties in assignment order; a reassignment replaces in place.
    pub properties: Vec<(String, Value<Handle>)>,
    pub items: Vec<Value<Handle>>,
    pub entries: Vec<(Value<Handle>, Value<Handle>)>,
    pub deferred: Vec<Arc<DeferredContent<Handle>>>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub handlers: Vec<(String, String)>,
    pub initializing: bool,
}

impl Node {
    fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            scalar: None,
            args: Vec::new(),
            properties: Vec::new(),
            items: Vec::new(),
            entries: Vec::new(),
            deferred: Vec::new(),
            name: None,
            uid: None,
            handlers: Vec::new(),
            initializing: false,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value<Handle>> {
        self.properties
            .iter()
            .find(|(property, _)| property == name)
            .map(|(_, value)| value)
    }
}

/// An [`ObjectModel`] that keeps every object in an arena and appends a
/// line to [`TestModel::log`] for each side effect.
///
/// Failures can be injected per type name.
pub struct TestModel {
    nodes: Vec<Node>,
    types: HashMap<String, TypeRef>,
    pub log: Vec<String>,
    /// Currently open scopes.
    pub scope_depth: usize,
    pub max_scope_depth: usize,
    pub scope_pushes: usize,
    pub scope_pops: usize,
    /// Types whose `end_init` fails.
    pub failing_end_init: HashSet<String>,
    /// Types whose creation raises a critical fault.
    pub critical_create: HashSet<String>,
    /// Types whose `end_init` raises a critical fault.
    pub critical_end_init: HashSet<String>,
    /// Fallback values by member name.
    pub fallbacks: HashMap<String, Value<Handle>>,
    /// Application level resources.
    pub ambient: Vec<(Value<Handle>, Value<Handle>)>,
    pub names: HashMap<String, Handle>,
    pub connections: Vec<(i32, Handle)>,
}

impl TestModel {
    pub fn new(catalog: &TestCatalog) -> Self {
        Self {
            nodes: Vec::new(),
            types: catalog
                .types()
                .map(|ty| (ty.name.clone(), ty.clone()))
                .collect(),
            log: Vec::new(),
            scope_depth: 0,
            max_scope_depth: 0,
            scope_pushes: 0,
            scope_pops: 0,
            failing_end_init: HashSet::new(),
            critical_create: HashSet::new(),
            critical_end_init: HashSet::new(),
            fallbacks: HashMap::new(),
            ambient: Vec::new(),
            names: HashMap::new(),
            connections: Vec::new(),
        }
    }

    pub fn node(&self, handle: Handle) -> &Node {
        &self.nodes[handle.0]
    }

    pub fn type_name(&self, handle: Handle) -> &str {
        &self.nodes[handle.0].ty.name
    }

    pub fn property(&self, handle: Handle, name: &str) -> Option<&Value<Handle>> {
        self.node(handle).property(name)
    }

    /// The object stored in property `name`.
    ///
    /// # Panics
    ///
    /// Panics when the property is unset or does not hold an object.
    pub fn object_property(&self, handle: Handle, name: &str) -> Handle {
        match self.property(handle, name) {
            Some(Value::Object(object)) => *object,
            other => panic!("{}.{name} holds {other:?}", self.type_name(handle)),
        }
    }

    /// Scalar text of the object in `value`, or the text itself.
    pub fn scalar(&self, value: &Value<Handle>) -> Option<String> {
        match value {
            Value::Text(text) => Some(text.clone()),
            Value::Object(handle) => self.node(*handle).scalar.clone(),
            _ => None,
        }
    }

    /// Log lines starting with `prefix`.
    pub fn logged(&self, prefix: &str) -> usize {
        self.log.iter().filter(|line| line.starts_with(prefix)).count()
    }

    pub fn objects_of(&self, type_name: &str) -> Vec<Handle> {
        (0..self.nodes.len())
            .filter(|&index| self.nodes[index].ty.name == type_name)
            .map(Handle)
            .collect()
    }

    fn ty(&self, name: &str) -> TypeRef {
        self.types
            .get(name)
            .cloned()
            .unwrap_or_else(|| TypeDescriptor::new(name).build())
    }

    fn alloc(&mut self, node: Node) -> Handle {
        self.nodes.push(node);
        Handle(self.nodes.len() - 1)
    }

    fn scalar_node(&mut self, type_name: &str, text: &str) -> Value<Handle> {
        let mut node = Node::new(self.ty(type_name));
        node.scalar = Some(text.to_owned());
        Value::Object(self.alloc(node))
    }

    fn note(&mut self, line: String) {
        trace!(%line, "model");
        self.log.push(line);
    }

    fn entry_in(&self, dictionary: Handle, key: &Value<Handle>) -> DictionaryEntry<Handle> {
        let node = self.node(dictionary);
        if let Some((_, value)) = node.entries.iter().find(|(candidate, _)| candidate == key) {
            return DictionaryEntry::Value(value.clone());
        }
        for content in &node.deferred {
            if let Some(index) = content.position_of(key) {
                return DictionaryEntry::Unrealized {
                    content: content.clone(),
                    index,
                };
            }
        }
        DictionaryEntry::Missing
    }
}

impl ObjectModel for TestModel {
    type Object = Handle;

    fn create_instance(&mut self, ty: &TypeRef) -> ModelResult<Handle> {
        if self.critical_create.contains(&ty.name) {
            return Err(ModelError::critical(format!("cannot allocate '{ty}'")));
        }
        if !ty.default_constructible {
            return Err(ModelError::new(format!("'{ty}' has no default constructor")));
        }
        self.note(format!("create {ty}"));
        Ok(self.alloc(Node::new(ty.clone())))
    }

    fn type_of(&self, object: &Handle) -> TypeRef {
        self.node(*object).ty.clone()
    }

    fn begin_init(&mut self, object: &Handle) -> ModelResult<()> {
        self.nodes[object.0].initializing = true;
        Ok(())
    }

    fn end_init(&mut self, object: &Handle) -> ModelResult<()> {
        let ty = self.type_of(object);
        self.nodes[object.0].initializing = false;
        if self.critical_end_init.contains(&ty.name) {
            return Err(ModelError::critical(format!("'{ty}' exhausted memory while initializing")));
        }
        if self.failing_end_init.contains(&ty.name) {
            return Err(ModelError::new(format!("'{ty}' failed to initialize")));
        }
        self.note(format!("end_init {ty}"));
        Ok(())
    }

    fn fallback_value(&mut self, _parent: &Handle, member: &MemberRef) -> Option<Value<Handle>> {
        self.fallbacks.get(&member.name).cloned()
    }

    fn freeze_if_required(&mut self, object: &Handle) -> ModelResult<()> {
        let ty = self.type_of(object);
        if ty.assignable_to.iter().any(|base| base == "Freezable") {
            self.note(format!("freeze {ty}"));
        }
        Ok(())
    }

    fn get_value(&mut self, object: &Handle, member: &MemberRef) -> ModelResult<Value<Handle>> {
        if let Some(value) = self.node(*object).property(&member.name) {
            return Ok(value.clone());
        }
        if member.read_only {
            // read-only collections exist from construction
            let collection = self.alloc(Node::new(member.property_type.clone()));
            self.nodes[object.0]
                .properties
                .push((member.name.clone(), Value::Object(collection)));
            return Ok(Value::Object(collection));
        }
        Ok(Value::Null)
    }

    fn set_value(&mut self, object: &Handle, member: &MemberRef, value: Value<Handle>) -> ModelResult<()> {
        if member.read_only {
            return Err(ModelError::new(format!("'{member}' is read-only")));
        }
        self.note(format!("set {member}"));
        let properties = &mut self.nodes[object.0].properties;
        match properties.iter_mut().find(|(name, _)| *name == member.name) {
            Some((_, slot)) => *slot = value,
            None => properties.push((member.name.clone(), value)),
        }
        Ok(())
    }

    fn convert_from_text(
        &mut self,
        text: &str,
        target: &TypeRef,
        converter: Option<&TypeRef>,
        context: &ProvideValueTarget<Handle>,
    ) -> ModelResult<Value<Handle>> {
        let target = target.nullable_of.clone().unwrap_or_else(|| target.clone());
        self.note(format!(
            "convert '{text}' to {target}{}",
            converter.map_or_else(String::new, |c| format!(" with {c}"))
        ));
        match target.name.as_str() {
            "String" | "Object" => Ok(Value::Text(text.to_owned())),
            "Int32" => {
                let number: i32 = text
                    .trim()
                    .parse()
                    .map_err(|_| ModelError::new(format!("'{text}' is not an integer")))?;
                Ok(self.scalar_node("Int32", &number.to_string()))
            }
            "Double" => {
                let number: f64 = text
                    .trim()
                    .parse()
                    .map_err(|_| ModelError::new(format!("'{text}' is not a number")))?;
                Ok(self.scalar_node("Double", &number.to_string()))
            }
            "Color" => {
                if text.is_empty() || !text.chars().all(|c| c == '#' || c.is_ascii_alphanumeric()) {
                    return Err(ModelError::new(format!("'{text}' is not a color")));
                }
                Ok(self.scalar_node("Color", text))
            }
            "Brush" | "SolidColorBrush" => {
                let color_type = self.ty("Color");
                let color = self.convert_from_text(text, &color_type, None, context)?;
                let mut brush = Node::new(self.ty("SolidColorBrush"));
                brush.properties.push(("Color".to_owned(), color));
                Ok(Value::Object(self.alloc(brush)))
            }
            "Thickness" | "Point" => {
                let double = self.ty("Double");
                let mut node = Node::new(target.clone());
                for part in text.split(',') {
                    let value = self.convert_from_text(part, &double, None, context)?;
                    node.args.push(value);
                }
                Ok(Value::Object(self.alloc(node)))
            }
            _ => Err(ModelError::new(format!("no converter from text to '{target}'"))),
        }
    }

    fn convert_value(&mut self, value: Value<Handle>, target: &TypeRef) -> ModelResult<Value<Handle>> {
        let scalar = self.scalar(&value);
        match (value, target.name.as_str()) {
            (Value::Object(handle), "Double") if self.type_name(handle) == "Int32" => {
                let text = scalar.unwrap_or_default();
                Ok(self.scalar_node("Double", &text))
            }
            (value, _) => Err(ModelError::new(format!(
                "cannot convert {value:?} to '{target}'"
            ))),
        }
    }

    fn invoke_constructor(
        &mut self,
        ty: &TypeRef,
        signature: &ConstructorSig,
        args: Vec<Value<Handle>>,
    ) -> ModelResult<Handle> {
        self.note(format!("construct {ty}/{}", signature.params.len()));
        let mut node = Node::new(ty.clone());
        node.args = args;
        Ok(self.alloc(node))
    }

    fn construct_known(&mut self, extension: KnownExtension, arg: Value<Handle>) -> ModelResult<Handle> {
        let name = match extension {
            KnownExtension::StaticResource => "StaticResourceExtension",
            KnownExtension::DynamicResource => "DynamicResourceExtension",
            KnownExtension::Type => "TypeExtension",
            KnownExtension::TemplateBinding => "TemplateBindingExtension",
            KnownExtension::Static => "StaticExtension",
        };
        self.note(format!("construct known {name}"));
        let mut node = Node::new(self.ty(name));
        node.args.push(arg);
        Ok(self.alloc(node))
    }

    fn provide_value(
        &mut self,
        extension: &Handle,
        _target: &ProvideValueTarget<Handle>,
    ) -> ModelResult<Provided<Handle>> {
        let node = self.node(*extension);
        let arg = node.args.first().cloned().unwrap_or(Value::Null);
        let provided = match node.ty.name.as_str() {
            "StaticResourceExtension" => Provided::Resource {
                key: arg,
                defer: false,
            },
            "DynamicResourceExtension" => Provided::Resource { key: arg, defer: true },
            _ => Provided::Value(arg),
        };
        self.note(format!("provide {}", self.type_name(*extension)));
        Ok(provided)
    }

    fn create_array(&mut self, element: &TypeRef, items: Vec<Value<Handle>>) -> ModelResult<Handle> {
        self.note(format!("array {element}[{}]", items.len()));
        let mut node = Node::new(
            TypeDescriptor::new(format!("{element}[]"))
                .array_of(element.clone())
                .build(),
        );
        node.items = items;
        Ok(self.alloc(node))
    }

    fn add_item(&mut self, collection: &Handle, item: Value<Handle>) -> ModelResult<()> {
        self.note(format!("add item to {}", self.type_name(*collection)));
        self.nodes[collection.0].items.push(item);
        Ok(())
    }

    fn add_entry(&mut self, dictionary: &Handle, key: Value<Handle>, value: Value<Handle>) -> ModelResult<()> {
        if matches!(self.entry_in(*dictionary, &key), DictionaryEntry::Value(_)) {
            return Err(ModelError::new(format!("duplicate key {key:?}")));
        }
        self.note(format!("add entry {}", key.describe()));
        self.nodes[dictionary.0].entries.push((key, value));
        Ok(())
    }

    fn add_child(&mut self, parent: &Handle, child: Value<Handle>) -> ModelResult<()> {
        self.note(format!("add child to {}", self.type_name(*parent)));
        self.nodes[parent.0].items.push(child);
        Ok(())
    }

    fn set_deferred_content(
        &mut self,
        dictionary: &Handle,
        content: Arc<DeferredContent<Handle>>,
    ) -> ModelResult<()> {
        self.note(format!("deferred {} keys", content.len()));
        self.nodes[dictionary.0].deferred.push(content);
        Ok(())
    }

    fn lookup_entry(&mut self, dictionary: &Handle, key: &Value<Handle>) -> ModelResult<DictionaryEntry<Handle>> {
        Ok(self.entry_in(*dictionary, key))
    }

    fn store_realized(&mut self, dictionary: &Handle, key: Value<Handle>, value: Value<Handle>) -> ModelResult<()> {
        self.note(format!("realized {}", key.describe()));
        self.nodes[dictionary.0].entries.push((key, value));
        Ok(())
    }

    fn owned_resource(&mut self, owner: &Handle, key: &Value<Handle>) -> ModelResult<DictionaryEntry<Handle>> {
        match self.node(*owner).property("Resources") {
            Some(Value::Object(dictionary)) => Ok(self.entry_in(*dictionary, key)),
            _ => Ok(DictionaryEntry::Missing),
        }
    }

    fn ambient_resource(&mut self, key: &Value<Handle>) -> ModelResult<Option<Value<Handle>>> {
        Ok(self
            .ambient
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value.clone()))
    }

    fn push_scope(&mut self) {
        self.scope_depth += 1;
        self.scope_pushes += 1;
        self.max_scope_depth = self.max_scope_depth.max(self.scope_depth);
    }

    fn pop_scope(&mut self) {
        self.scope_depth -= 1;
        self.scope_pops += 1;
    }

    fn register_name(&mut self, name: &str, object: &Handle) -> ModelResult<()> {
        self.nodes[object.0].name = Some(name.to_owned());
        self.names.insert(name.to_owned(), *object);
        Ok(())
    }

    fn set_uid(&mut self, uid: &str, object: &Handle) -> ModelResult<()> {
        self.nodes[object.0].uid = Some(uid.to_owned());
        Ok(())
    }

    fn add_event_handler(&mut self, object: &Handle, event: &MemberRef, handler: &str) -> ModelResult<()> {
        self.nodes[object.0]
            .handlers
            .push((event.name.clone(), handler.to_owned()));
        Ok(())
    }

    fn connect(&mut self, connection_id: i32, object: &Handle) -> ModelResult<()> {
        self.connections.push((connection_id, *object));
        Ok(())
    }

    /// Reads the element's text properties into the scalar, up to the
    /// element's end.
    fn read_with_serializer(
        &mut self,
        serializer: SerializerHandle,
        ty: &TypeRef,
        source: &mut dyn RecordSource,
    ) -> ModelResult<Handle> {
        self.note(format!("serializer {} for {ty}", serializer.0));
        let mut depth = 1usize;
        let mut parts = Vec::new();
        while depth > 0 {
            let record = source
                .next_record()
                .map_err(|error| ModelError::new(error.to_string()))?
                .ok_or_else(|| ModelError::new("serializer ran out of records"))?;
            match record.record {
                Record::ElementStart { .. } => depth += 1,
                Record::ElementEnd => depth -= 1,
                Record::Property { value, .. } | Record::Text { value } => parts.push(value),
                _ => {}
            }
        }
        let mut node = Node::new(ty.clone());
        node.scalar = Some(parts.join(" "));
        Ok(self.alloc(node))
    }

    fn decode_custom_value(
        &mut self,
        serializer: TypeId,
        data: &[u8],
        _member: &MemberRef,
    ) -> ModelResult<Value<Handle>> {
        let bytes: [u8; 4] = data
            .try_into()
            .map_err(|_| ModelError::new(format!("{serializer} expects 4 bytes")))?;
        let number = i32::from_le_bytes(bytes);
        Ok(self.scalar_node("Int32", &number.to_string()))
    }
}

