//! Interned identifier tables fed by the stream's info records.

use std::collections::HashMap;

use crate::{AssemblyId, AssemblyInfo, AttributeId, AttributeInfo, PiMapping, StringId, TypeId, TypeInfo};

/// De-interns the ids embedded in records.
///
/// The reader adds every `*Info` and `PiMapping` record to the table as it
/// reads them; consumers such as a type catalog look names up through it.
pub trait SymbolTable {
    fn add_assembly(&mut self, info: AssemblyInfo);
    fn add_type(&mut self, info: TypeInfo);
    fn add_attribute(&mut self, info: AttributeInfo);
    fn add_string(&mut self, id: StringId, value: String);
    fn add_mapping(&mut self, mapping: PiMapping);

    fn assembly_at(&self, id: AssemblyId) -> Option<&AssemblyInfo>;
    fn type_at(&self, id: TypeId) -> Option<&TypeInfo>;
    fn attribute_at(&self, id: AttributeId) -> Option<&AttributeInfo>;
    fn string_at(&self, id: StringId) -> Option<&str>;
}

/// A [`SymbolTable`] backed by hash maps.
#[derive(Debug, Clone, Default)]
pub struct MapTable {
    assemblies: HashMap<AssemblyId, AssemblyInfo>,
    types: HashMap<TypeId, TypeInfo>,
    attributes: HashMap<AttributeId, AttributeInfo>,
    strings: HashMap<StringId, String>,
    mappings: Vec<PiMapping>,
}

impl MapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mappings in the order they were read.
    pub fn mappings(&self) -> &[PiMapping] {
        &self.mappings
    }
}

impl SymbolTable for MapTable {
    fn add_assembly(&mut self, info: AssemblyInfo) {
        self.assemblies.insert(info.id, info);
    }

    fn add_type(&mut self, info: TypeInfo) {
        self.types.insert(info.id, info);
    }

    fn add_attribute(&mut self, info: AttributeInfo) {
        self.attributes.insert(info.id, info);
    }

    fn add_string(&mut self, id: StringId, value: String) {
        self.strings.insert(id, value);
    }

    fn add_mapping(&mut self, mapping: PiMapping) {
        self.mappings.push(mapping);
    }

    fn assembly_at(&self, id: AssemblyId) -> Option<&AssemblyInfo> {
        self.assemblies.get(&id)
    }

    fn type_at(&self, id: TypeId) -> Option<&TypeInfo> {
        self.types.get(&id)
    }

    fn attribute_at(&self, id: AttributeId) -> Option<&AttributeInfo> {
        self.attributes.get(&id)
    }

    fn string_at(&self, id: StringId) -> Option<&str> {
        self.strings.get(&id).map(String::as_str)
    }
}
