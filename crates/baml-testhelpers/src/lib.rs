#![doc = include_str!("../README.md")]

mod catalog;
mod model;
mod stream;

pub use catalog::{TestCatalog, attributes, types};
pub use model::{Handle, Node, TestModel};
pub use stream::{DeferredSection, SectionKey, StreamBuilder};

use baml_reader::{Result, Value, read_document};
use baml_records::MapTable;

/// Everything a test read needs, owned in one place.
pub struct Fixture {
    pub catalog: TestCatalog,
    pub symbols: MapTable,
    pub model: TestModel,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        let catalog = TestCatalog::new();
        let model = TestModel::new(&catalog);
        Self {
            catalog,
            symbols: MapTable::new(),
            model,
        }
    }

    pub fn services(&mut self) -> baml_reader::Services<'_, TestModel> {
        baml_reader::Services::new(&self.catalog, &mut self.symbols, &mut self.model)
    }

    /// Read a complete stream.
    pub fn read(&mut self, bytes: Vec<u8>) -> Result<Vec<Value<Handle>>> {
        read_document(bytes, &self.catalog, &mut self.symbols, &mut self.model)
    }

    /// Read a stream expected to produce a single object.
    ///
    /// # Panics
    ///
    /// Panics when the read fails or its only root is not an object.
    pub fn read_root(&mut self, bytes: Vec<u8>) -> Handle {
        let roots = self.read(bytes).unwrap_or_else(|error| panic!("read failed: {error}"));
        match roots.as_slice() {
            [Value::Object(root)] => *root,
            other => panic!("expected one object root, got {other:?}"),
        }
    }
}
