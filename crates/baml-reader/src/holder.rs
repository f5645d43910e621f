//! Uniform insertion into collection-valued properties.

use tracing::trace;

use crate::catalog::{CollectionKind, MemberRef, object_type};
use crate::error::{ErrorKind, ReadError, Result};
use crate::model::{ObjectModel, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolderKind {
    Array,
    List,
    Dictionary,
    AddChildTarget,
}

impl HolderKind {
    /// Pick the holder for `member`, preferring the member's declared
    /// collection kind over the hint from the record that opened it.
    pub fn for_member(member: &MemberRef, hint: HolderKind) -> HolderKind {
        match member.property_type.collection {
            CollectionKind::List => HolderKind::List,
            CollectionKind::Dictionary => HolderKind::Dictionary,
            CollectionKind::Array => HolderKind::Array,
            CollectionKind::None if member.property_type.add_child => HolderKind::AddChildTarget,
            CollectionKind::None => hint,
        }
    }
}

/// The collection behind a property, resolved on first use.
///
/// Once an explicit collection element claims the property the holder is
/// closed and refuses items.
#[derive(Debug)]
pub struct ResourceHolder<O> {
    pub kind: HolderKind,
    pub owner: O,
    pub member: MemberRef,
    pub read_only: bool,
    collection: Option<O>,
    items: Vec<Value<O>>,
    fetched: bool,
    created: bool,
    closed: bool,
    populated: bool,
    finalized: bool,
}

impl<O: Clone> ResourceHolder<O> {
    pub fn new(kind: HolderKind, owner: O, member: MemberRef) -> Self {
        Self {
            kind,
            owner,
            read_only: member.read_only,
            member,
            collection: None,
            items: Vec::new(),
            fetched: false,
            created: false,
            closed: false,
            populated: false,
            finalized: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Nothing has been inserted or claimed yet.
    pub fn is_unpopulated(&self) -> bool {
        !self.populated && !self.closed
    }

    /// Record that content reached the collection without going through
    /// [`ResourceHolder::insert`].
    pub fn mark_populated(&mut self) {
        self.populated = true;
    }

    /// The collection instance, if it has been fetched or created.
    pub fn collection(&self) -> Option<&O> {
        self.collection.as_ref()
    }

    /// Read the property's current value without creating anything.
    pub fn fetch<M: ObjectModel<Object = O>>(&mut self, model: &mut M) -> Result<Option<&O>> {
        if !self.fetched && self.kind != HolderKind::Array {
            self.fetched = true;
            if let Value::Object(existing) = model.get_value(&self.owner, &self.member)? {
                self.collection = Some(existing);
            }
        }
        Ok(self.collection.as_ref())
    }

    /// The collection to insert into: the property's current value, or a
    /// fresh instance when it has none.
    pub fn ensure_collection<M: ObjectModel<Object = O>>(&mut self, model: &mut M) -> Result<O> {
        self.fetch(model)?;
        if let Some(collection) = &self.collection {
            return Ok(collection.clone());
        }
        if self.read_only {
            return Err(ReadError::new(ErrorKind::Model {
                message: format!("read-only collection '{}' has no value", self.member),
            }));
        }
        let collection = model.create_instance(&self.member.property_type)?;
        trace!(property = %self.member, "created collection");
        self.created = true;
        self.collection = Some(collection.clone());
        Ok(collection)
    }

    /// Make `value` the property's collection. Closes the holder.
    pub fn claim<M: ObjectModel<Object = O>>(&mut self, value: Value<O>, model: &mut M) -> Result<()> {
        if self.closed {
            return Err(self.closed_error());
        }
        model.set_value(&self.owner, &self.member, value.clone())?;
        self.collection = value.into_object();
        self.fetched = true;
        self.closed = true;
        self.populated = true;
        Ok(())
    }

    /// Add one item. Dictionaries need a key.
    pub fn insert<M: ObjectModel<Object = O>>(
        &mut self,
        item: Value<O>,
        key: Option<Value<O>>,
        model: &mut M,
    ) -> Result<()> {
        if self.closed {
            return Err(self.closed_error());
        }
        match self.kind {
            HolderKind::Array => self.items.push(item),
            HolderKind::List => {
                let collection = self.ensure_collection(model)?;
                model.add_item(&collection, item)?;
            }
            HolderKind::Dictionary => {
                let collection = self.ensure_collection(model)?;
                let key = key.ok_or_else(|| {
                    ReadError::new(ErrorKind::MissingDictionaryKey {
                        type_name: self.member.property_type.name.clone(),
                    })
                })?;
                model.add_entry(&collection, key, item)?;
            }
            HolderKind::AddChildTarget => {
                let collection = self.ensure_collection(model)?;
                model.add_child(&collection, item)?;
            }
        }
        self.populated = true;
        Ok(())
    }

    /// Assign the collection back to the property if the holder created
    /// it. Running this more than once has no further effect.
    pub fn finalize<M: ObjectModel<Object = O>>(&mut self, model: &mut M) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        if self.closed {
            return Ok(());
        }
        match self.kind {
            HolderKind::Array => {
                let element = self
                    .member
                    .property_type
                    .element_type
                    .clone()
                    .unwrap_or_else(object_type);
                let items = std::mem::take(&mut self.items);
                let array = model.create_array(&element, items)?;
                model.set_value(&self.owner, &self.member, Value::Object(array.clone()))?;
                self.collection = Some(array);
            }
            _ => {
                let collection = self.ensure_collection(model)?;
                if self.created {
                    model.set_value(&self.owner, &self.member, Value::Object(collection))?;
                }
            }
        }
        Ok(())
    }

    fn closed_error(&self) -> ReadError {
        ReadError::new(ErrorKind::PropertyCollectionClosed {
            property: self.member.to_string(),
        })
    }
}
