//! Resource lookup across the context stack and enclosing readers.

use std::fmt;

use tracing::trace;

use crate::catalog::CollectionKind;
use crate::deferred::realize_entry;
use crate::error::{ErrorKind, ReadError, Result};
use crate::holder::HolderKind;
use crate::model::{DeferredReference, DictionaryEntry, ObjectModel, ProvideValueTarget, Provided, Value};
use crate::reader::{RecordReader, Services};

/// Something a resource key can be found in.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeEntry<O> {
    /// A dictionary, searched with [`ObjectModel::lookup_entry`].
    Dictionary(O),
    /// An object with its own resources, searched with
    /// [`ObjectModel::owned_resource`].
    Owner(O),
}

impl<O> ScopeEntry<O> {
    pub fn object(&self) -> &O {
        match self {
            ScopeEntry::Dictionary(object) | ScopeEntry::Owner(object) => object,
        }
    }
}

/// Outcome of a resource lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<O> {
    /// Found, possibly with a null value.
    Found(Value<O>),
    NotFound,
}

/// A snapshot of the resource providers visible at one point, innermost
/// first, linked to the scope of the reader that started this one.
#[derive(Debug, Clone)]
pub struct ResourceScope<'a, O> {
    entries: Vec<ScopeEntry<O>>,
    outer: Option<&'a ResourceScope<'a, O>>,
}

impl<'a, O: Clone + fmt::Debug> ResourceScope<'a, O> {
    pub fn new(entries: Vec<ScopeEntry<O>>) -> Self {
        Self {
            entries,
            outer: None,
        }
    }

    pub fn chained(entries: Vec<ScopeEntry<O>>, outer: &'a ResourceScope<'a, O>) -> Self {
        Self {
            entries,
            outer: Some(outer),
        }
    }

    pub fn entries(&self) -> &[ScopeEntry<O>] {
        &self.entries
    }

    pub fn outer(&self) -> Option<&'a ResourceScope<'a, O>> {
        self.outer
    }

    /// Look `key` up in every provider, innermost first, then through the
    /// outer scopes, then in the model's ambient resources.
    ///
    /// An unrealized entry is built on the spot, under the options of the
    /// read that met its section, unless `must_defer` is set, in which case
    /// a [`Value::Deferred`] reference is returned instead.
    pub fn lookup<M: ObjectModel<Object = O>>(
        &self,
        key: &Value<O>,
        must_defer: bool,
        cx: &mut Services<'_, M>,
    ) -> Result<Lookup<O>> {
        self.lookup_nested(key, must_defer, cx, 0)
    }

    pub(crate) fn lookup_nested<M: ObjectModel<Object = O>>(
        &self,
        key: &Value<O>,
        must_defer: bool,
        cx: &mut Services<'_, M>,
        nesting: usize,
    ) -> Result<Lookup<O>> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            for (index, entry) in current.entries.iter().enumerate() {
                let found = match entry {
                    ScopeEntry::Dictionary(dictionary) => cx.model.lookup_entry(dictionary, key)?,
                    ScopeEntry::Owner(owner) => cx.model.owned_resource(owner, key)?,
                };
                match found {
                    DictionaryEntry::Missing => continue,
                    DictionaryEntry::Value(value) => return Ok(Lookup::Found(value)),
                    DictionaryEntry::Unrealized {
                        content,
                        index: slot,
                    } => {
                        if must_defer {
                            return Ok(Lookup::Found(Value::Deferred(DeferredReference {
                                dictionary: entry.object().clone(),
                                key: Box::new(key.clone()),
                            })));
                        }
                        // the entry sees its own dictionary and everything
                        // outside it
                        let inner = ResourceScope {
                            entries: current.entries[index..].to_vec(),
                            outer: current.outer,
                        };
                        let value = realize_entry(&content, slot, &inner, cx, nesting)?;
                        if let ScopeEntry::Dictionary(dictionary) = entry {
                            cx.model.store_realized(dictionary, key.clone(), value.clone())?;
                        }
                        return Ok(Lookup::Found(value));
                    }
                }
            }
            scope = current.outer;
        }
        match cx.model.ambient_resource(key)? {
            Some(value) => Ok(Lookup::Found(value)),
            None => Ok(Lookup::NotFound),
        }
    }
}

impl<O: Clone + fmt::Debug> RecordReader<'_, O> {
    /// Resource providers on the stack, innermost first.
    pub(crate) fn scope_entries<M: ObjectModel<Object = O>>(&self, model: &M) -> Vec<ScopeEntry<O>> {
        let mut entries = Vec::new();
        for frame in self.stack.iter() {
            if let Some(holder) = &frame.holder
                && holder.kind == HolderKind::Dictionary
                && let Some(collection) = holder.collection()
            {
                entries.push(ScopeEntry::Dictionary(collection.clone()));
            }
            let Some(object) = &frame.object else {
                continue;
            };
            let ty = model.type_of(object);
            if ty.collection == CollectionKind::Dictionary {
                entries.push(ScopeEntry::Dictionary(object.clone()));
            } else if ty.resource_owner || ty.platform_object {
                // platform elements carry their own resources property
                entries.push(ScopeEntry::Owner(object.clone()));
            }
        }
        entries
    }

    /// The resource scope at the current point of the read.
    pub fn current_scope<M: ObjectModel<Object = O>>(&self, model: &M) -> ResourceScope<'_, O> {
        ResourceScope {
            entries: self.scope_entries(model),
            outer: self.outer,
        }
    }

    pub(crate) fn lookup_resource<M: ObjectModel<Object = O>>(
        &mut self,
        key: &Value<O>,
        must_defer: bool,
        cx: &mut Services<'_, M>,
    ) -> Result<Lookup<O>> {
        let scope = ResourceScope {
            entries: self.scope_entries(&*cx.model),
            outer: self.outer,
        };
        scope.lookup_nested(key, must_defer, cx, self.nesting)
    }

    /// Replace a markup extension with the value it provides. Other values
    /// pass through.
    pub(crate) fn evaluate_extension<M: ObjectModel<Object = O>>(
        &mut self,
        value: Value<O>,
        target: &ProvideValueTarget<O>,
        cx: &mut Services<'_, M>,
    ) -> Result<Value<O>> {
        let Value::Object(extension) = &value else {
            return Ok(value);
        };
        let ty = cx.model.type_of(extension);
        if !ty.markup_extension {
            return Ok(value);
        }
        match cx.model.provide_value(extension, target)? {
            Provided::Value(provided) => Ok(provided),
            Provided::Resource { key, defer } => {
                trace!(extension = %ty, key = %key.describe(), defer, "resource lookup");
                match self.lookup_resource(&key, defer, cx)? {
                    Lookup::Found(found) => Ok(found),
                    Lookup::NotFound => Err(ReadError::new(ErrorKind::ResourceNotFound {
                        key: key.describe(),
                    })),
                }
            }
        }
    }
}
