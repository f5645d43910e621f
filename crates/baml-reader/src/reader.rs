//! The record dispatch engine.

use std::fmt;
use std::sync::Arc;

use baml_records::{
    AttributeId, Decoded, DefUsage, ExtensionFlags, LocatedRecord, Record, RecordDecoder,
    SourceLocation, StringId, SymbolTable, TypeId,
};
use tracing::{debug, trace};

use crate::catalog::{
    CollectionKind, KnownExtension, MemberRef, TypeCatalog, TypeRef, string_type, type_type,
};
use crate::constructor::ConstructorArgs;
use crate::deferred::{DeferredKey, KeyTable};
use crate::error::{ErrorKind, ReadError, Result};
use crate::holder::{HolderKind, ResourceHolder};
use crate::model::{ObjectModel, ProvideValueTarget, RecordSource, Value};
use crate::scope::ResourceScope;
use crate::stack::{ContextStack, Frame, FrameKind};

/// Tunables for a [`RecordReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Deepest context stack, and deepest chain of nested deferred
    /// realizations, before the stream is rejected (default: 256).
    pub max_depth: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self { max_depth: 256 }
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}

/// Outcome of [`RecordReader::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The buffered bytes are used up; feed more and call again.
    Pending,
    Complete,
}

/// The collaborators a read runs against.
pub struct Services<'a, M: ObjectModel> {
    pub catalog: &'a dyn TypeCatalog,
    pub symbols: &'a mut dyn SymbolTable,
    pub model: &'a mut M,
}

impl<'a, M: ObjectModel> Services<'a, M> {
    pub fn new(catalog: &'a dyn TypeCatalog, symbols: &'a mut dyn SymbolTable, model: &'a mut M) -> Self {
        Self {
            catalog,
            symbols,
            model,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Complete,
    Failed,
}

/// Where content handed to an element came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Text,
    Element,
    /// The value a markup extension provided.
    Extension,
}

/// What the loop does after a record.
pub(crate) enum Flow {
    Continue,
    /// Not enough bytes to handle the record; rewind to it.
    Pending,
    Done,
}

/// Rebuilds objects from a record stream.
///
/// The reader pulls one record at a time and keeps everything in progress
/// on a [`ContextStack`]. Completed top-level elements are collected as
/// roots.
pub struct RecordReader<'r, O> {
    pub(crate) decoder: RecordDecoder,
    pub(crate) stack: ContextStack<O>,
    roots: Vec<Value<O>>,
    forest_root: Option<O>,
    pub(crate) outer: Option<&'r ResourceScope<'r, O>>,
    pub(crate) options: ReaderOptions,
    /// Forward-reference tables of the deferred entries being realized,
    /// innermost last.
    pub(crate) prefetch: Vec<Arc<[Value<O>]>>,
    /// Keys collected while reading a deferred section's key table.
    pub(crate) key_table: Option<KeyTable<O>>,
    /// Frames owned by whoever set this reader up.
    pub(crate) base_depth: usize,
    /// Number of enclosing deferred realizations.
    pub(crate) nesting: usize,
    state: State,
}

impl<O: Clone + fmt::Debug> Default for RecordReader<'_, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'r, O: Clone + fmt::Debug> RecordReader<'r, O> {
    /// A reader for a top-level stream fed incrementally.
    pub fn new() -> Self {
        Self::with_decoder(RecordDecoder::new())
    }

    /// A reader over a complete top-level stream.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_decoder(RecordDecoder::from_bytes(bytes))
    }

    pub(crate) fn with_decoder(decoder: RecordDecoder) -> Self {
        let options = ReaderOptions::default();
        Self {
            decoder,
            stack: ContextStack::new(options.max_depth),
            roots: Vec::new(),
            forest_root: None,
            outer: None,
            options,
            prefetch: Vec::new(),
            key_table: None,
            base_depth: 0,
            nesting: 0,
            state: State::Reading,
        }
    }

    /// Merge the stream's first top-level element into an existing object
    /// instead of creating one.
    pub fn with_root(mut self, root: O) -> Self {
        self.forest_root = Some(root);
        self
    }

    /// Resolve resources that are not found locally through `scope`.
    pub fn with_outer_scope(mut self, scope: &'r ResourceScope<'r, O>) -> Self {
        self.outer = Some(scope);
        self
    }

    pub fn with_options(mut self, options: ReaderOptions) -> Self {
        self.options = options;
        self.stack = ContextStack::new(options.max_depth);
        self
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.decoder.feed(bytes);
    }

    pub fn close(&mut self) {
        self.decoder.close();
    }

    /// Stream position of the next unread record.
    pub fn position(&self) -> u64 {
        self.decoder.position()
    }

    pub fn roots(&self) -> &[Value<O>] {
        &self.roots
    }

    pub fn into_roots(self) -> Vec<Value<O>> {
        self.roots
    }

    /// Process every buffered record.
    ///
    /// On error the stack is unwound, releasing every scope the read
    /// entered, and the reader refuses further reads.
    pub fn read<M: ObjectModel<Object = O>>(&mut self, cx: &mut Services<'_, M>) -> Result<ReadStatus> {
        match self.state {
            State::Complete => return Ok(ReadStatus::Complete),
            State::Failed => return Err(ReadError::malformed("reader already failed")),
            State::Reading => {}
        }
        match self.read_records(cx) {
            Ok(status) => {
                if status == ReadStatus::Complete {
                    self.state = State::Complete;
                }
                Ok(status)
            }
            Err(error) => {
                self.state = State::Failed;
                self.stack.unwind(cx.model);
                Err(error)
            }
        }
    }

    fn read_records<M: ObjectModel<Object = O>>(&mut self, cx: &mut Services<'_, M>) -> Result<ReadStatus> {
        loop {
            let located = match self.decoder.next_record() {
                Ok(Decoded::Record(located)) => located,
                Ok(Decoded::Pending) => return Ok(ReadStatus::Pending),
                Ok(Decoded::End) => {
                    let open = self.stack.depth() - self.base_depth;
                    if open > 0 {
                        return Err(ReadError::truncated(format!(
                            "source closed with {open} open frames"
                        ))
                        .located(self.decoder.last_location(), self.decoder.position()));
                    }
                    return Ok(ReadStatus::Complete);
                }
                Err(error) => return Err(self.decode_error(error)),
            };
            let offset = located.offset;
            match self.handle(located, cx)? {
                Flow::Continue => {}
                Flow::Pending => {
                    self.decoder.rewind_to(offset);
                    return Ok(ReadStatus::Pending);
                }
                Flow::Done => return Ok(ReadStatus::Complete),
            }
        }
    }

    pub(crate) fn decode_error(&self, error: baml_records::DecodeError) -> ReadError {
        ReadError::from(error).located(self.decoder.last_location(), self.decoder.position())
    }

    /// Next record of a section that is known to be fully buffered.
    pub(crate) fn next_buffered(&mut self) -> Result<LocatedRecord> {
        match self.decoder.next_record() {
            Ok(Decoded::Record(located)) => Ok(located),
            Ok(Decoded::Pending) => Err(ReadError::malformed("section ends before its declared size")),
            Ok(Decoded::End) => Err(ReadError::truncated("source ended inside a section")),
            Err(error) => Err(self.decode_error(error)),
        }
    }

    /// Handle records until the stack is back at `depth`.
    pub(crate) fn drive_until<M: ObjectModel<Object = O>>(
        &mut self,
        depth: usize,
        cx: &mut Services<'_, M>,
    ) -> Result<()> {
        while self.stack.depth() > depth {
            let located = self.next_buffered()?;
            let kind = located.record.kind();
            match self.handle(located, cx)? {
                Flow::Continue => {}
                Flow::Pending | Flow::Done => {
                    return Err(ReadError::malformed(format!("{kind} record inside a nested subtree")));
                }
            }
        }
        Ok(())
    }

    /// Dispatch one record, locating any error it raises.
    pub(crate) fn handle<M: ObjectModel<Object = O>>(
        &mut self,
        located: LocatedRecord,
        cx: &mut Services<'_, M>,
    ) -> Result<Flow> {
        let LocatedRecord {
            record,
            offset,
            location,
        } = located;
        let kind = record.kind();
        let location = location.or(self.decoder.last_location());
        trace!(%kind, offset, depth = self.stack.depth(), "record");
        self.dispatch(record, location, cx)
            .map_err(|error| error.at(location, offset, kind))
    }

    pub(crate) fn dispatch<M: ObjectModel<Object = O>>(
        &mut self,
        record: Record,
        location: Option<SourceLocation>,
        cx: &mut Services<'_, M>,
    ) -> Result<Flow> {
        match record {
            Record::DocumentStart { debug_baml, .. } => {
                if self.stack.depth() > self.base_depth {
                    return Err(ReadError::malformed("document start inside an element"));
                }
                trace!(debug_baml, "document start");
            }
            Record::DocumentEnd => {
                let open = self.stack.depth() - self.base_depth;
                if open > 0 {
                    return Err(ReadError::malformed(format!(
                        "document ended with {open} open frames"
                    )));
                }
                return Ok(Flow::Done);
            }

            Record::AssemblyInfo(info) => cx.symbols.add_assembly(info),
            Record::TypeInfo(info) => cx.symbols.add_type(info),
            Record::AttributeInfo(info) => cx.symbols.add_attribute(info),
            Record::StringInfo { id, value } => cx.symbols.add_string(id, value),
            Record::PiMapping(mapping) => cx.symbols.add_mapping(mapping),
            Record::XmlnsProperty { prefix, namespace, .. } => {
                trace!(%prefix, %namespace, "xmlns");
            }

            Record::ElementStart { type_id, flags } => {
                let ty = self.resolve_type(type_id, cx)?;
                if let Some(handle) = cx.catalog.custom_serializer(type_id) {
                    return self.read_with_serializer(handle, ty, type_id, location, cx);
                }
                let mut frame = Frame::element(ty, Some(type_id));
                frame.facets.via_type_converter = flags.via_type_converter;
                frame.facets.injected = flags.injected;
                frame.location = location;
                self.start_element(frame, cx)?;
            }
            Record::ElementEnd => {
                let frame = self.pop_frame(cx, "element end", |f| {
                    f.kind.is_target() && !f.facets.key_element && !f.facets.static_resource
                })?;
                let frame = self.finish_construction(frame, cx)?;
                self.attach(frame, cx)?;
            }

            Record::KeyElementStart { type_id, placement } => {
                let ty = self.resolve_type(type_id, cx)?;
                if self.collecting_keys() {
                    self.push_key(DeferredKey::new(Value::Null, placement));
                }
                let mut frame = Frame::element(ty, Some(type_id));
                frame.facets.key_element = true;
                frame.facets.needs_attach = false;
                frame.location = location;
                self.start_element(frame, cx)?;
            }
            Record::KeyElementEnd => {
                let frame = self.pop_frame(cx, "key element end", |f| f.facets.key_element)?;
                let frame = self.finish_construction(frame, cx)?;
                let key = frame.value().unwrap_or(Value::Null);
                self.set_key_on_context(key, cx)?;
            }

            Record::StaticResourceStart { type_id, flags } => {
                let ty = self.resolve_type(type_id, cx)?;
                let mut frame = Frame::element(ty, Some(type_id));
                frame.facets.static_resource = true;
                frame.facets.via_type_converter = flags.via_type_converter;
                frame.location = location;
                self.start_element(frame, cx)?;
            }
            Record::StaticResourceEnd => {
                let frame = self.pop_frame(cx, "static resource end", |f| f.facets.static_resource)?;
                let frame = self.finish_construction(frame, cx)?;
                if self.collecting_keys() {
                    let value = frame.value().unwrap_or(Value::Null);
                    self.add_forward_reference(value)?;
                } else {
                    self.attach(frame, cx)?;
                }
            }
            Record::StaticResourceId { index } => {
                let value = self.prefetched(index)?;
                self.forward_reference(value, location, cx)?;
            }
            Record::OptimizedStaticResource { flags, value_id } => {
                let arg = self.extension_argument(flags, value_id, cx)?;
                let value = self.construct_known(KnownExtension::StaticResource, "StaticResource", arg, cx)?;
                self.forward_reference(Value::Object(value), location, cx)?;
            }

            Record::Property { attribute, value } => {
                let (object, member) = self.property_target(attribute, cx)?;
                let value = self.text_value(value, &member, None, &object, cx)?;
                self.assign_property(&object, &member, value, cx)?;
            }
            Record::PropertyStringReference { attribute, string } => {
                let text = self.string(string, cx)?;
                let (object, member) = self.property_target(attribute, cx)?;
                let value = self.text_value(text, &member, None, &object, cx)?;
                self.assign_property(&object, &member, value, cx)?;
            }
            Record::PropertyTypeReference { attribute, type_id } => {
                let ty = self.resolve_type(type_id, cx)?;
                let (object, member) = self.property_target(attribute, cx)?;
                self.assign_property(&object, &member, Value::Type(ty), cx)?;
            }
            Record::PropertyWithConverter {
                attribute,
                value,
                converter,
            } => {
                let converter = self.resolve_type(converter, cx)?;
                let (object, member) = self.property_target(attribute, cx)?;
                let value = self.text_value(value, &member, Some(&converter), &object, cx)?;
                self.assign_property(&object, &member, value, cx)?;
            }
            Record::PropertyCustom {
                attribute,
                serializer_type,
                data,
            } => {
                let (object, member) = self.property_target(attribute, cx)?;
                let value = cx
                    .model
                    .decode_custom_value(serializer_type, &data, &member)
                    .map_err(|error| {
                        ReadError::from_model(error, |message| ErrorKind::TypeConversionFailed {
                            value: format!("{} bytes", data.len()),
                            target: member.property_type.name.clone(),
                            property: Some(member.to_string()),
                            message,
                        })
                    })?;
                self.assign_property(&object, &member, value, cx)?;
            }
            Record::PropertyWithExtension {
                attribute,
                extension,
                flags,
                value_id,
            } => {
                let (object, member) = self.property_target(attribute, cx)?;
                let arg = self.extension_argument(flags, value_id, cx)?;
                let value = self.build_extension(extension, arg, cx)?;
                self.assign_property(&object, &member, value, cx)?;
            }
            Record::PropertyWithStaticResourceId { attribute, index } => {
                let (object, member) = self.property_target(attribute, cx)?;
                let value = self.prefetched(index)?;
                self.assign_property(&object, &member, value, cx)?;
            }

            Record::PropertyComplexStart { attribute } => {
                let (_, member) = self.property_target(attribute, cx)?;
                let platform = self.stack.current().is_some_and(|f| f.kind == FrameKind::TargetIsPlatformObject);
                let kind = if platform {
                    FrameKind::ComplexPropertyOfPlatformObject
                } else {
                    FrameKind::ComplexPropertyOfPlainObject
                };
                let mut frame = Frame::new(kind, member.to_string());
                frame.expected_type = Some(member.property_type.clone());
                frame.member = Some(member);
                frame.location = location;
                self.stack.push(frame, cx.model)?;
            }
            Record::PropertyComplexEnd => {
                self.pop_frame(cx, "complex property end", |f| f.kind.is_complex_property())?;
            }

            Record::PropertyArrayStart { attribute } => {
                self.start_collection(attribute, HolderKind::Array, location, cx)?
            }
            Record::PropertyIListStart { attribute } => {
                self.start_collection(attribute, HolderKind::List, location, cx)?
            }
            Record::PropertyIDictionaryStart { attribute } => {
                self.start_collection(attribute, HolderKind::Dictionary, location, cx)?
            }
            Record::PropertyArrayEnd | Record::PropertyIListEnd | Record::PropertyIDictionaryEnd => {
                let mut frame = self.pop_frame(cx, "collection end", |f| f.kind.is_collection())?;
                if let Some(holder) = &mut frame.holder {
                    holder.finalize(cx.model)?;
                }
            }

            Record::Text { value } => self.text(value, None, cx)?,
            Record::TextWithConverter { value, converter } => {
                let converter = self.resolve_type(converter, cx)?;
                self.text(value, Some(converter), cx)?;
            }
            Record::TextWithId { string } => {
                let text = self.string(string, cx)?;
                self.text(text, None, cx)?;
            }

            Record::RoutedEvent { attribute, handler } | Record::ClrEvent { attribute, handler } => {
                let (object, member) = self.property_target(attribute, cx)?;
                cx.model.add_event_handler(&object, &member, &handler)?;
            }

            Record::DefAttribute { usage, value } => {
                let frame = self.current_target("x: attribute")?;
                match usage {
                    DefUsage::Key => frame.key = Some(Value::Text(value)),
                    DefUsage::Name => {
                        let object = materialize(frame, cx.model)?;
                        cx.model.register_name(&value, &object)?;
                    }
                    DefUsage::Uid => {
                        let object = materialize(frame, cx.model)?;
                        cx.model.set_uid(&value, &object)?;
                    }
                }
            }
            Record::DefAttributeKeyString { string, placement } => {
                let key = Value::Text(self.string(string, cx)?);
                self.declare_key(key, placement)?;
            }
            Record::DefAttributeKeyType { type_id, placement } => {
                let key = Value::Type(self.resolve_type(type_id, cx)?);
                self.declare_key(key, placement)?;
            }

            Record::ConstructorParametersStart => {
                let label = self.current_target("constructor parameters")?.label.clone();
                let mut frame = Frame::new(FrameKind::ConstructorParams, label);
                frame.location = location;
                self.stack.push(frame, cx.model)?;
            }
            Record::ConstructorParameterType { type_id } => {
                let ty = self.resolve_type(type_id, cx)?;
                self.constructor_params()?.args.push(Value::Type(ty));
            }
            Record::ConstructorParametersEnd => {
                let frame = self.pop_frame(cx, "constructor parameters end", |f| {
                    f.kind == FrameKind::ConstructorParams
                })?;
                self.finish_constructor_params(frame, cx)?;
            }

            Record::DeferableContentStart { content_size } => {
                return self.read_deferred_section(content_size, cx);
            }

            Record::ConnectionId { id } => {
                let frame = self.current_target("connection id")?;
                let object = materialize(frame, cx.model)?;
                cx.model.connect(id, &object)?;
            }
            Record::ContentProperty { attribute } => {
                let (_, member) = self.property_target(attribute, cx)?;
                if let Some(frame) = self.stack.current_mut() {
                    frame.content_property = Some(member);
                }
            }

            Record::LineNumberAndPosition { .. } | Record::LinePosition { .. } => {
                // folded into locations by the decoder
            }
        }
        Ok(Flow::Continue)
    }

    // ---- frames ---------------------------------------------------------

    fn start_element<M: ObjectModel<Object = O>>(&mut self, mut frame: Frame<O>, cx: &mut Services<'_, M>) -> Result<()> {
        let Some(ty) = frame.expected_type.clone() else {
            return Err(ReadError::malformed("element frame without a type"));
        };
        if self.stack.depth() == self.base_depth
            && !frame.facets.key_element
            && let Some(root) = self.forest_root.take()
        {
            let root_type = cx.model.type_of(&root);
            if !root_type.is_assignable_to(&ty) {
                return Err(ReadError::malformed(format!(
                    "root of type '{root_type}' cannot stand in for '{ty}'"
                )));
            }
            debug!(root = %root_type, element = %ty, "merging forest root");
            frame.object = Some(root);
        }
        // the instance is built on first use, or by a constructor parameter block
        self.stack.push(frame, cx.model)
    }

    /// Pop the top frame, which must satisfy `expected`.
    fn pop_frame<M: ObjectModel<Object = O>>(
        &mut self,
        cx: &mut Services<'_, M>,
        what: &str,
        expected: impl FnOnce(&Frame<O>) -> bool,
    ) -> Result<Frame<O>> {
        let open = self.stack.depth() > self.base_depth;
        if !(open && self.stack.current().is_some_and(expected)) {
            return Err(match self.stack.current() {
                Some(frame) if open => ReadError::malformed(format!(
                    "{what} does not match open {:?} '{}'",
                    frame.kind, frame.label
                )),
                _ => ReadError::malformed(format!("{what} without a matching start")),
            });
        }
        self.stack
            .pop(cx.model)
            .ok_or_else(|| ReadError::malformed(format!("{what} without a matching start")))
    }

    pub(crate) fn current_target(&mut self, what: &str) -> Result<&mut Frame<O>> {
        match self.stack.current_mut() {
            Some(frame) if frame.kind.is_target() => Ok(frame),
            Some(frame) => Err(ReadError::malformed(format!(
                "{what} inside {:?} '{}'",
                frame.kind, frame.label
            ))),
            None => Err(ReadError::malformed(format!("{what} outside any element"))),
        }
    }

    fn constructor_params(&mut self) -> Result<&mut Frame<O>> {
        match self.stack.current_mut() {
            Some(frame) if frame.kind == FrameKind::ConstructorParams => Ok(frame),
            _ => Err(ReadError::malformed("constructor parameter outside constructor parameters")),
        }
    }

    /// Run the end-of-construction hooks on a popped element frame.
    ///
    /// A failing `end_init` is replaced by the parent property's fallback
    /// value when the model offers one. Fatal faults are never replaced.
    fn finish_construction<M: ObjectModel<Object = O>>(
        &mut self,
        mut frame: Frame<O>,
        cx: &mut Services<'_, M>,
    ) -> Result<Frame<O>> {
        if frame.object.is_none() && frame.converted.is_none() {
            materialize(&mut frame, cx.model)?;
        }
        let Some(object) = frame.object.clone() else {
            return Ok(frame);
        };
        let ty = cx.model.type_of(&object);
        if ty.staged_init
            && let Err(error) = cx.model.end_init(&object)
        {
            let error = ReadError::from(error);
            if error.is_fatal() {
                return Err(error);
            }
            let Some(fallback) = self.fallback_for_parent(cx) else {
                return Err(error);
            };
            debug!(element = %ty, %error, "end init failed, using fallback value");
            frame.object = None;
            frame.converted = Some(fallback);
            return Ok(frame);
        }
        cx.model.freeze_if_required(&object)?;
        Ok(frame)
    }

    fn fallback_for_parent<M: ObjectModel<Object = O>>(&mut self, cx: &mut Services<'_, M>) -> Option<Value<O>> {
        let parent = self.stack.current()?;
        if !parent.kind.is_complex_property() {
            return None;
        }
        let member = parent.member.clone()?;
        let owner = self.stack.parent()?.object.clone()?;
        cx.model.fallback_value(&owner, &member)
    }

    // ---- attach ---------------------------------------------------------

    /// Hand a completed element to whatever encloses it.
    pub(crate) fn attach<M: ObjectModel<Object = O>>(&mut self, mut frame: Frame<O>, cx: &mut Services<'_, M>) -> Result<()> {
        let Some(value) = frame.value() else {
            return Err(ReadError::malformed(format!("element '{}' produced no value", frame.label)));
        };
        frame.facets.attached = true;

        // (a) roots, placeholders and constructor arguments
        let Some(parent) = self.stack.current_mut() else {
            self.roots.push(value);
            return Ok(());
        };
        match parent.kind {
            FrameKind::DeferredRealizePlaceholder => {
                parent.converted = Some(value);
                return Ok(());
            }
            FrameKind::ConstructorParams => {
                parent.args.push(value);
                return Ok(());
            }
            _ => {}
        }
        if self.stack.depth() == self.base_depth {
            self.roots.push(value);
            return Ok(());
        }

        let target = self.insertion_context(cx)?;
        let origin = if is_markup_extension(&value, &*cx.model) {
            Origin::Extension
        } else {
            Origin::Element
        };
        let value = self.evaluate_extension(value, &target, cx)?;
        let value_type = value_type(&value, &*cx.model);

        // (b) explicit collection tag
        if let Some(ty) = &value_type
            && self.claims_collection(ty, cx)?
        {
            let holder = self.current_holder()?;
            trace!(property = %holder.member, element = %ty, "explicit collection element");
            return holder.claim(value, cx.model);
        }

        // (c) dictionary entry
        if self.parent_is_dictionary(cx) {
            let key = match frame.key.take() {
                Some(key) => Some(key),
                None => match self.stack.current_mut().and_then(|p| p.pending_key.take()) {
                    Some(key) => Some(key),
                    None => self.implicit_key(&value, cx)?,
                },
            };
            let Some(key) = key else {
                return Err(ReadError::new(ErrorKind::MissingDictionaryKey {
                    type_name: value_type.map_or_else(|| frame.label.clone(), |t| t.name.clone()),
                }));
            };
            let key = self.evaluate_extension(key, &target, cx)?;
            return self.insert_entry(key, value, cx);
        }

        // (d) through (f)
        self.add_content(value, origin, cx)
    }

    /// Whether `ty` makes the element the collection of the enclosing
    /// collection property rather than an item in it.
    fn claims_collection<M: ObjectModel<Object = O>>(&mut self, ty: &TypeRef, cx: &mut Services<'_, M>) -> Result<bool> {
        let Some(holder) = self.stack.current_mut().and_then(|f| f.holder.as_mut()) else {
            return Ok(false);
        };
        if !holder.is_unpopulated() {
            return Ok(false);
        }
        let declared = &holder.member.property_type;
        if declared.collection != CollectionKind::None && ty.is_assignable_to(declared) {
            return Ok(true);
        }
        // list properties also compare against the collection already
        // stored in the property
        if holder.kind == HolderKind::List
            && let Some(existing) = holder.fetch(cx.model)?
        {
            return Ok(ty.is_assignable_to(&cx.model.type_of(existing)));
        }
        Ok(false)
    }

    fn current_holder(&mut self) -> Result<&mut ResourceHolder<O>> {
        self.stack
            .current_mut()
            .and_then(|f| f.holder.as_mut())
            .ok_or_else(|| ReadError::malformed("collection frame without a holder"))
    }

    fn parent_is_dictionary<M: ObjectModel<Object = O>>(&self, cx: &Services<'_, M>) -> bool {
        let Some(parent) = self.stack.current() else {
            return false;
        };
        match &parent.holder {
            Some(holder) => holder.kind == HolderKind::Dictionary,
            None => {
                parent.kind.is_target()
                    && parent.converted.is_none()
                    && parent
                        .object_type(&*cx.model)
                        .is_some_and(|t| t.collection == CollectionKind::Dictionary)
            }
        }
    }

    fn implicit_key<M: ObjectModel<Object = O>>(&mut self, value: &Value<O>, cx: &mut Services<'_, M>) -> Result<Option<Value<O>>> {
        let Value::Object(object) = value else {
            return Ok(None);
        };
        let ty = cx.model.type_of(object);
        let Some(name) = &ty.dictionary_key_property else {
            return Ok(None);
        };
        let Some(member) = cx.catalog.member_named(&ty, name) else {
            return Ok(None);
        };
        let key = cx.model.get_value(object, &member)?;
        Ok((!key.is_null()).then_some(key))
    }

    fn insert_entry<M: ObjectModel<Object = O>>(&mut self, key: Value<O>, value: Value<O>, cx: &mut Services<'_, M>) -> Result<()> {
        let Some(parent) = self.stack.current_mut() else {
            return Err(ReadError::malformed("dictionary entry outside a dictionary"));
        };
        if let Some(holder) = &mut parent.holder {
            return holder.insert(value, Some(key), cx.model);
        }
        let dictionary = materialize(parent, cx.model)?;
        cx.model.add_entry(&dictionary, key, value)?;
        Ok(())
    }

    /// What a markup extension attached to the current frame is evaluated
    /// against.
    fn insertion_context<M: ObjectModel<Object = O>>(&mut self, cx: &mut Services<'_, M>) -> Result<ProvideValueTarget<O>> {
        let Some(parent) = self.stack.current() else {
            return Ok(ProvideValueTarget::none());
        };
        if let Some(holder) = &parent.holder {
            return Ok(ProvideValueTarget {
                object: Some(holder.owner.clone()),
                member: Some(holder.member.clone()),
            });
        }
        if parent.kind.is_complex_property() {
            return Ok(ProvideValueTarget {
                object: self.stack.parent().and_then(|f| f.object.clone()),
                member: parent.member.clone(),
            });
        }
        let object = match self.stack.current_mut() {
            Some(frame) if frame.kind.is_target() => Some(materialize(frame, cx.model)?),
            _ => None,
        };
        Ok(ProvideValueTarget {
            object,
            member: None,
        })
    }

    /// Insert child content into the current frame: positional insertion,
    /// then the content property, then a complex property slot.
    fn add_content<M: ObjectModel<Object = O>>(&mut self, value: Value<O>, origin: Origin, cx: &mut Services<'_, M>) -> Result<()> {
        let Some(parent) = self.stack.current_mut() else {
            return Err(ReadError::malformed("content outside any element"));
        };
        let parent_label = parent.label.clone();

        if let Some(holder) = &mut parent.holder {
            return holder.insert(value, None, cx.model);
        }

        if parent.kind.is_complex_property() {
            let Some(member) = parent.member.clone() else {
                return Err(ReadError::malformed("complex property frame without a member"));
            };
            let owner = match self.stack.parent_mut() {
                Some(owner) => materialize(owner, cx.model)?,
                None => return Err(ReadError::malformed("complex property without an owner")),
            };
            let value = match value {
                Value::Text(text) if origin == Origin::Text => self.text_value(text, &member, None, &owner, cx)?,
                other => other,
            };
            return self.set_property(&owner, &member, value, origin == Origin::Extension, cx);
        }

        if !parent.kind.is_target() {
            return Err(ReadError::new(ErrorKind::NoInsertionTarget {
                parent_type: parent_label,
            }));
        }
        let content_override = parent.content_property.clone();
        let object = materialize(parent, cx.model)?;
        let ty = cx.model.type_of(&object);

        match ty.collection {
            CollectionKind::List => {
                cx.model.add_item(&object, value)?;
                return Ok(());
            }
            CollectionKind::Dictionary => {
                return Err(ReadError::new(ErrorKind::MissingDictionaryKey {
                    type_name: ty.name.clone(),
                }));
            }
            CollectionKind::Array | CollectionKind::None => {}
        }
        if ty.add_child {
            cx.model.add_child(&object, value)?;
            return Ok(());
        }

        let content = content_override.or_else(|| {
            ty.content_property
                .as_deref()
                .and_then(|name| cx.catalog.member_named(&ty, name))
        });
        if let Some(member) = content {
            let content_type = &member.property_type;
            if matches!(content_type.collection, CollectionKind::List) || content_type.add_child {
                let existing = cx.model.get_value(&object, &member)?;
                if let Value::Object(collection) = existing {
                    if content_type.add_child && content_type.collection == CollectionKind::None {
                        cx.model.add_child(&collection, value)?;
                    } else {
                        cx.model.add_item(&collection, value)?;
                    }
                    return Ok(());
                }
            }
            let value = match value {
                Value::Text(text) if origin == Origin::Text => self.text_value(text, &member, None, &object, cx)?,
                other => other,
            };
            return self.set_property(&object, &member, value, origin == Origin::Extension, cx);
        }

        Err(ReadError::new(ErrorKind::NoInsertionTarget {
            parent_type: ty.name.clone(),
        }))
    }

    fn set_key_on_context<M: ObjectModel<Object = O>>(&mut self, key: Value<O>, cx: &mut Services<'_, M>) -> Result<()> {
        if self.collecting_keys() {
            return match self.key_table.as_mut().and_then(|table| table.keys.last_mut()) {
                Some(entry) => {
                    entry.key = key;
                    Ok(())
                }
                None => Err(ReadError::malformed("key element outside the key table")),
            };
        }
        let in_dictionary = self.parent_is_dictionary(cx);
        let Some(frame) = self.stack.current_mut() else {
            return Err(ReadError::malformed("key element outside any element"));
        };
        if frame.kind.is_target() && !in_dictionary {
            frame.key = Some(key);
        } else {
            // key ahead of its value inside a dictionary
            frame.pending_key = Some(key);
        }
        Ok(())
    }

    fn declare_key(&mut self, key: Value<O>, placement: baml_records::KeyPlacement) -> Result<()> {
        if self.collecting_keys() {
            self.push_key(DeferredKey::new(key, placement));
            return Ok(());
        }
        let frame = self.current_target("key declaration")?;
        frame.key = Some(key);
        Ok(())
    }

    // ---- collections ----------------------------------------------------

    fn start_collection<M: ObjectModel<Object = O>>(
        &mut self,
        attribute: AttributeId,
        hint: HolderKind,
        location: Option<SourceLocation>,
        cx: &mut Services<'_, M>,
    ) -> Result<()> {
        let (owner, member) = self.property_target(attribute, cx)?;
        let kind = HolderKind::for_member(&member, hint);
        let mut holder = ResourceHolder::new(kind, owner, member.clone());
        if kind == HolderKind::List {
            holder.fetch(cx.model)?;
        }
        let frame_kind = match kind {
            HolderKind::Array => FrameKind::CollectionArray,
            HolderKind::List => FrameKind::CollectionList,
            HolderKind::Dictionary => FrameKind::CollectionDictionary,
            HolderKind::AddChildTarget => FrameKind::CollectionAddChildTarget,
        };
        let mut frame = Frame::new(frame_kind, member.to_string());
        frame.member = Some(member);
        frame.holder = Some(holder);
        frame.location = location;
        self.stack.push(frame, cx.model)
    }

    // ---- text -----------------------------------------------------------

    fn text<M: ObjectModel<Object = O>>(&mut self, text: String, converter: Option<TypeRef>, cx: &mut Services<'_, M>) -> Result<()> {
        let Some(frame) = self.stack.current_mut() else {
            return Err(ReadError::malformed("text outside any element"));
        };
        match frame.kind {
            FrameKind::ConstructorParams => {
                frame.args.push(Value::Text(text));
                Ok(())
            }
            FrameKind::DeferredRealizePlaceholder => {
                frame.converted = Some(Value::Text(text));
                Ok(())
            }
            kind if kind.is_target() && frame.object.is_none() && frame.converted.is_none() => {
                let Some(ty) = frame.expected_type.clone() else {
                    return Err(ReadError::malformed("element frame without a type"));
                };
                if ty.is_string() && converter.is_none() {
                    frame.converted = Some(Value::Text(text));
                    return Ok(());
                }
                if frame.facets.via_type_converter || !ty.default_constructible || ty.is_string() {
                    let context = ProvideValueTarget::none();
                    let value = cx
                        .model
                        .convert_from_text(&text, &ty, converter.as_ref(), &context)
                        .map_err(|error| {
                            ReadError::from_model(error, |message| ErrorKind::TypeConversionFailed {
                                value: text.clone(),
                                target: ty.name.clone(),
                                property: None,
                                message,
                            })
                        })?;
                    if let Some(frame) = self.stack.current_mut() {
                        match value {
                            Value::Object(object) => frame.object = Some(object),
                            other => frame.converted = Some(other),
                        }
                    }
                    return Ok(());
                }
                self.add_content(Value::Text(text), Origin::Text, cx)
            }
            _ => self.add_content(Value::Text(text), Origin::Text, cx),
        }
    }

    // ---- properties -----------------------------------------------------

    /// The current element's object and the member `attribute` names.
    fn property_target<M: ObjectModel<Object = O>>(
        &mut self,
        attribute: AttributeId,
        cx: &mut Services<'_, M>,
    ) -> Result<(O, MemberRef)> {
        let frame = self.current_target("property")?;
        let object = materialize(frame, cx.model)?;
        let owner = cx.model.type_of(&object);
        let member = cx
            .catalog
            .resolve_member(&owner, attribute, &*cx.symbols)
            .ok_or_else(|| {
                ReadError::new(ErrorKind::UnresolvedMember {
                    owner: owner.name.clone(),
                    attribute: attribute_name(attribute, &*cx.symbols),
                })
            })?;
        Ok((object, member))
    }

    /// Convert property text to the member's type. Text for string and
    /// object members is kept as is unless a converter is named.
    fn text_value<M: ObjectModel<Object = O>>(
        &mut self,
        text: String,
        member: &MemberRef,
        converter: Option<&TypeRef>,
        object: &O,
        cx: &mut Services<'_, M>,
    ) -> Result<Value<O>> {
        let ty = &member.property_type;
        if converter.is_none() && (ty.is_string() || ty.is_object()) {
            return Ok(Value::Text(text));
        }
        let context = ProvideValueTarget {
            object: Some(object.clone()),
            member: Some(member.clone()),
        };
        cx.model
            .convert_from_text(&text, ty, converter, &context)
            .map_err(|error| {
                ReadError::from_model(error, |message| ErrorKind::TypeConversionFailed {
                    value: text.clone(),
                    target: ty.name.clone(),
                    property: Some(member.to_string()),
                    message,
                })
            })
    }

    /// Evaluate a markup extension value and set the member.
    pub(crate) fn assign_property<M: ObjectModel<Object = O>>(
        &mut self,
        object: &O,
        member: &MemberRef,
        value: Value<O>,
        cx: &mut Services<'_, M>,
    ) -> Result<()> {
        let from_extension = is_markup_extension(&value, &*cx.model);
        self.set_property(object, member, value, from_extension, cx)
    }

    /// Assign `value`, checking optional-typed members unless the value was
    /// provided by a markup extension.
    fn set_property<M: ObjectModel<Object = O>>(
        &mut self,
        object: &O,
        member: &MemberRef,
        value: Value<O>,
        from_extension: bool,
        cx: &mut Services<'_, M>,
    ) -> Result<()> {
        let target = ProvideValueTarget {
            object: Some(object.clone()),
            member: Some(member.clone()),
        };
        let value = self.evaluate_extension(value, &target, cx)?;
        if !from_extension
            && let Some(inner) = &member.property_type.nullable_of
            && let Some(found) = value_type(&value, &*cx.model)
            && found.name != inner.name
            && found.name != member.property_type.name
        {
            return Err(ReadError::new(ErrorKind::IncompatibleNullableAssignment {
                property: member.to_string(),
                expected: inner.name.clone(),
                found: found.name.clone(),
            }));
        }
        cx.model.set_value(object, member, value)?;
        Ok(())
    }

    // ---- extensions and forward references ------------------------------

    /// The argument of a compact extension record.
    fn extension_argument<M: ObjectModel<Object = O>>(
        &mut self,
        flags: ExtensionFlags,
        value_id: i16,
        cx: &mut Services<'_, M>,
    ) -> Result<Value<O>> {
        if flags.value_is_type {
            return Ok(Value::Type(self.resolve_type(TypeId(value_id), cx)?));
        }
        if flags.value_is_static {
            let id = AttributeId(value_id);
            let info = cx
                .symbols
                .attribute_at(id)
                .ok_or_else(|| ReadError::malformed(format!("unknown {id}")))?;
            let owner = cx
                .symbols
                .type_at(info.owner)
                .map_or_else(|| info.owner.to_string(), |t| t.name.clone());
            return Ok(Value::Text(format!("{owner}.{}", info.name)));
        }
        Ok(Value::Text(self.string(StringId(value_id), cx)?))
    }

    fn build_extension<M: ObjectModel<Object = O>>(
        &mut self,
        extension: TypeId,
        arg: Value<O>,
        cx: &mut Services<'_, M>,
    ) -> Result<Value<O>> {
        let ty = self.resolve_type(extension, cx)?;
        let object = self.construct_from_args(
            &ty,
            Some(extension),
            ConstructorArgs::Single(arg),
            &ProvideValueTarget::none(),
            cx,
        )?;
        Ok(Value::Object(object))
    }

    fn prefetched(&self, index: u16) -> Result<Value<O>> {
        let table = self
            .prefetch
            .last()
            .ok_or_else(|| ReadError::malformed("resource id outside deferred content"))?;
        table.get(index as usize).cloned().ok_or_else(|| {
            ReadError::malformed(format!(
                "resource id {index} outside a table of {}",
                table.len()
            ))
        })
    }

    /// Route a forward-declared resource reference: into the key table
    /// while one is being read, otherwise to the enclosing element.
    fn forward_reference<M: ObjectModel<Object = O>>(
        &mut self,
        value: Value<O>,
        location: Option<SourceLocation>,
        cx: &mut Services<'_, M>,
    ) -> Result<()> {
        if self.collecting_keys() {
            return self.add_forward_reference(value);
        }
        let mut frame = Frame::new(FrameKind::Unknown, "resource reference");
        frame.converted = Some(value);
        frame.location = location;
        self.attach(frame, cx)
    }

    /// Whether records at the current depth belong to a key table.
    fn collecting_keys(&self) -> bool {
        self.key_table
            .as_ref()
            .is_some_and(|table| table.depth == self.stack.depth())
    }

    fn push_key(&mut self, key: DeferredKey<O>) {
        if let Some(table) = &mut self.key_table {
            table.keys.push(key);
        }
    }

    fn add_forward_reference(&mut self, value: Value<O>) -> Result<()> {
        match self.key_table.as_mut().and_then(|table| table.keys.last_mut()) {
            Some(entry) => {
                entry.static_resources.push(value);
                Ok(())
            }
            None => Err(ReadError::malformed("resource reference ahead of any key")),
        }
    }

    // ---- serializers ----------------------------------------------------

    fn read_with_serializer<M: ObjectModel<Object = O>>(
        &mut self,
        handle: crate::catalog::SerializerHandle,
        ty: TypeRef,
        type_id: TypeId,
        location: Option<SourceLocation>,
        cx: &mut Services<'_, M>,
    ) -> Result<Flow> {
        debug!(element = %ty, ?handle, "delegating subtree to serializer");
        let mut source = SerializerSource {
            decoder: &mut self.decoder,
            symbols: &*cx.symbols,
            fault: None,
        };
        let result = cx.model.read_with_serializer(handle, &ty, &mut source);
        let fault = source.fault.take();
        let object = match result {
            Ok(object) => object,
            Err(error) if error.critical => return Err(ReadError::from(error)),
            Err(error) => return Err(fault.unwrap_or_else(|| ReadError::from(error))),
        };
        let mut frame = Frame::element(ty, Some(type_id));
        frame.object = Some(object);
        frame.location = location;
        self.attach(frame, cx)?;
        Ok(Flow::Continue)
    }

    // ---- lookups --------------------------------------------------------

    pub(crate) fn resolve_type<M: ObjectModel<Object = O>>(&self, id: TypeId, cx: &Services<'_, M>) -> Result<TypeRef> {
        cx.catalog
            .resolve_type(id, &*cx.symbols)
            .ok_or_else(|| ReadError::new(ErrorKind::UnresolvedType { type_id: id }))
    }

    fn string<M: ObjectModel<Object = O>>(&self, id: StringId, cx: &Services<'_, M>) -> Result<String> {
        cx.symbols
            .string_at(id)
            .map(str::to_owned)
            .ok_or_else(|| ReadError::malformed(format!("unknown {id}")))
    }

    pub(crate) fn construct_known<M: ObjectModel<Object = O>>(
        &mut self,
        extension: KnownExtension,
        type_name: &str,
        arg: Value<O>,
        cx: &mut Services<'_, M>,
    ) -> Result<O> {
        cx.model.construct_known(extension, arg).map_err(|error| {
            ReadError::from_model(error, |message| ErrorKind::ConstructorInvocationFailed {
                type_name: type_name.to_owned(),
                message,
            })
        })
    }
}

/// The instance a frame stands for, creating it on first use.
pub(crate) fn materialize<O: Clone, M: ObjectModel<Object = O>>(frame: &mut Frame<O>, model: &mut M) -> Result<O> {
    if let Some(object) = &frame.object {
        return Ok(object.clone());
    }
    match &frame.converted {
        Some(Value::Object(object)) => return Ok(object.clone()),
        Some(_) => {
            return Err(ReadError::malformed(format!(
                "'{}' holds a converted value, not an object",
                frame.label
            )));
        }
        None => {}
    }
    let Some(ty) = frame.expected_type.clone() else {
        return Err(ReadError::malformed(format!("'{}' has nothing to construct", frame.label)));
    };
    if ty.constructor_with_arity(0).is_none() {
        return Err(ReadError::new(ErrorKind::NoMatchingConstructor {
            type_name: ty.name.clone(),
            arg_count: 0,
        }));
    }
    let object = model.create_instance(&ty)?;
    if ty.staged_init {
        model.begin_init(&object)?;
    }
    frame.object = Some(object.clone());
    Ok(object)
}

/// Runtime type of a value; `None` for null and deferred references.
pub(crate) fn value_type<M: ObjectModel>(value: &Value<M::Object>, model: &M) -> Option<TypeRef> {
    match value {
        Value::Null | Value::Deferred(_) => None,
        Value::Text(_) => Some(string_type()),
        Value::Type(_) => Some(type_type()),
        Value::Object(object) => Some(model.type_of(object)),
    }
}

fn is_markup_extension<M: ObjectModel>(value: &Value<M::Object>, model: &M) -> bool {
    matches!(value, Value::Object(object) if model.type_of(object).markup_extension)
}

fn attribute_name(attribute: AttributeId, symbols: &dyn SymbolTable) -> String {
    symbols
        .attribute_at(attribute)
        .map_or_else(|| attribute.to_string(), |info| info.name.clone())
}

/// Feeds a serializer from the reader's own decoder.
struct SerializerSource<'d> {
    decoder: &'d mut RecordDecoder,
    symbols: &'d dyn SymbolTable,
    fault: Option<ReadError>,
}

impl RecordSource for SerializerSource<'_> {
    fn next_record(&mut self) -> Result<Option<LocatedRecord>> {
        let error = match self.decoder.next_record() {
            Ok(Decoded::Record(located)) => return Ok(Some(located)),
            Ok(Decoded::End) => return Ok(None),
            Ok(Decoded::Pending) => ReadError::truncated("serializer subtree is not fully buffered"),
            Err(error) => ReadError::from(error),
        };
        self.fault = Some(error.clone());
        Err(error)
    }

    fn symbols(&self) -> &dyn SymbolTable {
        self.symbols
    }
}

/// Read a complete top-level stream and return its roots.
pub fn read_document<M: ObjectModel>(
    bytes: impl Into<Vec<u8>>,
    catalog: &dyn TypeCatalog,
    symbols: &mut dyn SymbolTable,
    model: &mut M,
) -> Result<Vec<Value<M::Object>>> {
    let mut cx = Services::new(catalog, symbols, model);
    let mut reader = RecordReader::from_bytes(bytes);
    match reader.read(&mut cx)? {
        ReadStatus::Complete => Ok(reader.into_roots()),
        ReadStatus::Pending => Err(ReadError::truncated("stream ended early")),
    }
}
