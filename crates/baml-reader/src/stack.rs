//! The context stack: what is being built, and why.

use baml_records::{SourceLocation, TypeId};

use crate::catalog::{MemberRef, TypeRef};
use crate::constructor::ConstructorArgs;
use crate::error::{ReadError, Result};
use crate::holder::ResourceHolder;
use crate::model::{ObjectModel, Value};

/// Mutually exclusive role of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Unknown,
    TargetIsPlatformObject,
    TargetIsPlainObject,
    ComplexPropertyOfPlainObject,
    ComplexPropertyOfPlatformObject,
    CollectionArray,
    CollectionList,
    CollectionDictionary,
    CollectionAddChildTarget,
    DeferredRealizePlaceholder,
    ConstructorParams,
}

impl FrameKind {
    pub fn is_target(self) -> bool {
        matches!(
            self,
            FrameKind::TargetIsPlatformObject | FrameKind::TargetIsPlainObject
        )
    }

    pub fn is_complex_property(self) -> bool {
        matches!(
            self,
            FrameKind::ComplexPropertyOfPlainObject | FrameKind::ComplexPropertyOfPlatformObject
        )
    }

    pub fn is_collection(self) -> bool {
        matches!(
            self,
            FrameKind::CollectionArray
                | FrameKind::CollectionList
                | FrameKind::CollectionDictionary
                | FrameKind::CollectionAddChildTarget
        )
    }
}

/// Independent facts about a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Facets {
    pub needs_attach: bool,
    pub attached: bool,
    pub injected: bool,
    pub via_type_converter: bool,
    /// The frame builds a dictionary key rather than a value.
    pub key_element: bool,
    /// The frame builds a forward-declared resource reference.
    pub static_resource: bool,
}

/// One entry of the [`ContextStack`].
#[derive(Debug)]
pub struct Frame<O> {
    pub kind: FrameKind,
    pub facets: Facets,
    /// The instance, once constructed.
    pub object: Option<O>,
    /// A value that replaces `object`: text converted by a type converter,
    /// a fallback, or the single element a placeholder received.
    pub converted: Option<Value<O>>,
    /// Type to construct on first access while `object` is absent.
    pub expected_type: Option<TypeRef>,
    pub type_id: Option<TypeId>,
    /// Type or member name, for diagnostics.
    pub label: String,
    /// Key assigned with `x:Key` or a key element.
    pub key: Option<Value<O>>,
    /// Key element seen inside a dictionary ahead of the value it keys.
    pub pending_key: Option<Value<O>>,
    /// Overrides the type's declared content property.
    pub content_property: Option<MemberRef>,
    /// The property a complex-property or collection frame stands for.
    pub member: Option<MemberRef>,
    pub holder: Option<ResourceHolder<O>>,
    pub args: ConstructorArgs<O>,
    pub location: Option<SourceLocation>,
}

impl<O: Clone> Frame<O> {
    pub fn new(kind: FrameKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            facets: Facets::default(),
            object: None,
            converted: None,
            expected_type: None,
            type_id: None,
            label: label.into(),
            key: None,
            pending_key: None,
            content_property: None,
            member: None,
            holder: None,
            args: ConstructorArgs::Empty,
            location: None,
        }
    }

    /// A frame for an element of type `ty`.
    pub fn element(ty: TypeRef, type_id: Option<TypeId>) -> Self {
        let kind = if ty.platform_object {
            FrameKind::TargetIsPlatformObject
        } else {
            FrameKind::TargetIsPlainObject
        };
        let mut frame = Self::new(kind, ty.name.clone());
        frame.facets.needs_attach = true;
        frame.expected_type = Some(ty);
        frame.type_id = type_id;
        frame
    }

    /// What this frame produced: the converted value if there is one,
    /// otherwise the object.
    pub fn value(&self) -> Option<Value<O>> {
        self.converted
            .clone()
            .or_else(|| self.object.clone().map(Value::Object))
    }

    pub fn holds_collection(&self) -> bool {
        self.holder.is_some()
    }

    /// Runtime type of the object, or the type it will be built as.
    pub fn object_type<M: ObjectModel<Object = O>>(&self, model: &M) -> Option<TypeRef> {
        match &self.object {
            Some(object) => Some(model.type_of(object)),
            None => self.expected_type.clone(),
        }
    }
}

/// Stack of [`Frame`]s. Every push and pop is mirrored by exactly one
/// [`ObjectModel::push_scope`] or [`ObjectModel::pop_scope`].
#[derive(Debug)]
pub struct ContextStack<O> {
    frames: Vec<Frame<O>>,
    max_depth: usize,
}

impl<O: Clone> ContextStack<O> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_depth,
        }
    }

    pub fn push<M: ObjectModel<Object = O>>(&mut self, frame: Frame<O>, model: &mut M) -> Result<()> {
        if self.frames.len() >= self.max_depth {
            return Err(ReadError::malformed(format!(
                "nesting deeper than {} frames",
                self.max_depth
            )));
        }
        self.frames.push(frame);
        model.push_scope();
        Ok(())
    }

    pub fn pop<M: ObjectModel<Object = O>>(&mut self, model: &mut M) -> Option<Frame<O>> {
        let frame = self.frames.pop()?;
        model.pop_scope();
        Some(frame)
    }

    /// Pop every frame, releasing each scope.
    pub fn unwind<M: ObjectModel<Object = O>>(&mut self, model: &mut M) {
        while self.pop(model).is_some() {}
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn nth_from_top(&self, n: usize) -> Option<&Frame<O>> {
        self.frames.len().checked_sub(n + 1).map(|i| &self.frames[i])
    }

    pub fn current(&self) -> Option<&Frame<O>> {
        self.nth_from_top(0)
    }

    pub fn parent(&self) -> Option<&Frame<O>> {
        self.nth_from_top(1)
    }

    pub fn grandparent(&self) -> Option<&Frame<O>> {
        self.nth_from_top(2)
    }

    pub fn great_grandparent(&self) -> Option<&Frame<O>> {
        self.nth_from_top(3)
    }

    pub fn current_mut(&mut self) -> Option<&mut Frame<O>> {
        self.frames.last_mut()
    }

    pub fn parent_mut(&mut self) -> Option<&mut Frame<O>> {
        let len = self.frames.len();
        len.checked_sub(2).map(|i| &mut self.frames[i])
    }

    /// Frames from innermost to outermost.
    pub fn iter(&self) -> impl Iterator<Item = &Frame<O>> {
        self.frames.iter().rev()
    }
}
