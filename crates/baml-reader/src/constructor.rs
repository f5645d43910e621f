//! Constructor arguments and parameterized construction.

use std::fmt;

use baml_records::TypeId;
use tracing::trace;

use crate::catalog::TypeRef;
use crate::error::{ErrorKind, ReadError, Result};
use crate::model::{ObjectModel, ProvideValueTarget, Value};
use crate::reader::{RecordReader, Services, value_type};
use crate::stack::Frame;

/// Positional arguments collected between the constructor parameter
/// records. Most constructors take one argument, so a single value is kept
/// without allocating.
#[derive(Debug, Clone)]
pub enum ConstructorArgs<O> {
    Empty,
    Single(Value<O>),
    List(Vec<Value<O>>),
}

impl<O> Default for ConstructorArgs<O> {
    fn default() -> Self {
        ConstructorArgs::Empty
    }
}

impl<O> ConstructorArgs<O> {
    pub fn push(&mut self, value: Value<O>) {
        *self = match std::mem::take(self) {
            ConstructorArgs::Empty => ConstructorArgs::Single(value),
            ConstructorArgs::Single(first) => ConstructorArgs::List(vec![first, value]),
            ConstructorArgs::List(mut values) => {
                values.push(value);
                ConstructorArgs::List(values)
            }
        };
    }

    pub fn len(&self) -> usize {
        match self {
            ConstructorArgs::Empty => 0,
            ConstructorArgs::Single(_) => 1,
            ConstructorArgs::List(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<Value<O>> {
        match self {
            ConstructorArgs::Empty => Vec::new(),
            ConstructorArgs::Single(value) => vec![value],
            ConstructorArgs::List(values) => values,
        }
    }
}

impl<O: Clone + fmt::Debug> RecordReader<'_, O> {
    /// Build `ty` from positional arguments.
    ///
    /// A single argument to a type with a known shortcut skips reflection.
    /// Otherwise the first constructor with a matching arity is used, and
    /// each argument is evaluated and converted to its parameter type.
    pub(crate) fn construct_from_args<M: ObjectModel<Object = O>>(
        &mut self,
        ty: &TypeRef,
        type_id: Option<TypeId>,
        args: ConstructorArgs<O>,
        target: &ProvideValueTarget<O>,
        cx: &mut Services<'_, M>,
    ) -> Result<O> {
        let arity = args.len();

        if arity == 1
            && let Some(known) = type_id.and_then(|id| cx.catalog.known_constructor_shortcut(id))
        {
            let arg = args.into_vec().pop().unwrap_or(Value::Null);
            let arg = self.evaluate_extension(arg, target, cx)?;
            trace!(extension = %ty, ?known, "known constructor shortcut");
            return self.construct_known(known, &ty.name, arg, cx);
        }

        let Some(signature) = ty.constructor_with_arity(arity) else {
            return Err(ReadError::new(ErrorKind::NoMatchingConstructor {
                type_name: ty.name.clone(),
                arg_count: arity,
            }));
        };

        let mut converted = Vec::with_capacity(arity);
        for (arg, param) in args.into_vec().into_iter().zip(&signature.params) {
            let arg = self.evaluate_extension(arg, target, cx)?;
            converted.push(self.convert_argument(arg, param, target, cx)?);
        }

        let result = if signature.params.is_empty() {
            cx.model.create_instance(ty)
        } else {
            cx.model.invoke_constructor(ty, &signature, converted)
        };
        result.map_err(|error| {
            ReadError::from_model(error, |message| ErrorKind::ConstructorInvocationFailed {
                type_name: ty.name.clone(),
                message,
            })
        })
    }

    fn convert_argument<M: ObjectModel<Object = O>>(
        &mut self,
        arg: Value<O>,
        param: &TypeRef,
        target: &ProvideValueTarget<O>,
        cx: &mut Services<'_, M>,
    ) -> Result<Value<O>> {
        let conversion_failed = |value: String| {
            let target = param.name.clone();
            move |message| ErrorKind::TypeConversionFailed {
                value,
                target,
                property: None,
                message,
            }
        };
        match arg {
            Value::Null => Ok(Value::Null),
            Value::Text(text) if !param.is_string() && !param.is_object() => cx
                .model
                .convert_from_text(&text, param, None, target)
                .map_err(|error| ReadError::from_model(error, conversion_failed(text.clone()))),
            other => {
                let assignable = value_type(&other, &*cx.model).is_none_or(|found| found.is_assignable_to(param));
                if assignable {
                    return Ok(other);
                }
                let shown = other.describe();
                cx.model
                    .convert_value(other, param)
                    .map_err(|error| ReadError::from_model(error, conversion_failed(shown)))
            }
        }
    }

    /// Close a constructor parameter block: build the enclosing element
    /// from the collected arguments.
    pub(crate) fn finish_constructor_params<M: ObjectModel<Object = O>>(
        &mut self,
        params: Frame<O>,
        cx: &mut Services<'_, M>,
    ) -> Result<()> {
        let Frame { args, .. } = params;
        let element = self.current_target("constructor parameters end")?;
        let Some(ty) = element.expected_type.clone() else {
            return Err(ReadError::malformed("constructor parameters for an element without a type"));
        };
        if element.object.is_some() || element.converted.is_some() {
            return Err(ReadError::malformed(format!(
                "constructor parameters after '{}' was already built",
                element.label
            )));
        }
        let type_id = element.type_id;
        let object = self.construct_from_args(&ty, type_id, args, &ProvideValueTarget::none(), cx)?;
        if ty.staged_init {
            cx.model.begin_init(&object)?;
        }
        let element = self.current_target("constructor parameters end")?;
        element.object = Some(object);
        element.converted = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    #[test]
    fn test_args_grow_from_single_to_list() {
        let mut args: ConstructorArgs<u32> = ConstructorArgs::default();
        assert!(args.is_empty());

        args.push(Value::Text("a".into()));
        assert!(matches!(args, ConstructorArgs::Single(_)));

        args.push(Value::Null);
        args.push(Value::Object(7));
        assert_eq!(args.len(), 3);

        let values = args.into_vec();
        assert_eq!(values[0].as_text(), Some("a"));
        assert!(values[1].is_null());
        assert_eq!(values[2].as_object(), Some(&7));
    }
}
