//! Deferred dictionary content.
//!
//! A deferred section starts with its keys and the resource references
//! their values use, followed by the value records themselves. Only the
//! keys are read when the section is met; the value bytes are handed to
//! the dictionary untouched and an entry is parsed the first time its key
//! is looked up.

use std::fmt;
use std::sync::Arc;

use baml_records::{KeyPlacement, RecordDecoder};
use tracing::{debug, trace};

use crate::catalog::CollectionKind;
use crate::error::{ReadError, Result};
use crate::holder::HolderKind;
use crate::model::{ObjectModel, Value};
use crate::reader::{Flow, ReadStatus, ReaderOptions, RecordReader, Services, materialize};
use crate::scope::{ResourceScope, ScopeEntry};
use crate::stack::{Frame, FrameKind};

/// One key of a deferred section.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredKey<O> {
    pub key: Value<O>,
    pub placement: KeyPlacement,
    /// Resource references the entry's records refer to by index.
    pub static_resources: Vec<Value<O>>,
}

impl<O> DeferredKey<O> {
    pub fn new(key: Value<O>, placement: KeyPlacement) -> Self {
        Self {
            key,
            placement,
            static_resources: Vec::new(),
        }
    }
}

/// Keys and raw value records of a deferred section.
#[derive(Debug, Clone)]
pub struct DeferredContent<O> {
    pub keys: Vec<DeferredKey<O>>,
    /// The value section, without a version header.
    pub values: Arc<[u8]>,
    /// Resource providers that enclosed the section, innermost first.
    pub scope: Vec<ScopeEntry<O>>,
    /// Options of the read that met the section; entries are parsed with
    /// the same limits.
    pub options: ReaderOptions,
}

impl<O> DeferredContent<O> {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Index of the first entry with `key`.
    pub fn position_of(&self, key: &Value<O>) -> Option<usize>
    where
        O: PartialEq,
    {
        self.keys.iter().position(|entry| entry.key == *key)
    }

    /// Value records of entry `index`. An entry runs up to the next larger
    /// value position, or to the end of the section.
    pub fn value_bytes(&self, index: usize) -> Option<&[u8]> {
        let start = self.keys.get(index)?.placement.value_position as usize;
        let end = self
            .keys
            .iter()
            .map(|entry| entry.placement.value_position as usize)
            .filter(|&position| position > start)
            .min()
            .unwrap_or(self.values.len());
        self.values.get(start..end)
    }
}

impl<O: Clone + fmt::Debug> DeferredContent<O> {
    /// Build entry `index` after the read that produced this content has
    /// finished. Resources resolve against the scope the section was read
    /// in.
    pub fn realize<M: ObjectModel<Object = O>>(
        &self,
        index: usize,
        cx: &mut Services<'_, M>,
    ) -> Result<Value<O>> {
        let scope = ResourceScope::new(self.scope.clone());
        realize_entry(self, index, &scope, cx, 0)
    }
}

/// Keys being collected for a deferred section.
#[derive(Debug)]
pub(crate) struct KeyTable<O> {
    /// Stack depth of the section; deeper records belong to key subtrees.
    pub depth: usize,
    pub keys: Vec<DeferredKey<O>>,
}

/// Parse entry `index` of `content` with a reader nested in `scope`.
pub(crate) fn realize_entry<O: Clone + fmt::Debug, M: ObjectModel<Object = O>>(
    content: &DeferredContent<O>,
    index: usize,
    scope: &ResourceScope<'_, O>,
    cx: &mut Services<'_, M>,
    nesting: usize,
) -> Result<Value<O>> {
    let options = content.options;
    if nesting >= options.max_depth {
        return Err(ReadError::malformed("deferred entries nested too deeply"));
    }
    let (Some(entry), Some(bytes)) = (content.keys.get(index), content.value_bytes(index)) else {
        return Err(ReadError::malformed(format!(
            "deferred entry {index} outside a section of {} entries",
            content.len()
        )));
    };
    debug!(key = %entry.key.describe(), bytes = bytes.len(), nesting, "realizing deferred entry");

    let mut reader = RecordReader::with_decoder(RecordDecoder::headerless(bytes.to_vec()))
        .with_options(options)
        .with_outer_scope(scope);
    reader.nesting = nesting + 1;
    reader.prefetch.push(Arc::from(entry.static_resources.as_slice()));
    reader.stack.push(
        Frame::new(FrameKind::DeferredRealizePlaceholder, "deferred entry"),
        cx.model,
    )?;
    reader.base_depth = 1;

    if reader.read(cx)? == ReadStatus::Pending {
        reader.stack.unwind(cx.model);
        return Err(ReadError::truncated("deferred entry ends early"));
    }
    let placeholder = reader
        .stack
        .pop(cx.model)
        .ok_or_else(|| ReadError::malformed("deferred entry lost its placeholder"))?;
    placeholder
        .value()
        .ok_or_else(|| ReadError::malformed("deferred entry produced no value"))
}

impl<O: Clone + fmt::Debug> RecordReader<'_, O> {
    /// Split a deferred section: read its keys, hand the value bytes to the
    /// dictionary, and continue after the section.
    pub(crate) fn read_deferred_section<M: ObjectModel<Object = O>>(
        &mut self,
        content_size: u32,
        cx: &mut Services<'_, M>,
    ) -> Result<Flow> {
        let start = self.decoder.position();
        let end = start + u64::from(content_size);
        let buffered = self.decoder.buffered_end();
        // key records may need one byte past the section to be decoded
        if buffered <= end && !(self.decoder.is_closed() && buffered == end) {
            if self.decoder.is_closed() {
                return Err(ReadError::truncated(format!(
                    "deferred section of {content_size} bytes, {} available",
                    buffered.saturating_sub(start)
                )));
            }
            return Ok(Flow::Pending);
        }

        let dictionary = self.deferred_target(cx)?;

        let saved = self.key_table.replace(KeyTable {
            depth: self.stack.depth(),
            keys: Vec::new(),
        });
        let collected = self.read_key_table(end, cx);
        let table = std::mem::replace(&mut self.key_table, saved);
        collected?;
        let keys = table.map(|table| table.keys).unwrap_or_default();

        let values_start = self.decoder.position();
        let values: Arc<[u8]> = self
            .decoder
            .slice(values_start, end)
            .map(Arc::from)
            .ok_or_else(|| ReadError::malformed("keys run past the end of the deferred section"))?;
        if let Some(entry) = keys
            .iter()
            .find(|entry| entry.placement.value_position as usize > values.len())
        {
            return Err(ReadError::malformed(format!(
                "value position {} outside a value section of {} bytes",
                entry.placement.value_position,
                values.len()
            )));
        }
        self.decoder
            .seek(end)
            .map_err(|error| self.decode_error(error))?;

        let content = DeferredContent {
            keys,
            values,
            scope: self.scope_entries(&*cx.model),
            options: self.options,
        };
        debug!(
            keys = content.keys.len(),
            bytes = content.values.len(),
            "deferred section"
        );
        cx.model.set_deferred_content(&dictionary, Arc::new(content))?;
        Ok(Flow::Continue)
    }

    /// The dictionary a deferred section belongs to.
    fn deferred_target<M: ObjectModel<Object = O>>(&mut self, cx: &mut Services<'_, M>) -> Result<O> {
        let Some(frame) = self.stack.current_mut() else {
            return Err(ReadError::malformed("deferred content outside any element"));
        };
        if let Some(holder) = &mut frame.holder {
            if holder.kind != HolderKind::Dictionary {
                return Err(ReadError::malformed(format!(
                    "deferred content in non-dictionary property '{}'",
                    holder.member
                )));
            }
            let dictionary = holder.ensure_collection(cx.model)?;
            holder.mark_populated();
            return Ok(dictionary);
        }
        if frame.kind.is_target() {
            let dictionary = materialize(frame, cx.model)?;
            if cx.model.type_of(&dictionary).collection == CollectionKind::Dictionary {
                return Ok(dictionary);
            }
        }
        Err(ReadError::malformed(format!(
            "deferred content in '{}', which is not a dictionary",
            frame.label
        )))
    }

    /// Read key and resource reference records up to the first record of
    /// any other kind.
    fn read_key_table<M: ObjectModel<Object = O>>(&mut self, end: u64, cx: &mut Services<'_, M>) -> Result<()> {
        let depth = self.stack.depth();
        while self.decoder.position() < end {
            let located = self.next_buffered()?;
            if !located.record.kind().is_deferred_key() {
                self.decoder.rewind_to(located.offset);
                break;
            }
            let kind = located.record.kind();
            trace!(%kind, "key table record");
            match self.handle(located, cx)? {
                Flow::Continue => {}
                Flow::Pending | Flow::Done => {
                    return Err(ReadError::malformed(format!("{kind} record in a key table")));
                }
            }
            self.drive_until(depth, cx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facet_testhelpers::test;

    fn key(text: &str, value_position: u32) -> DeferredKey<u32> {
        DeferredKey::new(
            Value::Text(text.to_owned()),
            KeyPlacement {
                value_position,
                shared: false,
                shared_set: false,
            },
        )
    }

    #[test]
    fn test_value_bytes_run_to_next_larger_position() {
        let content = DeferredContent {
            keys: vec![key("b", 4), key("a", 0), key("c", 9)],
            values: Arc::from(&b"0123456789AB"[..]),
            scope: Vec::new(),
            options: ReaderOptions::default(),
        };
        assert_eq!(content.value_bytes(0), Some(&b"45678"[..]));
        assert_eq!(content.value_bytes(1), Some(&b"0123"[..]));
        assert_eq!(content.value_bytes(2), Some(&b"9AB"[..]));
        assert_eq!(content.value_bytes(3), None);
        assert_eq!(content.position_of(&Value::Text("c".into())), Some(2));
    }

    #[test]
    fn test_shared_positions_yield_the_same_bytes() {
        let content = DeferredContent {
            keys: vec![key("a", 0), key("b", 0), key("c", 2)],
            values: Arc::from(&b"xyz"[..]),
            scope: Vec::new(),
            options: ReaderOptions::default(),
        };
        assert_eq!(content.value_bytes(0), content.value_bytes(1));
        assert_eq!(content.value_bytes(1), Some(&b"xy"[..]));
    }
}
