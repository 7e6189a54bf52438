//! Mapping between definition collections and flat solver vectors.
//!
//! Entries are concatenated in declaration order, each contributing its
//! elements in column-major order. The index map records where every entry
//! landed so solver rows can be named again.

use std::ops::Range;

use dk_core::{Real, Shape};

use crate::schema::{Collection, Entry};
use crate::{ModelError, ModelResult};

/// Where one entry sits inside the flat vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpan {
    pub name: String,
    pub range: Range<usize>,
    pub shape: Shape,
}

impl IndexSpan {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    /// Display label of the element at `offset` within this entry.
    pub fn label(&self, offset: usize) -> String {
        element_label(&self.name, self.len(), offset)
    }
}

/// Per-entry layout of a flattened collection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexMap {
    pub spans: Vec<IndexSpan>,
}

impl IndexMap {
    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.spans.last().map(|s| s.range.end).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn span(&self, name: &str) -> Option<&IndexSpan> {
        self.spans.iter().find(|s| s.name == name)
    }

    /// Global rows spanned by the named entry.
    pub fn rows_of(&self, name: &str) -> Option<Range<usize>> {
        self.span(name).map(|s| s.range.clone())
    }

    /// Entry owning a global row, and the row's offset within that entry.
    pub fn locate(&self, row: usize) -> Option<(&IndexSpan, usize)> {
        self.spans
            .iter()
            .find(|s| s.range.contains(&row))
            .map(|s| (s, row - s.range.start))
    }

    pub fn label(&self, row: usize) -> Option<String> {
        self.locate(row).map(|(span, offset)| span.label(offset))
    }

    /// One label per row, in row order.
    pub fn labels(&self) -> Vec<String> {
        self.spans
            .iter()
            .flat_map(|s| (0..s.len()).map(move |k| s.label(k)))
            .collect()
    }

    /// Global row of a label produced by [`IndexMap::labels`].
    pub fn row_of_label(&self, label: &str) -> Option<usize> {
        self.labels().iter().position(|l| l == label)
    }
}

/// Bare name for single elements, `name_i` (1-based) otherwise.
pub fn element_label(name: &str, len: usize, offset: usize) -> String {
    if len == 1 {
        name.to_string()
    } else {
        format!("{}_{}", name, offset + 1)
    }
}

/// Concatenate every entry's elements, in declaration order.
pub fn flatten(collection: &Collection) -> Vec<Real> {
    let mut out = Vec::with_capacity(collection.numel());
    for entry in &collection.entries {
        out.extend_from_slice(entry.value.as_slice());
    }
    out
}

/// Copy a flat vector back into a collection, keeping every entry's shape.
pub fn unflatten(collection: &Collection, flat: &[Real]) -> ModelResult<Collection> {
    let expected = collection.numel();
    if flat.len() != expected {
        return Err(ModelError::SizeMismatch {
            what: format!("flat vector for {}", collection.kind.field()),
            expected: expected.to_string(),
            actual: flat.len().to_string(),
        });
    }

    let mut offset = 0;
    let mut entries = Vec::with_capacity(collection.len());
    for entry in &collection.entries {
        let n = entry.value.numel();
        let value = entry.value.with_data(&flat[offset..offset + n])?;
        collection.check_value(&entry.name, &value)?;
        entries.push(Entry {
            value,
            ..entry.clone()
        });
        offset += n;
    }

    Ok(Collection::new(collection.kind, entries))
}

pub fn index_map(collection: &Collection) -> IndexMap {
    let mut start = 0;
    let spans = collection
        .entries
        .iter()
        .map(|entry| {
            let n = entry.value.numel();
            let span = IndexSpan {
                name: entry.name.clone(),
                range: start..start + n,
                shape: entry.value.shape(),
            };
            start += n;
            span
        })
        .collect();
    IndexMap { spans }
}

pub fn labels(collection: &Collection) -> Vec<String> {
    index_map(collection).labels()
}

/// Replace one element of a (possibly multi-element) entry.
pub fn set_element(
    collection: &Collection,
    name: &str,
    offset: usize,
    x: Real,
) -> ModelResult<Collection> {
    let (value, _) = collection.require(name)?;
    if offset >= value.numel() {
        return Err(ModelError::SizeMismatch {
            what: format!("element offset into '{name}'"),
            expected: format!("< {}", value.numel()),
            actual: offset.to_string(),
        });
    }
    let updated = value.with_element(offset, x)?;
    collection.set(name, updated)
}
