//! turn evaluated values into ordered output documents
//!
//! Evaluation results are collected from maps keyed by name, so their iteration order says nothing about the
//! source. The order of object keys and list elements in a generated document is decided here from the marks:
//!
//! 1. lineage recorded by `merge`/`concat`, innermost first (the place a value was originally declared)
//! 2. plain source ranges
//! 3. the existing order
//!
//! Ignored values and internal keys are dropped.
use crate::context::is_internal_key;
use crate::marks::{MarkedValue, ValueKind};
use crate::source::SourceRange;
use crate::value::Value;
use std::cmp::Ordering;

pub fn encode(value: &MarkedValue) -> Value {
    match &value.kind {
        ValueKind::Null => Value::Null,
        ValueKind::Bool(bool) => Value::Boolean(*bool),
        ValueKind::Number(number) => Value::from(number.clone()),
        ValueKind::String(string) => Value::String(string.clone()),
        ValueKind::Array(items) => {
            let mut items: Vec<&MarkedValue> =
                items.iter().filter(|item| !item.is_ignored()).collect();
            items.sort_by(|a, b| compare(a, b));
            Value::Array(items.into_iter().map(encode).collect())
        }
        ValueKind::Object(entries) => {
            let mut entries: Vec<(&String, &MarkedValue)> = entries
                .iter()
                .filter(|(key, value)| !is_internal_key(key) && !value.is_ignored())
                .collect();
            entries.sort_by(|(_, a), (_, b)| compare(a, b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), encode(value)))
                    .collect(),
            )
        }
    }
}

/// Order of two siblings, equal when the marks can not tell them apart
pub fn compare(a: &MarkedValue, b: &MarkedValue) -> Ordering {
    let lineage = |value: &MarkedValue| -> Vec<SourceRange> {
        value.lineage().flatten().cloned().collect()
    };
    let ranges = |value: &MarkedValue| -> Vec<SourceRange> { value.ranges().cloned().collect() };

    compare_ranges(&lineage(a), &lineage(b)).then_with(|| compare_ranges(&ranges(a), &ranges(b)))
}

/// Element-wise by position, a prefix sorts first
fn compare_ranges(a: &[SourceRange], b: &[SourceRange]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(a, b)| a.cmp_position(b))
        .find(|ordering| ordering.is_ne())
        .unwrap_or_else(|| a.len().cmp(&b.len()))
}
