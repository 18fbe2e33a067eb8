//! values with provenance
//!
//! Every evaluated value is a [MarkedValue]: plain data plus a list of [Mark]s recording where it came from.
//! Marks are only inspected at the top level of a value, nested values carry their own.
//!
//! - [Mark::Range]: a source location that contributed to this value
//! - [Mark::Lineage]: ranges collected by `merge`/`concat`, compared before plain ranges when ordering output
//! - [Mark::Ignore]: evaluated, but never part of an output document
//! - [Mark::Incomplete]: read from a block that has not finished evaluating
use crate::source::SourceRange;
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Mark {
    Range(SourceRange),
    Lineage(Vec<SourceRange>),
    Ignore,
    Incomplete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Null,
    Bool(bool),
    Number(hcl::Number),
    String(String),
    Array(Vec<MarkedValue>),
    Object(IndexMap<String, MarkedValue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkedValue {
    pub kind: ValueKind,
    pub marks: Vec<Mark>,
}

impl MarkedValue {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            marks: vec![],
        }
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn array(items: Vec<MarkedValue>) -> Self {
        Self::new(ValueKind::Array(items))
    }

    pub fn object(entries: IndexMap<String, MarkedValue>) -> Self {
        Self::new(ValueKind::Object(entries))
    }

    pub fn with_mark(mut self, mark: Mark) -> Self {
        self.mark(mark);
        self
    }

    pub fn with_marks(mut self, marks: impl IntoIterator<Item = Mark>) -> Self {
        for mark in marks {
            self.mark(mark);
        }
        self
    }

    pub fn mark(&mut self, mark: Mark) {
        if !self.marks.contains(&mark) {
            self.marks.push(mark);
        }
    }

    /// Split off the top level marks
    pub fn unmark(mut self) -> (Self, Vec<Mark>) {
        let marks = std::mem::take(&mut self.marks);
        (self, marks)
    }

    pub fn unmarked(self) -> Self {
        self.unmark().0
    }

    /// Drop top level source ranges but keep every other mark
    pub fn without_ranges(mut self) -> Self {
        self.marks.retain(|mark| !matches!(mark, Mark::Range(_)));
        self
    }

    /// Drop ranges and lineage from every value below the top level
    pub fn without_nested_provenance(mut self) -> Self {
        fn strip(value: MarkedValue) -> MarkedValue {
            let mut value = value.without_nested_provenance();
            value
                .marks
                .retain(|mark| !matches!(mark, Mark::Range(_) | Mark::Lineage(_)));
            value
        }

        self.kind = match self.kind {
            ValueKind::Array(items) => ValueKind::Array(items.into_iter().map(strip).collect()),
            ValueKind::Object(entries) => ValueKind::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, strip(value)))
                    .collect(),
            ),
            kind => kind,
        };
        self
    }

    pub fn ranges(&self) -> impl Iterator<Item = &SourceRange> {
        self.marks.iter().filter_map(|mark| match mark {
            Mark::Range(range) => Some(range),
            _ => None,
        })
    }

    pub fn first_range(&self) -> Option<&SourceRange> {
        self.ranges().next()
    }

    pub fn lineage(&self) -> impl Iterator<Item = &[SourceRange]> {
        self.marks.iter().filter_map(|mark| match mark {
            Mark::Lineage(ranges) => Some(ranges.as_slice()),
            _ => None,
        })
    }

    pub fn is_ignored(&self) -> bool {
        self.marks.contains(&Mark::Ignore)
    }

    pub fn is_incomplete(&self) -> bool {
        self.marks.contains(&Mark::Incomplete)
    }

    /// Depth-first search for a value that still carries [Mark::Incomplete]
    pub fn find_incomplete(&self) -> Option<&MarkedValue> {
        if self.is_incomplete() {
            return Some(self);
        }

        match &self.kind {
            ValueKind::Array(items) => items.iter().find_map(MarkedValue::find_incomplete),
            ValueKind::Object(entries) => entries.values().find_map(MarkedValue::find_incomplete),
            _ => None,
        }
    }

    /// Remove [Mark::Incomplete] from this value and everything below it
    pub fn into_resolved(mut self) -> Self {
        self.marks.retain(|mark| *mark != Mark::Incomplete);
        self.kind = match self.kind {
            ValueKind::Array(items) => {
                ValueKind::Array(items.into_iter().map(Self::into_resolved).collect())
            }
            ValueKind::Object(entries) => ValueKind::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, value.into_resolved()))
                    .collect(),
            ),
            kind => kind,
        };
        self
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ValueKind::Null => "null",
            ValueKind::Bool(_) => "bool",
            ValueKind::Number(_) => "number",
            ValueKind::String(_) => "string",
            ValueKind::Array(_) => "tuple",
            ValueKind::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(string) => Some(string),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Bool(bool) => Some(bool),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<&hcl::Number> {
        match &self.kind {
            ValueKind::Number(number) => Some(number),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[MarkedValue]> {
        match &self.kind {
            ValueKind::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, MarkedValue>> {
        match &self.kind {
            ValueKind::Object(entries) => Some(entries),
            _ => None,
        }
    }

    /// Combine two values of the same variable declared in different files
    ///
    /// Objects are merged key by key, for everything else `other` wins.
    pub fn deep_merge(self, other: MarkedValue) -> MarkedValue {
        match (self.kind, other.kind) {
            (ValueKind::Object(mut entries), ValueKind::Object(other_entries)) => {
                for (key, value) in other_entries {
                    let merged = match entries.shift_remove(&key) {
                        Some(existing) => existing.deep_merge(value),
                        None => value,
                    };
                    entries.insert(key, merged);
                }
                MarkedValue {
                    kind: ValueKind::Object(entries),
                    marks: other.marks,
                }
            }
            (_, kind) => MarkedValue {
                kind,
                marks: other.marks,
            },
        }
    }

    /// Strip all marks, recursively
    pub fn to_hcl(&self) -> hcl::Value {
        match &self.kind {
            ValueKind::Null => hcl::Value::Null,
            ValueKind::Bool(bool) => hcl::Value::Bool(*bool),
            ValueKind::Number(number) => hcl::Value::Number(number.clone()),
            ValueKind::String(string) => hcl::Value::String(string.clone()),
            ValueKind::Array(items) => hcl::Value::Array(items.iter().map(Self::to_hcl).collect()),
            ValueKind::Object(entries) => hcl::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_hcl()))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match &self.kind {
            ValueKind::Null => serde_json::Value::Null,
            ValueKind::Bool(bool) => serde_json::Value::Bool(*bool),
            ValueKind::Number(number) => number_to_json(number),
            ValueKind::String(string) => serde_json::Value::String(string.clone()),
            ValueKind::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            ValueKind::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

fn number_to_json(number: &hcl::Number) -> serde_json::Value {
    if let Some(int) = number.as_i64() {
        return int.into();
    }
    if let Some(uint) = number.as_u64() {
        return uint.into();
    }

    number
        .as_f64()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl From<hcl::Value> for MarkedValue {
    fn from(value: hcl::Value) -> Self {
        let kind = match value {
            hcl::Value::Null => ValueKind::Null,
            hcl::Value::Bool(bool) => ValueKind::Bool(bool),
            hcl::Value::Number(number) => ValueKind::Number(number),
            hcl::Value::String(string) => ValueKind::String(string),
            hcl::Value::Array(items) => ValueKind::Array(items.into_iter().map(Into::into).collect()),
            hcl::Value::Object(entries) => ValueKind::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        };
        Self::new(kind)
    }
}

impl From<serde_json::Value> for MarkedValue {
    fn from(value: serde_json::Value) -> Self {
        let kind = match value {
            serde_json::Value::Null => ValueKind::Null,
            serde_json::Value::Bool(bool) => ValueKind::Bool(bool),
            serde_json::Value::Number(number) => match (number.as_i64(), number.as_u64()) {
                (Some(int), _) => ValueKind::Number(int.into()),
                (None, Some(uint)) => ValueKind::Number(uint.into()),
                _ => number
                    .as_f64()
                    .and_then(hcl::Number::from_f64)
                    .map(ValueKind::Number)
                    .unwrap_or(ValueKind::Null),
            },
            serde_json::Value::String(string) => ValueKind::String(string),
            serde_json::Value::Array(items) => {
                ValueKind::Array(items.into_iter().map(Into::into).collect())
            }
            serde_json::Value::Object(entries) => ValueKind::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, value.into()))
                    .collect(),
            ),
        };
        Self::new(kind)
    }
}

impl From<bool> for MarkedValue {
    fn from(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }
}

impl From<&str> for MarkedValue {
    fn from(value: &str) -> Self {
        Self::new(ValueKind::String(value.to_string()))
    }
}

impl From<String> for MarkedValue {
    fn from(value: String) -> Self {
        Self::new(ValueKind::String(value))
    }
}

impl From<i64> for MarkedValue {
    fn from(value: i64) -> Self {
        Self::new(ValueKind::Number(value.into()))
    }
}

impl From<hcl::Number> for MarkedValue {
    fn from(value: hcl::Number) -> Self {
        Self::new(ValueKind::Number(value))
    }
}

impl From<Vec<MarkedValue>> for MarkedValue {
    fn from(value: Vec<MarkedValue>) -> Self {
        Self::array(value)
    }
}

impl From<IndexMap<String, MarkedValue>> for MarkedValue {
    fn from(value: IndexMap<String, MarkedValue>) -> Self {
        Self::object(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn range(line: usize) -> SourceRange {
        let pos = crate::source::Pos {
            line,
            column: 1,
            byte: 0,
        };
        SourceRange::new("test.retab", pos, pos)
    }

    #[test]
    fn find_incomplete_searches_nested_values() {
        let nested = MarkedValue::from("x").with_mark(Mark::Incomplete);
        let value = MarkedValue::object(IndexMap::from([(
            "outer".to_string(),
            MarkedValue::array(vec![MarkedValue::from(1i64), nested.clone()]),
        )]));

        assert_eq!(value.find_incomplete(), Some(&nested));
        assert_eq!(value.clone().into_resolved().find_incomplete(), None);
    }

    #[test]
    fn marks_are_not_duplicated() {
        let value = MarkedValue::null()
            .with_mark(Mark::Range(range(1)))
            .with_mark(Mark::Range(range(1)))
            .with_mark(Mark::Ignore);

        assert_eq!(value.marks.len(), 2);
        assert_eq!(value.without_ranges().marks, vec![Mark::Ignore]);
    }

    #[test]
    fn nested_provenance_is_dropped_below_the_top() {
        let value = MarkedValue::array(vec![
            MarkedValue::from("a")
                .with_mark(Mark::Range(range(2)))
                .with_mark(Mark::Lineage(vec![range(1)])),
            MarkedValue::object(IndexMap::from([(
                "label".to_string(),
                MarkedValue::from("l")
                    .with_mark(Mark::Range(range(3)))
                    .with_mark(Mark::Ignore),
            )])),
        ])
        .with_mark(Mark::Range(range(4)));

        let stripped = value.without_nested_provenance();
        assert_eq!(stripped.marks, vec![Mark::Range(range(4))]);

        let items = stripped.as_array().unwrap();
        assert!(items[0].marks.is_empty());
        assert_eq!(items[1].as_object().unwrap()["label"].marks, vec![Mark::Ignore]);
    }

    #[test]
    fn deep_merge_combines_objects() {
        let left = MarkedValue::object(IndexMap::from([
            ("a".to_string(), MarkedValue::from(1i64)),
            (
                "nested".to_string(),
                MarkedValue::object(IndexMap::from([("x".to_string(), MarkedValue::from(1i64))])),
            ),
        ]));
        let right = MarkedValue::object(IndexMap::from([(
            "nested".to_string(),
            MarkedValue::object(IndexMap::from([("y".to_string(), MarkedValue::from(2i64))])),
        )]));

        let merged = left.deep_merge(right);
        assert_eq!(
            merged.to_json(),
            serde_json::json!({"a": 1, "nested": {"x": 1, "y": 2}})
        );
    }
}
