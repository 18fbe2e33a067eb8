//! `merge` and `concat` with lineage
//!
//! Every element of the result remembers where it was declared: its own source ranges are moved into a
//! [Mark::Lineage] (appended after lineage collected by earlier merges) and the range of the argument it came
//! from becomes its plain range. Output documents are ordered by lineage first, so merged keys keep the
//! order of their declarations instead of the order of the arguments.
use super::FuncError;
use crate::marks::{Mark, MarkedValue, ValueKind};
use crate::source::SourceRange;
use indexmap::IndexMap;

pub fn merge(args: Vec<MarkedValue>) -> Result<MarkedValue, FuncError> {
    if matches!(
        args.first().map(|arg| &arg.kind),
        Some(ValueKind::Array(_))
    ) {
        return concat(args);
    }

    let mut entries: IndexMap<String, MarkedValue> = IndexMap::new();
    for arg in args {
        let (arg, marks) = arg.unmark();
        let origin = ranges(&marks);
        let got = arg.type_name();
        match arg.kind {
            ValueKind::Null => continue,
            ValueKind::Object(object) => {
                for (key, value) in object {
                    entries.shift_remove(&key);
                    entries.insert(key, with_lineage(value, &origin));
                }
            }
            _ => {
                return Err(FuncError::Type {
                    name: "merge",
                    expected: "object",
                    got,
                })
            }
        }
    }

    Ok(MarkedValue::object(entries))
}

pub fn concat(args: Vec<MarkedValue>) -> Result<MarkedValue, FuncError> {
    let mut items = vec![];
    for arg in args {
        let (arg, marks) = arg.unmark();
        let origin = ranges(&marks);
        let got = arg.type_name();
        match arg.kind {
            ValueKind::Null => continue,
            ValueKind::Array(elements) => items.extend(
                elements
                    .into_iter()
                    .map(|element| with_lineage(element, &origin)),
            ),
            _ => {
                return Err(FuncError::Type {
                    name: "concat",
                    expected: "list",
                    got,
                })
            }
        }
    }

    Ok(MarkedValue::array(items))
}

fn ranges(marks: &[Mark]) -> Vec<SourceRange> {
    marks
        .iter()
        .filter_map(|mark| match mark {
            Mark::Range(range) => Some(range.clone()),
            _ => None,
        })
        .collect()
}

fn with_lineage(value: MarkedValue, origin: &[SourceRange]) -> MarkedValue {
    let (value, marks) = value.unmark();
    let declared = ranges(&marks);
    let kept = marks
        .into_iter()
        .filter(|mark| !matches!(mark, Mark::Range(_)));

    let mut value = value.with_marks(kept);
    if !declared.is_empty() {
        value.marks.push(Mark::Lineage(declared));
    }
    value.with_marks(origin.iter().cloned().map(Mark::Range))
}
