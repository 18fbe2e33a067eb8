//! output paths and `ref`
use super::FuncError;
use crate::marks::{MarkedValue, ValueKind};

/// Keep generated files inside the output directory
///
/// Leading `./`, `/` and `../` are removed: `../../ci.yaml` and `/ci.yaml` both become `ci.yaml`.
pub fn sanitize_gen_path(path: &str) -> String {
    let mut path = path.trim();
    loop {
        let stripped = path
            .strip_prefix("./")
            .or_else(|| path.strip_prefix("../"))
            .or_else(|| path.strip_prefix('/'));
        match stripped {
            Some(rest) => path = rest,
            None => return path.to_string(),
        }
    }
}

fn components(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|component| !component.is_empty() && *component != ".")
        .collect()
}

/// `to` relative to the directory `from`, both relative to the same root
pub fn relative_path(from: &str, to: &str) -> String {
    let from = components(from);
    let to = components(to);
    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();

    let parts: Vec<&str> = std::iter::repeat("..")
        .take(from.len() - common)
        .chain(to[common..].iter().copied())
        .collect();

    if parts.is_empty() {
        return ".".to_string();
    }
    parts.join("/")
}

fn parent_directory(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// `ref("scripts/build.sh")` or `ref(block)` where the block has a `path` attribute
pub(super) fn ref_function(output_path: &str, args: Vec<MarkedValue>) -> Result<MarkedValue, FuncError> {
    let [target] = args.as_slice() else {
        return Err(FuncError::Arity {
            name: "ref".to_string(),
            expected: 1,
            got: args.len(),
        });
    };

    let target = match &target.kind {
        ValueKind::String(path) => path.as_str(),
        ValueKind::Object(entries) => entries
            .get("path")
            .and_then(MarkedValue::as_str)
            .ok_or_else(|| {
                FuncError::Message("ref: the referenced object has no string attribute path".to_string())
            })?,
        _ => {
            return Err(FuncError::Type {
                name: "ref",
                expected: "string or object with a path",
                got: target.type_name(),
            })
        }
    };

    Ok(MarkedValue::from(relative_path(
        parent_directory(output_path),
        &sanitize_gen_path(target),
    )))
}
