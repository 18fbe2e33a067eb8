//! map JSON pointers into generated documents back to source ranges
//!
//! The pointer is followed through the `data` expression of a gen block: object keys, list indices,
//! parentheses and references to blocks declared in any file. When the path leaves what can be followed
//! statically (function calls, `for` expressions, conditionals) the expression reached so far is reported.
//!
//! The final segment points at the value, except for `additionalProperties` violations where the offending
//! key is named by the error message and the key itself is reported.
use crate::source::{BodyBuilder, SourceFile, SourceRange};
use crate::util::TraversalExt;
use hcl::eval::Evaluate;
use hcl_edit::expr::{Expression, ObjectKey};
use hcl_edit::structure::Body;
use std::sync::LazyLock;

/// Decode a JSON pointer (`/steps/0/with~1args`) into its segments
pub fn pointer_segments(pointer: &str) -> Vec<String> {
    if pointer.is_empty() || pointer == "/" {
        return vec![];
    }

    pointer
        .trim_start_matches('/')
        .split('/')
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect()
}

static ADDITIONAL_PROPERTIES: LazyLock<Vec<regex::Regex>> = LazyLock::new(|| {
    [
        r"additionalProperties '(.*)' not allowed",
        r"\(('.*') (?:was|were) unexpected\)",
    ]
    .into_iter()
    .filter_map(|pattern| regex::Regex::new(pattern).ok())
    .collect()
});

static QUOTED: LazyLock<Option<regex::Regex>> = LazyLock::new(|| regex::Regex::new(r"'([^']*)'").ok());

/// The properties named by an `additionalProperties` error message
fn additional_properties(message: &str) -> Vec<String> {
    let Some(named) = ADDITIONAL_PROPERTIES
        .iter()
        .find_map(|pattern| pattern.captures(message)?.get(1))
    else {
        return vec![];
    };

    match QUOTED.as_ref() {
        Some(quoted) if named.as_str().starts_with('\'') => quoted
            .captures_iter(named.as_str())
            .filter_map(|property| property.get(1))
            .map(|property| property.as_str().to_string())
            .collect(),
        _ => vec![named.as_str().to_string()],
    }
}

/// Source ranges for a schema violation, one per offending property of `additionalProperties` errors
///
/// Empty when the pointer leads nowhere.
pub fn instance_location_ranges(
    pointer: &str,
    message: &str,
    expr: &Expression,
    file: &SourceFile,
    files: &BodyBuilder,
) -> Vec<SourceRange> {
    let segments = pointer_segments(pointer);
    let properties = additional_properties(message);
    if properties.is_empty() {
        return Locator::new(files, false)
            .walk(&segments, expr, file)
            .into_iter()
            .collect();
    }

    let locator = Locator::new(files, true);
    let mut ranges: Vec<SourceRange> = properties
        .into_iter()
        .filter_map(|property| {
            let mut segments = segments.clone();
            segments.push(property);
            locator.walk(&segments, expr, file)
        })
        .collect();
    ranges.dedup();
    ranges
}

#[derive(derive_new::new)]
struct Locator<'f> {
    files: &'f BodyBuilder,
    point_at_key: bool,
}

impl<'f> Locator<'f> {
    fn walk(&self, segments: &[String], expr: &Expression, file: &SourceFile) -> Option<SourceRange> {
        let Some((segment, rest)) = segments.split_first() else {
            return Some(file.range_of(expr));
        };

        match expr {
            Expression::Parenthesis(parenthesis) => self.walk(segments, parenthesis.inner(), file),
            Expression::Object(object) => {
                for (key, value) in object.iter() {
                    if key_name(key).as_deref() != Some(segment.as_str()) {
                        continue;
                    }

                    if rest.is_empty() && self.point_at_key {
                        return Some(match key {
                            ObjectKey::Ident(ident) => file.range_of(ident),
                            ObjectKey::Expression(key) => file.range_of(key),
                        });
                    }
                    return self.walk(rest, value.expr(), file);
                }
                Some(file.range_of(expr))
            }
            Expression::Array(array) => {
                let elements: Vec<&Expression> = array.iter().collect();
                match segment.parse::<usize>() {
                    Ok(index) => self.walk(rest, elements.get(index)?, file),
                    Err(_) => self.walk(segments, elements.first()?, file),
                }
            }
            Expression::Variable(_) | Expression::Traversal(_) => self
                .walk_reference(segments, expr)
                .or_else(|| Some(file.range_of(expr))),
            _ => Some(file.range_of(expr)),
        }
    }

    /// Continue in the block a reference like `step.checkout` points to
    fn walk_reference(&self, segments: &[String], expr: &Expression) -> Option<SourceRange> {
        let path: Vec<String> = match hcl::Expression::from(expr.clone()) {
            hcl::Expression::Variable(variable) => vec![variable.to_string()],
            hcl::Expression::Traversal(traversal) => traversal
                .get_longest_path()
                .into_iter()
                .map(|ident| ident.to_string())
                .collect(),
            _ => return None,
        };
        let (block_type, labels_and_keys) = path.split_first()?;

        for (block_file, block) in self.files.blocks_of_type(block_type) {
            let labels: Vec<&str> = block.labels.iter().map(|label| label.as_str()).collect();
            let matches = labels.len() <= labels_and_keys.len()
                && labels
                    .iter()
                    .zip(labels_and_keys)
                    .all(|(label, segment)| *label == segment.as_str());
            if !matches {
                continue;
            }

            let remaining: Vec<String> = labels_and_keys[labels.len()..]
                .iter()
                .chain(segments)
                .cloned()
                .collect();
            return self.walk_body(&remaining, &block.body, block_file, block);
        }

        None
    }

    fn walk_body(
        &self,
        segments: &[String],
        body: &Body,
        file: &SourceFile,
        block: &impl hcl_edit::Span,
    ) -> Option<SourceRange> {
        let Some((segment, rest)) = segments.split_first() else {
            return file.range(block.span());
        };

        if let Some(attribute) = body
            .attributes()
            .find(|attribute| attribute.key.as_str() == segment)
        {
            if rest.is_empty() && self.point_at_key {
                return Some(file.range_of(&attribute.key));
            }
            return self.walk(rest, &attribute.value, file);
        }

        // nested blocks: `segment` is the block type, labels follow
        for nested in body.blocks().filter(|nested| nested.ident.as_str() == segment) {
            let labels: Vec<&str> = nested.labels.iter().map(|label| label.as_str()).collect();
            let matches = labels.len() <= rest.len()
                && labels.iter().zip(rest).all(|(label, segment)| *label == segment.as_str());
            if matches {
                return self.walk_body(&rest[labels.len()..], &nested.body, file, nested);
            }
        }

        file.range(block.span())
    }
}

/// Static name of an object key, evaluating simple key expressions like `"quoted"`
fn key_name(key: &ObjectKey) -> Option<String> {
    match key {
        ObjectKey::Ident(ident) => Some(ident.as_str().to_string()),
        ObjectKey::Expression(expr) => {
            match hcl::Expression::from(expr.clone()).evaluate(&hcl::eval::Context::new()) {
                Ok(hcl::Value::String(name)) => Some(name),
                Ok(hcl::Value::Number(number)) => Some(number.to_string()),
                _ => None,
            }
        }
    }
}
