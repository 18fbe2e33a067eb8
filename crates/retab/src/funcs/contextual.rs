//! functions reading the evaluation state: `allof`, `alloflist`/`allofarray`, `file` and `self`
use super::FuncError;
use crate::context::NodeId;
use crate::engine::{Evaluator, Scope};
use crate::marks::{MarkedValue, ValueKind};
use crate::source::sanitize_file_name;
use indexmap::IndexMap;

/// Optional second and later arguments of `allof`
///
/// ```hcl
/// allof("step", { key = ["with", "image"], regex = "^alpine" })
/// ```
#[derive(Debug)]
struct BlockFilter {
    key: Vec<String>,
    pattern: regex::Regex,
}

impl BlockFilter {
    fn parse(value: &MarkedValue) -> Result<Self, FuncError> {
        let invalid = || {
            FuncError::Message(
                "allof: a filter must be an object with key (list of strings) and regex (string)"
                    .to_string(),
            )
        };

        let entries = value.as_object().ok_or_else(invalid)?;
        let key = entries
            .get("key")
            .and_then(MarkedValue::as_array)
            .ok_or_else(invalid)?
            .iter()
            .map(|segment| segment.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?;
        let pattern = entries
            .get("regex")
            .and_then(MarkedValue::as_str)
            .ok_or_else(invalid)?;
        let pattern = regex::Regex::new(pattern)
            .map_err(|err| FuncError::Message(format!("allof: invalid regex: {err}")))?;

        Ok(Self { key, pattern })
    }

    fn matches(&self, block: &MarkedValue) -> bool {
        let mut current = block;
        for segment in &self.key {
            match current.as_object().and_then(|entries| entries.get(segment)) {
                Some(next) => current = next,
                None => return false,
            }
        }

        match &current.kind {
            ValueKind::String(string) => self.pattern.is_match(string),
            ValueKind::Number(number) => self.pattern.is_match(&number.to_string()),
            ValueKind::Bool(bool) => self.pattern.is_match(&bool.to_string()),
            _ => false,
        }
    }
}

impl Evaluator<'_> {
    pub(crate) fn call_contextual(
        &mut self,
        name: &str,
        args: Vec<MarkedValue>,
        parent: NodeId,
        scope: &Scope<'_>,
    ) -> Result<MarkedValue, FuncError> {
        match name {
            "allof" => self.allof(args, scope).map(MarkedValue::object),
            "alloflist" | "allofarray" => self
                .allof(args, scope)
                .map(|blocks| MarkedValue::array(blocks.into_values().collect())),
            "file" => self.file_function(args),
            "self" => self.self_function(args, parent),
            _ => Err(FuncError::Unknown(name.to_string())),
        }
    }

    /// All blocks of one type in the current file, keyed by their last label
    fn allof(
        &self,
        args: Vec<MarkedValue>,
        scope: &Scope<'_>,
    ) -> Result<IndexMap<String, MarkedValue>, FuncError> {
        let Some((block_type, filters)) = args.split_first() else {
            return Err(FuncError::Arity {
                name: "allof".to_string(),
                expected: 1,
                got: 0,
            });
        };
        let block_type = block_type.as_str().ok_or(FuncError::Type {
            name: "allof",
            expected: "string",
            got: block_type.type_name(),
        })?;
        let filters = filters
            .iter()
            .map(BlockFilter::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let file = scope.file.name();
        let file_node = self
            .file_node(file)
            .ok_or_else(|| FuncError::Message(format!("file {file} not found")))?;
        let blocks = self
            .tree
            .blocks_of_type(file_node, block_type)
            .map_err(|err| FuncError::Message(err.to_string()))?;

        if blocks.is_empty() {
            return Err(FuncError::Message(format!("block {block_type} not found")));
        }

        let mut result = IndexMap::new();
        for block in blocks {
            let node = self.tree.get(block);
            if node.meta.is_incomplete() {
                return Err(FuncError::Incomplete(format!(
                    "the block {} is not complete",
                    self.tree.path(block).join(".")
                )));
            }

            let value = self.tree.to_value_with_extra_context(block, file);
            if !filters.iter().all(|filter| filter.matches(&value)) {
                continue;
            }

            let key = node
                .meta
                .block()
                .and_then(|info| info.labels.last().cloned())
                .unwrap_or_else(|| node.key.clone());
            result.insert(key, value);
        }

        Ok(result)
    }

    /// `file("ci")`: everything declared in `ci.retab`
    fn file_function(&self, args: Vec<MarkedValue>) -> Result<MarkedValue, FuncError> {
        let [name] = args.as_slice() else {
            return Err(FuncError::Arity {
                name: "file".to_string(),
                expected: 1,
                got: args.len(),
            });
        };
        let name = name.as_str().ok_or(FuncError::Type {
            name: "file",
            expected: "string",
            got: name.type_name(),
        })?;

        let name = sanitize_file_name(name);
        let Some(node) = self.file_node(&name) else {
            let known: Vec<&str> = self.files.file_names().collect();
            return Err(FuncError::Message(format!(
                "file {name} not found, known files: {}",
                known.join(", ")
            )));
        };

        if self.tree.get(node).meta.is_incomplete() {
            return Err(FuncError::Incomplete(format!(
                "the file {name} is not complete"
            )));
        }

        Ok(self.tree.to_value_with_extra_context(node, &name))
    }

    /// `self()` is the enclosing block, `self(-1)` the one around it and so on
    fn self_function(&self, args: Vec<MarkedValue>, parent: NodeId) -> Result<MarkedValue, FuncError> {
        let levels = match args.as_slice() {
            [] => 0,
            [level] => {
                let level = level
                    .as_number()
                    .and_then(hcl::Number::as_i64)
                    .ok_or(FuncError::Type {
                        name: "self",
                        expected: "integer",
                        got: level.type_name(),
                    })?;
                if level > 0 {
                    return Err(FuncError::Message(format!(
                        "self: the level must be 0 or negative, got {level}"
                    )));
                }
                level.unsigned_abs() as usize
            }
            _ => {
                return Err(FuncError::Arity {
                    name: "self".to_string(),
                    expected: 1,
                    got: args.len(),
                })
            }
        };

        let Some(ancestor) = self.tree.ancestor(parent, levels) else {
            return Ok(MarkedValue::null());
        };
        let file = self
            .tree
            .path(ancestor)
            .get(1)
            .map(|file| file.to_string())
            .unwrap_or_default();

        Ok(self
            .tree
            .to_value_with_extra_context(ancestor, &file)
            .into_resolved())
    }
}

#[cfg(test)]
mod test {
    use crate::body_builder;
    use crate::engine::Evaluator;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn evaluate(files: &crate::source::BodyBuilder, file: &str, attribute: &str) -> serde_json::Value {
        let mut evaluator = Evaluator::new(files, &IndexMap::new());
        let diags = evaluator.run();
        assert!(diags.is_empty(), "{diags}");

        let node = evaluator.file_node(file).unwrap();
        let node = evaluator.tree().child(node, attribute).unwrap();
        evaluator.tree().to_value(node).to_json()
    }

    #[test]
    fn allof_collects_blocks_by_label() {
        let files = body_builder!(
            r#"
            names = [for key, step in allof("step"): "${key}=${step.name}"]
            step "b" { name = "second" }
            step "a" { name = "first" }
            "#
        );

        assert_eq!(
            evaluate(&files, "main.retab", "names"),
            json!(["a=first", "b=second"])
        );
    }

    #[test]
    fn allof_filters() {
        let files = body_builder!(
            r#"
            images = [for job in alloflist("job", { key = ["image"], regex = "^alpine" }): job.label]
            job "one" { image = "alpine:3" }
            job "two" { image = "debian" }
            "#
        );

        assert_eq!(evaluate(&files, "main.retab", "images"), json!(["one"]));
    }

    #[test]
    fn file_reads_other_files() {
        let files = body_builder! {
            "a.retab" => r#"copied = file("b").value"#,
            "b.retab" => r#"value = "from b""#,
        };

        assert_eq!(evaluate(&files, "a.retab", "copied"), json!("from b"));
    }

    #[test]
    fn self_reads_enclosing_blocks() {
        let files = body_builder!(
            r#"
            job "build" {
              name = "build"
              run {
                title = "${self(-1).name}/${self().type}"
              }
            }
            "#
        );

        let mut evaluator = Evaluator::new(&files, &IndexMap::new());
        let diags = evaluator.run();
        assert!(diags.is_empty(), "{diags}");

        let node = evaluator.file_node("main.retab").unwrap();
        let title = evaluator
            .tree()
            .identify_child(node, &["job", "build", "run", "title"])
            .unwrap();
        assert_eq!(evaluator.tree().to_value(title).to_json(), json!("build/run"));
    }
}
