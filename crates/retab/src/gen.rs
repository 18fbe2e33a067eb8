//! gen blocks: turning evaluated blocks into documents
//!
//! ```hcl
//! gen "ci" {
//!   path   = ".github/workflows/ci.yaml"
//!   schema = "schemas/github-workflow.json"
//!   data   = { ... }
//! }
//! ```
//!
//! After evaluation every complete gen block becomes a [GenBlockResult]. Documents with a `schema` are
//! validated, each violation is reported at the expression that produced the offending value.
use crate::context::{Meta, NodeId};
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::engine::{Evaluator, GEN_BLOCK};
use crate::encode::encode;
use crate::schema::{location, SchemaLoader};
use crate::source::{SourceFile, SourceRange};
use crate::value::Value;
use hcl_edit::expr::Expression;
use std::path::Path;

pub const GENERATED_HEADER: &str = "# code generated by retab. DO NOT EDIT.";

#[derive(Debug, Clone, PartialEq)]
pub struct GenBlockResult {
    /// the gen block's label
    pub name: String,
    pub schema: Option<String>,
    /// output path relative to the output directory
    pub path: String,
    pub ordered_output: Value,
    pub raw_output: serde_json::Value,
    /// file the gen block was declared in
    pub source: String,
    pub diagnostics: Diagnostics,
}

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("unsupported output format {0:?}, use .yaml, .yml or .json")]
    UnsupportedFormat(String),
    #[error("unable to encode yaml")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unable to encode json")]
    Json(#[from] serde_json::Error),
}

impl GenBlockResult {
    /// Serialize by output path extension
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let extension = Path::new(&self.path)
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or_default();

        match extension {
            "yaml" | "yml" => {
                let body = serde_yaml::to_string(&self.ordered_output)?;
                Ok(format!("{GENERATED_HEADER}\n# source: {}\n{body}", self.source).into_bytes())
            }
            "json" => {
                let mut body = serde_json::to_vec_pretty(&self.ordered_output)?;
                body.push(b'\n');
                Ok(body)
            }
            other => Err(EncodeError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Collect the results of all gen blocks, in file and declaration order
#[tracing::instrument(level = "debug", skip_all)]
pub fn evaluate_gen_blocks(
    evaluator: &Evaluator<'_>,
    loader: &dyn SchemaLoader,
) -> (Vec<GenBlockResult>, Diagnostics) {
    let tree = evaluator.tree();
    let mut diags = Diagnostics::default();
    let mut blocks: Vec<(&SourceFile, NodeId)> = vec![];

    for file in evaluator.files().files() {
        let Some(file_node) = evaluator.file_node(file.name()) else {
            continue;
        };

        match tree.blocks_of_type(file_node, GEN_BLOCK) {
            Ok(found) => {
                let mut found: Vec<_> = found.into_iter().map(|id| (file, id)).collect();
                found.sort_by(|(_, a), (_, b)| {
                    tree.get(*a)
                        .meta
                        .range()
                        .cmp_position(tree.get(*b).meta.range())
                });
                blocks.extend(found);
            }
            Err(err) => diags.push(Diagnostic::structural(
                "invalid gen block",
                err.to_string(),
                SourceRange::file_start(file.shared_name()),
            )),
        }
    }

    if blocks.is_empty() {
        diags.push(Diagnostic::warning(
            DiagnosticKind::Structural,
            "missing gen block",
            "no gen block found in any file, nothing will be generated",
            None,
        ));
        return (vec![], diags);
    }

    let mut results = vec![];
    for (file, id) in blocks {
        match evaluate_gen_block(evaluator, file, id, loader) {
            Ok(Some(result)) => {
                diags.extend(result.diagnostics.clone());
                results.push(result);
            }
            Ok(None) => {}
            Err(errors) => diags.extend(errors),
        }
    }

    (results, diags)
}

fn evaluate_gen_block(
    evaluator: &Evaluator<'_>,
    file: &SourceFile,
    id: NodeId,
    loader: &dyn SchemaLoader,
) -> Result<Option<GenBlockResult>, Diagnostics> {
    let tree = evaluator.tree();
    let (block, output_path) = match &tree.get(id).meta {
        Meta::GenBlock { block, output_path } => (block, output_path),
        // evaluation already reported why
        Meta::Incomplete(_) => return Ok(None),
        meta => {
            return Err(Diagnostic::structural(
                "invalid gen block",
                "gen must be a block",
                meta.range().clone(),
            )
            .into())
        }
    };

    let name = match block.labels.as_slice() {
        [name] => name.clone(),
        [] => {
            return Err(Diagnostic::structural(
                "missing block label",
                "a gen block needs exactly one label",
                block.ident_range.clone(),
            )
            .into())
        }
        _ => {
            return Err(Diagnostic::structural(
                "too many block labels",
                "a gen block needs exactly one label",
                block.ident_range.clone(),
            )
            .into())
        }
    };

    let Some(data_node) = tree.child(id, "data") else {
        return Err(Diagnostic::structural(
            "missing attribute",
            "a gen block must have a data attribute",
            block.ident_range.clone(),
        )
        .into());
    };

    let data = tree.to_value(data_node);
    if let Some(incomplete) = data.find_incomplete() {
        let origin = incomplete
            .first_range()
            .map(ToString::to_string)
            .unwrap_or_default();
        return Err(Diagnostic::incomplete(
            format!("data of gen {name} reads the block at {origin} before it was fully evaluated"),
            block.ident_range.clone(),
        )
        .into());
    }

    let ordered_output = encode(&data);
    let raw_output = serde_json::to_value(&ordered_output).map_err(|err| {
        Diagnostics::from(Diagnostic::structural(
            "unable to encode data",
            err.to_string(),
            block.ident_range.clone(),
        ))
    })?;

    let schema = evaluator.string_attribute(id, "schema");
    let mut diagnostics = Diagnostics::default();
    if let Some(reference) = &schema {
        let schema_range = tree
            .child(id, "schema")
            .map(|schema| tree.get(schema).meta.range().clone());

        match loader.load_schema(reference) {
            Err(err) => diagnostics.push(Diagnostic::error(
                DiagnosticKind::Schema,
                "unable to load schema",
                format!("{err}"),
                schema_range,
            )),
            Ok(validator) => {
                if let Some(error) = validator.validate(&raw_output) {
                    let data_expr = data_expression(evaluator, &block.range);
                    for leaf in error.leaves() {
                        let subjects = data_expr
                            .map(|(data_file, expr)| {
                                location::instance_location_ranges(
                                    &leaf.instance_location,
                                    &leaf.message,
                                    expr,
                                    data_file,
                                    evaluator.files(),
                                )
                            })
                            .unwrap_or_default();

                        let pointer = display_pointer(&leaf.instance_location);
                        if subjects.is_empty() {
                            diagnostics.push(Diagnostic::error(
                                DiagnosticKind::Schema,
                                leaf.message.clone(),
                                format!("unable to find instance location {pointer}"),
                                None::<SourceRange>,
                            ));
                        }
                        for subject in subjects {
                            diagnostics.push(Diagnostic::error(
                                DiagnosticKind::Schema,
                                leaf.message.clone(),
                                format!("at {pointer}"),
                                Some(subject),
                            ));
                        }
                    }
                }
            }
        }
    }

    tracing::debug!(%name, path = %output_path, "generated document");
    Ok(Some(GenBlockResult {
        name,
        schema,
        path: output_path.clone(),
        ordered_output,
        raw_output,
        source: file.name().to_string(),
        diagnostics,
    }))
}

fn display_pointer(pointer: &str) -> &str {
    if pointer.is_empty() {
        "/"
    } else {
        pointer
    }
}

/// The `data` expression as written in the gen block declared at `range`
fn data_expression<'f>(
    evaluator: &Evaluator<'f>,
    range: &SourceRange,
) -> Option<(&'f SourceFile, &'f Expression)> {
    let (file, block) = evaluator.files().find_block(range)?;
    let data = block
        .body
        .attributes()
        .find(|attribute| attribute.key.as_str() == "data")?;
    Some((file, &data.value))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::body_builder;
    use crate::schema::{JsonSchema, Schema, SchemaError};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct StaticSchema(serde_json::Value);

    impl SchemaLoader for StaticSchema {
        fn load_schema(&self, _reference: &str) -> Result<Box<dyn Schema>, SchemaError> {
            Ok(Box::new(JsonSchema::new(&self.0)?))
        }
    }

    fn generate(
        files: &crate::source::BodyBuilder,
        schema: serde_json::Value,
    ) -> (Vec<GenBlockResult>, Diagnostics) {
        let mut evaluator = Evaluator::new(files, &IndexMap::new());
        let diags = evaluator.run();
        assert!(!diags.has_errors(), "{diags}");
        evaluate_gen_blocks(&evaluator, &StaticSchema(schema))
    }

    #[test]
    fn produces_ordered_documents() {
        let files = body_builder!(
            r#"
            gen "ci" {
              path = "./out/ci.yaml"
              data = {
                zeta = 1
                alpha = [for n in ["x", "y"]: upper(n)]
              }
            }
            "#
        );

        let (results, diags) = generate(&files, json!(true));
        assert!(diags.is_empty(), "{diags}");

        let result = &results[0];
        assert_eq!(result.name, "ci");
        assert_eq!(result.path, "out/ci.yaml");
        assert_eq!(result.ordered_output.keys(), vec!["zeta", "alpha"]);
        assert_eq!(result.raw_output, json!({"zeta": 1, "alpha": ["X", "Y"]}));
        assert_eq!(
            String::from_utf8(result.encode().unwrap()).unwrap(),
            "# code generated by retab. DO NOT EDIT.\n# source: main.retab\nzeta: 1\nalpha:\n- X\n- Y\n"
        );
    }

    #[test]
    fn schema_errors_point_at_the_source() {
        let files = body_builder!(
            r#"
gen "ci" {
  path = "ci.json"
  schema = "schema.json"
  data = {
    name = 42
  }
}
"#
        );

        let (results, diags) = generate(
            &files,
            json!({"properties": {"name": {"type": "string"}}}),
        );

        assert_eq!(results.len(), 1);
        let errors: Vec<_> = diags.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::Schema);
        let subject = errors[0].subject.as_ref().unwrap();
        assert_eq!((subject.start.line, subject.start.column), (6, 12));
    }

    #[test]
    fn gen_blocks_need_one_label() {
        let files = body_builder!("gen {\n path = \"a.yaml\"\n data = {}\n}");
        let (results, diags) = generate(&files, json!(true));

        assert!(results.is_empty());
        assert_eq!(diags.iter().next().unwrap().summary, "missing block label");
    }

    #[test]
    fn missing_gen_blocks_warn() {
        let files = body_builder!("a = 1");
        let (results, diags) = generate(&files, json!(true));

        assert!(results.is_empty());
        assert!(!diags.has_errors());
        assert_eq!(diags.iter().next().unwrap().summary, "missing gen block");
    }

    #[test]
    fn unsupported_extensions_fail_to_encode() {
        let result = GenBlockResult {
            name: "x".to_string(),
            schema: None,
            path: "x.toml".to_string(),
            ordered_output: Value::Null,
            raw_output: serde_json::Value::Null,
            source: "main.retab".to_string(),
            diagnostics: Diagnostics::default(),
        };

        assert!(matches!(
            result.encode(),
            Err(EncodeError::UnsupportedFormat(extension)) if extension == "toml"
        ));
    }
}
