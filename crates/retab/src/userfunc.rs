//! `func` blocks
//!
//! ```hcl
//! func "greet" {
//!   params         = [name]
//!   variadic_param = rest
//!   result         = "hello ${name}"
//! }
//! ```
//!
//! A decoded [UserFunction] keeps its `result` expression. Calls evaluate it through the engine with the
//! parameters bound as variables.
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::source::{SourceFile, SourceRange};
use hcl_edit::expr::Expression;
use hcl_edit::structure::{Block, Body};
use indexmap::IndexMap;
use std::rc::Rc;
use std::sync::Arc;

pub const FUNC_BLOCK: &str = "func";

#[derive(Debug)]
pub struct UserFunction {
    pub name: String,
    pub params: Vec<String>,
    pub variadic_param: Option<String>,
    pub result: Expression,
    pub file: Arc<str>,
    pub range: SourceRange,
}

impl UserFunction {
    pub fn decode(block: &Block, file: &SourceFile) -> Result<Self, Diagnostics> {
        let range = file.range_of(&block.ident);
        let mut diags = Diagnostics::default();

        let name = match block.labels.as_slice() {
            [name] => name.as_str().to_string(),
            [] => {
                diags.push(Diagnostic::structural(
                    "missing block label",
                    "a func block needs exactly one label, the function name",
                    range.clone(),
                ));
                String::new()
            }
            _ => {
                diags.push(Diagnostic::structural(
                    "too many block labels",
                    "a func block needs exactly one label, the function name",
                    range.clone(),
                ));
                String::new()
            }
        };

        let mut params = vec![];
        match attribute(&block.body, "params") {
            Some(Expression::Array(array)) => {
                for element in array.iter() {
                    match element {
                        Expression::Variable(variable) => params.push(variable.as_str().to_string()),
                        other => diags.push(Diagnostic::structural(
                            "Invalid param element",
                            "each function parameter must be a bare identifier",
                            file.range_of(other),
                        )),
                    }
                }
            }
            Some(other) => diags.push(Diagnostic::structural(
                "Invalid params",
                "params must be a list of bare identifiers",
                file.range_of(other),
            )),
            None => diags.push(missing_attribute("params", &range)),
        }

        let variadic_param = match attribute(&block.body, "variadic_param") {
            Some(Expression::Variable(variable)) => Some(variable.as_str().to_string()),
            Some(other) => {
                diags.push(Diagnostic::structural(
                    "Invalid variadic_param",
                    "the variadic parameter must be a bare identifier",
                    file.range_of(other),
                ));
                None
            }
            None => None,
        };

        let result = attribute(&block.body, "result").cloned();
        if result.is_none() {
            diags.push(missing_attribute("result", &range));
        }

        match result {
            Some(result) if !diags.has_errors() => Ok(Self {
                name,
                params,
                variadic_param,
                result,
                file: file.shared_name(),
                range,
            }),
            _ => Err(diags),
        }
    }
}

fn attribute<'b>(body: &'b Body, key: &str) -> Option<&'b Expression> {
    body.attributes()
        .find(|attribute| attribute.key.as_str() == key)
        .map(|attribute| &attribute.value)
}

fn missing_attribute(key: &str, range: &SourceRange) -> Diagnostic {
    Diagnostic::structural(
        "missing attribute",
        format!("a func block must have a {key} attribute"),
        range.clone(),
    )
}

/// Decode every `func` block that is a direct child of `body`
#[tracing::instrument(level = "trace", skip_all, fields(file = file.name()))]
pub fn decode_user_functions(
    body: &Body,
    file: &SourceFile,
) -> (IndexMap<String, Rc<UserFunction>>, Diagnostics) {
    let mut functions = IndexMap::new();
    let mut diags = Diagnostics::default();

    for block in body
        .blocks()
        .filter(|block| block.ident.as_str() == FUNC_BLOCK)
    {
        match UserFunction::decode(block, file) {
            Ok(function) => {
                tracing::trace!(name = %function.name, "decoded user function");
                functions.insert(function.name.clone(), Rc::new(function));
            }
            Err(errors) => diags.extend(errors),
        }
    }

    (functions, diags)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::body_builder;
    use pretty_assertions::assert_eq;

    fn decode(source: &str) -> (IndexMap<String, Rc<UserFunction>>, Diagnostics) {
        let files = body_builder!(source);
        let file = files.file("main.retab").unwrap();
        decode_user_functions(file.body(), file)
    }

    #[test]
    fn decodes_params() {
        let (functions, diags) = decode(
            r#"
            func "greet" {
              params = [first, last]
              variadic_param = rest
              result = "${first} ${last}"
            }
            "#,
        );

        assert!(diags.is_empty());
        let greet = &functions["greet"];
        assert_eq!(greet.params, vec!["first", "last"]);
        assert_eq!(greet.variadic_param.as_deref(), Some("rest"));
    }

    #[test]
    fn params_must_be_identifiers() {
        let (functions, diags) = decode(
            r#"
            func "broken" {
              params = ["first"]
              result = 1
            }
            "#,
        );

        assert!(functions.is_empty());
        assert_eq!(diags.iter().next().unwrap().summary, "Invalid param element");
        assert!(diags.is_structural());
    }

    #[test]
    fn result_is_required() {
        let (_, diags) = decode("func \"empty\" {\n params = []\n}");
        assert_eq!(diags.iter().next().unwrap().summary, "missing attribute");
    }
}
