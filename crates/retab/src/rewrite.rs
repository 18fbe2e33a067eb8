//! function calls and `for` expressions
//!
//! hcl-rs evaluates expressions on plain values, which would lose the provenance of everything a function
//! or a `for` expression passes through. Both are therefore evaluated here, on [MarkedValue]s:
//!
//! - a call as the whole value of an attribute is dispatched directly ([Evaluator::evaluate_call])
//! - a `for` expression evaluates its body once per element with the loop variables in scope
//! - calls and `for` expressions nested inside other expressions (`"${upper(name)}"`, `a ? b(1) : c`) are
//!   evaluated first and replaced by placeholder variables before the remaining expression goes to hcl-rs
use crate::context::NodeId;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::engine::{Attr, Evaluator, Scope};
use crate::funcs::FuncError;
use crate::marks::{Mark, MarkedValue, ValueKind};
use crate::source::SourceRange;
use hcl_edit::expr::{Expression, ForExpr, FuncCall};
use hcl_edit::visit_mut::VisitMut;
use hcl_edit::{Decorated, Ident};
use indexmap::IndexMap;

const NESTED_PREFIX: &str = "____nested_";

impl<'a> Evaluator<'a> {
    /// Replace nested calls and `for` expressions inside `expr` by placeholder variables
    pub(crate) fn substitute_nested(
        &mut self,
        expr: &mut Expression,
        parent: NodeId,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<IndexMap<String, MarkedValue>, Diagnostics> {
        let mut nested = NestedEvaluations {
            evaluator: self,
            parent,
            scope,
            range,
            placeholders: IndexMap::new(),
            diags: Diagnostics::default(),
        };
        nested.visit_expr_mut(expr);

        if nested.diags.has_errors() {
            return Err(nested.diags);
        }
        Ok(nested.placeholders)
    }

    pub(crate) fn evaluate_call(
        &mut self,
        attr: &Attr<'_>,
        call: &FuncCall,
        parent: NodeId,
        scope: &Scope<'_>,
    ) -> Diagnostics {
        match self.call(call, parent, scope, &attr.range) {
            Ok(value) => self.commit(parent, &attr.name, value, &attr.range),
            Err(diags) => diags,
        }
    }

    fn call(
        &mut self,
        call: &FuncCall,
        parent: NodeId,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<MarkedValue, Diagnostics> {
        let name = call.ident.as_str();
        let args = self.evaluate_arguments(call, parent, scope, range)?;
        self.call_function(name, args, parent, scope, range)
            .map_err(|err| call_diagnostics(name, err, range))
    }

    /// Arguments in order, each marked with its own source range
    fn evaluate_arguments(
        &mut self,
        call: &FuncCall,
        parent: NodeId,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<Vec<MarkedValue>, Diagnostics> {
        let mut args = Vec::new();
        let mut diags = Diagnostics::default();

        for argument in call.args.iter() {
            let argument_range = scope.file.range_of(argument);
            match self.evaluate_value(argument, parent, scope, &argument_range) {
                Ok(value) => args.push(value.with_mark(Mark::Range(argument_range))),
                Err(errors) => diags.extend(errors),
            }
        }

        if diags.has_errors() {
            return Err(diags);
        }

        if let Some(incomplete) = args.iter().find_map(MarkedValue::find_incomplete) {
            let origin = incomplete
                .first_range()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(Diagnostic::incomplete(
                format!("{} reads the block at {origin} before it was fully evaluated", call.ident.as_str()),
                range.clone(),
            )
            .into());
        }

        if call.args.expand_final() {
            match args.pop().map(|last| last.kind) {
                Some(ValueKind::Array(items)) => args.extend(items),
                _ => {
                    return Err(Diagnostic::unresolved(
                        "invalid expanding argument",
                        "the final argument must be a list to be expanded with ...",
                        range.clone(),
                    )
                    .into())
                }
            }
        }

        Ok(args)
    }

    pub(crate) fn evaluate_for(
        &mut self,
        attr: &Attr<'_>,
        for_expr: &ForExpr,
        parent: NodeId,
        scope: &Scope<'_>,
    ) -> Diagnostics {
        match self.for_value(for_expr, parent, scope, &attr.range) {
            Ok(value) => self.commit(parent, &attr.name, value, &attr.range),
            Err(diags) => diags,
        }
    }

    fn for_value(
        &mut self,
        for_expr: &ForExpr,
        parent: NodeId,
        scope: &Scope<'_>,
        range: &SourceRange,
    ) -> Result<MarkedValue, Diagnostics> {
        let intro = &for_expr.intro;
        let collection_range = scope.file.range_of(&intro.collection_expr);
        let collection =
            self.evaluate_value(&intro.collection_expr, parent, scope, &collection_range)?;

        if collection.find_incomplete().is_some() {
            return Err(Diagnostic::incomplete(
                "the collection of this for expression is not fully evaluated yet",
                collection_range,
            )
            .into());
        }

        let type_name = collection.type_name();
        let elements: Vec<(MarkedValue, MarkedValue)> = match collection.kind {
            ValueKind::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (MarkedValue::from(index as i64), item))
                .collect(),
            ValueKind::Object(entries) => {
                let mut entries: Vec<_> = entries.into_iter().collect();
                entries.sort_by(|(a, _), (b, _)| a.cmp(b));
                entries
                    .into_iter()
                    .map(|(key, value)| (MarkedValue::from(key), value))
                    .collect()
            }
            _ => {
                return Err(Diagnostic::unresolved(
                    "invalid for expression",
                    format!("cannot iterate over a value of type {type_name}"),
                    collection_range,
                )
                .into())
            }
        };

        let value_range = scope.file.range_of(&for_expr.value_expr);
        let mut tuple = vec![];
        let mut object: IndexMap<String, MarkedValue> = IndexMap::new();
        let mut groups: IndexMap<String, Vec<MarkedValue>> = IndexMap::new();
        let mut diags = Diagnostics::default();

        for (key, value) in elements {
            let origin = value
                .first_range()
                .cloned()
                .unwrap_or_else(|| collection_range.clone());

            let mut iteration = scope.clone();
            if let Some(key_var) = &intro.key_var {
                iteration.variables.insert(key_var.as_str().to_string(), key);
            }
            iteration
                .variables
                .insert(intro.value_var.as_str().to_string(), value);

            if let Some(cond) = &for_expr.cond {
                let cond_range = scope.file.range_of(&cond.expr);
                match self.evaluate_value(&cond.expr, parent, &iteration, &cond_range) {
                    Ok(result) => match result.as_bool() {
                        Some(true) => {}
                        Some(false) => continue,
                        None => {
                            diags.push(Diagnostic::unresolved(
                                "invalid for condition",
                                format!("the condition must be a bool, got {}", result.type_name()),
                                cond_range,
                            ));
                            continue;
                        }
                    },
                    Err(errors) => {
                        diags.extend(errors);
                        continue;
                    }
                }
            }

            let item = match self.evaluate_value(&for_expr.value_expr, parent, &iteration, &value_range)
            {
                Ok(item) => item.with_mark(Mark::Range(origin)),
                Err(errors) => {
                    diags.extend(errors);
                    continue;
                }
            };

            let Some(key_expr) = &for_expr.key_expr else {
                tuple.push(item);
                continue;
            };

            let key_range = scope.file.range_of(key_expr);
            let key = match self.evaluate_value(key_expr, parent, &iteration, &key_range) {
                Ok(key) => match key.kind {
                    ValueKind::String(key) => key,
                    ValueKind::Number(number) => number.to_string(),
                    ValueKind::Bool(bool) => bool.to_string(),
                    _ => {
                        diags.push(Diagnostic::unresolved(
                            "invalid object key",
                            format!("object keys must be strings, got {}", key.type_name()),
                            key_range,
                        ));
                        continue;
                    }
                },
                Err(errors) => {
                    diags.extend(errors);
                    continue;
                }
            };

            if for_expr.grouping {
                groups.entry(key).or_default().push(item);
            } else if object.contains_key(&key) {
                diags.push(Diagnostic::unresolved(
                    "duplicate object key",
                    format!("the key {key:?} was already produced, use ... to group values"),
                    key_range,
                ));
            } else {
                object.insert(key, item);
            }
        }

        if diags.has_errors() {
            return Err(diags);
        }

        tracing::trace!(%range, "for expression evaluated");
        Ok(match (&for_expr.key_expr, for_expr.grouping) {
            (None, _) => MarkedValue::array(tuple),
            (Some(_), false) => MarkedValue::object(object),
            (Some(_), true) => MarkedValue::object(
                groups
                    .into_iter()
                    .map(|(key, items)| {
                        let origin: Vec<Mark> = items
                            .first()
                            .and_then(MarkedValue::first_range)
                            .map(|range| Mark::Range(range.clone()))
                            .into_iter()
                            .collect();
                        (key, MarkedValue::array(items).with_marks(origin))
                    })
                    .collect(),
            ),
        })
    }
}

fn call_diagnostics(name: &str, err: FuncError, range: &SourceRange) -> Diagnostics {
    match err {
        FuncError::Incomplete(detail) => Diagnostic::incomplete(detail, range.clone()).into(),
        FuncError::Unknown(_) => {
            Diagnostic::unresolved("unknown function", err.to_string(), range.clone()).into()
        }
        FuncError::Diagnostics(inner) => {
            let mut diags: Diagnostics = Diagnostic::unresolved(
                "error in function call",
                format!("{name} did not evaluate"),
                range.clone(),
            )
            .into();
            diags.extend(inner);
            diags
        }
        err => Diagnostic::unresolved(
            "error in function call",
            format!("{name}: {err}"),
            range.clone(),
        )
        .into(),
    }
}

struct NestedEvaluations<'e, 'a, 's> {
    evaluator: &'e mut Evaluator<'a>,
    parent: NodeId,
    scope: &'e Scope<'s>,
    range: &'e SourceRange,
    placeholders: IndexMap<String, MarkedValue>,
    diags: Diagnostics,
}

impl VisitMut for NestedEvaluations<'_, '_, '_> {
    fn visit_expr_mut(&mut self, expr: &mut Expression) {
        if !matches!(expr, Expression::FuncCall(_) | Expression::ForExpr(_)) {
            return hcl_edit::visit_mut::visit_expr_mut(self, expr);
        }

        let range = self.scope.file.range(hcl_edit::Span::span(&*expr));
        let range = range.as_ref().unwrap_or(self.range);
        match self
            .evaluator
            .evaluate_value(expr, self.parent, self.scope, range)
        {
            Ok(value) => {
                let name = format!("{NESTED_PREFIX}{}", self.placeholders.len());
                *expr = Expression::Variable(Decorated::new(Ident::new(name.clone())));
                self.placeholders.insert(name, value);
            }
            Err(diags) => self.diags.extend(diags),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::body_builder;
    use crate::engine::Evaluator;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn evaluate(source: &str, attribute: &str) -> serde_json::Value {
        let files = body_builder!(source);
        let mut evaluator = Evaluator::new(&files, &IndexMap::new());
        let diags = evaluator.run();
        assert!(diags.is_empty(), "{diags}");

        let node = evaluator.file_node("main.retab").unwrap();
        let node = evaluator.tree().child(node, attribute).unwrap();
        evaluator.tree().to_value(node).to_json()
    }

    #[test]
    fn for_over_list() {
        assert_eq!(
            evaluate("out = [for i, v in [\"a\", \"b\"]: \"${i}-${v}\"]", "out"),
            json!(["0-a", "1-b"])
        );
    }

    #[test]
    fn for_over_object_with_condition() {
        assert_eq!(
            evaluate(
                "out = { for k, v in { b = 2, a = 1, c = 3 }: upper(k) => v if v > 1 }",
                "out"
            ),
            json!({"B": 2, "C": 3})
        );
    }

    #[test]
    fn for_with_grouping() {
        assert_eq!(
            evaluate(
                "out = { for v in [\"ab\", \"ac\", \"b\"]: substr(v, 0, 1) => v... }",
                "out"
            ),
            json!({"a": ["ab", "ac"], "b": ["b"]})
        );
    }

    #[test]
    fn nested_calls_in_templates() {
        assert_eq!(
            evaluate(
                "name = \"world\"\nout = \"hello ${upper(name)}, ${length([for c in [1, 2]: c])}\"",
                "out"
            ),
            json!("hello WORLD, 2")
        );
    }

    #[test]
    fn expanded_arguments() {
        assert_eq!(
            evaluate("nums = [1, 5, 3]\nout = max(nums...)", "out"),
            json!(5)
        );
    }
}
