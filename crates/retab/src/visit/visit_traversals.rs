use super::VisitMut;
use hcl::{
    template::{Directive, Element},
    Expression, Operation, Template, TemplateExpr, Traversal, TraversalOperator,
};

/// Recursively visit all [hcl::Traversal]s mutably
///
/// Bare variables are presented as traversals without operators.
pub trait VisitTraversalsMut {
    fn visit_traversals_mut(&mut self, visitor: &mut dyn VisitMut<Traversal>);
}

impl VisitTraversalsMut for Expression {
    fn visit_traversals_mut(&mut self, visitor: &mut dyn VisitMut<Traversal>) {
        match self {
            Expression::Variable(variable) => {
                let mut traversal = Traversal::new(
                    Expression::Variable(variable.clone()),
                    Vec::<TraversalOperator>::new(),
                );
                visitor.visit_mut(&mut traversal);
                match traversal.expr {
                    Expression::Variable(new_variable) if traversal.operators.is_empty() => {
                        *variable = new_variable
                    }
                    expr => *self = Expression::Traversal(Box::new(Traversal::new(expr, traversal.operators))),
                }
            }
            Expression::Traversal(traversal) => {
                visitor.visit_mut(traversal);
                if !matches!(traversal.expr, Expression::Variable(_)) {
                    traversal.expr.visit_traversals_mut(visitor);
                }
                for operator in &mut traversal.operators {
                    if let TraversalOperator::Index(index) = operator {
                        index.visit_traversals_mut(visitor);
                    }
                }
            }
            Expression::Array(array) => {
                for expr in array {
                    expr.visit_traversals_mut(visitor);
                }
            }
            Expression::Object(object) => {
                for value in object.values_mut() {
                    value.visit_traversals_mut(visitor);
                }
            }
            Expression::TemplateExpr(template_expr) => {
                let Ok(mut template) = Template::from_expr(template_expr) else {
                    return;
                };
                let original = template.clone();
                template.visit_traversals_mut(visitor);
                if template != original {
                    *template_expr = Box::new(TemplateExpr::QuotedString(template.to_string()));
                }
            }
            Expression::FuncCall(call) => {
                for arg in &mut call.args {
                    arg.visit_traversals_mut(visitor);
                }
            }
            Expression::Parenthesis(expr) => {
                expr.visit_traversals_mut(visitor);
            }
            Expression::Conditional(cond) => {
                cond.cond_expr.visit_traversals_mut(visitor);
                cond.true_expr.visit_traversals_mut(visitor);
                cond.false_expr.visit_traversals_mut(visitor);
            }
            Expression::Operation(operation) => match operation.as_mut() {
                Operation::Binary(binop) => {
                    binop.rhs_expr.visit_traversals_mut(visitor);
                    binop.lhs_expr.visit_traversals_mut(visitor);
                }
                Operation::Unary(unop) => {
                    unop.expr.visit_traversals_mut(visitor);
                }
            },
            Expression::ForExpr(forexpr) => {
                forexpr
                    .cond_expr
                    .iter_mut()
                    .for_each(|e| e.visit_traversals_mut(visitor));
                forexpr
                    .key_expr
                    .iter_mut()
                    .for_each(|e| e.visit_traversals_mut(visitor));
                forexpr.value_expr.visit_traversals_mut(visitor);
                forexpr.collection_expr.visit_traversals_mut(visitor);
            }
            _ => {}
        }
    }
}

impl VisitTraversalsMut for Template {
    fn visit_traversals_mut(&mut self, visitor: &mut dyn VisitMut<Traversal>) {
        for element in self.elements_mut() {
            match element {
                Element::Interpolation(interpolation) => {
                    interpolation.expr.visit_traversals_mut(visitor);
                }
                Element::Directive(directive) => match directive {
                    Directive::If(ifdir) => {
                        ifdir.cond_expr.visit_traversals_mut(visitor);
                        ifdir.true_template.visit_traversals_mut(visitor);
                        ifdir
                            .false_template
                            .iter_mut()
                            .for_each(|t| t.visit_traversals_mut(visitor));
                    }
                    Directive::For(fordir) => {
                        fordir.template.visit_traversals_mut(visitor);
                        fordir.collection_expr.visit_traversals_mut(visitor);
                    }
                },
                Element::Literal(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::TraversalExt;
    use pretty_assertions::assert_eq;

    fn roots(source: &str) -> Vec<String> {
        let parsed: hcl_edit::expr::Expression = source.parse().unwrap();
        let mut expr = Expression::from(parsed);
        let mut roots = vec![];
        expr.visit_traversals_mut(&mut |traversal: &mut Traversal| {
            let path: Vec<String> = traversal
                .get_longest_path()
                .iter()
                .map(|ident| ident.to_string())
                .collect();
            roots.push(path.join("."));
        });
        roots
    }

    #[test]
    fn finds_traversals_everywhere() {
        assert_eq!(
            roots(r#"a.b > 1 ? "${c.d}" : [e, upper(f.g)]"#),
            vec!["a.b", "c.d", "e", "f.g"]
        );
    }

    #[test]
    fn finds_traversals_in_index_expressions() {
        assert_eq!(roots("list[index.value]"), vec!["list", "index.value"]);
    }
}
