use hcl::{Expression, Identifier, Traversal, TraversalOperator};

pub(crate) trait TraversalExt {
    fn get_longest_path(&self) -> Vec<Identifier>;
}

impl TraversalExt for Traversal {
    /// The variable name followed by all leading attribute accesses
    ///
    /// `step.checkout.with[0].name` yields `[step, checkout, with]`.
    fn get_longest_path(&self) -> Vec<Identifier> {
        let Expression::Variable(var) = &self.expr else {
            return vec![];
        };

        let mut path = vec![Identifier::unchecked(var.as_str())];
        for operator in &self.operators {
            let TraversalOperator::GetAttr(ident) = operator else {
                break;
            };

            path.push(ident.clone());
        }

        path
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn longest_path_stops_at_index() {
        let traversal = Traversal::builder(hcl::Variable::unchecked("one"))
            .attr("two")
            .index(0u64)
            .attr("three")
            .build();

        let path: Vec<String> = traversal
            .get_longest_path()
            .into_iter()
            .map(|ident| ident.to_string())
            .collect();
        assert_eq!(path, vec!["one", "two"]);
    }

    #[test]
    fn longest_path_needs_a_variable() {
        let traversal = Traversal::builder(Expression::from("literal"))
            .attr("two")
            .build();

        assert!(traversal.get_longest_path().is_empty());
    }
}
