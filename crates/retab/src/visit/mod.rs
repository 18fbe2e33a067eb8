//! walking [hcl::Expression]s
//!
//! Used to find every variable an expression reads before it is handed to [hcl::eval].
mod visit_traversals;
pub use visit_traversals::VisitTraversalsMut;

pub trait VisitMut<T> {
    fn visit_mut(&mut self, value: &mut T);
}

impl<T, F> VisitMut<T> for F
where
    F: FnMut(&mut T),
{
    fn visit_mut(&mut self, value: &mut T) {
        self(value)
    }
}
