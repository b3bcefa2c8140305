//! Entity trait: identity that survives edits.

/// An object identified by its key rather than by its attribute values.
///
/// Bundle lines are entities scoped to their parent bundle: a line keeps its
/// line number while its product, unit or quantity change.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
