//! Value object trait: equality by value, not identity.

/// Marker trait for immutable values compared attribute by attribute.
///
/// A computed valuation (unit cost + total) is a value object: two valuations
/// with the same figures are interchangeable. A bundle line is not, since it
/// keeps its line number across edits (see [`crate::Entity`]).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
