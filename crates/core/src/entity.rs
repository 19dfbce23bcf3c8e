//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Operation items and packages are entities: they keep their identity while
/// their processed/packed quantities and states evolve.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
