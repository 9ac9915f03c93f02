//! Entity trait: records that keep their identity while their state moves on.
//!
//! An invoice is the canonical example: paying it flips its status, but it is
//! still the same invoice (same id, same supplier).

/// Entity marker + minimal interface.
pub trait Entity {
    /// Identifier that stays stable for the entity's whole lifetime.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
