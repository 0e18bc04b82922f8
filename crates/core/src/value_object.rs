//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two instances with
/// the same attributes are interchangeable. To "modify" one, build a new one.
///
/// [`Money`](crate::Money) is the canonical example here: `100.00 USD` is equal to
/// any other `100.00 USD`, and arithmetic returns fresh values instead of mutating.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
