//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attribute values: an
/// `Account { code, name, kind }` is a value object, a journal entry is not.
/// To "modify" one, construct a new value.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
