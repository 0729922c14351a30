//! Registry keys for the two routing shapes.
//!
//! One hub serves both shapes: a commutative pair key for one-to-one chat
//! and a shared topic key for consultation broadcast. The key decides who a
//! message fans out to; the shape decides nothing else.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a party id or topic name inside a key.
pub const MAX_PARTY_LENGTH: usize = 64;

/// The routing shape a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteShape {
    /// One-to-one chat between exactly two identities.
    Pairwise,
    /// Consultation-scoped broadcast to all participants.
    Topic,
}

/// Validate a party id or topic name used inside a routing key.
///
/// # Errors
///
/// Returns an error message if the value is empty, too long, or contains
/// non-printable characters.
pub fn validate_party(value: &str) -> Result<(), &'static str> {
    if value.is_empty() {
        return Err("party id cannot be empty");
    }
    if value.len() > MAX_PARTY_LENGTH {
        return Err("party id too long");
    }
    if !value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("party id contains invalid characters");
    }
    Ok(())
}

/// A registry lookup key.
///
/// `pairwise(a, b)` is commutative: the two ids are ordered before the key
/// is formed, so both parties derive the same key independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutingKey {
    Pairwise { low: String, high: String },
    Topic { name: String },
}

impl RoutingKey {
    /// Create a pairwise key from two identity ids, in either order.
    #[must_use]
    pub fn pairwise(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        RoutingKey::Pairwise { low, high }
    }

    /// Create a topic key from a consultation identifier.
    #[must_use]
    pub fn topic(name: impl Into<String>) -> Self {
        RoutingKey::Topic { name: name.into() }
    }

    /// Get the routing shape.
    #[must_use]
    pub fn shape(&self) -> RouteShape {
        match self {
            RoutingKey::Pairwise { .. } => RouteShape::Pairwise,
            RoutingKey::Topic { .. } => RouteShape::Topic,
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingKey::Pairwise { low, high } => write!(f, "room_{low}_{high}"),
            RoutingKey::Topic { name } => write!(f, "consultation_{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairwise_commutative() {
        assert_eq!(RoutingKey::pairwise("1", "2"), RoutingKey::pairwise("2", "1"));
        assert_eq!(RoutingKey::pairwise("1", "2").to_string(), "room_1_2");
    }

    #[test]
    fn test_topic_display() {
        assert_eq!(RoutingKey::topic("88").to_string(), "consultation_88");
        assert_eq!(RoutingKey::topic("88").shape(), RouteShape::Topic);
    }

    #[test]
    fn test_validate_party() {
        assert!(validate_party("42").is_ok());
        assert!(validate_party("").is_err());
        assert!(validate_party(&"a".repeat(MAX_PARTY_LENGTH + 1)).is_err());
        assert!(validate_party("bad\u{7}id").is_err());
    }
}
