//! Authenticated caller identity and the token-verifier seam.
//!
//! An [`Identity`] is produced by a [`TokenVerifier`] during the handshake
//! and never mutated afterwards; every envelope the hub builds takes its
//! sender from the identity bound to the connection, not from frame content.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Opaque identity identifier.
pub type IdentityId = String;

/// The role a caller acts under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Doctor,
    Patient,
}

impl Role {
    /// Wire representation of the role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Doctor => "doctor",
            Role::Patient => "patient",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doctor" => Ok(Role::Doctor),
            "patient" => Ok(Role::Patient),
            other => Err(AuthError::Rejected(format!("unknown role: {other}"))),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Opaque identifier, unique per user.
    pub id: IdentityId,
    /// Role the credential was issued for.
    pub role: Role,
}

impl Identity {
    /// Create a new identity.
    #[must_use]
    pub fn new(id: impl Into<IdentityId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.id, self.role)
    }
}

/// Credential verification errors.
///
/// A failed handshake is terminal for that attempt: the caller closes the
/// transport without entering the registry, and never retries.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token could not be parsed.
    #[error("malformed credential")]
    Malformed,

    /// Token signature is valid but the token has expired.
    #[error("credential expired")]
    Expired,

    /// Token lacks a required identity claim.
    #[error("credential missing claim: {0}")]
    MissingClaim(&'static str),

    /// Token rejected for any other reason.
    #[error("credential rejected: {0}")]
    Rejected(String),
}

/// Collaborator seam: validates an opaque credential and yields the caller
/// identity. Implementations are stateless and side-effect free.
pub trait TokenVerifier: Send + Sync {
    /// Verify a credential.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] for malformed, expired, or claim-deficient
    /// credentials.
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("doctor".parse::<Role>().unwrap(), Role::Doctor);
        assert_eq!("patient".parse::<Role>().unwrap(), Role::Patient);
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn test_identity_display() {
        let identity = Identity::new("42", Role::Doctor);
        assert_eq!(identity.to_string(), "42(doctor)");
    }
}
