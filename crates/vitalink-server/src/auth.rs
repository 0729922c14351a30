//! JWT credential verification.
//!
//! Implements the [`TokenVerifier`] seam with HS256 tokens issued by the
//! platform's auth service. Verification is stateless; a rejected token
//! closes the connection before it ever reaches the registry.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use vitalink_core::{AuthError, Identity, TokenVerifier};

/// Claims carried by platform-issued tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// `doctor` or `patient`.
    #[serde(default)]
    pub role: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Issued-at, seconds since the Unix epoch.
    #[serde(default)]
    pub iat: i64,
}

/// HS256 token verifier.
pub struct JwtVerifier {
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier from the shared secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data =
            decode::<Claims>(token, &self.decoding, &self.validation).map_err(|error| {
                match error.kind() {
                    ErrorKind::ExpiredSignature => AuthError::Expired,
                    ErrorKind::InvalidToken
                    | ErrorKind::Base64(_)
                    | ErrorKind::Json(_)
                    | ErrorKind::Utf8(_) => AuthError::Malformed,
                    _ => AuthError::Rejected(error.to_string()),
                }
            })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::MissingClaim("sub"));
        }
        if data.claims.role.is_empty() {
            return Err(AuthError::MissingClaim("role"));
        }
        let role = data.claims.role.parse()?;

        Ok(Identity::new(data.claims.sub, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};
    use vitalink_core::Role;

    const SECRET: &[u8] = b"test-secret";

    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn mint(sub: &str, role: &str, exp: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            role: role.to_string(),
            exp,
            iat: now(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_valid_token() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint("42", "doctor", now() + 900);

        let identity = verifier.verify(&token).unwrap();
        assert_eq!(identity.id, "42");
        assert_eq!(identity.role, Role::Doctor);
    }

    #[test]
    fn test_verify_expired_token() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint("42", "doctor", now() - 3600);

        assert!(matches!(verifier.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_verify_malformed_token() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(matches!(
            verifier.verify("not-a-jwt"),
            Err(AuthError::Malformed)
        ));
    }

    #[test]
    fn test_verify_wrong_secret() {
        let verifier = JwtVerifier::new(b"other-secret");
        let token = mint("42", "doctor", now() + 900);

        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_verify_missing_role_claim() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint("42", "", now() + 900);

        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::MissingClaim("role"))
        ));
    }

    #[test]
    fn test_verify_unknown_role() {
        let verifier = JwtVerifier::new(SECRET);
        let token = mint("42", "admin", now() + 900);

        assert!(matches!(
            verifier.verify(&token),
            Err(AuthError::Rejected(_))
        ));
    }
}
