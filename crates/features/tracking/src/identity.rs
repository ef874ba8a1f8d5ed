use crate::error::TrackingError;
use courier_domain::UserId;
use courier_domain::config::JwtConfig;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::fmt;
use tracing::{debug, trace};

/// The outcome of credential verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Signature, expiry, and issuer checks passed; the subject is this user.
    Known(UserId),
    /// Anything else. The caller must treat this as "reject the connection".
    Anonymous,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Validates bearer tokens presented at connect time.
///
/// Verification never raises: a malformed, expired, or unverifiable token
/// resolves to [`Identity::Anonymous`] so the handshake has exactly one
/// rejection path.
#[derive(Clone)]
pub struct IdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for IdentityVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The decoding key stays out of Debug output.
        f.debug_struct("IdentityVerifier").finish_non_exhaustive()
    }
}

impl IdentityVerifier {
    /// Builds a verifier from the shared-secret JWT configuration.
    ///
    /// # Errors
    /// Returns [`TrackingError::Config`] if the secret is empty.
    pub fn new(config: &JwtConfig) -> Result<Self, TrackingError> {
        if config.secret.trim().is_empty() {
            return Err(TrackingError::Config {
                message: "JWT secret must not be empty".into(),
                context: None,
            });
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        if let Some(audience) = &config.audience {
            validation.set_audience(&[audience]);
        }
        validation.leeway = config.clock_skew_seconds;

        Ok(Self { decoding_key: DecodingKey::from_secret(config.secret.as_bytes()), validation })
    }

    /// Resolves a bearer token to an identity.
    pub fn verify(&self, token: Option<&str>) -> Identity {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Identity::Anonymous;
        };

        match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => {
                if data.claims.sub.is_empty() {
                    trace!("Token valid but subject is empty");
                    return Identity::Anonymous;
                }
                Identity::Known(UserId::from(data.claims.sub))
            },
            Err(e) => {
                debug!(error = %e, "Token rejected");
                Identity::Anonymous
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims<'a> {
        sub: &'a str,
        iss: &'a str,
        exp: i64,
    }

    fn config() -> JwtConfig {
        JwtConfig { secret: "test-secret".to_owned(), ..JwtConfig::default() }
    }

    fn token(sub: &str, iss: &str, secret: &str, exp_offset: i64) -> String {
        let claims = TestClaims {
            sub,
            iss,
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .expect("encode token")
    }

    #[test]
    fn valid_token_resolves_to_its_subject() {
        let verifier = IdentityVerifier::new(&config()).unwrap();
        let token = token("driver-1", "courierhub", "test-secret", 3600);
        assert_eq!(verifier.verify(Some(&token)), Identity::Known(UserId::from("driver-1")));
    }

    #[test]
    fn missing_or_garbage_tokens_are_anonymous() {
        let verifier = IdentityVerifier::new(&config()).unwrap();
        assert_eq!(verifier.verify(None), Identity::Anonymous);
        assert_eq!(verifier.verify(Some("")), Identity::Anonymous);
        assert_eq!(verifier.verify(Some("not-a-jwt")), Identity::Anonymous);
    }

    #[test]
    fn expired_token_is_anonymous() {
        let verifier = IdentityVerifier::new(&config()).unwrap();
        // Far enough in the past to beat the default clock-skew leeway.
        let token = token("driver-1", "courierhub", "test-secret", -7200);
        assert_eq!(verifier.verify(Some(&token)), Identity::Anonymous);
    }

    #[test]
    fn wrong_issuer_or_secret_is_anonymous() {
        let verifier = IdentityVerifier::new(&config()).unwrap();

        let wrong_issuer = token("driver-1", "someone-else", "test-secret", 3600);
        assert_eq!(verifier.verify(Some(&wrong_issuer)), Identity::Anonymous);

        let wrong_secret = token("driver-1", "courierhub", "other-secret", 3600);
        assert_eq!(verifier.verify(Some(&wrong_secret)), Identity::Anonymous);
    }

    #[test]
    fn empty_secret_is_a_config_error() {
        let bad = JwtConfig { secret: "  ".to_owned(), ..JwtConfig::default() };
        assert!(matches!(
            IdentityVerifier::new(&bad),
            Err(TrackingError::Config { .. })
        ));
    }
}
