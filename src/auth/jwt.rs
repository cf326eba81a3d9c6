// JWT issuance/verification for end-user sessions (spec 4.D "external
// interfaces" / section 6 auth). HS256 signed with a secret taken from
// `POCKETBASE_JWT_SECRET`, matching the original system's env var name
// (see original_source), or auto-generated at startup with a loud warning
// since an ephemeral secret invalidates every session on restart.

use crate::common::UserId;
use crate::error::{RdbError, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

const ISSUER: &str = "rustydb-fleet";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub verified: bool,
    pub iss: String,
    pub exp: u64,
}

pub struct JwtIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: u64,
}

impl JwtIssuer {
    /// Reads the signing secret from the environment, or generates a
    /// random one and warns loudly that sessions will not survive a
    /// restart — matches the ambient-config startup pattern the rest of
    /// this crate uses for other operator-supplied secrets.
    pub fn from_env(ttl_secs: u64) -> Self {
        let secret = match std::env::var("POCKETBASE_JWT_SECRET") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                warn!("POCKETBASE_JWT_SECRET is not set; generating an ephemeral signing secret. All sessions will be invalidated on restart.");
                generate_ephemeral_secret()
            }
        };
        Self::with_secret(&secret, ttl_secs)
    }

    pub fn with_secret(secret: &str, ttl_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_secs,
        }
    }

    pub fn issue(&self, user_id: UserId, email: &str, verified: bool) -> Result<String> {
        let exp = now_secs() + self.ttl_secs;
        let claims = Claims { sub: user_id.to_string(), email: email.to_string(), verified, iss: ISSUER.to_string(), exp };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| RdbError::Internal(format!("jwt encode failed: {e}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[ISSUER]);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| RdbError::Unauthenticated("invalid or expired session token".into()))
    }
}

fn generate_ephemeral_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_verify_round_trips() {
        let issuer = JwtIssuer::with_secret("test-secret", 3600);
        let user_id = UserId::new();
        let token = issuer.issue(user_id, "a@example.com", true).unwrap();
        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email, "a@example.com");
        assert!(claims.verified);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let issuer = JwtIssuer::with_secret("secret-one", 3600);
        let other = JwtIssuer::with_secret("secret-two", 3600);
        let token = issuer.issue(UserId::new(), "a@example.com", false).unwrap();
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn verify_rejects_expired_token() {
        let issuer = JwtIssuer::with_secret("test-secret", 0);
        let token = issuer.issue(UserId::new(), "a@example.com", false).unwrap();
        std::thread::sleep(std::time::Duration::from_secs(1));
        assert!(issuer.verify(&token).is_err());
    }
}
