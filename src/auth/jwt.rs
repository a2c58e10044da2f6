//! JWT issuance and validation standing in for the external identity
//! provider (§7 identity boundary): the core never talks to an IdP
//! directly, it only trusts whatever `Subject` this module hands back.

use crate::auth::models::{Claims, User};
use crate::models::{Role, Subject};
use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

pub struct JwtHandler {
    secret: String,
    expiration_hours: i64,
}

impl JwtHandler {
    pub fn new(secret: String) -> Self {
        Self {
            secret,
            expiration_hours: 24,
        }
    }

    pub fn generate_token(&self, user: &User) -> Result<(String, usize)> {
        let now = Utc::now();
        let expiration = now
            .checked_add_signed(chrono::Duration::hours(self.expiration_hours))
            .context("invalid timestamp")?
            .timestamp() as usize;
        let expires_in = (self.expiration_hours * 3600) as usize;

        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role,
            exp: expiration,
        };

        debug!(username = %user.username, user_id = %user.id, "generating JWT");

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .context("failed to generate JWT")?;

        Ok((token, expires_in))
    }

    /// Validate a bearer token and rebuild the `Subject` the core trusts.
    pub fn validate_token(&self, token: &str) -> Result<Subject> {
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .context("invalid or expired token")?;

        let user_id = decoded.claims.sub.parse().context("malformed subject in token")?;
        Ok(Subject {
            user_id,
            role: decoded.claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_user() -> User {
        User {
            id: Uuid::new_v4(),
            username: "testuser".into(),
            password_hash: "hash".into(),
            role: Role::User,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn generate_then_validate_roundtrip() {
        let handler = JwtHandler::new("test-secret-key".to_string());
        let user = test_user();

        let (token, expires_in) = handler.generate_token(&user).unwrap();
        assert!(!token.is_empty());
        assert_eq!(expires_in, 24 * 3600);

        let subject = handler.validate_token(&token).unwrap();
        assert_eq!(subject.user_id, user.id);
        assert_eq!(subject.role, Role::User);
    }

    #[test]
    fn invalid_token_rejected() {
        let handler = JwtHandler::new("test-secret-key".to_string());
        assert!(handler.validate_token("invalid.token.here").is_err());
    }

    #[test]
    fn different_secrets_reject() {
        let handler1 = JwtHandler::new("secret1".to_string());
        let handler2 = JwtHandler::new("secret2".to_string());
        let user = test_user();

        let (token, _) = handler1.generate_token(&user).unwrap();
        assert!(handler2.validate_token(&token).is_err());
    }

    #[test]
    fn admin_role_round_trips() {
        let handler = JwtHandler::new("test-secret-key".to_string());
        let mut user = test_user();
        user.role = Role::Admin;

        let (token, _) = handler.generate_token(&user).unwrap();
        let subject = handler.validate_token(&token).unwrap();
        assert!(subject.is_admin());
    }
}
