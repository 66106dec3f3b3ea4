//! Identity verification
//!
//! Bearer tokens are HS256 JWTs carrying the user id in `sub` and platform roles in
//! `roles`. An optional `name` claim feeds the display-name directory.

use async_trait::async_trait;
use huddle_conversation::{ConversationError, Result};
use huddle_core::{Actor, PlatformRole};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::directory::InMemoryDirectory;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve a bearer token to an actor, or `Unauthorized`
    async fn verify_actor(&self, token: &str) -> Result<Actor>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Claims {
    /// Highest platform role among the claimed roles
    pub fn platform_role(&self) -> PlatformRole {
        self.roles
            .iter()
            .filter_map(|r| PlatformRole::parse(r))
            .max_by_key(|role| match role {
                PlatformRole::User => 0,
                PlatformRole::Moderator => 1,
                PlatformRole::Admin => 2,
            })
            .unwrap_or_default()
    }
}

pub struct JwtIdentityVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    directory: Option<Arc<InMemoryDirectory>>,
}

impl JwtIdentityVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
            directory: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<InMemoryDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Extract token from Authorization header
    pub fn extract_token(auth_header: &str) -> Option<&str> {
        auth_header.strip_prefix("Bearer ").map(str::trim)
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify_actor(&self, token: &str) -> Result<Actor> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| {
                debug!(error = %e, "Rejected bearer token");
                ConversationError::Unauthorized
            })?;
        let claims = token_data.claims;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| ConversationError::Unauthorized)?;
        if let (Some(directory), Some(name)) = (&self.directory, &claims.name) {
            directory.record(user_id, name.clone());
        }

        Ok(Actor::staff(user_id, claims.platform_role()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_conversation::DisplayNames;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(sub: &str, roles: &[&str], name: Option<&str>, ttl: chrono::Duration) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now() + ttl).timestamp(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            name: name.map(str::to_string),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_yields_actor() {
        let directory = Arc::new(InMemoryDirectory::new());
        let verifier = JwtIdentityVerifier::new(SECRET).with_directory(directory.clone());
        let user = Uuid::new_v4();

        let actor = verifier
            .verify_actor(&token(
                &user.to_string(),
                &["user", "moderator"],
                Some("Ada"),
                chrono::Duration::hours(1),
            ))
            .await
            .unwrap();

        assert_eq!(actor.user_id, user);
        assert_eq!(actor.platform_role, PlatformRole::Moderator);
        assert_eq!(directory.display_name(user).as_deref(), Some("Ada"));
    }

    #[tokio::test]
    async fn test_bad_tokens_are_unauthorized() {
        let verifier = JwtIdentityVerifier::new(SECRET);

        let expired = token(
            &Uuid::new_v4().to_string(),
            &[],
            None,
            chrono::Duration::hours(-2),
        );
        assert_eq!(
            verifier.verify_actor(&expired).await.unwrap_err(),
            ConversationError::Unauthorized
        );

        let not_a_uuid = token("alice", &[], None, chrono::Duration::hours(1));
        assert_eq!(
            verifier.verify_actor(&not_a_uuid).await.unwrap_err(),
            ConversationError::Unauthorized
        );

        assert!(verifier.verify_actor("garbage").await.is_err());
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(JwtIdentityVerifier::extract_token("Bearer abc"), Some("abc"));
        assert_eq!(JwtIdentityVerifier::extract_token("Basic abc"), None);
    }
}
