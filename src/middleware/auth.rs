//! Token handling for WebSocket connections.
//!
//! The hub itself never sees a token; it is resolved to an [`Identity`]
//! once, when the socket is accepted.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::websocket::client::Identity;

/// JWT claims carried by client tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub user_id: String,
    #[serde(default)]
    pub team_id: Option<String>,
    pub exp: usize,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, AppError>;
}

/// HS256 verifier keyed by the shared `JWT_SECRET`.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AppError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        if data.claims.user_id.is_empty() {
            return Err(AppError::Unauthorized);
        }
        Ok(Identity::new(data.claims.user_id, data.claims.team_id))
    }
}

/// What to do with a connection whose token is missing or invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnonymousPolicy {
    /// Accept it as `anonymous` with no team
    Allow,
    Reject,
}

/// Pulls the bearer token from the `token` query parameter, falling back
/// to the `Authorization: Bearer` header.
pub fn extract_token(query: Option<&str>, authorization: Option<&str>) -> Option<String> {
    let from_query = query.and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "token")
            .and_then(|(_, value)| urlencoding::decode(value).ok())
            .map(|value| value.into_owned())
    });

    from_query
        .or_else(|| {
            authorization
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(|t| t.trim().to_string())
        })
        .filter(|t| !t.is_empty())
}

pub async fn resolve_identity(
    verifier: &dyn TokenVerifier,
    token: Option<&str>,
    policy: AnonymousPolicy,
) -> Result<Identity, AppError> {
    let outcome = match token {
        Some(token) => verifier.verify(token).await,
        None => Err(AppError::Unauthorized),
    };

    match (outcome, policy) {
        (Ok(identity), _) => Ok(identity),
        (Err(e), AnonymousPolicy::Allow) => {
            tracing::debug!(error = %e, has_token = token.is_some(), "accepting anonymous connection");
            Ok(Identity::anonymous())
        }
        (Err(e), AnonymousPolicy::Reject) => {
            tracing::warn!(error = %e, has_token = token.is_some(), "rejecting unauthenticated connection");
            Err(AppError::Unauthorized)
        }
    }
}
