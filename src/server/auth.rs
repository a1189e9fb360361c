//! Session token verification
//!
//! Shared by the WebSocket handshake and the push stream. Tokens map to
//! user ids through the `[auth.tokens]` table.

use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;

use crate::config::AuthConfig;

/// Credentials carried as `?token=&userId=` on `/ws` and `/events`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionQuery {
    pub token: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing session token")]
    MissingToken,

    #[error("Invalid session token")]
    InvalidToken,

    #[error("Token does not belong to user '{0}'")]
    UserMismatch(String),
}

/// Verifies session tokens
#[derive(Debug, Clone)]
pub struct Authenticator {
    required: bool,
    tokens: HashMap<String, String>,
}

impl Authenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            required: config.required,
            tokens: config.tokens.clone(),
        }
    }

    /// Accept any caller; the claimed user id (or "anonymous") is trusted
    pub fn open() -> Self {
        Self {
            required: false,
            tokens: HashMap::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }

    /// Resolve `token` to an identity. A claimed user id must match the token's owner.
    pub fn verify(&self, token: Option<&str>, claimed_user: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());

        let Some(token) = token else {
            if self.required {
                return Err(AuthError::MissingToken);
            }
            return Ok(Identity {
                user_id: claimed_user.unwrap_or("anonymous").to_string(),
            });
        };

        match self.tokens.get(token) {
            Some(owner) => match claimed_user {
                Some(claimed) if claimed != owner => Err(AuthError::UserMismatch(claimed.to_string())),
                _ => Ok(Identity {
                    user_id: owner.clone(),
                }),
            },
            None if self.required => Err(AuthError::InvalidToken),
            None => Ok(Identity {
                user_id: claimed_user.unwrap_or("anonymous").to_string(),
            }),
        }
    }

    pub fn verify_query(&self, query: &SessionQuery) -> Result<Identity, AuthError> {
        self.verify(query.token.as_deref(), query.user_id.as_deref())
    }
}
