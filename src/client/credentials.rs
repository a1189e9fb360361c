//! Session credentials presented during the handshake

use chrono::{DateTime, Utc};

/// Identifying credentials for the authenticated session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub token: String,
    pub user_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: None,
            expires_at: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn expires(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// A token is usable when non-blank and not past its expiry
    pub fn is_valid(&self) -> bool {
        !self.token.trim().is_empty() && self.expires_at.map_or(true, |at| at > Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_blank_token_invalid() {
        assert!(!SessionCredentials::new("  ").is_valid());
        assert!(SessionCredentials::new("abc").is_valid());
    }

    #[test]
    fn test_expiry() {
        let past = SessionCredentials::new("abc").expires(Utc::now() - Duration::minutes(1));
        assert!(!past.is_valid());
        let future = SessionCredentials::new("abc").expires(Utc::now() + Duration::hours(1));
        assert!(future.is_valid());
    }
}
