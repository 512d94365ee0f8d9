use chrono::{DateTime, Utc};
use serde::Serialize;

/// Bearer token authorizing publication, with its absolute expiry.
#[derive(Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Credential {
    #[serde(skip_serializing)]
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at,
        }
    }

    /// Fractional days left until expiry; negative once expired.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> f64 {
        (self.expires_at - now).num_milliseconds() as f64 / 86_400_000.0
    }

    /// First and last four characters of the token, for logs.
    pub fn masked_token(&self) -> String {
        let t = &self.access_token;
        if t.len() > 8 && t.is_ascii() {
            format!("{}…{}", &t[..4], &t[t.len() - 4..])
        } else {
            "****".to_string()
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &self.masked_token())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
