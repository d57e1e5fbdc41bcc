use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token: String,
    pub hwid: Option<String>,
    pub expires_at: Option<f64>,
    pub revoked: bool,
}

impl Token {
    /// A zero expiry is treated like no expiry.
    pub fn is_expired(&self, now: f64) -> bool {
        match self.expires_at {
            Some(expires_at) if expires_at != 0.0 => now > expires_at,
            _ => false,
        }
    }

    pub fn seconds_remaining(&self, now: f64) -> Option<i64> {
        match self.expires_at {
            Some(expires_at) if expires_at != 0.0 => Some((expires_at - now).max(0.0) as i64),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenAction {
    Generated,
    Bound,
    Unbound,
    Revoked,
}

impl TokenAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenAction::Generated => "generated",
            TokenAction::Bound => "bound",
            TokenAction::Unbound => "unbound",
            TokenAction::Revoked => "revoked",
        }
    }

    pub fn from_db(action: &str) -> anyhow::Result<TokenAction> {
        match action {
            "generated" => Ok(TokenAction::Generated),
            "bound" => Ok(TokenAction::Bound),
            "unbound" => Ok(TokenAction::Unbound),
            "revoked" => Ok(TokenAction::Revoked),
            other => anyhow::bail!("unknown token action {other:?} in storage"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenEvent {
    pub token: String,
    pub action: TokenAction,
    pub change_source: Option<String>,
    pub change_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedToken {
    pub token: String,
    pub plan: String,
    pub expires_at: Option<f64>,
}

/// Admin view of a token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenStatus {
    pub token: String,
    pub hwid: Option<String>,
    pub revoked: bool,
    pub expires_at: Option<f64>,
    pub seconds_remaining: Option<i64>,
}
