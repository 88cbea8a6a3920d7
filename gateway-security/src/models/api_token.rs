use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Longest user agent kept on a ledger row, in characters.
pub const MAX_USER_AGENT_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "access" => Some(TokenType::Access),
            "refresh" => Some(TokenType::Refresh),
            _ => None,
        }
    }
}

/// Token ledger row. Only the SHA-256 digest of the raw token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct ApiToken {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApiToken {
    pub fn kind(&self) -> Option<TokenType> {
        TokenType::parse(&self.token_type)
    }

    /// A token is usable iff it is unrevoked and not yet expired.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone)]
pub struct NewApiToken {
    pub user_id: i64,
    pub token_hash: String,
    pub token_type: TokenType,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl NewApiToken {
    pub fn new(
        user_id: i64,
        token_hash: String,
        token_type: TokenType,
        expires_at: DateTime<Utc>,
        ip_address: &str,
        user_agent: &str,
    ) -> Self {
        let user_agent: String = user_agent.chars().take(MAX_USER_AGENT_LEN).collect();
        Self {
            user_id,
            token_hash,
            token_type,
            expires_at,
            ip_address: (!ip_address.is_empty()).then(|| ip_address.to_string()),
            user_agent: (!user_agent.is_empty()).then_some(user_agent),
        }
    }
}
