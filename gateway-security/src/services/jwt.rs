use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::config::JwtConfig;
use crate::models::TokenType;
use crate::services::error::ServiceError;

/// Claim names owned by the token service; callers cannot override them
/// through extra claims.
const RESERVED_CLAIMS: [&str; 8] = ["sub", "type", "iat", "exp", "jti", "nbf", "aud", "iss"];

const IMPERSONATED_BY: &str = "impersonated_by";

/// Signs and verifies HS256 access/refresh tokens under a single secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: i64,
    refresh_ttl: i64,
}

/// Payload of every token this service issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: i64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    /// 128-bit random token ID, hex encoded
    pub jti: String,
    /// Sudo principal acting as `sub`, for impersonation tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonated_by: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A freshly signed token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

impl TokenService {
    /// An empty secret is a deployment error, not a runtime condition.
    pub fn new(config: &JwtConfig) -> Result<Self, ServiceError> {
        if config.secret.is_empty() {
            return Err(ServiceError::Internal(anyhow::anyhow!(
                "JWT secret is not configured"
            )));
        }

        let secret = config.secret.as_bytes();
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        })
    }

    pub fn create_access_token(
        &self,
        user_id: i64,
        extra: Map<String, Value>,
    ) -> Result<IssuedToken, ServiceError> {
        self.issue_at(user_id, TokenType::Access, extra, Utc::now().timestamp())
    }

    pub fn create_refresh_token(&self, user_id: i64) -> Result<IssuedToken, ServiceError> {
        self.issue_at(
            user_id,
            TokenType::Refresh,
            Map::new(),
            Utc::now().timestamp(),
        )
    }

    fn issue_at(
        &self,
        user_id: i64,
        token_type: TokenType,
        mut extra: Map<String, Value>,
        now: i64,
    ) -> Result<IssuedToken, ServiceError> {
        let ttl = match token_type {
            TokenType::Access => self.access_ttl,
            TokenType::Refresh => self.refresh_ttl,
        };

        let impersonated_by = extra.remove(IMPERSONATED_BY).and_then(|v| v.as_i64());
        for claim in RESERVED_CLAIMS {
            extra.remove(claim);
        }

        let exp = now.checked_add(ttl).ok_or_else(|| {
            anyhow::anyhow!("{} token TTL {} overflows expiry", token_type.as_str(), ttl)
        })?;

        let claims = Claims {
            sub: user_id,
            token_type,
            iat: now,
            exp,
            jti: generate_jti(),
            impersonated_by,
            extra,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode {} token: {}", token_type.as_str(), e))?;

        Ok(IssuedToken { token, claims })
    }

    /// Verify signature, algorithm and expiry. Every failure collapses into
    /// the same authentication error.
    pub fn decode(&self, token: &str) -> Result<Claims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        // jsonwebtoken only recognises a string `sub`; the numeric subject
        // and `iat` are enforced by deserializing into `Claims`.
        validation.set_required_spec_claims(&["exp"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token verification failed");
                ServiceError::invalid_token()
            })
    }

    /// Decode and require a specific token type.
    pub fn decode_as(&self, token: &str, expected: TokenType) -> Result<Claims, ServiceError> {
        let claims = self.decode(token)?;
        if claims.token_type != expected {
            return Err(ServiceError::Authentication(
                "Invalid token type.".to_string(),
            ));
        }
        Ok(claims)
    }

    /// SHA-256 digest used as the ledger lookup key.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn access_ttl(&self) -> i64 {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> i64 {
        self.refresh_ttl
    }
}

fn generate_jti() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}
