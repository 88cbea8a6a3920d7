use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;

/// Coarse classification of a request by HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Create,
    Read,
    Update,
    Delete,
}

impl ActionType {
    pub fn from_method(method: &str) -> Self {
        match method {
            "POST" => ActionType::Create,
            "PUT" | "PATCH" => ActionType::Update,
            "DELETE" => ActionType::Delete,
            _ => ActionType::Read,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Read => "read",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
        }
    }
}

/// Audit trail row for one authenticated request.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ActivityEntry {
    pub id: i64,
    pub user_id: i64,
    pub impersonated_by: Option<i64>,
    pub action_type: String,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub is_admin_action: bool,
    pub ip_address: String,
    pub user_agent: String,
    pub request_method: String,
    pub request_path: String,
    pub request_payload: Option<Value>,
    pub response_status: i32,
    pub response_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActivityEntry {
    pub user_id: i64,
    pub impersonated_by: Option<i64>,
    pub action_type: ActionType,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub is_admin_action: bool,
    pub ip_address: String,
    pub user_agent: String,
    pub request_method: String,
    pub request_path: String,
    pub request_payload: Option<Value>,
    pub response_status: i32,
    pub response_time_ms: i64,
}
