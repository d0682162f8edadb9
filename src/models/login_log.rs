use serde::Serialize;
use sqlx::FromRow;

/// A resolved login attempt, recorded by the audit sink
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LoginLog {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub ip_address: String,
    pub user_agent: String,
    pub success: bool,
    pub created_at: String,
}

/// Request-side context attached to an audit record
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}
