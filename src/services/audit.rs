use chrono::Utc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::models::{AuditContext, LoginLog};

/// Audit sink for resolved login attempts
pub struct AuditService;

impl AuditService {
    /// Append one record for a resolved attempt
    pub async fn record(
        db: &Database,
        user_id: &str,
        username: &str,
        success: bool,
        context: &AuditContext,
    ) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO login_logs (id, user_id, username, ip_address, user_agent, success, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(username)
        .bind(context.ip_address.as_deref().unwrap_or(""))
        .bind(context.user_agent.as_deref().unwrap_or(""))
        .bind(success)
        .bind(&now)
        .execute(db.pool())
        .await?;

        Ok(())
    }

    /// Fire-and-forget variant: a failed audit write must never fail the
    /// poll that triggered it.
    pub async fn record_best_effort(
        db: &Database,
        user_id: &str,
        username: &str,
        success: bool,
        context: &AuditContext,
    ) {
        if let Err(e) = Self::record(db, user_id, username, success, context).await {
            tracing::warn!("Failed to record login attempt for {}: {}", username, e);
        }
    }

    /// Recent attempts for a user, newest first
    pub async fn list(db: &Database, user_id: &str, limit: i64) -> Result<Vec<LoginLog>> {
        let logs: Vec<LoginLog> = sqlx::query_as(
            "SELECT * FROM login_logs WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(db.pool())
        .await?;

        Ok(logs)
    }
}
