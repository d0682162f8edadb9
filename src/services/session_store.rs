use chrono::Utc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;
use crate::models::{BiometricStatus, SessionRecord, User};

/// Store for the per-user biometric session record.
///
/// Each user holds at most one live session; a new `begin` overwrites any
/// prior one. Every guarded transition is a single conditional UPDATE so
/// concurrent callers race on the database row, never on torn state.
pub struct SessionStore;

impl SessionStore {
    /// Resolve a login code to its user and open a pending session.
    ///
    /// Returns `None` if no user currently holds the code. The fresh
    /// session id replaces whatever session the user had before.
    pub async fn begin(db: &Database, code: &str) -> Result<Option<(User, String)>> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE auth_code = ?")
            .bind(code)
            .fetch_optional(db.pool())
            .await?;

        let Some(user) = user else {
            return Ok(None);
        };

        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            UPDATE users
            SET bio_status = 'pending', bio_session_id = ?, bio_requested_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&session_id)
        .bind(&now)
        .bind(&now)
        .bind(&user.id)
        .execute(db.pool())
        .await?;

        Ok(Some((user, session_id)))
    }

    /// Move the user's session from `pending` to a terminal status.
    ///
    /// Compare-and-swap on `bio_status`; returns false when there is no
    /// pending session to resolve (already resolved, expired, or never begun).
    pub async fn resolve(db: &Database, user_id: &str, approved: bool) -> Result<bool> {
        let status = if approved {
            BiometricStatus::Approved
        } else {
            BiometricStatus::Denied
        };
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE users SET bio_status = ?, updated_at = ? WHERE id = ? AND bio_status = 'pending'",
        )
        .bind(status.as_str())
        .bind(&now)
        .bind(user_id)
        .execute(db.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Find the user currently holding a live session with this id.
    ///
    /// A cleared session (`none`) is never found, even if the identifier
    /// string were somehow presented again.
    pub async fn lookup(db: &Database, session_id: &str) -> Result<Option<SessionRecord>> {
        let record: Option<SessionRecord> = sqlx::query_as(
            r#"
            SELECT id AS user_id, username, bio_status, bio_session_id, bio_requested_at
            FROM users
            WHERE bio_session_id = ? AND bio_status <> 'none'
            "#,
        )
        .bind(session_id)
        .fetch_optional(db.pool())
        .await?;

        Ok(record)
    }

    /// Claim a terminal session, collapsing it to `none`.
    ///
    /// Guarded on the exact session id and terminal status, so of any number
    /// of concurrent pollers exactly one sees true and owns the follow-up
    /// (audit record, token issuance).
    pub async fn claim_terminal(
        db: &Database,
        user_id: &str,
        session_id: &str,
        status: BiometricStatus,
    ) -> Result<bool> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE users
            SET bio_status = 'none', bio_session_id = NULL, bio_requested_at = NULL, updated_at = ?
            WHERE id = ? AND bio_session_id = ? AND bio_status = ?
            "#,
        )
        .bind(&now)
        .bind(user_id)
        .bind(session_id)
        .bind(status.as_str())
        .execute(db.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Clear a pending session that aged out.
    ///
    /// Guarded on `pending` and the session id; a racing resolve or begin
    /// wins over the sweep and the caller sees false.
    pub async fn expire(db: &Database, user_id: &str, session_id: &str) -> Result<bool> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE users
            SET bio_status = 'none', bio_session_id = NULL, bio_requested_at = NULL, updated_at = ?
            WHERE id = ? AND bio_session_id = ? AND bio_status = 'pending'
            "#,
        )
        .bind(&now)
        .bind(user_id)
        .bind(session_id)
        .execute(db.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Idempotently reset a user's session to `none`.
    pub async fn clear(db: &Database, user_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            UPDATE users
            SET bio_status = 'none', bio_session_id = NULL, bio_requested_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&now)
        .bind(user_id)
        .execute(db.pool())
        .await?;

        Ok(())
    }

    /// Write the externally-rotated login code for a user.
    ///
    /// The rotation scheduler calls this; the handshake core only reads.
    pub async fn set_code(db: &Database, user_id: &str, code: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE users SET auth_code = ?, updated_at = ? WHERE id = ?")
            .bind(code)
            .bind(&now)
            .bind(user_id)
            .execute(db.pool())
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateUserRequest;
    use crate::services::AuthService;

    async fn setup() -> (Database, User) {
        let db = Database::new(":memory:").await.unwrap();
        db.run_migrations().await.unwrap();
        let user = AuthService::register(
            &db,
            6,
            CreateUserRequest {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "hunter22".to_string(),
            },
        )
        .await
        .unwrap();
        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&user.user.id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        (db, user)
    }

    #[tokio::test]
    async fn begin_with_unknown_code_finds_nothing() {
        let (db, _user) = setup().await;
        let result = SessionStore::begin(&db, "NOPE42").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn begin_overwrites_prior_session() {
        let (db, user) = setup().await;
        let (_, first) = SessionStore::begin(&db, &user.auth_code).await.unwrap().unwrap();
        let (_, second) = SessionStore::begin(&db, &user.auth_code).await.unwrap().unwrap();
        assert_ne!(first, second);

        // The superseded id no longer resolves to a live session.
        assert!(SessionStore::lookup(&db, &first).await.unwrap().is_none());
        let record = SessionStore::lookup(&db, &second).await.unwrap().unwrap();
        assert_eq!(record.status(), BiometricStatus::Pending);
        assert_eq!(record.username, "alice");
    }

    #[tokio::test]
    async fn resolve_requires_pending() {
        let (db, user) = setup().await;
        assert!(!SessionStore::resolve(&db, &user.id, true).await.unwrap());

        SessionStore::begin(&db, &user.auth_code).await.unwrap().unwrap();
        assert!(SessionStore::resolve(&db, &user.id, true).await.unwrap());
        // Second resolve: nothing pending anymore.
        assert!(!SessionStore::resolve(&db, &user.id, false).await.unwrap());
    }

    #[tokio::test]
    async fn claim_terminal_wins_exactly_once() {
        let (db, user) = setup().await;
        let (_, session_id) = SessionStore::begin(&db, &user.auth_code).await.unwrap().unwrap();
        SessionStore::resolve(&db, &user.id, true).await.unwrap();

        let won = SessionStore::claim_terminal(&db, &user.id, &session_id, BiometricStatus::Approved)
            .await
            .unwrap();
        assert!(won);
        let again = SessionStore::claim_terminal(&db, &user.id, &session_id, BiometricStatus::Approved)
            .await
            .unwrap();
        assert!(!again);
        assert!(SessionStore::lookup(&db, &session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_terminal_guards_on_status() {
        let (db, user) = setup().await;
        let (_, session_id) = SessionStore::begin(&db, &user.auth_code).await.unwrap().unwrap();
        SessionStore::resolve(&db, &user.id, false).await.unwrap();

        // Claiming the wrong terminal status must not clear anything.
        let won = SessionStore::claim_terminal(&db, &user.id, &session_id, BiometricStatus::Approved)
            .await
            .unwrap();
        assert!(!won);
        let record = SessionStore::lookup(&db, &session_id).await.unwrap().unwrap();
        assert_eq!(record.status(), BiometricStatus::Denied);
    }

    #[tokio::test]
    async fn expire_loses_to_a_resolved_session() {
        let (db, user) = setup().await;
        let (_, session_id) = SessionStore::begin(&db, &user.auth_code).await.unwrap().unwrap();
        SessionStore::resolve(&db, &user.id, true).await.unwrap();

        assert!(!SessionStore::expire(&db, &user.id, &session_id).await.unwrap());
        let record = SessionStore::lookup(&db, &session_id).await.unwrap().unwrap();
        assert_eq!(record.status(), BiometricStatus::Approved);
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let (db, user) = setup().await;
        let (_, session_id) = SessionStore::begin(&db, &user.auth_code).await.unwrap().unwrap();
        SessionStore::clear(&db, &user.id).await.unwrap();
        SessionStore::clear(&db, &user.id).await.unwrap();
        assert!(SessionStore::lookup(&db, &session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_code_replaces_current_code() {
        let (db, user) = setup().await;
        SessionStore::set_code(&db, &user.id, "ZZ9PZA").await.unwrap();
        assert!(SessionStore::begin(&db, &user.auth_code).await.unwrap().is_none());
        assert!(SessionStore::begin(&db, "ZZ9PZA").await.unwrap().is_some());
    }
}
