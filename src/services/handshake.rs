use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{
    AuditContext, BeginSessionResponse, BiometricStatus, PollOutcome, ResolveOutcome,
    SessionRecord,
};
use crate::services::{AuditService, AuthService, SessionStore};

/// Cross-device login handshake.
///
/// A browser presents the user's current login code, the user's phone
/// approves or denies the attempt, and the browser polls until it observes
/// the outcome. Terminal states collapse on first observation: the poll
/// that sees `approved` or `denied` clears the session, so the outcome is
/// deliverable exactly once and at most one token is ever issued per
/// handshake, however many pollers retry.
pub struct HandshakeService;

impl HandshakeService {
    /// Open a pending session for whoever holds this login code.
    ///
    /// Overwrites any prior session of that user; the superseded session id
    /// goes dead immediately (last writer wins).
    pub async fn begin_session(db: &Database, code: &str) -> Result<BeginSessionResponse> {
        let (user, session_id) = SessionStore::begin(db, code)
            .await?
            .ok_or_else(|| AppError::NotFound("Invalid code".to_string()))?;

        tracing::info!("Biometric session {} opened for {}", session_id, user.username);

        Ok(BeginSessionResponse {
            username: user.username,
            session_id,
        })
    }

    /// Approve or deny the caller's own pending session.
    ///
    /// `NoPendingSession` is a normal outcome (double-tap, expiry already
    /// fired, nothing ever begun), not a fault.
    pub async fn resolve(db: &Database, user_id: &str, approved: bool) -> Result<ResolveOutcome> {
        if SessionStore::resolve(db, user_id, approved).await? {
            tracing::info!(
                "User {} {} their pending session",
                user_id,
                if approved { "approved" } else { "denied" }
            );
            Ok(ResolveOutcome::Resolved)
        } else {
            tracing::debug!("Resolve for {} with no pending session", user_id);
            Ok(ResolveOutcome::NoPendingSession)
        }
    }

    /// Browser-side poll.
    ///
    /// Reports one of five outcomes. `InvalidSession` after a terminal
    /// report means "already resolved, stop polling", not an error to retry.
    pub async fn poll_status(
        db: &Database,
        config: &Config,
        session_id: &str,
        context: &AuditContext,
    ) -> Result<PollOutcome> {
        let Some(record) = SessionStore::lookup(db, session_id).await? else {
            return Ok(PollOutcome::InvalidSession);
        };

        match record.status() {
            BiometricStatus::Pending => {
                if !Self::is_expired(&record, config)? {
                    return Ok(PollOutcome::Pending);
                }

                if SessionStore::expire(db, &record.user_id, session_id).await? {
                    tracing::info!("Biometric session {} expired", session_id);
                    return Ok(PollOutcome::Expired);
                }

                // Lost the sweep to a concurrent resolve or begin. Re-read
                // and report whatever the record became.
                match SessionStore::lookup(db, session_id).await? {
                    Some(record) if record.status() != BiometricStatus::Pending => {
                        Self::consume_terminal(db, config, session_id, record, context).await
                    }
                    Some(_) => Ok(PollOutcome::Pending),
                    None => Ok(PollOutcome::InvalidSession),
                }
            }
            BiometricStatus::Approved | BiometricStatus::Denied => {
                Self::consume_terminal(db, config, session_id, record, context).await
            }
            // lookup() filters `none` out; keep the arm for safety.
            BiometricStatus::None => Ok(PollOutcome::InvalidSession),
        }
    }

    /// Claim a terminal session and report its outcome.
    ///
    /// The claim clears the store first; the audit write and token issuance
    /// happen only for the single caller that won it. A token issuance
    /// failure after the claim leaves the session cleared, so the browser
    /// restarts the handshake rather than risking a double issue.
    async fn consume_terminal(
        db: &Database,
        config: &Config,
        session_id: &str,
        record: SessionRecord,
        context: &AuditContext,
    ) -> Result<PollOutcome> {
        let status = record.status();
        let claimed =
            SessionStore::claim_terminal(db, &record.user_id, session_id, status).await?;
        if !claimed {
            // Another poller consumed it first.
            return Ok(PollOutcome::InvalidSession);
        }

        match status {
            BiometricStatus::Approved => {
                AuditService::record_best_effort(db, &record.user_id, &record.username, true, context)
                    .await;
                let token = AuthService::issue_token(config, &record.user_id, &record.username)
                    .map_err(|e| {
                        AppError::Internal(format!("Token issuance failed: {}", e))
                    })?;
                tracing::info!("Biometric login approved for {}", record.username);
                Ok(PollOutcome::Approved { token })
            }
            BiometricStatus::Denied => {
                AuditService::record_best_effort(db, &record.user_id, &record.username, false, context)
                    .await;
                tracing::info!("Biometric login denied for {}", record.username);
                Ok(PollOutcome::Denied)
            }
            _ => Ok(PollOutcome::InvalidSession),
        }
    }

    fn is_expired(record: &SessionRecord, config: &Config) -> Result<bool> {
        let requested_at = DateTime::parse_from_rfc3339(&record.bio_requested_at)
            .map_err(|_| AppError::Internal("Invalid session timestamp".to_string()))?;
        let max_age = Duration::seconds(config.handshake.max_age_secs as i64);

        Ok(Utc::now().signed_duration_since(requested_at) > max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CreateUserRequest;

    struct Fixture {
        db: Database,
        config: Config,
        user_id: String,
        code: String,
    }

    async fn setup() -> Fixture {
        let db = Database::new(":memory:").await.unwrap();
        db.run_migrations().await.unwrap();
        let config = Config::default();

        let registered = AuthService::register(
            &db,
            config.handshake.code_length,
            CreateUserRequest {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "hunter22".to_string(),
            },
        )
        .await
        .unwrap();

        Fixture {
            db,
            config,
            user_id: registered.user.id,
            code: registered.auth_code,
        }
    }

    /// Rewind the pending session's start time by `secs` seconds.
    async fn backdate(db: &Database, user_id: &str, secs: i64) {
        let then = (Utc::now() - Duration::seconds(secs)).to_rfc3339();
        sqlx::query("UPDATE users SET bio_requested_at = ? WHERE id = ?")
            .bind(&then)
            .bind(user_id)
            .execute(db.pool())
            .await
            .unwrap();
    }

    async fn poll(fx: &Fixture, session_id: &str) -> PollOutcome {
        HandshakeService::poll_status(&fx.db, &fx.config, session_id, &AuditContext::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn approved_handshake_issues_token_exactly_once() {
        let fx = setup().await;

        let begin = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();
        assert_eq!(begin.username, "alice");

        let outcome = HandshakeService::resolve(&fx.db, &fx.user_id, true).await.unwrap();
        assert_eq!(outcome, ResolveOutcome::Resolved);

        let PollOutcome::Approved { token } = poll(&fx, &begin.session_id).await else {
            panic!("expected approval");
        };
        let claims = AuthService::validate_token(&token, &fx.config).unwrap();
        assert_eq!(claims.sub, fx.user_id);
        assert_eq!(claims.username, "alice");

        // One-shot: the same identifier is dead from now on.
        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::InvalidSession);
        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::InvalidSession);

        let logs = AuditService::list(&fx.db, &fx.user_id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].success);
    }

    #[tokio::test]
    async fn denied_handshake_is_observed_once_and_audited() {
        let fx = setup().await;

        let begin = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();
        let outcome = HandshakeService::resolve(&fx.db, &fx.user_id, false).await.unwrap();
        assert_eq!(outcome, ResolveOutcome::Resolved);

        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::Denied);
        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::InvalidSession);

        let logs = AuditService::list(&fx.db, &fx.user_id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(!logs[0].success);
    }

    #[tokio::test]
    async fn begin_with_unknown_code_is_not_found() {
        let fx = setup().await;
        let err = HandshakeService::begin_session(&fx.db, "WRONG1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn polling_an_unknown_session_is_invalid() {
        let fx = setup().await;
        assert_eq!(poll(&fx, "no-such-session").await, PollOutcome::InvalidSession);
    }

    #[tokio::test]
    async fn unresolved_session_stays_pending() {
        let fx = setup().await;
        let begin = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();

        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::Pending);
        // Polling does not mutate a fresh pending session.
        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::Pending);
    }

    #[tokio::test]
    async fn pending_session_expires_after_max_age() {
        let fx = setup().await;
        let begin = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();
        backdate(&fx.db, &fx.user_id, fx.config.handshake.max_age_secs as i64 + 1).await;

        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::Expired);
        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::InvalidSession);

        // Nothing left to resolve after the sweep.
        let outcome = HandshakeService::resolve(&fx.db, &fx.user_id, true).await.unwrap();
        assert_eq!(outcome, ResolveOutcome::NoPendingSession);
        // No token was issued, no attempt recorded.
        let logs = AuditService::list(&fx.db, &fx.user_id, 10).await.unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn session_just_under_max_age_is_still_pending() {
        let fx = setup().await;
        let begin = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();
        backdate(&fx.db, &fx.user_id, fx.config.handshake.max_age_secs as i64 - 5).await;

        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::Pending);
    }

    #[tokio::test]
    async fn second_begin_supersedes_the_first_session() {
        let fx = setup().await;
        let first = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();
        let second = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();
        assert_ne!(first.session_id, second.session_id);

        assert_eq!(poll(&fx, &first.session_id).await, PollOutcome::InvalidSession);
        assert_eq!(poll(&fx, &second.session_id).await, PollOutcome::Pending);
    }

    #[tokio::test]
    async fn resolve_without_a_session_is_a_benign_no_op() {
        let fx = setup().await;
        let outcome = HandshakeService::resolve(&fx.db, &fx.user_id, true).await.unwrap();
        assert_eq!(outcome, ResolveOutcome::NoPendingSession);

        // Still nothing live for this user afterwards.
        let begin = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();
        assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::Pending);
    }

    #[tokio::test]
    async fn resolution_outcome_is_delivered_exactly_once_per_handshake() {
        let fx = setup().await;

        // Two consecutive handshakes: each outcome observable exactly once.
        for approved in [true, false] {
            let begin = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();
            HandshakeService::resolve(&fx.db, &fx.user_id, approved).await.unwrap();

            let first = poll(&fx, &begin.session_id).await;
            match (approved, first) {
                (true, PollOutcome::Approved { .. }) | (false, PollOutcome::Denied) => {}
                (_, other) => panic!("unexpected outcome: {:?}", other),
            }
            assert_eq!(poll(&fx, &begin.session_id).await, PollOutcome::InvalidSession);
        }

        let logs = AuditService::list(&fx.db, &fx.user_id, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
    }

    #[tokio::test]
    async fn late_resolve_beats_the_expiry_sweep_on_reread() {
        let fx = setup().await;
        let begin = HandshakeService::begin_session(&fx.db, &fx.code).await.unwrap();
        backdate(&fx.db, &fx.user_id, fx.config.handshake.max_age_secs as i64 + 1).await;

        // Resolve lands before the poll sweeps: the terminal outcome wins.
        HandshakeService::resolve(&fx.db, &fx.user_id, true).await.unwrap();
        assert!(matches!(poll(&fx, &begin.session_id).await, PollOutcome::Approved { .. }));
    }
}
