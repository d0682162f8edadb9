use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Biometric session status
///
/// `Approved`/`Denied` are transient: they exist to be observed by exactly
/// one poll, which collapses the session back to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiometricStatus {
    None,
    Pending,
    Approved,
    Denied,
}

impl BiometricStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiometricStatus::None => "none",
            BiometricStatus::Pending => "pending",
            BiometricStatus::Approved => "approved",
            BiometricStatus::Denied => "denied",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => BiometricStatus::Pending,
            "approved" => BiometricStatus::Approved,
            "denied" => BiometricStatus::Denied,
            _ => BiometricStatus::None,
        }
    }
}

/// A live biometric session joined with its owning user
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub user_id: String,
    pub username: String,
    pub bio_status: String,
    pub bio_session_id: String,
    pub bio_requested_at: String,
}

impl SessionRecord {
    pub fn status(&self) -> BiometricStatus {
        BiometricStatus::from_str(&self.bio_status)
    }
}

/// Begin handshake request (browser side)
#[derive(Debug, Deserialize)]
pub struct BeginSessionRequest {
    pub code: String,
}

/// Begin handshake response
#[derive(Debug, Serialize)]
pub struct BeginSessionResponse {
    pub username: String,
    pub session_id: String,
}

/// Resolve request (mobile side)
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub approved: bool,
}

/// Outcome of a resolve call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    Resolved,
    NoPendingSession,
}

/// Outcome of a poll call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    Expired,
    InvalidSession,
    Denied,
    Approved { token: String },
}

/// Resolve response body
#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub status: ResolveOutcome,
}

/// Poll response body
#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl From<PollOutcome> for PollResponse {
    fn from(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Pending => Self { status: "pending", token: None },
            PollOutcome::Expired => Self { status: "expired", token: None },
            PollOutcome::InvalidSession => Self { status: "invalid_session", token: None },
            PollOutcome::Denied => Self { status: "denied", token: None },
            PollOutcome::Approved { token } => Self { status: "approved", token: Some(token) },
        }
    }
}
