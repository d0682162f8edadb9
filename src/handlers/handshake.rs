use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    Extension, Json,
};
use std::net::SocketAddr;

use crate::error::{ApiResponse, Result};
use crate::models::{
    AuditContext, BeginSessionRequest, BeginSessionResponse, CurrentUser, PollResponse,
    ResolveRequest, ResolveResponse,
};
use crate::services::HandshakeService;
use crate::AppState;

/// Begin a biometric handshake from a login code
/// POST /api/v1/auth/biometric/begin
pub async fn begin(
    State(state): State<AppState>,
    Json(req): Json<BeginSessionRequest>,
) -> Result<Json<ApiResponse<BeginSessionResponse>>> {
    let response = HandshakeService::begin_session(&state.db, &req.code).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Approve or deny the caller's pending handshake
/// POST /api/v1/auth/biometric/resolve
pub async fn resolve(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ApiResponse<ResolveResponse>>> {
    let status = HandshakeService::resolve(&state.db, &current_user.id, req.approved).await?;
    Ok(Json(ApiResponse::success(ResolveResponse { status })))
}

/// Poll a handshake session for its outcome
/// GET /api/v1/auth/biometric/poll/:session_id
///
/// All five outcomes are returned as data with 200; `invalid_session` tells
/// the browser to stop polling.
pub async fn poll(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<PollResponse>>> {
    let context = AuditContext {
        ip_address: Some(addr.ip().to_string()),
        user_agent: headers
            .get("user-agent")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string()),
    };

    let outcome =
        HandshakeService::poll_status(&state.db, &state.config, &session_id, &context).await?;
    Ok(Json(ApiResponse::success(PollResponse::from(outcome))))
}
