use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, Result};
use crate::models::{
    CodeResponse, CreateUserRequest, CurrentUser, LoginRequest, LoginResponse, RegisterResponse,
};
use crate::services::AuthService;
use crate::AppState;

/// Register a new user
/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<ApiResponse<RegisterResponse>>> {
    let response =
        AuthService::register(&state.db, state.config.handshake.code_length, req).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Login with username and password
/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginResponse>>> {
    let response = AuthService::login(&state.db, &state.config, req).await?;
    Ok(Json(ApiResponse::success(response)))
}

/// Current login code of the authenticated user
/// GET /api/v1/auth/code
pub async fn current_code(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<CodeResponse>>> {
    let code = AuthService::current_code(&state.db, &current_user.id).await?;
    Ok(Json(ApiResponse::success(CodeResponse { code })))
}
