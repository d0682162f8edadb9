use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, Result};
use crate::models::{CurrentUser, LoginLog};
use crate::services::AuditService;
use crate::AppState;

/// Recent resolved login attempts for the authenticated user
/// GET /api/v1/auth/logs
pub async fn list_logs(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<LoginLog>>>> {
    let logs = AuditService::list(&state.db, &current_user.id, 50).await?;
    Ok(Json(ApiResponse::success(logs)))
}
