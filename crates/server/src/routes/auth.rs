use axum::{
    Router,
    extract::State,
    response::Json as ResponseJson,
    routing::{get, post},
};
use db::models::user::User;
use utils::{
    auth::{LoginRequest, LoginResponse, UserProfile},
    response::ApiResponse,
};

use crate::{DeploymentImpl, error::ApiError, extract::AuthUser};

/// POST /api/auth/login
pub async fn login(
    State(deployment): State<DeploymentImpl>,
    axum::Json(payload): axum::Json<LoginRequest>,
) -> Result<ResponseJson<ApiResponse<LoginResponse>>, ApiError> {
    if payload.email.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest("email and password are required".to_string()));
    }

    let session = deployment
        .auth()
        .login(&deployment.db().pool, &payload.email, &payload.password)
        .await?;

    Ok(ResponseJson(ApiResponse::success(session)))
}

/// GET /api/auth/me
pub async fn me(
    State(deployment): State<DeploymentImpl>,
    AuthUser(claims): AuthUser,
) -> Result<ResponseJson<ApiResponse<UserProfile>>, ApiError> {
    let user_id = claims.user_id().map_err(|_| ApiError::Unauthorized)?;
    let user = User::find_by_id(&deployment.db().pool, user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(ResponseJson(ApiResponse::success(user.profile())))
}

pub fn router(_deployment: &DeploymentImpl) -> Router<DeploymentImpl> {
    Router::new().nest(
        "/auth",
        Router::new()
            .route("/login", post(login))
            .route("/me", get(me)),
    )
}
