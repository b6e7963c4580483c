use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::IntoResponse,
};

use speakup_types::api::{
    AuthResponse, CountResponse, LoginRequest, MessageResponse, RegisterRequest,
    SetPasswordRequest, UserResponse, VerifiedUser, VerifyEmailResponse,
};

use crate::error::ApiError;
use crate::middleware::Authenticated;
use crate::state::AppState;

use super::json_body;

/// POST /auth/register
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = json_body(payload)?;
    let name = req.name.unwrap_or_default();
    let email = req.email.unwrap_or_default();

    state.activation.register(&name, &email).await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::ok(
            "Registration successful. Please check your email to verify your account.",
        )),
    ))
}

/// GET /auth/verify-email/{token}
pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<VerifyEmailResponse>, ApiError> {
    let user = state.activation.verify_email(&token)?;

    Ok(Json(VerifyEmailResponse {
        success: true,
        user: VerifiedUser {
            id: user.id,
            name: user.name,
            email: user.email,
        },
    }))
}

/// POST /auth/set-password. Activates the account and signs the user in.
pub async fn set_password(
    State(state): State<AppState>,
    payload: Result<Json<SetPasswordRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let req = json_body(payload)?;
    let (Some(user_id), Some(password)) = (req.user_id, req.password) else {
        return Err(ApiError::validation("Please provide userId and password"));
    };

    let user = state.activation.set_password(user_id, password).await?;
    let token = state.sessions.issue_token(user.id)?;

    Ok(Json(AuthResponse {
        success: true,
        token,
        user,
    }))
}

/// POST /auth/login. The token is returned in the body and mirrored in the
/// `Authorization` response header.
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = json_body(payload)?;
    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(ApiError::validation("Please provide email and password"));
    };

    let (token, user) = state.sessions.login(&email, password).await?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| anyhow::anyhow!("Unencodable token header: {}", e))?;

    Ok((
        [(header::AUTHORIZATION, bearer)],
        Json(AuthResponse {
            success: true,
            token,
            user,
        }),
    ))
}

/// GET /auth/me
pub async fn me(Authenticated(user): Authenticated) -> Json<UserResponse> {
    Json(UserResponse {
        success: true,
        user,
    })
}

/// GET /auth/total-users
pub async fn total_users(State(state): State<AppState>) -> Result<Json<CountResponse>, ApiError> {
    let count = state.credentials.count_users()?;
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}
