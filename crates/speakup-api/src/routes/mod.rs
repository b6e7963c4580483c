pub mod agencies;
pub mod auth;
pub mod feedback;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, rejection::JsonRejection},
    middleware,
    routing::get,
    routing::post,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::attachments::{MAX_FILE_SIZE, MAX_FILES};
use crate::error::{ApiError, expose_error_details};
use crate::middleware::require_auth;
use crate::state::AppState;

/// Room for a full batch of attachments plus the text fields. Single files
/// over the per-file limit still reach validation and get a proper error.
const BODY_LIMIT: usize = MAX_FILES * MAX_FILE_SIZE + 1024 * 1024;

/// Assemble the whole HTTP surface: JSON API under `/api`, stored
/// attachments under `/uploads`, and a liveness check.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/verify-email/{token}", get(auth::verify_email))
        .route("/auth/set-password", post(auth::set_password))
        .route("/auth/login", post(auth::login))
        .route("/auth/total-users", get(auth::total_users))
        .route("/agencies", get(agencies::list_agencies))
        .route("/agencies/{code}", get(agencies::get_agency));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route(
            "/feedback",
            post(feedback::create_feedback).get(feedback::list_feedback),
        )
        .route(
            "/feedback/{id}",
            get(feedback::get_feedback)
                .put(feedback::update_feedback)
                .delete(feedback::delete_feedback),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(BODY_LIMIT));

    let mut app = Router::new()
        .nest("/api", api)
        .route("/health", get(|| async { "ok" }));

    if let Some(dir) = &state.settings.upload_dir {
        app = app.nest_service("/uploads", ServeDir::new(dir));
    }

    if state.settings.expose_error_details {
        app = app.layer(middleware::from_fn(expose_error_details));
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Unwrap a JSON body, reporting malformed input as a validation error
/// instead of axum's plain-text rejection.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::validation(e.body_text()))
}
