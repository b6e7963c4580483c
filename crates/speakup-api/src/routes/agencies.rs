use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use serde::Deserialize;

use speakup_types::api::DataResponse;
use speakup_types::models::Agency;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AgencyParams {
    pub department: Option<String>,
}

/// GET /agencies?department=
pub async fn list_agencies(
    State(state): State<AppState>,
    params: Result<Query<AgencyParams>, QueryRejection>,
) -> Result<Json<DataResponse<Vec<Agency>>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::validation(e.body_text()))?;
    let agencies = state.agencies.list(params.department.as_deref())?;
    Ok(Json(DataResponse::ok(agencies)))
}

/// GET /agencies/{code}
pub async fn get_agency(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<DataResponse<Agency>>, ApiError> {
    let agency = state.agencies.get(&code)?;
    Ok(Json(DataResponse::ok(agency)))
}
