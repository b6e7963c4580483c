use axum::{
    Json,
    extract::{
        FromRequest, Multipart, Path, Query, Request, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::QueryRejection,
    },
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use speakup_types::api::{
    DataResponse, ListResponse, MessageResponse, Pagination, UpdateStatusRequest,
};
use speakup_types::models::{Feedback, FeedbackStatus, FeedbackType, Role};

use crate::attachments::{MAX_FILES, Upload};
use crate::error::ApiError;
use crate::feedback::{FeedbackFields, FeedbackFilters, PageRequest, Scope};
use crate::middleware::{Authenticated, RequestContext, authorize};
use crate::state::AppState;

use super::json_body;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub department: Option<String>,
    pub status: Option<String>,
}

/// POST /feedback (multipart)
pub async fn create_feedback(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let multipart = multipart.map_err(|e| ApiError::validation(e.body_text()))?;
    let form = FeedbackForm::read(multipart).await?;
    let feedback = state
        .feedback
        .create(user.id, form.fields, &form.uploads)
        .await?;

    Ok((StatusCode::CREATED, Json(DataResponse::ok(feedback))))
}

/// GET /feedback. Admins see every record, users only their own.
pub async fn list_feedback(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ListResponse<Feedback>>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::validation(e.body_text()))?;
    let filters = FeedbackFilters {
        kind: non_blank(params.kind)
            .map(|k| k.parse::<FeedbackType>())
            .transpose()
            .map_err(|e| ApiError::validation(e.to_string()))?,
        department: non_blank(params.department),
        status: non_blank(params.status)
            .map(|s| s.parse::<FeedbackStatus>())
            .transpose()
            .map_err(|e| ApiError::validation(e.to_string()))?,
    };
    // Unparsable paging values fall back to the defaults.
    let page = PageRequest::new(
        params.page.and_then(|p| p.trim().parse().ok()),
        params.limit.and_then(|l| l.trim().parse().ok()),
    );

    let result = state.feedback.list(Scope::for_user(&user), &filters, page)?;
    let pages = result.pages();

    Ok(Json(ListResponse {
        success: true,
        count: result.total,
        data: result.items,
        pagination: Pagination {
            page: result.page,
            limit: result.limit,
            pages,
        },
    }))
}

/// GET /feedback/{id}
pub async fn get_feedback(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<Feedback>>, ApiError> {
    let feedback = state.feedback.get(parse_id(&id)?, Scope::for_user(&user))?;
    Ok(Json(DataResponse::ok(feedback)))
}

/// PUT /feedback/{id}. A JSON body is the admin status change; a multipart
/// body is the owner editing content and attachments.
pub async fn update_feedback(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    req: Request,
) -> Result<Json<DataResponse<Feedback>>, ApiError> {
    let id = parse_id(&id)?;

    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let feedback = if is_multipart {
        let user = authorize(&ctx, &[Role::User, Role::Admin])?;
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| ApiError::validation(e.body_text()))?;
        let form = FeedbackForm::read(multipart).await?;

        state
            .feedback
            .update_content(id, user.id, form.fields, &form.uploads, form.keep_files)
            .await?
    } else {
        authorize(&ctx, &[Role::Admin])?;
        let body = json_body(Json::<UpdateStatusRequest>::from_request(req, &state).await)?;
        let status = non_blank(body.status)
            .ok_or_else(|| ApiError::validation("Please provide status"))?
            .parse::<FeedbackStatus>()
            .map_err(|e| ApiError::validation(e.to_string()))?;

        state.feedback.update_status(id, status)?
    };

    Ok(Json(DataResponse::ok(feedback)))
}

/// DELETE /feedback/{id}. Owners delete their own records, admins any.
pub async fn delete_feedback(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.feedback.delete(parse_id(&id)?, Scope::for_user(&user)).await? {
        return Err(ApiError::NotFound("Feedback"));
    }
    Ok(Json(MessageResponse::ok("Feedback deleted")))
}

// -- Multipart --

#[derive(Default)]
struct FeedbackForm {
    fields: FeedbackFields,
    uploads: Vec<Upload>,
    keep_files: Vec<String>,
}

impl FeedbackForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();

            if name == "files" {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await.map_err(multipart_error)?;

                // Browsers send an empty part when the file input is left blank.
                if file_name.is_empty() && data.is_empty() {
                    continue;
                }
                if form.uploads.len() == MAX_FILES {
                    return Err(ApiError::InvalidFile(format!(
                        "At most {} files may be attached",
                        MAX_FILES
                    )));
                }
                form.uploads.push(Upload {
                    file_name,
                    content_type,
                    data,
                });
                continue;
            }

            let value = field.text().await.map_err(multipart_error)?;
            match name.as_str() {
                "type" => form.fields.kind = Some(value),
                "department" => form.fields.department = Some(value),
                "agency" => form.fields.agency = Some(value),
                "subject" => form.fields.subject = Some(value),
                "description" => form.fields.description = Some(value),
                "keepFiles" => form.keep_files.push(value),
                other => debug!("Ignoring multipart field {:?}", other),
            }
        }

        Ok(form)
    }
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::InvalidFile("Upload is too large".into())
    } else {
        ApiError::validation(format!("Malformed form data: {}", e.body_text()))
    }
}

/// A malformed id cannot name any record.
fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound("Feedback"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
