use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use speakup_db::queries::{ContentUpdate, FeedbackQuery, NewFeedback};
use speakup_db::{Database, format_timestamp};
use speakup_types::models::{Feedback, FeedbackStatus, FeedbackType, Role, User};

use crate::attachments::{AttachmentManager, MAX_FILES, StagedFiles, Upload};
use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Text fields of a feedback submission as they arrive from the client.
/// On create every field is required; on update `None` means "unchanged".
#[derive(Debug, Clone, Default)]
pub struct FeedbackFields {
    pub kind: Option<String>,
    pub department: Option<String>,
    pub agency: Option<String>,
    pub subject: Option<String>,
    pub description: Option<String>,
}

/// Which records a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Owner(Uuid),
}

impl Scope {
    /// Admins see everything; everyone else only their own records.
    pub fn for_user(user: &User) -> Self {
        match user.role {
            Role::Admin => Self::All,
            Role::User => Self::Owner(user.id),
        }
    }

    fn owner(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Owner(id) => Some(id.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackFilters {
    pub kind: Option<FeedbackType>,
    pub department: Option<String>,
    pub status: Option<FeedbackStatus>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Clamp client-supplied values: page starts at 1, limit within 1..=100.
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug)]
pub struct FeedbackPage {
    pub items: Vec<Feedback>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl FeedbackPage {
    pub fn pages(&self) -> u32 {
        self.total.div_ceil(self.limit as u64) as u32
    }
}

/// Feedback CRUD, status workflow and ownership scoping. Attachments go
/// through the stage/commit/rollback protocol so a failed write never leaves
/// files behind that no record references.
#[derive(Clone)]
pub struct FeedbackManager {
    db: Arc<Database>,
    attachments: AttachmentManager,
}

impl FeedbackManager {
    pub fn new(db: Arc<Database>, attachments: AttachmentManager) -> Self {
        Self { db, attachments }
    }

    pub async fn create(
        &self,
        owner: Uuid,
        fields: FeedbackFields,
        uploads: &[Upload],
    ) -> Result<Feedback, ApiError> {
        let kind = required(&fields.kind, "type")?
            .parse::<FeedbackType>()
            .map_err(|e| ApiError::validation(e.to_string()))?;
        let department = required(&fields.department, "department")?;
        let agency = required(&fields.agency, "agency")?;
        let subject = required(&fields.subject, "subject")?;
        let description = required(&fields.description, "description")?;

        let staged = self.attachments.stage(uploads).await?;

        let id = Uuid::new_v4().to_string();
        let owner_id = owner.to_string();
        let now = format_timestamp(Utc::now());
        let inserted = self
            .db
            .insert_feedback(&NewFeedback {
                id: &id,
                kind: kind.as_str(),
                department,
                agency,
                subject,
                description,
                user_id: &owner_id,
                file_paths: staged.names(),
                now: &now,
            })
            .and_then(|row| row.into_feedback());

        let feedback = self.settle(staged, inserted.map(Some)).await?;
        let feedback =
            feedback.ok_or_else(|| anyhow::anyhow!("Feedback {} missing after insert", id))?;

        info!(
            "Feedback {} created by {} with {} attachments",
            feedback.id,
            owner,
            feedback.file_paths.len()
        );
        Ok(feedback)
    }

    /// Newest first, recomputed on every call.
    pub fn list(
        &self,
        scope: Scope,
        filters: &FeedbackFilters,
        page: PageRequest,
    ) -> Result<FeedbackPage, ApiError> {
        let owner = scope.owner();
        let (rows, total) = self.db.list_feedback(&FeedbackQuery {
            owner: owner.as_deref(),
            kind: filters.kind.as_ref().map(FeedbackType::as_str),
            department: filters.department.as_deref(),
            status: filters.status.as_ref().map(FeedbackStatus::as_str),
            limit: Some(page.limit),
            offset: page.offset(),
        })?;

        let items = rows
            .into_iter()
            .map(|row| row.into_feedback())
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(FeedbackPage {
            items,
            total,
            page: page.page,
            limit: page.limit,
        })
    }

    /// A record owned by someone else is reported exactly like a missing one.
    pub fn get(&self, id: Uuid, scope: Scope) -> Result<Feedback, ApiError> {
        let owner = scope.owner();
        self.db
            .get_feedback(&id.to_string(), owner.as_deref())?
            .map(|row| row.into_feedback())
            .transpose()?
            .ok_or(ApiError::NotFound("Feedback"))
    }

    /// Role gating happens in front of this call; here any caller may move the
    /// record to any of the four states.
    pub fn update_status(&self, id: Uuid, status: FeedbackStatus) -> Result<Feedback, ApiError> {
        let row = self
            .db
            .update_feedback_status(
                &id.to_string(),
                status.as_str(),
                &format_timestamp(Utc::now()),
            )?
            .ok_or(ApiError::NotFound("Feedback"))?;

        info!("Feedback {} moved to {}", id, status);
        Ok(row.into_feedback()?)
    }

    /// Owner edit of text fields and attachments. The new attachment list is
    /// `keep ++ uploads`; kept names must already belong to the record and
    /// files dropped from the list are removed once the update is saved.
    pub async fn update_content(
        &self,
        id: Uuid,
        owner: Uuid,
        fields: FeedbackFields,
        uploads: &[Upload],
        keep: Vec<String>,
    ) -> Result<Feedback, ApiError> {
        let current = self.get(id, Scope::Owner(owner))?;

        if current.status != FeedbackStatus::Pending {
            return Err(ApiError::validation(
                "Feedback can no longer be edited once it is being processed",
            ));
        }

        let kind = optional(&fields.kind, "type")?
            .map(|k| k.parse::<FeedbackType>().map_err(|e| ApiError::validation(e.to_string())))
            .transpose()?;
        let department = optional(&fields.department, "department")?;
        let agency = optional(&fields.agency, "agency")?;
        let subject = optional(&fields.subject, "subject")?;
        let description = optional(&fields.description, "description")?;

        let mut kept: Vec<String> = Vec::with_capacity(keep.len());
        for name in keep {
            if !current.file_paths.contains(&name) {
                return Err(ApiError::validation(format!(
                    "{} is not attached to this feedback",
                    name
                )));
            }
            if !kept.contains(&name) {
                kept.push(name);
            }
        }

        if kept.len() + uploads.len() > MAX_FILES {
            return Err(ApiError::InvalidFile(format!(
                "At most {} files may be attached",
                MAX_FILES
            )));
        }

        let staged = self.attachments.stage(uploads).await?;

        let file_paths: Vec<String> = kept.iter().chain(staged.names()).cloned().collect();
        let id_str = id.to_string();
        let owner_str = owner.to_string();
        let now = format_timestamp(Utc::now());
        let updated = self
            .db
            .update_feedback_content(
                &id_str,
                &owner_str,
                &ContentUpdate {
                    kind: kind.as_ref().map(FeedbackType::as_str),
                    department,
                    agency,
                    subject,
                    description,
                    file_paths: &file_paths,
                    now: &now,
                },
            )
            .and_then(|row| row.map(|r| r.into_feedback()).transpose());

        let feedback = self
            .settle(staged, updated)
            .await?
            .ok_or(ApiError::NotFound("Feedback"))?;

        let dropped: Vec<String> = current
            .file_paths
            .into_iter()
            .filter(|name| !kept.contains(name))
            .collect();
        if !dropped.is_empty() {
            let failed = self.attachments.remove_all(&dropped).await;
            if failed > 0 {
                warn!("Feedback {}: {} detached files could not be removed", id, failed);
            }
        }

        info!("Feedback {} content updated by {}", id, owner);
        Ok(feedback)
    }

    /// Remove every attachment, then the record. Attachments that fail to
    /// delete are logged and left behind; the record is still removed.
    pub async fn delete(&self, id: Uuid, scope: Scope) -> Result<bool, ApiError> {
        let feedback = match self.get(id, scope) {
            Ok(feedback) => feedback,
            Err(ApiError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let failed = self.attachments.remove_all(&feedback.file_paths).await;
        if failed > 0 {
            warn!(
                "Feedback {}: {} of {} attachments leaked on delete",
                id,
                failed,
                feedback.file_paths.len()
            );
        }

        let deleted = self.db.delete_feedback(&id.to_string())?;
        if deleted {
            info!("Feedback {} deleted", id);
        }
        Ok(deleted)
    }

    /// Commit staged files if the write produced a record, otherwise roll
    /// them back before surfacing the outcome. Rollback problems are logged
    /// inside `rollback` and never replace the original error.
    async fn settle(
        &self,
        staged: StagedFiles,
        outcome: anyhow::Result<Option<Feedback>>,
    ) -> Result<Option<Feedback>, ApiError> {
        match outcome {
            Ok(Some(feedback)) => {
                self.attachments.commit(staged);
                Ok(Some(feedback))
            }
            Ok(None) => {
                self.attachments.rollback(&staged).await;
                Ok(None)
            }
            Err(e) => {
                self.attachments.rollback(&staged).await;
                Err(e.into())
            }
        }
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ApiError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ApiError::validation(format!("Please provide {}", field))),
    }
}

fn optional<'a>(value: &'a Option<String>, field: &str) -> Result<Option<&'a str>, ApiError> {
    match value.as_deref().map(str::trim) {
        None => Ok(None),
        Some("") => Err(ApiError::validation(format!("{} cannot be blank", field))),
        Some(v) => Ok(Some(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_clamps() {
        let p = PageRequest::new(Some(0), Some(1000));
        assert_eq!((p.page, p.limit), (1, MAX_PAGE_SIZE));
        let p = PageRequest::new(Some(3), Some(20));
        assert_eq!(p.offset(), 40);
        assert_eq!(PageRequest::default().limit, DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn page_count_rounds_up() {
        let page = FeedbackPage { items: vec![], total: 21, page: 1, limit: 10 };
        assert_eq!(page.pages(), 3);
        let empty = FeedbackPage { items: vec![], total: 0, page: 1, limit: 10 };
        assert_eq!(empty.pages(), 0);
    }

    #[test]
    fn field_helpers() {
        assert!(required(&None, "subject").is_err());
        assert!(required(&Some("   ".into()), "subject").is_err());
        assert_eq!(required(&Some(" x ".into()), "subject").unwrap(), "x");
        assert_eq!(optional(&None, "subject").unwrap(), None);
        assert!(optional(&Some("".into()), "subject").is_err());
    }
}
