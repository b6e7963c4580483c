//! Row types, one per table. `into_*` conversions parse the stored text back
//! into domain types.
use anyhow::{Result, anyhow};
use uuid::Uuid;

use speakup_types::models::{Agency, Feedback, User};

use crate::parse_timestamp;

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: String,
    pub email_verified: bool,
    pub verification_token: Option<String>,
    pub verification_token_expires: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    pub fn uuid(&self) -> Result<Uuid> {
        self.id
            .parse()
            .map_err(|e| anyhow!("Corrupt user id '{}': {}", self.id, e))
    }

    pub fn into_user(self) -> Result<User> {
        Ok(User {
            id: self.uuid()?,
            role: self.role.parse()?,
            name: self.name,
            email: self.email,
        })
    }
}

pub struct FeedbackRow {
    pub id: String,
    pub kind: String,
    pub department: String,
    pub agency: String,
    pub subject: String,
    pub description: String,
    pub status: String,
    pub user_id: String,
    pub file_paths: String,
    pub created_at: String,
    pub updated_at: String,
}

impl FeedbackRow {
    pub fn into_feedback(self) -> Result<Feedback> {
        Ok(Feedback {
            id: self
                .id
                .parse()
                .map_err(|e| anyhow!("Corrupt feedback id '{}': {}", self.id, e))?,
            kind: self.kind.parse()?,
            status: self.status.parse()?,
            user_id: self
                .user_id
                .parse()
                .map_err(|e| {
                    anyhow!("Corrupt user_id '{}' on feedback '{}': {}", self.user_id, self.id, e)
                })?,
            file_paths: serde_json::from_str(&self.file_paths)?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            department: self.department,
            agency: self.agency,
            subject: self.subject,
            description: self.description,
        })
    }
}

pub struct AgencyRow {
    pub id: String,
    pub code: String,
    pub name: String,
    pub department: String,
    pub customer_care_email: String,
}

impl AgencyRow {
    pub fn into_agency(self) -> Result<Agency> {
        Ok(Agency {
            id: self
                .id
                .parse()
                .map_err(|e| anyhow!("Corrupt agency id '{}': {}", self.id, e))?,
            code: self.code,
            name: self.name,
            department: self.department,
            customer_care_email: self.customer_care_email,
        })
    }
}
