use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use speakup_types::Redacted;
use speakup_types::models::User;

use crate::credentials::CredentialStore;
use crate::error::ApiError;
use crate::notify::Notifier;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Drives an account through UNVERIFIED -> VERIFIED_NO_PASSWORD -> ACTIVE.
///
/// State lives entirely in the user record: a present verification token means
/// UNVERIFIED, a verified email without a hash means VERIFIED_NO_PASSWORD, and
/// a stored hash means ACTIVE.
#[derive(Clone)]
pub struct Activation {
    credentials: CredentialStore,
    notifier: Arc<dyn Notifier>,
    frontend_url: String,
}

impl Activation {
    pub fn new(
        credentials: CredentialStore,
        notifier: Arc<dyn Notifier>,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            notifier,
            frontend_url: frontend_url.into(),
        }
    }

    /// Create the UNVERIFIED account and mail its verification link. If the
    /// mail cannot be sent the account is deleted again, since nobody could
    /// ever activate it.
    pub async fn register(&self, name: &str, email: &str) -> Result<User, ApiError> {
        if name.trim().is_empty() || email.trim().is_empty() {
            return Err(ApiError::validation("Please provide name and email"));
        }
        if !looks_like_email(email) {
            return Err(ApiError::validation("Please provide a valid email address"));
        }

        let (user, token) = self
            .credentials
            .create_unverified_user(name, email, Utc::now())?;

        let verification_url = Redacted::new(format!(
            "{}/verify-email/{}",
            self.frontend_url.trim_end_matches('/'),
            token.expose()
        ));

        if let Err(e) = self
            .notifier
            .send_verification_email(&user.email, &user.name, &verification_url)
            .await
        {
            error!("Verification email to {} failed: {}", user.email, e);
            self.undo_registration(user.id);
            return Err(e.into());
        }

        info!("Registration initiated for {}", user.email);
        Ok(user)
    }

    fn undo_registration(&self, user_id: Uuid) {
        match self.credentials.delete_user(user_id) {
            Ok(true) => info!("Removed unverified user {} after failed dispatch", user_id),
            Ok(false) => warn!("Unverified user {} already gone during cleanup", user_id),
            Err(e) => error!("Failed to remove unverified user {}: {}", user_id, e),
        }
    }

    pub fn verify_email(&self, token: &str) -> Result<User, ApiError> {
        self.verify_email_at(token, Utc::now())
    }

    /// UNVERIFIED -> VERIFIED_NO_PASSWORD. An expired token is left in place;
    /// the only way forward from there is a fresh registration.
    pub fn verify_email_at(&self, token: &str, now: DateTime<Utc>) -> Result<User, ApiError> {
        if token.is_empty() {
            return Err(ApiError::InvalidToken);
        }

        let account = self
            .credentials
            .find_by_verification_token(token)?
            .ok_or(ApiError::InvalidToken)?;

        let expires = account
            .verification_token_expires
            .ok_or(ApiError::InvalidToken)?;
        if now > expires {
            info!("Verification token for {} expired at {}", account.user.id, expires);
            return Err(ApiError::TokenExpired);
        }

        if !self
            .credentials
            .consume_verification_token(account.user.id, token, now)?
        {
            return Err(ApiError::InvalidToken);
        }

        info!("Email verified for user {}", account.user.id);
        Ok(account.user)
    }

    /// VERIFIED_NO_PASSWORD -> ACTIVE. The verification state is not
    /// re-checked; callers pass the id handed back by `verify_email`. An
    /// unknown id is a client error like any other bad input.
    pub async fn set_password(
        &self,
        user_id: Uuid,
        password: Redacted<String>,
    ) -> Result<User, ApiError> {
        if password.expose().chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let credentials = self.credentials.clone();
        let user = tokio::task::spawn_blocking(move || {
            credentials.set_password(user_id, password.expose())
        })
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
        .map_err(|e| match e {
            ApiError::NotFound(_) => {
                warn!("Password set requested for unknown user {}", user_id);
                ApiError::validation("Failed to set password")
            }
            other => other,
        })?;

        info!("Password set for user {}", user.id);
        Ok(user)
    }
}

fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a@x.com"));
        assert!(looks_like_email("  a@x.com "));
        assert!(!looks_like_email("a.x.com"));
        assert!(!looks_like_email("@x.com"));
        assert!(!looks_like_email("a@"));
        assert!(!looks_like_email("a@b@c"));
        assert!(!looks_like_email("a b@x.com"));
    }
}
