use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64URL;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use tracing::{info, warn};
use uuid::Uuid;

use speakup_db::models::UserRow;
use speakup_db::queries::NewUser;
use speakup_db::{Database, format_timestamp, is_unique_violation, parse_timestamp};
use speakup_types::Redacted;
use speakup_types::models::{Role, User};

use crate::error::ApiError;
use crate::password::{compare_password, hash_password};

/// How long a verification link stays usable.
pub const VERIFICATION_TTL_HOURS: i64 = 24;

const VERIFICATION_TOKEN_BYTES: usize = 32;

/// A user record together with the credential state the auth flows need.
#[derive(Debug, Clone)]
pub struct Account {
    pub user: User,
    pub password_hash: Option<Redacted<String>>,
    pub email_verified: bool,
    pub verification_token_expires: Option<DateTime<Utc>>,
}

impl Account {
    fn from_row(row: UserRow) -> anyhow::Result<Self> {
        let expires = row
            .verification_token_expires
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        let password_hash = row.password_hash.clone().map(Redacted::new);
        let email_verified = row.email_verified;
        Ok(Self {
            user: row.into_user()?,
            password_hash,
            email_verified,
            verification_token_expires: expires,
        })
    }

    pub fn check_password(&self, plain: &str) -> bool {
        compare_password(plain, self.password_hash.as_ref().map(|h| h.expose().as_str()))
    }
}

/// Persisted user records plus password hashing.
#[derive(Clone)]
pub struct CredentialStore {
    db: Arc<Database>,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create an UNVERIFIED account with a fresh single-use verification token.
    /// Returns the account and the token to mail out.
    pub fn create_unverified_user(
        &self,
        name: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<(User, Redacted<String>), ApiError> {
        let email = normalize_email(email);

        if self.db.get_user_by_email(&email)?.is_some() {
            return Err(ApiError::DuplicateEmail);
        }

        let id = Uuid::new_v4();
        let token = generate_verification_token();
        let expires = now + Duration::hours(VERIFICATION_TTL_HOURS);

        let id_str = id.to_string();
        let expires_str = format_timestamp(expires);
        let now_str = format_timestamp(now);
        let created = self.db.create_user(&NewUser {
            id: &id_str,
            name: name.trim(),
            email: &email,
            verification_token: token.expose(),
            verification_token_expires: &expires_str,
            now: &now_str,
        });

        match created {
            Ok(()) => {}
            // Lost a race against a concurrent registration of the same email.
            Err(e) if is_unique_violation(&e) => return Err(ApiError::DuplicateEmail),
            Err(e) => return Err(e.into()),
        }

        info!("Created unverified user {} <{}>", id, email);
        Ok((
            User {
                id,
                name: name.trim().to_string(),
                email,
                role: Role::User,
            },
            token,
        ))
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<Account>, ApiError> {
        let row = self.db.get_user_by_email(&normalize_email(email))?;
        Ok(row.map(Account::from_row).transpose()?)
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, ApiError> {
        let row = self.db.get_user_by_id(&id.to_string())?;
        Ok(row.map(Account::from_row).transpose()?)
    }

    pub fn find_by_verification_token(&self, token: &str) -> Result<Option<Account>, ApiError> {
        let row = self.db.get_user_by_verification_token(token)?;
        Ok(row.map(Account::from_row).transpose()?)
    }

    /// Clear the token fields and flag the email verified. False when the token
    /// was consumed concurrently.
    pub fn consume_verification_token(
        &self,
        id: Uuid,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        Ok(self
            .db
            .mark_email_verified(&id.to_string(), token, &format_timestamp(now))?)
    }

    /// Re-hash and persist. CPU-bound: call from `spawn_blocking`.
    pub fn set_password(&self, id: Uuid, plain: &str) -> Result<User, ApiError> {
        let hash = hash_password(plain)?;
        let updated = self
            .db
            .set_password_hash(&id.to_string(), &hash, &format_timestamp(Utc::now()))?;
        if !updated {
            return Err(ApiError::NotFound("User"));
        }

        self.find_by_id(id)?
            .map(|account| account.user)
            .ok_or(ApiError::NotFound("User"))
    }

    /// Best-effort removal used to undo a registration.
    pub fn delete_user(&self, id: Uuid) -> anyhow::Result<bool> {
        self.db.delete_user(&id.to_string())
    }

    pub fn count_users(&self) -> Result<u64, ApiError> {
        Ok(self.db.count_users()?)
    }

    /// Promote existing accounts to admin. Unknown emails are skipped with a
    /// warning; they can be promoted on a later start once registered.
    pub fn promote_admins(&self, emails: &[String]) -> anyhow::Result<usize> {
        let now = format_timestamp(Utc::now());
        let mut promoted = 0;
        for email in emails {
            let email = normalize_email(email);
            if self.db.set_role_by_email(&email, Role::Admin.as_str(), &now)? {
                promoted += 1;
            } else {
                warn!("Admin bootstrap: no account for {}", email);
            }
        }
        Ok(promoted)
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn generate_verification_token() -> Redacted<String> {
    let mut bytes = [0u8; VERIFICATION_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    Redacted::new(B64URL.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CredentialStore {
        CredentialStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn duplicate_email_rejected_case_insensitively() {
        let store = store();
        store.create_unverified_user("Alice", "a@x.com", Utc::now()).unwrap();
        let err = store
            .create_unverified_user("Alice Again", " A@X.com ", Utc::now())
            .unwrap_err();
        assert!(matches!(err, ApiError::DuplicateEmail));
    }

    #[test]
    fn new_user_has_token_and_no_password() {
        let store = store();
        let now = Utc::now();
        let (user, token) = store.create_unverified_user("Alice", "a@x.com", now).unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(token.expose().len(), 43);

        let account = store.find_by_verification_token(token.expose()).unwrap().unwrap();
        assert_eq!(account.user.id, user.id);
        assert!(account.password_hash.is_none());
        assert!(!account.email_verified);
        let expires = account.verification_token_expires.unwrap();
        assert!((expires - now - Duration::hours(24)).num_seconds().abs() <= 1);
        assert!(!account.check_password(""));
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate_verification_token();
        let b = generate_verification_token();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn set_password_then_check() {
        let store = store();
        let (user, _) = store.create_unverified_user("Bob", "b@x.com", Utc::now()).unwrap();
        store.set_password(user.id, "Secret123").unwrap();

        let account = store.find_by_email("b@x.com").unwrap().unwrap();
        assert!(account.check_password("Secret123"));
        assert!(!account.check_password("secret123"));
    }

    #[test]
    fn set_password_for_unknown_user_is_not_found() {
        let err = store().set_password(Uuid::new_v4(), "Secret123").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn promote_admins_skips_unknown() {
        let store = store();
        let (user, _) = store.create_unverified_user("Root", "root@x.com", Utc::now()).unwrap();
        let promoted = store
            .promote_admins(&["ROOT@x.com".to_string(), "ghost@x.com".to_string()])
            .unwrap();
        assert_eq!(promoted, 1);
        assert_eq!(store.find_by_id(user.id).unwrap().unwrap().user.role, Role::Admin);
    }
}
