use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{debug, info};
use uuid::Uuid;

use speakup_types::Redacted;
use speakup_types::api::Claims;
use speakup_types::models::User;

use crate::credentials::CredentialStore;
use crate::error::{ApiError, AuthError};

/// Fixed bearer token lifetime.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Issues and resolves HS256 bearer tokens whose only payload is the user id.
#[derive(Clone)]
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    credentials: CredentialStore,
}

impl SessionIssuer {
    pub fn new(secret: &Redacted<String>, credentials: CredentialStore) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.expose().as_bytes()),
            decoding: DecodingKey::from_secret(secret.expose().as_bytes()),
            credentials,
        }
    }

    pub fn issue_token(&self, user_id: Uuid) -> Result<String, ApiError> {
        self.issue_token_at(user_id, Utc::now())
    }

    pub fn issue_token_at(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<String, ApiError> {
        let claims = Claims {
            sub: user_id,
            iat: now.timestamp() as usize,
            exp: (now + Duration::hours(SESSION_TTL_HOURS)).timestamp() as usize,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| anyhow::anyhow!("Token signing failed: {}", e))?;
        Ok(token)
    }

    /// Turn a bearer token into the current user record. The account is
    /// re-read so a deleted user cannot keep using an unexpired token.
    pub fn resolve(&self, token: &str) -> Result<User, ApiError> {
        if token.is_empty() {
            return Err(AuthError::Missing.into());
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => {
                    debug!("Rejected bearer token: {}", e);
                    AuthError::Invalid
                }
            })?
            .claims;

        self.credentials
            .find_by_id(claims.sub)?
            .map(|account| account.user)
            .ok_or(AuthError::UserNotFound.into())
    }

    /// Check email + password and issue a session. Unknown email, wrong
    /// password and a not-yet-activated account all look the same. There is no
    /// lockout.
    pub async fn login(
        &self,
        email: &str,
        password: Redacted<String>,
    ) -> Result<(String, User), ApiError> {
        if email.trim().is_empty() || password.expose().is_empty() {
            return Err(ApiError::validation("Please provide email and password"));
        }

        let account = self
            .credentials
            .find_by_email(email)?
            .ok_or(ApiError::InvalidCredentials)?;

        let (matches, account) = tokio::task::spawn_blocking(move || {
            (account.check_password(password.expose()), account)
        })
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?;

        if !matches {
            return Err(ApiError::InvalidCredentials);
        }

        let token = self.issue_token(account.user.id)?;
        info!("User {} logged in", account.user.id);
        Ok((token, account.user))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use speakup_db::Database;

    use super::*;

    fn issuer() -> (SessionIssuer, CredentialStore) {
        let credentials = CredentialStore::new(Arc::new(Database::open_in_memory().unwrap()));
        let issuer = SessionIssuer::new(&Redacted::new("test-secret".into()), credentials.clone());
        (issuer, credentials)
    }

    #[test]
    fn issued_token_resolves_to_user() {
        let (issuer, credentials) = issuer();
        let (user, _) = credentials.create_unverified_user("Alice", "a@x.com", Utc::now()).unwrap();
        let token = issuer.issue_token(user.id).unwrap();
        assert_eq!(issuer.resolve(&token).unwrap().id, user.id);
    }

    #[test]
    fn expired_token_is_rejected() {
        let (issuer, credentials) = issuer();
        let (user, _) = credentials.create_unverified_user("Alice", "a@x.com", Utc::now()).unwrap();
        let token = issuer
            .issue_token_at(user.id, Utc::now() - Duration::hours(25))
            .unwrap();
        let err = issuer.resolve(&token).unwrap_err();
        assert!(matches!(err, ApiError::Auth(AuthError::Expired)));
    }

    #[test]
    fn foreign_signature_is_invalid() {
        let (issuer, credentials) = issuer();
        let (user, _) = credentials.create_unverified_user("Alice", "a@x.com", Utc::now()).unwrap();
        let other = SessionIssuer::new(&Redacted::new("other-secret".into()), credentials);
        let token = other.issue_token(user.id).unwrap();
        assert!(matches!(issuer.resolve(&token), Err(ApiError::Auth(AuthError::Invalid))));
        assert!(matches!(issuer.resolve("garbage"), Err(ApiError::Auth(AuthError::Invalid))));
        assert!(matches!(issuer.resolve(""), Err(ApiError::Auth(AuthError::Missing))));
    }

    #[test]
    fn deleted_user_is_not_found() {
        let (issuer, credentials) = issuer();
        let (user, _) = credentials.create_unverified_user("Alice", "a@x.com", Utc::now()).unwrap();
        let token = issuer.issue_token(user.id).unwrap();
        credentials.delete_user(user.id).unwrap();
        assert!(matches!(issuer.resolve(&token), Err(ApiError::Auth(AuthError::UserNotFound))));
    }

    #[tokio::test]
    async fn login_requires_activation() {
        let (issuer, credentials) = issuer();
        credentials.create_unverified_user("Alice", "a@x.com", Utc::now()).unwrap();
        let err = issuer
            .login("a@x.com", Redacted::new("anything".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
    }
}
