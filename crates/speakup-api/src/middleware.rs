use std::convert::Infallible;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};

use speakup_types::models::{Role, User};

use crate::error::{ApiError, AuthError};
use crate::state::AppState;

/// Who is making the request, as established by `require_auth`.
#[derive(Debug, Clone, Default)]
pub enum Identity {
    Authenticated(User),
    #[default]
    Anonymous,
}

/// Typed per-request context attached to the request extensions by the guard.
/// Routes outside the guard see `Identity::Anonymous`.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Identity,
}

impl RequestContext {
    pub fn authenticated(user: User) -> Self {
        Self {
            identity: Identity::Authenticated(user),
        }
    }

    pub fn user(&self) -> Option<&User> {
        match &self.identity {
            Identity::Authenticated(user) => Some(user),
            Identity::Anonymous => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.user().is_some_and(|u| u.role == Role::Admin)
    }
}

/// Extract and validate the bearer token, resolve it to a user and attach the
/// identity to the request. Any failure is a 401.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())?;
    let user = state.sessions.resolve(token)?;

    req.extensions_mut().insert(RequestContext::authenticated(user));
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::Invalid)?;

    value.strip_prefix("Bearer ").ok_or(AuthError::Invalid)
}

/// Role check against an identity the guard already resolved: 401 when there
/// is none, 403 when the role is not in `allowed`.
pub fn authorize<'a>(ctx: &'a RequestContext, allowed: &[Role]) -> Result<&'a User, ApiError> {
    let user = ctx.user().ok_or(AuthError::Missing)?;
    if !allowed.contains(&user.role) {
        return Err(ApiError::Forbidden);
    }
    Ok(user)
}

impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<RequestContext>().cloned().unwrap_or_default())
    }
}

/// Extractor for handlers that only make sense with a signed-in caller.
pub struct Authenticated(pub User);

impl<S: Send + Sync> FromRequestParts<S> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<RequestContext>().map(|ctx| &ctx.identity) {
            Some(Identity::Authenticated(user)) => Ok(Self(user.clone())),
            _ => Err(AuthError::Missing.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use uuid::Uuid;

    use super::*;

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Test".into(),
            email: "t@x.com".into(),
            role,
        }
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthError::Missing));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(bearer_token(&headers), Err(AuthError::Invalid));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(bearer_token(&headers), Err(AuthError::Invalid));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Ok("abc"));
    }

    #[test]
    fn authorize_checks_identity_then_role() {
        let anonymous = RequestContext::default();
        assert!(matches!(
            authorize(&anonymous, &[Role::User]),
            Err(ApiError::Auth(AuthError::Missing))
        ));

        let member = RequestContext::authenticated(user(Role::User));
        assert!(matches!(authorize(&member, &[Role::Admin]), Err(ApiError::Forbidden)));
        assert!(authorize(&member, &[Role::User, Role::Admin]).is_ok());

        let admin = RequestContext::authenticated(user(Role::Admin));
        assert!(authorize(&admin, &[Role::Admin]).is_ok());
        assert!(admin.is_admin());
        assert!(!member.is_admin());
    }
}
