pub mod jwt;
pub mod password;
pub mod roles;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::{headers::Cookie, TypedHeader};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use self::jwt::TokenError;
use self::roles::{authorize, Capability, Forbidden, OwnershipScope, Role};
use crate::{error::AppError, state::AppState};

pub const TOKEN_COOKIE_NAME: &str = "token";
const TOKEN_QUERY_PARAM: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token not provided")]
    MissingCredential,
    #[error("invalid token")]
    InvalidCredential,
    #[error("token expired")]
    ExpiredCredential,
}

impl From<TokenError> for AuthError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::Expired => AuthError::ExpiredCredential,
            TokenError::Invalid => AuthError::InvalidCredential,
        }
    }
}

impl From<AuthError> for AppError {
    fn from(value: AuthError) -> Self {
        let code = match value {
            AuthError::MissingCredential => "MISSING_CREDENTIAL",
            AuthError::InvalidCredential => "INVALID_CREDENTIAL",
            AuthError::ExpiredCredential => "EXPIRED_CREDENTIAL",
        };
        AppError::unauthorized(code, value.to_string())
    }
}

impl From<Forbidden> for AppError {
    fn from(value: Forbidden) -> Self {
        AppError::forbidden(value.to_string())
    }
}

/// The actor behind a request, rebuilt from a verified token every time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: i32,
    pub email: String,
    pub rol: Role,
}

impl AuthenticatedUser {
    pub fn scope(&self) -> OwnershipScope {
        OwnershipScope::for_actor(self.id, self.rol)
    }

    pub fn require(&self, capability: Capability) -> Result<(), Forbidden> {
        authorize(self.rol, capability)
    }
}

/// Picks the first credential found, in order: cookie, `Authorization`
/// header (with or without the `Bearer ` prefix), `token` query parameter.
pub fn select_token(
    cookie: Option<&str>,
    authorization: Option<&str>,
    query: Option<&str>,
) -> Option<String> {
    if let Some(value) = cookie.filter(|value| !value.is_empty()) {
        return Some(value.to_string());
    }

    if let Some(header) = authorization.filter(|value| !value.is_empty()) {
        let token = header.strip_prefix("Bearer ").unwrap_or(header);
        return Some(token.to_string());
    }

    query.and_then(|raw| {
        url::form_urlencoded::parse(raw.as_bytes())
            .find(|(key, value)| key == TOKEN_QUERY_PARAM && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    })
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cookies = TypedHeader::<Cookie>::from_request_parts(parts, state)
            .await
            .ok();
        let cookie_token = cookies
            .as_ref()
            .and_then(|TypedHeader(cookie)| cookie.get(TOKEN_COOKIE_NAME));
        let authorization = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let token = select_token(cookie_token, authorization, parts.uri.query())
            .ok_or(AuthError::MissingCredential)?;

        let claims = state
            .jwt
            .verify_token(&token)
            .map_err(AuthError::from)?;
        let rol = claims
            .rol
            .parse::<Role>()
            .map_err(|_| AuthError::InvalidCredential)?;

        Ok(AuthenticatedUser {
            id: claims.id,
            email: claims.email,
            rol,
        })
    }
}

/// Extractor that only admits ADMIN actors.
#[derive(Debug, Clone)]
pub struct RequireAdmin(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        gate(&user, Capability::AdminOnly)?;
        Ok(Self(user))
    }
}

/// Extractor that admits ADMIN and REVISOR actors.
#[derive(Debug, Clone)]
pub struct RequireReviewer(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<AppState> for RequireReviewer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        gate(&user, Capability::AdminOrReviewer)?;
        Ok(Self(user))
    }
}

fn gate(user: &AuthenticatedUser, capability: Capability) -> Result<(), AppError> {
    user.require(capability).map_err(|denied| {
        tracing::warn!(user_id = user.id, rol = %user.rol, ?capability, "role gate denied request");
        AppError::from(denied)
    })
}
