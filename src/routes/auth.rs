use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    auth::{password, AuthenticatedUser, TOKEN_COOKIE_NAME},
    error::{AppError, AppResult},
    models::Usuario,
    schema::usuarios,
    state::AppState,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Serialize)]
pub struct UsuarioResponse {
    pub id: i32,
    pub nombre: String,
    pub email: String,
    pub rol: String,
}

impl From<Usuario> for UsuarioResponse {
    fn from(usuario: Usuario) -> Self {
        Self {
            id: usuario.id,
            nombre: usuario.nombre,
            email: usuario.email,
            rol: usuario.rol,
        }
    }
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub usuario: UsuarioResponse,
}

fn invalid_login() -> AppError {
    AppError::unauthorized("INVALID_LOGIN", "invalid email or password")
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let email = payload
        .email
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase);
    let (email, password) = match (email, payload.password.filter(|p| !p.is_empty())) {
        (Some(email), Some(password)) => (email, password),
        _ => return Err(AppError::bad_request("email and password are required")),
    };

    let mut conn = state.db()?;
    let usuario: Usuario = match usuarios::table
        .filter(usuarios::email.eq(&email))
        .select(Usuario::as_select())
        .first(&mut conn)
        .optional()?
    {
        Some(usuario) => usuario,
        None => {
            warn!(email = %email, "login attempt for unknown email");
            return Err(invalid_login());
        }
    };
    drop(conn);

    let valid = password::verify_password(&password, &usuario.password_hash)
        .map_err(|_| invalid_login())?;
    if !valid {
        warn!(user_id = usuario.id, "login attempt with wrong password");
        return Err(invalid_login());
    }

    let token = state
        .jwt
        .generate_token(usuario.id, &usuario.email, &usuario.rol)?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_token_cookie(&state, &token)?);

    info!(user_id = usuario.id, rol = %usuario.rol, "user logged in");
    Ok((
        headers,
        Json(LoginResponse {
            token,
            usuario: usuario.into(),
        }),
    ))
}

pub async fn logout(State(state): State<AppState>) -> AppResult<(HeaderMap, Json<Value>)> {
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_token_cookie(&state)?);
    Ok((headers, Json(json!({ "mensaje": "session closed" }))))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

fn cookie_attributes(state: &AppState, parts: &mut Vec<String>) {
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    if state.config.cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.cookie_domain {
        parts.push(format!("Domain={domain}"));
    }
}

fn build_token_cookie(state: &AppState, token: &str) -> AppResult<HeaderValue> {
    let max_age = state.jwt.expiry().num_seconds();

    let mut parts = vec![format!("{TOKEN_COOKIE_NAME}={token}")];
    cookie_attributes(state, &mut parts);
    parts.push(format!("Max-Age={max_age}"));

    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid session cookie: {err}")))
}

fn build_clear_token_cookie(state: &AppState) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{TOKEN_COOKIE_NAME}=")];
    cookie_attributes(state, &mut parts);
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());

    HeaderValue::from_str(&parts.join("; "))
        .map_err(|err| AppError::internal(format!("invalid session cookie: {err}")))
}
