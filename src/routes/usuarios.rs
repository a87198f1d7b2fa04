use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::{
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::auth::UsuarioResponse;
use crate::{
    auth::{password, roles::Role, RequireAdmin},
    error::{AppError, AppResult},
    models::{NewUsuario, Usuario},
    schema::usuarios,
    state::AppState,
    utils::fields::trimmed_or_none,
};

const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Deserialize)]
pub struct CreateUsuarioRequest {
    pub nombre: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub rol: Option<String>,
}

#[derive(Serialize)]
pub struct UsuarioListResponse {
    pub usuarios: Vec<UsuarioResponse>,
}

#[derive(Serialize)]
pub struct UsuarioCreatedResponse {
    pub mensaje: &'static str,
    pub usuario: UsuarioResponse,
}

pub async fn list_usuarios(
    State(state): State<AppState>,
    _admin: RequireAdmin,
) -> AppResult<Json<UsuarioListResponse>> {
    let mut conn = state.db()?;
    let rows: Vec<Usuario> = usuarios::table
        .order(usuarios::id.asc())
        .select(Usuario::as_select())
        .load(&mut conn)?;

    Ok(Json(UsuarioListResponse {
        usuarios: rows.into_iter().map(UsuarioResponse::from).collect(),
    }))
}

pub async fn create_usuario(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(payload): Json<CreateUsuarioRequest>,
) -> AppResult<(StatusCode, Json<UsuarioCreatedResponse>)> {
    let nombre = trimmed_or_none(payload.nombre.as_deref());
    let email = trimmed_or_none(payload.email.as_deref()).map(|email| email.to_lowercase());
    let (nombre, email, plain) = match (nombre, email, payload.password) {
        (Some(nombre), Some(email), Some(plain)) => (nombre, email, plain),
        _ => {
            return Err(AppError::bad_request(
                "nombre, email and password are required",
            ))
        }
    };
    if !email.contains('@') {
        return Err(AppError::bad_request("email is not valid"));
    }
    if plain.chars().count() < MIN_PASSWORD_CHARS {
        return Err(AppError::bad_request(format!(
            "password must have at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    let rol = match trimmed_or_none(payload.rol.as_deref()) {
        Some(raw) => raw
            .parse::<Role>()
            .map_err(|err| AppError::bad_request(err.to_string()))?,
        None => Role::Asesor,
    };

    let new_usuario = NewUsuario {
        nombre,
        email,
        password_hash: password::hash_password(&plain)?,
        rol: rol.as_str().to_string(),
    };

    let mut conn = state.db()?;
    let usuario: Usuario = diesel::insert_into(usuarios::table)
        .values(&new_usuario)
        .returning(Usuario::as_returning())
        .get_result(&mut conn)
        .map_err(|err| match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                AppError::bad_request("a user with this email already exists")
                    .with_code("EMAIL_IN_USE")
            }
            other => AppError::from(other),
        })?;

    info!(user_id = usuario.id, rol = %rol, created_by = admin.id, "user created");
    Ok((
        StatusCode::CREATED,
        Json(UsuarioCreatedResponse {
            mensaje: "user created",
            usuario: usuario.into(),
        }),
    ))
}

pub async fn delete_usuario(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    if id == admin.id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }

    let mut conn = state.db()?;
    let deleted = diesel::delete(usuarios::table.find(id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found_with("user not found"));
    }

    info!(user_id = id, deleted_by = admin.id, "user deleted");
    Ok(Json(json!({ "mensaje": "user deleted" })))
}
