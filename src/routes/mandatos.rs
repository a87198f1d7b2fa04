use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::{
    expedientes::{load_asesor, load_visible_expediente},
    file_headers, to_iso, to_iso_opt,
};
use crate::{
    auth::{AuthenticatedUser, RequireAdmin},
    error::{AppError, AppResult},
    lifecycle::{
        mandato::{check_creation, parse_draft, plan_transition, MandatoEstado, TransitionRequest},
        LifecycleError,
    },
    mandate_document::{self, AgentInfo, MandateDocument},
    models::{Expediente, Mandato, NewMandato},
    schema::{expedientes, mandatos},
    state::AppState,
};

const TEMPLATE_FILE: &str = "mandato-venta-persona-fisica.docx";
const TEMPLATE_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpedienteSummary {
    pub id: i32,
    pub titulo: String,
    pub propietario_nombre: String,
    pub estado: String,
}

impl From<Expediente> for ExpedienteSummary {
    fn from(value: Expediente) -> Self {
        Self {
            id: value.id,
            titulo: value.titulo,
            propietario_nombre: value.propietario_nombre,
            estado: value.estado,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MandatoResponse {
    pub id: i32,
    pub expediente_id: i32,
    pub plazo_dias: i32,
    pub monto: f64,
    pub moneda: String,
    pub observaciones: Option<String>,
    pub estado: String,
    pub firmado_por: Option<String>,
    pub firmado_fecha: Option<String>,
    pub documento_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expediente: Option<ExpedienteSummary>,
}

impl From<Mandato> for MandatoResponse {
    fn from(value: Mandato) -> Self {
        Self {
            id: value.id,
            expediente_id: value.expediente_id,
            plazo_dias: value.plazo_dias,
            monto: value.monto,
            moneda: value.moneda,
            observaciones: value.observaciones,
            estado: value.estado,
            firmado_por: value.firmado_por,
            firmado_fecha: to_iso_opt(value.firmado_fecha),
            documento_url: value.documento_url,
            created_at: to_iso(value.created_at),
            updated_at: to_iso(value.updated_at),
            expediente: None,
        }
    }
}

impl MandatoResponse {
    fn with_expediente(mandato: Mandato, expediente: Expediente) -> Self {
        Self {
            expediente: Some(expediente.into()),
            ..Self::from(mandato)
        }
    }
}

#[derive(Serialize)]
pub struct MandatoEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mensaje: Option<&'static str>,
    pub mandato: MandatoResponse,
}

#[derive(AsChangeset)]
#[diesel(table_name = mandatos)]
struct MandatoChanges {
    estado: String,
    firmado_fecha: Option<NaiveDateTime>,
    firmado_por: Option<String>,
    documento_url: Option<String>,
    updated_at: NaiveDateTime,
}

fn find_for_expediente(conn: &mut PgConnection, expediente_id: i32) -> AppResult<Option<Mandato>> {
    Ok(mandatos::table
        .filter(mandatos::expediente_id.eq(expediente_id))
        .select(Mandato::as_select())
        .first(conn)
        .optional()?)
}

fn already_exists(existing: Mandato) -> AppError {
    LifecycleError::MandateAlreadyExists {
        id: existing.id,
        estado: existing.estado,
    }
    .into()
}

/// Inserts a mandato unless its expediente already has one. The unique
/// constraint on `expediente_id` decides concurrent creations: the losing
/// insert returns no row and is reported with the winner's id and estado.
pub fn insert_unique(conn: &mut PgConnection, new_mandato: &NewMandato) -> AppResult<Mandato> {
    let inserted: Option<Mandato> = diesel::insert_into(mandatos::table)
        .values(new_mandato)
        .on_conflict(mandatos::expediente_id)
        .do_nothing()
        .returning(Mandato::as_returning())
        .get_result(conn)
        .optional()?;

    if let Some(mandato) = inserted {
        return Ok(mandato);
    }

    let expediente_id = new_mandato.expediente_id;
    warn!(expediente_id, "lost a concurrent mandato creation");
    match find_for_expediente(conn, expediente_id)? {
        Some(winner) => Err(already_exists(winner)),
        None => Err(AppError::internal(
            "mandato insert skipped without an existing row",
        )),
    }
}

pub async fn create_mandate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(expediente_id): Path<i32>,
    Json(body): Json<Value>,
) -> AppResult<(StatusCode, Json<MandatoEnvelope>)> {
    let mut conn = state.db()?;
    let expediente = load_visible_expediente(&mut conn, expediente_id, user.scope())?;

    let existing = find_for_expediente(&mut conn, expediente_id)?;
    check_creation(
        expediente.estado.parse()?,
        existing.as_ref().map(|m| (m.id, m.estado.as_str())),
    )?;
    let draft = parse_draft(&body)?;

    let new_mandato = NewMandato {
        expediente_id,
        plazo_dias: draft.plazo_dias,
        monto: draft.monto,
        moneda: draft.moneda.as_str().to_string(),
        observaciones: draft.observaciones,
        estado: MandatoEstado::INITIAL.as_str().to_string(),
    };

    let mandato = insert_unique(&mut conn, &new_mandato)?;

    info!(
        mandato_id = mandato.id,
        expediente_id,
        user_id = user.id,
        "mandato created"
    );
    Ok((
        StatusCode::CREATED,
        Json(MandatoEnvelope {
            mensaje: Some("mandato created"),
            mandato: MandatoResponse::with_expediente(mandato, expediente),
        }),
    ))
}

pub async fn get_mandate(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(expediente_id): Path<i32>,
) -> AppResult<Json<MandatoEnvelope>> {
    let mut conn = state.db()?;
    load_visible_expediente(&mut conn, expediente_id, user.scope())?;
    let mandato = find_for_expediente(&mut conn, expediente_id)?
        .ok_or_else(|| AppError::not_found_with("this expediente has no mandato"))?;

    Ok(Json(MandatoEnvelope {
        mensaje: None,
        mandato: mandato.into(),
    }))
}

pub async fn change_estado(
    State(state): State<AppState>,
    RequireAdmin(user): RequireAdmin,
    Path(mandato_id): Path<i32>,
    Json(request): Json<TransitionRequest>,
) -> AppResult<Json<MandatoEnvelope>> {
    let now = Utc::now().naive_utc();
    let plan = plan_transition(&request, now)?;

    let mut conn = state.db()?;
    let current: Mandato = mandatos::table
        .find(mandato_id)
        .select(Mandato::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("mandato not found"))?;

    let changes = MandatoChanges {
        estado: plan.estado.as_str().to_string(),
        firmado_fecha: plan.firmado_fecha,
        firmado_por: plan.firmado_por,
        documento_url: plan.documento_url,
        updated_at: now,
    };
    let mandato: Mandato = diesel::update(mandatos::table.find(mandato_id))
        .set(&changes)
        .returning(Mandato::as_returning())
        .get_result(&mut conn)?;
    let expediente: Expediente = expedientes::table
        .find(mandato.expediente_id)
        .select(Expediente::as_select())
        .first(&mut conn)?;

    info!(
        mandato_id,
        admin_id = user.id,
        from = %current.estado,
        to = %plan.estado,
        "mandato state changed"
    );
    Ok(Json(MandatoEnvelope {
        mensaje: Some("mandato state updated"),
        mandato: MandatoResponse::with_expediente(mandato, expediente),
    }))
}

pub async fn download_mandate_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(expediente_id): Path<i32>,
) -> AppResult<(HeaderMap, Vec<u8>)> {
    let mut conn = state.db()?;
    let expediente = load_visible_expediente(&mut conn, expediente_id, user.scope())?;
    let mandato = find_for_expediente(&mut conn, expediente_id)?
        .ok_or_else(|| AppError::not_found_with("this expediente has no mandato"))?;
    let asesor = load_asesor(&mut conn, expediente.asesor_id)?;
    drop(conn);

    let bytes = mandate_document::render(&MandateDocument {
        expediente: &expediente,
        mandato: &mandato,
        asesor: asesor.as_ref().map(|asesor| AgentInfo {
            nombre: &asesor.nombre,
            email: &asesor.email,
        }),
        generated_at: Utc::now(),
    })?;

    info!(
        expediente_id,
        mandato_id = mandato.id,
        user_id = user.id,
        size = bytes.len(),
        "mandato document generated"
    );
    let headers = file_headers(
        mandate_document::CONTENT_TYPE,
        "attachment",
        &mandate_document::download_filename(expediente_id),
    )?;
    Ok((headers, bytes))
}

pub async fn download_template(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> AppResult<(HeaderMap, Vec<u8>)> {
    let path = state.config.templates_dir.join(TEMPLATE_FILE);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "mandato template missing");
            return Err(AppError::not_found_with("mandato template not found"));
        }
        Err(err) => return Err(err.into()),
    };

    let headers = file_headers(TEMPLATE_CONTENT_TYPE, "attachment", TEMPLATE_FILE)?;
    Ok((headers, bytes))
}
