use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use diesel::{pg::Pg, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{mandatos::MandatoResponse, to_iso};
use crate::{
    auth::{roles::OwnershipScope, AuthenticatedUser, RequireReviewer},
    error::{AppError, AppResult},
    lifecycle::{
        expediente::{ensure_editable, transition_target, ExpedienteEstado},
        LifecycleError,
    },
    models::{AsesorSummary, Expediente, Mandato, NewExpediente},
    schema::{expedientes, mandatos, usuarios},
    state::AppState,
    utils::fields::{classify_text, trimmed_or_none, TextPatch},
};

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;
const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

#[derive(Serialize)]
pub struct AsesorResponse {
    pub id: i32,
    pub nombre: String,
    pub email: String,
}

impl From<AsesorSummary> for AsesorResponse {
    fn from(value: AsesorSummary) -> Self {
        Self {
            id: value.id,
            nombre: value.nombre,
            email: value.email,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpedienteResponse {
    pub id: i32,
    pub titulo: String,
    pub descripcion: Option<String>,
    pub propietario_nombre: String,
    pub estado: String,
    pub asesor_id: Option<i32>,
    pub observaciones: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub asesor: Option<AsesorResponse>,
    pub mandato: Option<MandatoResponse>,
}

impl ExpedienteResponse {
    fn build(
        expediente: Expediente,
        asesor: Option<AsesorSummary>,
        mandato: Option<Mandato>,
    ) -> Self {
        Self {
            id: expediente.id,
            titulo: expediente.titulo,
            descripcion: expediente.descripcion,
            propietario_nombre: expediente.propietario_nombre,
            estado: expediente.estado,
            asesor_id: expediente.asesor_id,
            observaciones: expediente.observaciones,
            created_at: to_iso(expediente.created_at),
            updated_at: to_iso(expediente.updated_at),
            asesor: asesor.map(AsesorResponse::from),
            mandato: mandato.map(MandatoResponse::from),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Serialize)]
pub struct ExpedienteListResponse {
    pub data: Vec<ExpedienteResponse>,
    pub pagination: Pagination,
}

#[derive(Serialize)]
pub struct ExpedienteMutationResponse {
    pub mensaje: &'static str,
    pub expediente: ExpedienteResponse,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpedienteListQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub estado: Option<String>,
    pub asesor_id: Option<String>,
    pub desde: Option<String>,
    pub hasta: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Default)]
struct ListFilters {
    estado: Option<ExpedienteEstado>,
    asesor_id: Option<i32>,
    desde: Option<NaiveDateTime>,
    hasta: Option<NaiveDateTime>,
    search: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExpedienteRequest {
    pub titulo: Option<String>,
    pub descripcion: Option<String>,
    pub propietario_nombre: Option<String>,
}

#[derive(Deserialize)]
pub struct EstadoRequest {
    pub estado: Option<String>,
    #[serde(default)]
    pub observaciones: Option<Value>,
}

#[derive(AsChangeset)]
#[diesel(table_name = expedientes)]
struct ExpedienteChanges {
    titulo: Option<String>,
    propietario_nombre: Option<String>,
    descripcion: Option<Option<String>>,
    observaciones: Option<Option<String>>,
    estado: Option<String>,
    updated_at: NaiveDateTime,
}

fn parse_positive(raw: Option<&str>, default: i64) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

/// Page and page size, with the size clamped to `MAX_PAGE_SIZE` and the
/// page clamped so that `page_offset` stays within `i64`.
fn page_window(page: Option<&str>, limit: Option<&str>) -> (i64, i64) {
    let page = parse_positive(page, 1).min(MAX_PAGE);
    let limit = parse_positive(limit, DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    (page, limit)
}

fn page_offset(page: i64, limit: i64) -> i64 {
    (page - 1) * limit
}

fn total_pages(total: i64, limit: i64) -> i64 {
    (total + limit - 1) / limit
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates. A plain date
/// used as an upper bound covers the whole day.
fn parse_date_bound(raw: &str, field: &str, upper: bool) -> AppResult<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc).naive_utc());
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| AppError::bad_request(format!("`{field}` must be an ISO date")))?;
    let bound = if upper {
        date.and_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    bound.ok_or_else(|| AppError::bad_request(format!("`{field}` must be an ISO date")))
}

/// `%term%` with LIKE wildcards in the term escaped.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

impl ListFilters {
    fn from_query(query: &ExpedienteListQuery) -> AppResult<Self> {
        let estado = trimmed_or_none(query.estado.as_deref())
            .map(|value| value.parse::<ExpedienteEstado>())
            .transpose()?;
        let asesor_id = trimmed_or_none(query.asesor_id.as_deref())
            .map(|value| {
                value
                    .parse::<i32>()
                    .map_err(|_| AppError::bad_request("`asesorId` must be an integer"))
            })
            .transpose()?;
        let desde = trimmed_or_none(query.desde.as_deref())
            .map(|value| parse_date_bound(&value, "desde", false))
            .transpose()?;
        let hasta = trimmed_or_none(query.hasta.as_deref())
            .map(|value| parse_date_bound(&value, "hasta", true))
            .transpose()?;

        Ok(Self {
            estado,
            asesor_id,
            desde,
            hasta,
            search: trimmed_or_none(query.q.as_deref()),
        })
    }
}

fn scoped_query(scope: OwnershipScope) -> expedientes::BoxedQuery<'static, Pg> {
    let query = expedientes::table.into_boxed();
    match scope {
        OwnershipScope::All => query,
        OwnershipScope::OwnedBy(owner) => query.filter(expedientes::asesor_id.eq(owner)),
    }
}

fn filtered_query(
    scope: OwnershipScope,
    filters: &ListFilters,
) -> expedientes::BoxedQuery<'static, Pg> {
    let mut query = scoped_query(scope);

    if let Some(estado) = filters.estado {
        query = query.filter(expedientes::estado.eq(estado.as_str()));
    }
    if let Some(asesor_id) = filters.asesor_id {
        query = query.filter(expedientes::asesor_id.eq(asesor_id));
    }
    if let Some(desde) = filters.desde {
        query = query.filter(expedientes::created_at.ge(desde));
    }
    if let Some(hasta) = filters.hasta {
        query = query.filter(expedientes::created_at.le(hasta));
    }
    if let Some(term) = filters.search.as_deref() {
        let pattern = like_pattern(term);
        query = query.filter(
            expedientes::titulo
                .ilike(pattern.clone())
                .or(expedientes::propietario_nombre.ilike(pattern)),
        );
    }

    query
}

/// Loads an expediente the actor may see. Records outside the actor's scope
/// are reported exactly like missing ones.
pub(crate) fn load_visible_expediente(
    conn: &mut PgConnection,
    id: i32,
    scope: OwnershipScope,
) -> AppResult<Expediente> {
    scoped_query(scope)
        .filter(expedientes::id.eq(id))
        .select(Expediente::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_with("expediente not found"))
}

pub(crate) fn load_asesor(
    conn: &mut PgConnection,
    asesor_id: Option<i32>,
) -> AppResult<Option<AsesorSummary>> {
    let Some(asesor_id) = asesor_id else {
        return Ok(None);
    };
    Ok(usuarios::table
        .find(asesor_id)
        .select(AsesorSummary::as_select())
        .first(conn)
        .optional()?)
}

fn hydrate_one(conn: &mut PgConnection, expediente: Expediente) -> AppResult<ExpedienteResponse> {
    let asesor = load_asesor(conn, expediente.asesor_id)?;
    let mandato = mandatos::table
        .filter(mandatos::expediente_id.eq(expediente.id))
        .select(Mandato::as_select())
        .first(conn)
        .optional()?;
    Ok(ExpedienteResponse::build(expediente, asesor, mandato))
}

fn hydrate_many(
    conn: &mut PgConnection,
    rows: Vec<Expediente>,
) -> AppResult<Vec<ExpedienteResponse>> {
    let ids: Vec<i32> = rows.iter().map(|row| row.id).collect();
    let mut asesor_ids: Vec<i32> = rows.iter().filter_map(|row| row.asesor_id).collect();
    asesor_ids.sort_unstable();
    asesor_ids.dedup();

    let asesores: HashMap<i32, AsesorSummary> = usuarios::table
        .filter(usuarios::id.eq_any(&asesor_ids))
        .select(AsesorSummary::as_select())
        .load(conn)?
        .into_iter()
        .map(|asesor| (asesor.id, asesor))
        .collect();
    let mut mandatos_by_expediente: HashMap<i32, Mandato> = mandatos::table
        .filter(mandatos::expediente_id.eq_any(&ids))
        .select(Mandato::as_select())
        .load(conn)?
        .into_iter()
        .map(|mandato| (mandato.expediente_id, mandato))
        .collect();

    Ok(rows
        .into_iter()
        .map(|row| {
            let asesor = row.asesor_id.and_then(|id| asesores.get(&id).cloned());
            let mandato = mandatos_by_expediente.remove(&row.id);
            ExpedienteResponse::build(row, asesor, mandato)
        })
        .collect())
}

pub async fn list_expedientes(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ExpedienteListQuery>,
) -> AppResult<Json<ExpedienteListResponse>> {
    let filters = ListFilters::from_query(&query)?;
    let (page, limit) = page_window(query.page.as_deref(), query.limit.as_deref());
    let scope = user.scope();
    debug!(?scope, ?filters, page, limit, "listing expedientes");

    let mut conn = state.db()?;
    let total: i64 = filtered_query(scope, &filters)
        .count()
        .get_result(&mut conn)?;
    let rows: Vec<Expediente> = filtered_query(scope, &filters)
        .order((expedientes::created_at.desc(), expedientes::id.desc()))
        .limit(limit)
        .offset(page_offset(page, limit))
        .select(Expediente::as_select())
        .load(&mut conn)?;
    let data = hydrate_many(&mut conn, rows)?;

    Ok(Json(ExpedienteListResponse {
        data,
        pagination: Pagination {
            page,
            limit,
            total,
            total_pages: total_pages(total, limit),
        },
    }))
}

pub async fn get_expediente(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<Json<ExpedienteResponse>> {
    let mut conn = state.db()?;
    let expediente = load_visible_expediente(&mut conn, id, user.scope())?;
    Ok(Json(hydrate_one(&mut conn, expediente)?))
}

pub async fn create_expediente(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateExpedienteRequest>,
) -> AppResult<(StatusCode, Json<ExpedienteMutationResponse>)> {
    let titulo = trimmed_or_none(payload.titulo.as_deref())
        .ok_or_else(|| AppError::bad_request("the `titulo` field is required"))?;
    let propietario_nombre = trimmed_or_none(payload.propietario_nombre.as_deref())
        .ok_or_else(|| AppError::bad_request("the `propietarioNombre` field is required"))?;

    let new_expediente = NewExpediente {
        titulo,
        descripcion: trimmed_or_none(payload.descripcion.as_deref()),
        propietario_nombre,
        estado: ExpedienteEstado::INITIAL.as_str().to_string(),
        asesor_id: Some(user.id),
    };

    let mut conn = state.db()?;
    let expediente: Expediente = diesel::insert_into(expedientes::table)
        .values(&new_expediente)
        .returning(Expediente::as_returning())
        .get_result(&mut conn)?;

    info!(expediente_id = expediente.id, asesor_id = user.id, "expediente created");
    Ok((
        StatusCode::CREATED,
        Json(ExpedienteMutationResponse {
            mensaje: "expediente created",
            expediente: hydrate_one(&mut conn, expediente)?,
        }),
    ))
}

fn required_text(body: &Value, key: &str) -> AppResult<Option<String>> {
    match classify_text(body.get(key)).map_err(AppError::bad_request)? {
        TextPatch::Omitted => Ok(None),
        TextPatch::Clear => Err(AppError::bad_request(format!(
            "the `{key}` field cannot be empty"
        ))),
        TextPatch::Set(value) => Ok(Some(value)),
    }
}

fn optional_text(body: &Value, key: &str) -> AppResult<Option<Option<String>>> {
    Ok(match classify_text(body.get(key)).map_err(AppError::bad_request)? {
        TextPatch::Omitted => None,
        TextPatch::Clear => Some(None),
        TextPatch::Set(value) => Some(Some(value)),
    })
}

pub async fn update_expediente(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i32>,
    Json(body): Json<Value>,
) -> AppResult<Json<ExpedienteMutationResponse>> {
    if !body.is_object() {
        return Err(AppError::bad_request("request body must be a JSON object"));
    }

    let mut conn = state.db()?;
    let current = load_visible_expediente(&mut conn, id, user.scope())?;
    ensure_editable(current.estado.parse()?)?;

    let changes = ExpedienteChanges {
        titulo: required_text(&body, "titulo")?,
        propietario_nombre: required_text(&body, "propietarioNombre")?,
        descripcion: optional_text(&body, "descripcion")?,
        observaciones: optional_text(&body, "observaciones")?,
        estado: None,
        updated_at: Utc::now().naive_utc(),
    };

    // Conditional on the state so a concurrent review cannot slip in between.
    let updated = diesel::update(
        expedientes::table
            .filter(expedientes::id.eq(id))
            .filter(expedientes::estado.eq(ExpedienteEstado::Pendiente.as_str())),
    )
    .set(&changes)
    .returning(Expediente::as_returning())
    .get_result(&mut conn)
    .optional()?;

    let expediente = match updated {
        Some(expediente) => expediente,
        None => {
            let estado = load_visible_expediente(&mut conn, id, user.scope())?
                .estado
                .parse::<ExpedienteEstado>()?;
            return Err(LifecycleError::NotEditable {
                estado: estado.as_str(),
            }
            .into());
        }
    };

    info!(expediente_id = id, user_id = user.id, "expediente updated");
    Ok(Json(ExpedienteMutationResponse {
        mensaje: "expediente updated",
        expediente: hydrate_one(&mut conn, expediente)?,
    }))
}

pub async fn change_estado(
    State(state): State<AppState>,
    RequireReviewer(user): RequireReviewer,
    Path(id): Path<i32>,
    Json(payload): Json<EstadoRequest>,
) -> AppResult<Json<ExpedienteMutationResponse>> {
    let target = transition_target(payload.estado.as_deref())?;
    let observaciones = match classify_text(payload.observaciones.as_ref())
        .map_err(AppError::bad_request)?
    {
        TextPatch::Omitted => None,
        TextPatch::Clear => Some(None),
        TextPatch::Set(value) => Some(Some(value)),
    };

    let mut conn = state.db()?;
    let current = load_visible_expediente(&mut conn, id, user.scope())?;

    let expediente: Expediente = diesel::update(expedientes::table.find(id))
        .set(&ExpedienteChanges {
            titulo: None,
            propietario_nombre: None,
            descripcion: None,
            observaciones,
            estado: Some(target.as_str().to_string()),
            updated_at: Utc::now().naive_utc(),
        })
        .returning(Expediente::as_returning())
        .get_result(&mut conn)?;

    info!(
        expediente_id = id,
        reviewer_id = user.id,
        from = %current.estado,
        to = %target,
        "expediente state changed"
    );
    Ok(Json(ExpedienteMutationResponse {
        mensaje: "expediente state updated",
        expediente: hydrate_one(&mut conn, expediente)?,
    }))
}
