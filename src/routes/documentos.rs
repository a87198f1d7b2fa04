use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{expedientes::load_visible_expediente, file_headers, to_iso};
use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Documento, NewDocumento},
    schema::documentos,
    state::AppState,
    storage::{is_accepted_file, normalize_owner_field, parse_owner_id, UploadError},
    utils::fields::trimmed_or_none,
};

pub const DOCUMENT_TYPES: &[&str] = &["ESCRITURA", "DNI", "API", "TGI", "OTRO"];
const DEFAULT_DOCUMENT_TYPE: &str = "OTRO";
const FILE_FIELD: &str = "archivo";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentoResponse {
    pub id: i32,
    pub expediente_id: i32,
    pub tipo: String,
    pub ruta: String,
    pub nombre_original: String,
    pub tamano: i64,
    pub mimetype: String,
    pub created_at: String,
}

impl From<Documento> for DocumentoResponse {
    fn from(value: Documento) -> Self {
        Self {
            id: value.id,
            expediente_id: value.expediente_id,
            tipo: value.tipo,
            ruta: value.ruta,
            nombre_original: value.nombre_original,
            tamano: value.tamano,
            mimetype: value.mimetype,
            created_at: to_iso(value.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub mensaje: &'static str,
    pub documento: DocumentoResponse,
}

#[derive(Serialize)]
pub struct DocumentoListResponse {
    pub documentos: Vec<DocumentoResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentoListQuery {
    pub expediente_id: Option<String>,
    pub propiedad_id: Option<String>,
}

struct IncomingFile {
    original_name: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct UploadForm {
    propiedad_id: Option<String>,
    expediente_id: Option<String>,
    tipo: Option<String>,
    file: Option<IncomingFile>,
}

fn multipart_error(err: MultipartError, limit_bytes: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(limit_bytes, "upload rejected: body too large");
        return UploadError::FileTooLarge { limit_bytes }.into();
    }
    warn!(error = %err, "invalid multipart data");
    AppError::bad_request(format!("invalid multipart data: {err}"))
}

/// Upper-cases the declared type, falling back to OTRO when absent.
fn parse_document_type(raw: Option<&str>) -> AppResult<String> {
    let Some(value) = trimmed_or_none(raw) else {
        return Ok(DEFAULT_DOCUMENT_TYPE.to_string());
    };
    let value = value.to_ascii_uppercase();
    if DOCUMENT_TYPES.contains(&value.as_str()) {
        Ok(value)
    } else {
        Err(AppError::bad_request(format!(
            "invalid tipo `{value}`, allowed: {}",
            DOCUMENT_TYPES.join(", ")
        )))
    }
}

fn stored_mimetype(declared: Option<&str>, original_name: &str) -> String {
    declared
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| {
            mime_guess::from_path(original_name)
                .first_or_octet_stream()
                .to_string()
        })
}

/// Reads the form, rejecting a disallowed file from its headers before any
/// of its body is buffered.
async fn read_form(state: &AppState, multipart: &mut Multipart) -> AppResult<UploadForm> {
    let limit = state.uploads.max_bytes();
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some(FILE_FIELD) => {
                let original_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_owned);
                if !is_accepted_file(content_type.as_deref(), &original_name) {
                    warn!(
                        original_name = %original_name,
                        content_type = ?content_type,
                        "upload rejected: unsupported file type"
                    );
                    return Err(UploadError::UnsupportedFileType.into());
                }

                let mut bytes = Vec::new();
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|err| multipart_error(err, limit))?
                {
                    state.uploads.ensure_within_limit(bytes.len() + chunk.len())?;
                    bytes.extend_from_slice(&chunk);
                }

                form.file = Some(IncomingFile {
                    original_name,
                    content_type,
                    bytes,
                });
            }
            Some("propiedadId") | Some("expedienteId") | Some("tipo") => {
                let value = field
                    .text()
                    .await
                    .map_err(|err| multipart_error(err, limit))?;
                match name.as_deref() {
                    Some("propiedadId") => form.propiedad_id = Some(value),
                    Some("expedienteId") => form.expediente_id = Some(value),
                    _ => form.tipo = Some(value),
                }
            }
            _ => {}
        }
    }

    Ok(form)
}

pub async fn upload_documento(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let form = read_form(&state, &mut multipart).await?;

    let file = form
        .file
        .ok_or(UploadError::MissingField(FILE_FIELD))?;
    let owner_id = parse_owner_id(normalize_owner_field(
        form.propiedad_id.as_deref(),
        form.expediente_id.as_deref(),
    ))?;
    let tipo = parse_document_type(form.tipo.as_deref())?;

    {
        let mut conn = state.db()?;
        load_visible_expediente(&mut conn, owner_id, user.scope())?;
    }

    let stored = state
        .uploads
        .store(owner_id, &file.original_name, &file.bytes, Utc::now())
        .await?;

    let new_documento = NewDocumento {
        expediente_id: owner_id,
        tipo,
        ruta: stored.relative_path.clone(),
        nombre_original: file.original_name.clone(),
        tamano: stored.size as i64,
        mimetype: stored_mimetype(file.content_type.as_deref(), &file.original_name),
    };

    let inserted = state.db().and_then(|mut conn| {
        diesel::insert_into(documentos::table)
            .values(&new_documento)
            .returning(Documento::as_returning())
            .get_result::<Documento>(&mut conn)
            .map_err(AppError::from)
    });
    let documento = match inserted {
        Ok(documento) => documento,
        Err(err) => {
            error!(ruta = %stored.relative_path, "document insert failed, removing stored file");
            if let Err(cleanup) = state.uploads.remove(&stored.relative_path).await {
                error!(error = %cleanup, ruta = %stored.relative_path, "failed to remove orphaned upload");
            }
            return Err(err);
        }
    };

    info!(
        documento_id = documento.id,
        expediente_id = owner_id,
        user_id = user.id,
        size = stored.size,
        ruta = %stored.relative_path,
        "document uploaded"
    );
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            mensaje: "document uploaded",
            documento: documento.into(),
        }),
    ))
}

pub async fn list_documentos(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<DocumentoListQuery>,
) -> AppResult<Json<DocumentoListResponse>> {
    let raw = normalize_owner_field(query.propiedad_id.as_deref(), query.expediente_id.as_deref())
        .ok_or_else(|| AppError::bad_request("the `expedienteId` query parameter is required"))?;
    let expediente_id: i32 = raw
        .parse()
        .map_err(|_| AppError::bad_request("`expedienteId` must be an integer"))?;

    let mut conn = state.db()?;
    load_visible_expediente(&mut conn, expediente_id, user.scope())?;
    let rows: Vec<Documento> = documentos::table
        .filter(documentos::expediente_id.eq(expediente_id))
        .order((documentos::created_at.desc(), documentos::id.desc()))
        .select(Documento::as_select())
        .load(&mut conn)?;

    Ok(Json(DocumentoListResponse {
        documentos: rows.into_iter().map(DocumentoResponse::from).collect(),
    }))
}

pub async fn download_documento(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i32>,
) -> AppResult<(HeaderMap, Vec<u8>)> {
    let documento = {
        let mut conn = state.db()?;
        let documento: Documento = documentos::table
            .find(id)
            .select(Documento::as_select())
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::not_found_with("document not found"))?;
        load_visible_expediente(&mut conn, documento.expediente_id, user.scope())
            .map_err(|_| AppError::not_found_with("document not found"))?;
        documento
    };

    let bytes = state.uploads.read(&documento.ruta).await?;
    let headers = file_headers(&documento.mimetype, "inline", &documento.nombre_original)?;
    Ok((headers, bytes))
}
