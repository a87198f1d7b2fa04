use axum::http::{
    header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    HeaderMap, HeaderValue,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

pub mod auth;
pub mod documentos;
pub mod expedientes;
pub mod health;
pub mod mandatos;
pub mod usuarios;

/// Room for multipart boundaries and the text fields next to the file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let allow_origin = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = %value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    // Mounted twice: `/expedientes` for the web console, `/propiedades` for mobile.
    let expediente_routes = || {
        Router::new()
            .route(
                "/",
                get(expedientes::list_expedientes).post(expedientes::create_expediente),
            )
            .route(
                "/:id",
                get(expedientes::get_expediente).put(expedientes::update_expediente),
            )
            .route(
                "/:id/estado",
                put(expedientes::change_estado).patch(expedientes::change_estado),
            )
            .route("/:id/mandato/word", get(mandatos::download_mandate_document))
            .route(
                "/:id/mandato",
                get(mandatos::get_mandate).post(mandatos::create_mandate),
            )
    };

    let mandato_routes = Router::new()
        .route(
            "/plantilla/persona-fisica",
            get(mandatos::download_template),
        )
        .route("/:id/estado", put(mandatos::change_estado));

    let documento_routes = Router::new()
        .route(
            "/",
            get(documentos::list_documentos).post(documentos::upload_documento),
        )
        .route("/:id/descargar", get(documentos::download_documento))
        .layer(DefaultBodyLimit::max(
            state.config.max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
        ));

    let usuario_routes = Router::new()
        .route(
            "/",
            get(usuarios::list_usuarios).post(usuarios::create_usuario),
        )
        .route("/:id", delete(usuarios::delete_usuario));

    Router::new()
        .nest("/auth", auth_routes)
        .nest("/expedientes", expediente_routes())
        .nest("/propiedades", expediente_routes())
        .nest("/mandatos", mandato_routes)
        .nest("/documentos", documento_routes)
        .nest("/usuarios", usuario_routes)
        .route("/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// RFC 3339 rendering of a stored UTC timestamp.
pub(crate) fn to_iso(value: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(value, Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn to_iso_opt(value: Option<NaiveDateTime>) -> Option<String> {
    value.map(to_iso)
}

/// `Content-Disposition` value with both a quoted and an RFC 5987 filename.
pub(crate) fn content_disposition(disposition: &str, filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if ch.is_control() => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "{disposition}; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}"
    ))
}

pub(crate) fn file_headers(
    content_type: &str,
    disposition: &str,
    filename: &str,
) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mime = HeaderValue::from_str(content_type)
        .map_err(|err| AppError::internal(format!("invalid content type: {err}")))?;
    headers.insert(CONTENT_TYPE, mime);
    if let Some(value) = content_disposition(disposition, filename) {
        let value = HeaderValue::from_str(&value)
            .map_err(|err| AppError::internal(format!("invalid content disposition: {err}")))?;
        headers.insert(CONTENT_DISPOSITION, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn timestamps_render_as_utc_rfc3339() {
        let value = NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_milli_opt(14, 5, 9, 120)
            .unwrap();
        assert_eq!(to_iso(value), "2025-03-01T14:05:09.120Z");
    }

    #[test]
    fn content_disposition_escapes_quotes_and_encodes_utf8() {
        let header = content_disposition("inline", "escritura \"final\" ñ.pdf").unwrap();
        assert_eq!(
            header,
            "inline; filename=\"escritura _final_ ñ.pdf\"; \
             filename*=UTF-8''escritura%20%5Ffinal%5F%20%C3%B1%2Epdf"
        );
        assert_eq!(content_disposition("attachment", ""), None);
    }
}
