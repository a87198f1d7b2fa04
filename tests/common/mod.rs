#![allow(dead_code)]

use std::env;

use anyhow::{anyhow, ensure, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use expedientes::auth::jwt::JwtService;
use expedientes::auth::password::hash_password;
use expedientes::config::AppConfig;
use expedientes::db::{self, PgPool};
use expedientes::models::{Expediente, NewExpediente, NewUsuario};
use expedientes::routes;
use expedientes::schema::{expedientes as expedientes_table, usuarios};
use expedientes::state::AppState;
use expedientes::storage::UploadStore;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::util::ServiceExt;

pub const MAX_UPLOAD_BYTES: usize = 64 * 1024;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub struct TestApp {
    pub state: AppState,
    router: Router,
    dir: TempDir,
}

/// How a request carries its credential.
#[derive(Clone, Copy)]
pub enum Credential<'a> {
    None,
    Bearer(&'a str),
    Cookie(&'a str),
    Query(&'a str),
}

pub fn test_config(database_url: String, dir: &TempDir) -> AppConfig {
    AppConfig {
        database_url,
        database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        jwt_expiry_minutes: 60,
        cookie_secure: false,
        cookie_domain: None,
        cors_allowed_origin: None,
        uploads_dir: dir.path().join("uploads"),
        templates_dir: dir.path().join("templates"),
        max_upload_bytes: MAX_UPLOAD_BYTES,
    }
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let dir = tempfile::tempdir().context("failed to create temp dir")?;
        let config = test_config(database_url, &dir);

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let uploads = UploadStore::open(&config.uploads_dir, config.max_upload_bytes)?;
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, uploads, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self { state, router, dir })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn templates_dir(&self) -> std::path::PathBuf {
        self.state.config.templates_dir.clone()
    }

    pub fn uploads_root(&self) -> std::path::PathBuf {
        self.state.uploads.root().to_path_buf()
    }

    pub async fn cleanup(&self) -> Result<()> {
        self.with_conn(|conn| truncate_all(conn)).await
    }

    pub async fn insert_usuario(&self, nombre: &str, email: &str, password: &str, rol: &str) -> Result<i32> {
        let usuario = NewUsuario {
            nombre: nombre.to_string(),
            email: email.to_string(),
            password_hash: hash_password(password)?,
            rol: rol.to_string(),
        };
        self.with_conn(move |conn| {
            diesel::insert_into(usuarios::table)
                .values(&usuario)
                .returning(usuarios::id)
                .get_result(conn)
                .context("failed to insert usuario")
        })
        .await
    }

    pub async fn insert_expediente(&self, titulo: &str, asesor_id: Option<i32>, estado: &str) -> Result<i32> {
        let expediente = NewExpediente {
            titulo: titulo.to_string(),
            descripcion: None,
            propietario_nombre: format!("Propietario de {titulo}"),
            estado: estado.to_string(),
            asesor_id,
        };
        self.with_conn(move |conn| {
            diesel::insert_into(expedientes_table::table)
                .values(&expediente)
                .returning(expedientes_table::id)
                .get_result(conn)
                .context("failed to insert expediente")
        })
        .await
    }

    pub async fn load_expediente(&self, id: i32) -> Result<Expediente> {
        self.with_conn(move |conn| {
            expedientes_table::table
                .find(id)
                .select(Expediente::as_select())
                .first(conn)
                .context("failed to load expediente")
        })
        .await
    }

    pub async fn count_rows(&self, table: &'static str) -> Result<i64> {
        #[derive(QueryableByName)]
        struct Count {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            total: i64,
        }

        self.with_conn(move |conn| {
            let row: Count = diesel::sql_query(format!("SELECT COUNT(*) AS total FROM {table}"))
                .get_result(conn)
                .context("failed to count rows")?;
            Ok(row.total)
        })
        .await
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        let response = self
            .post_json(
                "/auth/login",
                &json!({ "email": email, "password": password }),
                Credential::None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = json_body(response).await?;
        body["token"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("login response without token: {body}"))
    }

    pub async fn send(&self, request: Request<Body>) -> hyper::Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response")
    }

    pub fn builder(method: Method, path: &str, credential: Credential<'_>) -> axum::http::request::Builder {
        let uri = match credential {
            Credential::Query(token) => {
                let separator = if path.contains('?') { '&' } else { '?' };
                format!("{path}{separator}token={token}")
            }
            _ => path.to_string(),
        };
        let builder = Request::builder().method(method).uri(uri);
        match credential {
            Credential::Bearer(token) => builder.header("authorization", format!("Bearer {token}")),
            Credential::Cookie(token) => builder.header("cookie", format!("token={token}")),
            Credential::None | Credential::Query(_) => builder,
        }
    }

    pub async fn get(&self, path: &str, credential: Credential<'_>) -> Result<hyper::Response<Body>> {
        let request = Self::builder(Method::GET, path, credential).body(Body::empty())?;
        Ok(self.send(request).await)
    }

    pub async fn delete(&self, path: &str, credential: Credential<'_>) -> Result<hyper::Response<Body>> {
        let request = Self::builder(Method::DELETE, path, credential).body(Body::empty())?;
        Ok(self.send(request).await)
    }

    async fn json_request(
        &self,
        method: Method,
        path: &str,
        payload: &Value,
        credential: Credential<'_>,
    ) -> Result<hyper::Response<Body>> {
        let request = Self::builder(method, path, credential)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(payload)?))?;
        Ok(self.send(request).await)
    }

    pub async fn post_json(&self, path: &str, payload: &Value, credential: Credential<'_>) -> Result<hyper::Response<Body>> {
        self.json_request(Method::POST, path, payload, credential).await
    }

    pub async fn put_json(&self, path: &str, payload: &Value, credential: Credential<'_>) -> Result<hyper::Response<Body>> {
        self.json_request(Method::PUT, path, payload, credential).await
    }

    pub async fn patch_json(&self, path: &str, payload: &Value, credential: Credential<'_>) -> Result<hyper::Response<Body>> {
        self.json_request(Method::PATCH, path, payload, credential).await
    }

    /// Posts a multipart form to `/documentos` with the given text fields and
    /// an optional `archivo` part.
    pub async fn upload(
        &self,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{:016x}", rand::random::<u64>());
        let mut body = Vec::new();

        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }

        if let Some((filename, content_type, data)) = file {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"archivo\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend(data);
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/documentos")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self.send(request).await)
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).with_context(|| {
        format!(
            "response is not JSON: {}",
            String::from_utf8_lossy(&bytes)
        )
    })
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE documentos, mandatos, expedientes, usuarios RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
