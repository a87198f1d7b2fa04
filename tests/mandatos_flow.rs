mod common;

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use axum::body::Body;
use axum::http::{
    header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    Method, StatusCode,
};
use axum::response::IntoResponse;
use chrono::{DateTime, Duration, Utc};
use common::{acquire_db_lock, body_to_vec, json_body, Credential, TestApp};
use expedientes::models::NewMandato;
use expedientes::routes::mandatos::insert_unique;
use serde_json::json;
use tokio::sync::Barrier;
use tower::util::ServiceExt;

struct Fixture {
    admin: String,
    asesor: String,
    asesor_id: i32,
    other: String,
}

async fn seed(app: &TestApp) -> Result<Fixture> {
    app.insert_usuario("Ana", "admin@inmo.test", "clave-segura", "ADMIN")
        .await?;
    let asesor_id = app
        .insert_usuario("Pablo Pérez", "pablo@inmo.test", "clave-segura", "ASESOR")
        .await?;
    app.insert_usuario("Lucia", "lucia@inmo.test", "clave-segura", "ASESOR")
        .await?;

    Ok(Fixture {
        admin: app.login_token("admin@inmo.test", "clave-segura").await?,
        asesor: app.login_token("pablo@inmo.test", "clave-segura").await?,
        asesor_id,
        other: app.login_token("lucia@inmo.test", "clave-segura").await?,
    })
}

#[tokio::test]
async fn approved_expediente_gets_exactly_one_mandate() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;
    let id = app
        .insert_expediente("Casa Palermo", Some(fx.asesor_id), "APROBADO")
        .await?;
    let path = format!("/expedientes/{id}/mandato");

    let created = app
        .post_json(
            &path,
            &json!({ "plazoDias": 30, "monto": 150000, "observaciones": "   " }),
            Credential::Bearer(&fx.asesor),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await?;
    let mandato = &created["mandato"];
    assert_eq!(mandato["estado"], "BORRADOR");
    assert_eq!(mandato["moneda"], "ARS");
    assert_eq!(mandato["plazoDias"], 30);
    assert!(mandato["observaciones"].is_null());
    assert!(mandato["firmadoFecha"].is_null());
    assert_eq!(mandato["expediente"]["id"], id);
    let mandato_id = mandato["id"].as_i64().unwrap_or_default();

    let repeated = app
        .post_json(
            &format!("/propiedades/{id}/mandato"),
            &json!({ "plazoDias": 30, "monto": 150000 }),
            Credential::Bearer(&fx.asesor),
        )
        .await?;
    assert_eq!(repeated.status(), StatusCode::BAD_REQUEST);
    let repeated = json_body(repeated).await?;
    assert_eq!(repeated["code"], "MANDATE_ALREADY_EXISTS");
    assert_eq!(repeated["mandatoExistente"]["id"], mandato_id);
    assert_eq!(repeated["mandatoExistente"]["estado"], "BORRADOR");

    assert_eq!(app.count_rows("mandatos").await?, 1);

    let fetched = app.get(&path, Credential::Bearer(&fx.asesor)).await?;
    assert_eq!(fetched.status(), StatusCode::OK);
    assert_eq!(json_body(fetched).await?["mandato"]["id"], mandato_id);

    let embedded = json_body(
        app.get(&format!("/expedientes/{id}"), Credential::Bearer(&fx.asesor))
            .await?,
    )
    .await?;
    assert_eq!(embedded["mandato"]["id"], mandato_id);

    app.cleanup().await?;
    Ok(())
}

fn draft_for(expediente_id: i32, monto: f64) -> NewMandato {
    NewMandato {
        expediente_id,
        plazo_dias: 60,
        monto,
        moneda: "USD".to_string(),
        observaciones: None,
        estado: "BORRADOR".to_string(),
    }
}

#[tokio::test]
async fn losing_insert_reports_the_existing_mandate() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;
    let id = app
        .insert_expediente("Casa Olivos", Some(fx.asesor_id), "APROBADO")
        .await?;

    let first = draft_for(id, 99000.5);
    let winner = app
        .with_conn(move |conn| Ok(insert_unique(conn, &first)))
        .await?
        .map_err(|err| anyhow!("first insert failed: {err}"))?;

    // No pre-read here: the second insert hits the unique constraint itself.
    let second = draft_for(id, 120000.0);
    let lost = app
        .with_conn(move |conn| Ok(insert_unique(conn, &second)))
        .await?;
    let err = match lost {
        Ok(mandato) => bail!("second insert created mandato {}", mandato.id),
        Err(err) => err,
    };
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(err.code(), "MANDATE_ALREADY_EXISTS");

    let body = json_body(err.into_response()).await?;
    assert_eq!(body["mandatoExistente"]["id"], winner.id);
    assert_eq!(body["mandatoExistente"]["estado"], "BORRADOR");
    assert_eq!(app.count_rows("mandatos").await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_creations_leave_one_row() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;
    let id = app
        .insert_expediente("Casa Tigre", Some(fx.asesor_id), "APROBADO")
        .await?;
    let path = format!("/expedientes/{id}/mandato");
    let body = serde_json::to_vec(&json!({ "plazoDias": 60, "monto": 99000.5, "moneda": "usd" }))?;

    let barrier = Arc::new(Barrier::new(2));
    let mut tasks = Vec::new();
    for token in [fx.asesor.clone(), fx.admin.clone()] {
        let request = TestApp::builder(Method::POST, &path, Credential::Bearer(&token))
            .header("content-type", "application/json")
            .body(Body::from(body.clone()))?;
        let router = app.router();
        let barrier = Arc::clone(&barrier);
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            router.oneshot(request).await
        }));
    }

    let mut statuses = Vec::new();
    for task in tasks {
        statuses.push(task.await??.status());
    }
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::CREATED, StatusCode::BAD_REQUEST]);
    assert_eq!(app.count_rows("mandatos").await?, 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn creation_preconditions_are_checked_in_order() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;
    let pending = app
        .insert_expediente("Lote Escobar", Some(fx.asesor_id), "PENDIENTE")
        .await?;
    let approved = app
        .insert_expediente("Casa Martínez", Some(fx.asesor_id), "APROBADO")
        .await?;

    // Approval is checked before the body, and for every role.
    for token in [&fx.asesor, &fx.admin] {
        let response = app
            .post_json(
                &format!("/expedientes/{pending}/mandato"),
                &json!({ "plazoDias": 0 }),
                Credential::Bearer(token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await?;
        assert_eq!(body["code"], "CASE_FILE_NOT_APPROVED");
        assert_eq!(body["estadoActual"], "PENDIENTE");
    }

    let path = format!("/expedientes/{approved}/mandato");
    let cases = [
        (json!({ "monto": 1000 }), "INVALID_TERM"),
        (json!({ "plazoDias": 0, "monto": 1000 }), "INVALID_TERM"),
        (json!({ "plazoDias": "30", "monto": 1000 }), "INVALID_TERM"),
        (json!({ "plazoDias": 30 }), "INVALID_AMOUNT"),
        (json!({ "plazoDias": 30, "monto": -5 }), "INVALID_AMOUNT"),
        (json!({ "plazoDias": 30, "monto": 10, "moneda": "EUR" }), "INVALID_CURRENCY"),
    ];
    for (body, code) in cases {
        let response = app
            .post_json(&path, &body, Credential::Bearer(&fx.asesor))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(json_body(response).await?["code"], code, "{body}");
    }
    assert_eq!(app.count_rows("mandatos").await?, 0);

    let foreign = app
        .post_json(
            &path,
            &json!({ "plazoDias": 30, "monto": 1000 }),
            Credential::Bearer(&fx.other),
        )
        .await?;
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    let none_yet = app.get(&path, Credential::Bearer(&fx.asesor)).await?;
    assert_eq!(none_yet.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn signing_stamps_server_time() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;
    let id = app
        .insert_expediente("Casa Nordelta", Some(fx.asesor_id), "APROBADO")
        .await?;
    let created = json_body(
        app.post_json(
            &format!("/expedientes/{id}/mandato"),
            &json!({ "plazoDias": 90, "monto": 250000 }),
            Credential::Bearer(&fx.asesor),
        )
        .await?,
    )
    .await?;
    let mandato_id = created["mandato"]["id"].as_i64().unwrap_or_default();
    let path = format!("/mandatos/{mandato_id}/estado");

    let denied = app
        .put_json(&path, &json!({ "estado": "FIRMADO" }), Credential::Bearer(&fx.asesor))
        .await?;
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let sent = json_body(
        app.put_json(
            &path,
            &json!({ "estado": "ENVIADO", "firmadoPor": "Nadie" }),
            Credential::Bearer(&fx.admin),
        )
        .await?,
    )
    .await?;
    assert_eq!(sent["mandato"]["estado"], "ENVIADO");
    assert!(sent["mandato"]["firmadoPor"].is_null());
    assert!(sent["mandato"]["firmadoFecha"].is_null());

    let before = Utc::now() - Duration::seconds(5);
    let signed = app
        .put_json(
            &path,
            &json!({
                "estado": "FIRMADO",
                "firmadoPor": "María López",
                "firmadoFecha": "2001-01-01T00:00:00Z",
                "documentoUrl": "https://docs.inmo.test/m.pdf"
            }),
            Credential::Bearer(&fx.admin),
        )
        .await?;
    assert_eq!(signed.status(), StatusCode::OK);
    let signed = json_body(signed).await?;
    assert_eq!(signed["mandato"]["firmadoPor"], "María López");
    assert_eq!(signed["mandato"]["documentoUrl"], "https://docs.inmo.test/m.pdf");
    let signed_at: DateTime<Utc> = signed["mandato"]["firmadoFecha"]
        .as_str()
        .unwrap_or_default()
        .parse()?;
    assert!(signed_at >= before);

    // No adjacency is enforced: a signed mandate can go back to draft.
    let reverted = app
        .put_json(&path, &json!({ "estado": "BORRADOR" }), Credential::Bearer(&fx.admin))
        .await?;
    assert_eq!(reverted.status(), StatusCode::OK);
    let reverted = json_body(reverted).await?;
    assert_eq!(reverted["mandato"]["estado"], "BORRADOR");
    assert_eq!(reverted["mandato"]["firmadoPor"], "María López");

    let invalid = app
        .put_json(&path, &json!({ "estado": "VENCIDO" }), Credential::Bearer(&fx.admin))
        .await?;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(invalid).await?["code"], "INVALID_STATE");

    let unknown = app
        .put_json("/mandatos/9999/estado", &json!({ "estado": "ENVIADO" }), Credential::Bearer(&fx.admin))
        .await?;
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn word_document_is_generated_from_current_records() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;
    let id = app
        .insert_expediente("Casa Palermo", Some(fx.asesor_id), "APROBADO")
        .await?;

    let no_mandate = app
        .get(&format!("/expedientes/{id}/mandato/word"), Credential::Bearer(&fx.asesor))
        .await?;
    assert_eq!(no_mandate.status(), StatusCode::NOT_FOUND);

    app.post_json(
        &format!("/expedientes/{id}/mandato"),
        &json!({ "plazoDias": 30, "monto": 150000 }),
        Credential::Bearer(&fx.asesor),
    )
    .await?;

    let response = app
        .get(
            &format!("/propiedades/{id}/mandato/word"),
            Credential::Query(&fx.asesor),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/msword")
    );
    let disposition = response
        .headers()
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.starts_with(&format!(
        "attachment; filename=\"mandato-expediente-{id}.doc\""
    )));

    let document = String::from_utf8(body_to_vec(response.into_body()).await?)?;
    assert!(document.contains("MANDATO DE VENTA"));
    assert!(document.contains("ARS 150.000,00"));
    assert!(document.contains("Pablo Pérez"));
    assert!(!document.contains("Firmado por"));

    let foreign = app
        .get(&format!("/expedientes/{id}/mandato/word"), Credential::Bearer(&fx.other))
        .await?;
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn static_template_is_served_when_present() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fx = seed(&app).await?;
    let path = "/mandatos/plantilla/persona-fisica";

    let missing = app.get(path, Credential::Bearer(&fx.asesor)).await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let templates = app.templates_dir();
    std::fs::create_dir_all(&templates)?;
    std::fs::write(
        templates.join("mandato-venta-persona-fisica.docx"),
        b"PK-template-bytes",
    )?;

    let served = app.get(path, Credential::Bearer(&fx.asesor)).await?;
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(body_to_vec(served.into_body()).await?, b"PK-template-bytes");

    let anonymous = app.get(path, Credential::None).await?;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
