use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = usuarios)]
pub struct Usuario {
    pub id: i32,
    pub nombre: String,
    pub email: String,
    pub password_hash: String,
    pub rol: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = usuarios)]
pub struct NewUsuario {
    pub nombre: String,
    pub email: String,
    pub password_hash: String,
    pub rol: String,
}

/// Display data for the agent responsible for an expediente.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = usuarios)]
pub struct AsesorSummary {
    pub id: i32,
    pub nombre: String,
    pub email: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = expedientes)]
pub struct Expediente {
    pub id: i32,
    pub titulo: String,
    pub descripcion: Option<String>,
    pub propietario_nombre: String,
    pub estado: String,
    pub asesor_id: Option<i32>,
    pub observaciones: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = expedientes)]
pub struct NewExpediente {
    pub titulo: String,
    pub descripcion: Option<String>,
    pub propietario_nombre: String,
    pub estado: String,
    pub asesor_id: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = mandatos)]
pub struct Mandato {
    pub id: i32,
    pub expediente_id: i32,
    pub plazo_dias: i32,
    pub monto: f64,
    pub moneda: String,
    pub observaciones: Option<String>,
    pub estado: String,
    pub firmado_por: Option<String>,
    pub firmado_fecha: Option<NaiveDateTime>,
    pub documento_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = mandatos)]
pub struct NewMandato {
    pub expediente_id: i32,
    pub plazo_dias: i32,
    pub monto: f64,
    pub moneda: String,
    pub observaciones: Option<String>,
    pub estado: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = documentos)]
pub struct Documento {
    pub id: i32,
    pub expediente_id: i32,
    pub tipo: String,
    pub ruta: String,
    pub nombre_original: String,
    pub tamano: i64,
    pub mimetype: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documentos)]
pub struct NewDocumento {
    pub expediente_id: i32,
    pub tipo: String,
    pub ruta: String,
    pub nombre_original: String,
    pub tamano: i64,
    pub mimetype: String,
}
