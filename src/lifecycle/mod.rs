//! State machines for expedientes and their sales mandates.

pub mod expediente;
pub mod mandato;

use thiserror::Error;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    #[error("invalid estado `{value}`, allowed: {allowed}")]
    UnknownEstado { value: String, allowed: &'static str },
    #[error("the `estado` field is required")]
    MissingEstado,
    #[error("only PENDIENTE expedientes can be edited")]
    NotEditable { estado: &'static str },
    #[error("a mandato can only be created for APROBADO expedientes")]
    CaseFileNotApproved { estado: &'static str },
    #[error("this expediente already has a mandato")]
    MandateAlreadyExists { id: i32, estado: String },
    #[error("the `plazoDias` field is required and must be a positive integer")]
    InvalidTerm,
    #[error("the `monto` field is required and must be a positive number")]
    InvalidAmount,
    #[error("invalid moneda `{0}`, allowed: ARS, USD")]
    InvalidCurrency(String),
}

impl From<LifecycleError> for AppError {
    fn from(value: LifecycleError) -> Self {
        let base = AppError::bad_request(value.to_string());
        match value {
            LifecycleError::UnknownEstado { .. } | LifecycleError::MissingEstado => {
                base.with_code("INVALID_STATE")
            }
            LifecycleError::NotEditable { estado } => base
                .with_code("NOT_EDITABLE")
                .with_detail("estadoActual", estado),
            LifecycleError::CaseFileNotApproved { estado } => base
                .with_code("CASE_FILE_NOT_APPROVED")
                .with_detail("estadoActual", estado),
            LifecycleError::MandateAlreadyExists { id, estado } => base
                .with_code("MANDATE_ALREADY_EXISTS")
                .with_detail(
                    "mandatoExistente",
                    serde_json::json!({ "id": id, "estado": estado }),
                ),
            LifecycleError::InvalidTerm => base.with_code("INVALID_TERM"),
            LifecycleError::InvalidAmount => base.with_code("INVALID_AMOUNT"),
            LifecycleError::InvalidCurrency(_) => base.with_code("INVALID_CURRENCY"),
        }
    }
}
