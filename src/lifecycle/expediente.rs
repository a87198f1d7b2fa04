use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::LifecycleError;

const ALLOWED: &str = "PENDIENTE, APROBADO, RECHAZADO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExpedienteEstado {
    Pendiente,
    Aprobado,
    Rechazado,
}

impl ExpedienteEstado {
    pub const INITIAL: ExpedienteEstado = ExpedienteEstado::Pendiente;

    pub const fn as_str(self) -> &'static str {
        match self {
            ExpedienteEstado::Pendiente => "PENDIENTE",
            ExpedienteEstado::Aprobado => "APROBADO",
            ExpedienteEstado::Rechazado => "RECHAZADO",
        }
    }
}

impl fmt::Display for ExpedienteEstado {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpedienteEstado {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "PENDIENTE" => Ok(ExpedienteEstado::Pendiente),
            "APROBADO" => Ok(ExpedienteEstado::Aprobado),
            "RECHAZADO" => Ok(ExpedienteEstado::Rechazado),
            other => Err(LifecycleError::UnknownEstado {
                value: other.to_string(),
                allowed: ALLOWED,
            }),
        }
    }
}

/// Content edits are only allowed while the expediente awaits review.
pub fn ensure_editable(current: ExpedienteEstado) -> Result<(), LifecycleError> {
    match current {
        ExpedienteEstado::Pendiente => Ok(()),
        other => Err(LifecycleError::NotEditable {
            estado: other.as_str(),
        }),
    }
}

/// Reads the requested target state of a review transition. Any enumerated
/// state is accepted from any current state, so an APROBADO expediente can
/// be moved again by a reviewer.
pub fn transition_target(requested: Option<&str>) -> Result<ExpedienteEstado, LifecycleError> {
    let requested = requested
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(LifecycleError::MissingEstado)?;
    requested.parse()
}
