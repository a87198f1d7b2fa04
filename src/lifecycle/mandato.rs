use std::{fmt, str::FromStr};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{expediente::ExpedienteEstado, LifecycleError};
use crate::utils::fields::trimmed_or_none;

const ALLOWED: &str = "BORRADOR, ENVIADO, FIRMADO, ANULADO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MandatoEstado {
    Borrador,
    Enviado,
    Firmado,
    Anulado,
}

impl MandatoEstado {
    pub const INITIAL: MandatoEstado = MandatoEstado::Borrador;

    pub const fn as_str(self) -> &'static str {
        match self {
            MandatoEstado::Borrador => "BORRADOR",
            MandatoEstado::Enviado => "ENVIADO",
            MandatoEstado::Firmado => "FIRMADO",
            MandatoEstado::Anulado => "ANULADO",
        }
    }
}

impl fmt::Display for MandatoEstado {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MandatoEstado {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "BORRADOR" => Ok(MandatoEstado::Borrador),
            "ENVIADO" => Ok(MandatoEstado::Enviado),
            "FIRMADO" => Ok(MandatoEstado::Firmado),
            "ANULADO" => Ok(MandatoEstado::Anulado),
            other => Err(LifecycleError::UnknownEstado {
                value: other.to_string(),
                allowed: ALLOWED,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Moneda {
    #[default]
    Ars,
    Usd,
}

impl Moneda {
    pub const fn as_str(self) -> &'static str {
        match self {
            Moneda::Ars => "ARS",
            Moneda::Usd => "USD",
        }
    }
}

impl FromStr for Moneda {
    type Err = LifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ARS" => Ok(Moneda::Ars),
            "USD" => Ok(Moneda::Usd),
            _ => Err(LifecycleError::InvalidCurrency(value.to_string())),
        }
    }
}

/// Validated input for a new mandate.
#[derive(Debug, Clone, PartialEq)]
pub struct MandatoDraft {
    pub plazo_dias: i32,
    pub monto: f64,
    pub moneda: Moneda,
    pub observaciones: Option<String>,
}

/// Preconditions that depend on the owning expediente, in the order they
/// are reported: approval first, then uniqueness.
pub fn check_creation(
    expediente_estado: ExpedienteEstado,
    existing: Option<(i32, &str)>,
) -> Result<(), LifecycleError> {
    if expediente_estado != ExpedienteEstado::Aprobado {
        return Err(LifecycleError::CaseFileNotApproved {
            estado: expediente_estado.as_str(),
        });
    }

    if let Some((id, estado)) = existing {
        return Err(LifecycleError::MandateAlreadyExists {
            id,
            estado: estado.to_string(),
        });
    }

    Ok(())
}

fn parse_term(value: Option<&Value>) -> Result<i32, LifecycleError> {
    let number = match value {
        Some(Value::Number(number)) => number,
        _ => return Err(LifecycleError::InvalidTerm),
    };

    let days = match number.as_i64() {
        Some(days) => days,
        None => match number.as_f64() {
            Some(days) if days.is_finite() && days.fract() == 0.0 => days as i64,
            _ => return Err(LifecycleError::InvalidTerm),
        },
    };

    match i32::try_from(days) {
        Ok(days) if days > 0 => Ok(days),
        _ => Err(LifecycleError::InvalidTerm),
    }
}

fn parse_amount(value: Option<&Value>) -> Result<f64, LifecycleError> {
    match value.and_then(Value::as_f64) {
        Some(amount) if amount.is_finite() && amount > 0.0 => Ok(amount),
        _ => Err(LifecycleError::InvalidAmount),
    }
}

fn parse_currency(value: Option<&Value>) -> Result<Moneda, LifecycleError> {
    match value {
        None | Some(Value::Null) => Ok(Moneda::default()),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(Moneda::default()),
        Some(Value::String(raw)) => raw.parse(),
        Some(other) => Err(LifecycleError::InvalidCurrency(other.to_string())),
    }
}

/// Validates a creation body: `plazoDias`, `monto`, optional `moneda`
/// (defaults to ARS) and optional `observaciones` (blank becomes absent).
pub fn parse_draft(body: &Value) -> Result<MandatoDraft, LifecycleError> {
    let plazo_dias = parse_term(body.get("plazoDias"))?;
    let monto = parse_amount(body.get("monto"))?;
    let moneda = parse_currency(body.get("moneda"))?;
    let observaciones = trimmed_or_none(body.get("observaciones").and_then(Value::as_str));

    Ok(MandatoDraft {
        plazo_dias,
        monto,
        moneda,
        observaciones,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRequest {
    pub estado: Option<String>,
    pub firmado_por: Option<String>,
    pub documento_url: Option<String>,
}

/// Columns to write for a state change. `None` leaves a column untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct MandatoTransition {
    pub estado: MandatoEstado,
    pub firmado_fecha: Option<NaiveDateTime>,
    pub firmado_por: Option<String>,
    pub documento_url: Option<String>,
}

/// Plans a state change. No adjacency is enforced: any enumerated state is
/// accepted from any current state, FIRMADO back to BORRADOR included.
/// The signature time always comes from `now`, never from the request.
pub fn plan_transition(
    request: &TransitionRequest,
    now: NaiveDateTime,
) -> Result<MandatoTransition, LifecycleError> {
    let estado: MandatoEstado = request
        .estado
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(LifecycleError::MissingEstado)?
        .parse()?;

    let signed = estado == MandatoEstado::Firmado;

    Ok(MandatoTransition {
        estado,
        firmado_fecha: signed.then_some(now),
        firmado_por: if signed {
            trimmed_or_none(request.firmado_por.as_deref())
        } else {
            None
        },
        documento_url: trimmed_or_none(request.documento_url.as_deref()),
    })
}
