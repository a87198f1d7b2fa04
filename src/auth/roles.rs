use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Admin,
    Revisor,
    Asesor,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Revisor => "REVISOR",
            Role::Asesor => "ASESOR",
        }
    }

    pub const fn is_elevated(self) -> bool {
        matches!(self, Role::Admin | Role::Revisor)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "REVISOR" => Ok(Role::Revisor),
            "ASESOR" => Ok(Role::Asesor),
            _ => Err(UnknownRole(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    AdminOnly,
    AdminOrReviewer,
}

impl Capability {
    pub const fn denial_message(self) -> &'static str {
        match self {
            Capability::AdminOnly => "access denied: ADMIN role required",
            Capability::AdminOrReviewer => "access denied: ADMIN or REVISOR role required",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", .0.denial_message())]
pub struct Forbidden(pub Capability);

pub fn authorize(role: Role, capability: Capability) -> Result<(), Forbidden> {
    let allowed = match capability {
        Capability::AdminOnly => role == Role::Admin,
        Capability::AdminOrReviewer => role.is_elevated(),
    };

    if allowed {
        Ok(())
    } else {
        Err(Forbidden(capability))
    }
}

/// Which expedientes an actor may see. Agents are confined to the records
/// they own; elevated roles see everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipScope {
    All,
    OwnedBy(i32),
}

impl OwnershipScope {
    pub fn for_actor(user_id: i32, role: Role) -> Self {
        if role.is_elevated() {
            OwnershipScope::All
        } else {
            OwnershipScope::OwnedBy(user_id)
        }
    }

    pub fn permits(self, asesor_id: Option<i32>) -> bool {
        match self {
            OwnershipScope::All => true,
            OwnershipScope::OwnedBy(owner) => asesor_id == Some(owner),
        }
    }
}
