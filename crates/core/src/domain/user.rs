use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::WorkflowError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Finance,
    Hr,
    It,
    GeneralServices,
    Management,
    Executive,
    Admin,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Employee,
        Role::Finance,
        Role::Hr,
        Role::It,
        Role::GeneralServices,
        Role::Management,
        Role::Executive,
        Role::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employee => "employee",
            Self::Finance => "finance",
            Self::Hr => "hr",
            Self::It => "it",
            Self::GeneralServices => "general_services",
            Self::Management => "management",
            Self::Executive => "executive",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = WorkflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "employee" => Ok(Self::Employee),
            "finance" => Ok(Self::Finance),
            "hr" => Ok(Self::Hr),
            "it" => Ok(Self::It),
            "general_services" => Ok(Self::GeneralServices),
            "management" => Ok(Self::Management),
            "executive" => Ok(Self::Executive),
            "admin" => Ok(Self::Admin),
            other => Err(WorkflowError::validation("role", format!("unknown role `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A registration before it is written; `email` is normalized by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
}

impl User {
    pub fn caller(&self) -> Caller {
        Caller { id: self.id, role: self.role }
    }
}

/// An authenticated identity as resolved by the identity provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: UserId,
    pub role: Role,
}

impl Caller {
    pub fn new(id: UserId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn role_names_parse_back_to_the_same_role() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().expect("known role"), role);
        }
    }

    #[test]
    fn unknown_role_is_a_validation_error() {
        let error = "janitor".parse::<Role>().expect_err("unknown role");
        assert!(matches!(
            error,
            crate::errors::WorkflowError::Validation { field: "role", .. }
        ));
    }
}
