//! Role based access checks.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::audit::{AuditFields, AuditLogger};
use crate::metadata::Metadata;
use crate::structured_error::{StructuredError, ERROR_DOMAIN};

const ERROR_SUB_DOMAIN: &str = "auth";

pub const ERROR_NOT_ENOUGH_PRIVILEGES: &str = "not_enough_privileges";
pub const ERROR_UNKNOWN_ROLE: &str = "unknown_role";

/// User ids starting with this prefix bypass role checks. Used when an action
/// is triggered by a system (provider callback, scheduled job) instead of a user.
pub const AUTH_OVERRIDE_PREFIX: &str = "system_override_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// End user of the application.
    User,
    /// Read-only access to all data.
    OperatorRead,
    /// Read-write access to all data.
    OperatorWrite,
    /// Read-write access, can also change the roles of other users.
    OperatorAdmin,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::User,
        Role::OperatorRead,
        Role::OperatorWrite,
        Role::OperatorAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::OperatorRead => "OPERATOR_READ",
            Role::OperatorWrite => "OPERATOR_WRITE",
            Role::OperatorAdmin => "OPERATOR_ADMIN",
        }
    }

    /// Whether holding `self` implies `required`.
    pub fn grants(&self, required: Role) -> bool {
        match required {
            Role::User => matches!(self, Role::User),
            Role::OperatorRead => matches!(
                self,
                Role::OperatorRead | Role::OperatorWrite | Role::OperatorAdmin
            ),
            Role::OperatorWrite => matches!(self, Role::OperatorWrite | Role::OperatorAdmin),
            Role::OperatorAdmin => matches!(self, Role::OperatorAdmin),
        }
    }
}

impl FromStr for Role {
    type Err = StructuredError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| {
                StructuredError::new(
                    400,
                    ERROR_DOMAIN,
                    ERROR_SUB_DOMAIN,
                    ERROR_UNKNOWN_ROLE,
                    Some(Metadata::from_iter([("role", value)])),
                )
            })
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether any of the raw `roles` grants `required`. Unknown strings never do.
pub fn has_role<S: AsRef<str>>(roles: &[S], required: Role) -> bool {
    roles
        .iter()
        .filter_map(|role| role.as_ref().parse::<Role>().ok())
        .any(|role| role.grants(required))
}

pub fn operator_read<S: AsRef<str>>(roles: &[S]) -> bool {
    has_role(roles, Role::OperatorRead)
}

pub fn operator_write<S: AsRef<str>>(roles: &[S]) -> bool {
    has_role(roles, Role::OperatorWrite)
}

/// Detects an override user id and records who used it as an audit fact.
pub fn is_override(logger: &AuditLogger, context: &Metadata, user_id: &str, sub_domain: &str) -> bool {
    let Some(override_by) = user_id.strip_prefix(AUTH_OVERRIDE_PREFIX) else {
        return false;
    };

    let mut fields = AuditFields::new();
    fields.insert("override_by".to_string(), json!(override_by));
    logger.fact(
        context,
        &format!("Authorization override for {sub_domain} by {override_by}"),
        Some(fields),
    );
    true
}

/// Service specific lookup deciding whether a user holds the needed role.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoleCheck: Send + Sync {
    async fn has_role(&self, context: &Metadata, user_id: &str) -> Result<bool, StructuredError>;
}

/// Fails with `403 <error_domain>/<sub_domain>/not_enough_privileges` unless
/// `user_id` is an override or `check` accepts it.
pub async fn must_have_role(
    logger: &AuditLogger,
    check: &dyn RoleCheck,
    context: &Metadata,
    user_id: &str,
    error_domain: &str,
    sub_domain: &str,
) -> Result<(), StructuredError> {
    if is_override(logger, context, user_id, sub_domain) {
        return Ok(());
    }

    if check.has_role(context, user_id).await? {
        Ok(())
    } else {
        Err(StructuredError::new(
            403,
            error_domain,
            sub_domain,
            ERROR_NOT_ENOUGH_PRIVILEGES,
            None,
        ))
    }
}
