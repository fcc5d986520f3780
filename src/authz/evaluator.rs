use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::catalog::{Permission, StaticRole};
use super::principal::Principal;

/// How a list of required permissions is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// At least one of the required permissions.
    #[default]
    Any,
    /// Every required permission.
    All,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Any => "any",
            MatchMode::All => "all",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthzError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("forbidden: requires {} of [{}]", .mode.as_str(), .required.join(", "))]
    Forbidden { required: Vec<String>, mode: MatchMode },
}

/// Why a request was denied. `held` only ever contains the caller's own grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub required: Vec<Permission>,
    pub mode: MatchMode,
    pub held: BTreeSet<Permission>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Unauthenticated,
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), AuthzError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Unauthenticated => Err(AuthzError::Unauthenticated),
            Decision::Deny(denial) => Err(AuthzError::Forbidden {
                required: denial.required.iter().map(|p| p.to_string()).collect(),
                mode: denial.mode,
            }),
        }
    }
}

/// Policy evaluator trait for pluggable authorization logic
pub trait PolicyEvaluator: Send + Sync {
    /// Decide whether `principal` satisfies `required` under `mode`.
    fn evaluate(&self, principal: Option<&Principal>, required: &[Permission], mode: MatchMode) -> Decision;

    fn authorize(
        &self,
        principal: Option<&Principal>,
        required: &[Permission],
        mode: MatchMode,
    ) -> Result<(), AuthzError> {
        self.evaluate(principal, required, mode).into_result()
    }

    /// Checks that `principal` may hand out every permission in `granting`.
    ///
    /// Administrators may delegate anything. Everyone else may only delegate
    /// permissions they hold themselves, and never the administrative role.
    fn can_delegate(
        &self,
        principal: &Principal,
        granting: &BTreeSet<Permission>,
        role_name: Option<&str>,
    ) -> Result<(), AuthzError> {
        if principal.is_admin() {
            return Ok(());
        }

        if role_name == Some(StaticRole::Admin.as_str()) {
            return Err(AuthzError::Forbidden {
                required: vec![StaticRole::Admin.as_str().to_string()],
                mode: MatchMode::All,
            });
        }

        let held = principal.effective_permissions();
        let missing: Vec<String> = granting.difference(&held).map(|p| p.to_string()).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %principal.user_id,
                missing = ?missing,
                "delegation beyond own grant refused"
            );
            Err(AuthzError::Forbidden {
                required: missing,
                mode: MatchMode::All,
            })
        }
    }
}

/// Default policy evaluator with standard RBAC logic
///
/// Evaluation order:
/// 1. no principal -> unauthenticated
/// 2. inactive principal -> deny
/// 3. administrative role (backend enum or persisted role name) -> allow
/// 4. static grant ∪ persisted role grant matched against `mode`
#[derive(Debug, Clone, Default)]
pub struct DefaultPolicyEvaluator;

impl DefaultPolicyEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl PolicyEvaluator for DefaultPolicyEvaluator {
    fn evaluate(&self, principal: Option<&Principal>, required: &[Permission], mode: MatchMode) -> Decision {
        let Some(principal) = principal else {
            return Decision::Unauthenticated;
        };

        let deny = |held: BTreeSet<Permission>| {
            Decision::Deny(Denial {
                required: required.to_vec(),
                mode,
                held,
            })
        };

        if !principal.is_active() {
            tracing::debug!(user_id = %principal.user_id, "inactive principal denied");
            return deny(BTreeSet::new());
        }

        if principal.is_admin() {
            tracing::debug!(
                user_id = %principal.user_id,
                required = ?required,
                "admin bypass"
            );
            return Decision::Allow;
        }

        let held = principal.effective_permissions();
        let satisfied = match mode {
            MatchMode::Any => required.iter().any(|p| held.contains(p)),
            MatchMode::All => required.iter().all(|p| held.contains(p)),
        };

        if satisfied {
            tracing::debug!(
                user_id = %principal.user_id,
                required = ?required,
                mode = mode.as_str(),
                "permission granted"
            );
            Decision::Allow
        } else {
            tracing::debug!(
                user_id = %principal.user_id,
                required = ?required,
                mode = mode.as_str(),
                "permission denied"
            );
            deny(held)
        }
    }
}
