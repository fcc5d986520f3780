//! Authorization module - permission catalog, identity resolution and policy engine
//!
//! Request flow:
//! - [`IdentityResolver`] turns the bearer token into a [`Principal`]
//! - [`PolicyEvaluator`] decides whether that principal holds the required permissions
//! - administrators short-circuit to allow; everyone else is checked against the
//!   union of their static grant and their persisted role's grant

pub mod catalog;
mod evaluator;
mod principal;
mod resolver;

pub use catalog::{permissions, BackendRole, Permission, StaticRole};
pub use evaluator::{AuthzError, Decision, DefaultPolicyEvaluator, Denial, MatchMode, PolicyEvaluator};
pub use principal::Principal;
pub use resolver::{AuthError, IdentityResolver};
