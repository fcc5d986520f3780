use serde_json::Value;

use super::entry::Actor;

/// Values a handler can hand back through [`super::AuditRecorder::wrap`].
///
/// Every hook is optional; implement only what the result can tell the
/// audit entry that the call site could not know up front.
pub trait Auditable: Send {
    /// Identifier of the resource the operation produced or touched.
    fn audit_resource_id(&self) -> Option<String> {
        None
    }

    /// Extra structured details merged into the entry.
    fn audit_details(&self) -> Option<Value> {
        None
    }

    /// Actor established by the operation itself (e.g. a successful login).
    fn audit_actor(&self) -> Option<Actor> {
        None
    }

    fn audit_message(&self) -> Option<String> {
        None
    }
}

impl Auditable for () {}
