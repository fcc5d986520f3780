use std::future::Future;
use std::time::Instant;

use axum::http::StatusCode;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::auditable::Auditable;
use super::context::RequestMeta;
use super::entry::{Actor, AuditAction, NewAuditEntry, OutcomeStatus, ResourceType};
use super::store::AuditStore;
use crate::errors::AppError;

/// What a wrapped operation is, as far as the audit trail is concerned.
#[derive(Debug, Clone)]
pub struct AuditSpec {
    action: AuditAction,
    resource_type: ResourceType,
    resource_id: Option<String>,
    description: Option<String>,
    details: Option<Value>,
    success_status: StatusCode,
}

impl AuditSpec {
    pub fn new(action: AuditAction, resource_type: ResourceType) -> Self {
        Self {
            action,
            resource_type,
            resource_id: None,
            description: None,
            details: None,
            success_status: StatusCode::OK,
        }
    }

    pub fn resource_id(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Status reported when the operation succeeds (200 unless set).
    pub fn success_status(mut self, status: StatusCode) -> Self {
        self.success_status = status;
        self
    }
}

/// Records audit entries without holding up the caller.
///
/// `wrap` and `dispatch` queue the entry for the [`AuditWriter`]; if the queue
/// is full or the writer is gone the entry is written by a detached task.
/// `record_now` and `log_system` write inline. None of them ever return the
/// persistence error to the caller: failures end up in the operational log.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<NewAuditEntry>,
    store: AuditStore,
}

impl AuditRecorder {
    pub fn new(store: AuditStore, capacity: usize) -> (Self, mpsc::Receiver<NewAuditEntry>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, store }, rx)
    }

    /// Runs `op`, then queues one entry describing how it went.
    ///
    /// The operation's result is returned untouched, error included.
    pub async fn wrap<T, F>(&self, meta: &RequestMeta, actor: Actor, spec: AuditSpec, op: F) -> Result<T, AppError>
    where
        T: Auditable,
        F: Future<Output = Result<T, AppError>>,
    {
        let started = Instant::now();
        let result = op.await;
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let entry = build_entry(meta, actor, spec, result.as_ref(), duration_ms);
        self.dispatch(entry);

        result
    }

    /// Queues a FAILURE entry for an operation that records its own successes.
    pub fn record_failure(&self, meta: &RequestMeta, actor: Actor, spec: AuditSpec, err: &AppError, duration_ms: i64) {
        let entry = build_entry::<()>(meta, actor, spec, Err(err), duration_ms);
        self.dispatch(entry);
    }

    pub fn dispatch(&self, entry: NewAuditEntry) {
        let entry = match self.tx.try_send(entry) {
            Ok(()) => return,
            Err(TrySendError::Full(entry)) => {
                tracing::warn!(audit_action = %entry.action, "audit queue full, writing from a detached task");
                entry
            }
            Err(TrySendError::Closed(entry)) => {
                tracing::warn!(audit_action = %entry.action, "audit writer stopped, writing from a detached task");
                entry
            }
        };

        let store = self.store.clone();
        tokio::spawn(async move {
            persist(&store, &entry).await;
        });
    }

    /// Writes `entry` before returning. Returns whether it was stored.
    pub async fn record_now(&self, entry: NewAuditEntry) -> bool {
        persist(&self.store, &entry).await
    }

    /// Direct form for actions the system takes on its own.
    pub async fn log_system(
        &self,
        action: AuditAction,
        resource_type: ResourceType,
        description: impl Into<String>,
        details: Value,
    ) -> bool {
        let mut entry = NewAuditEntry::new(Actor::system(), action, resource_type, OutcomeStatus::Info);
        entry.description = description.into();
        entry.details = details;
        self.record_now(entry).await
    }
}

fn build_entry<T: Auditable>(
    meta: &RequestMeta,
    actor: Actor,
    spec: AuditSpec,
    result: Result<&T, &AppError>,
    duration_ms: i64,
) -> NewAuditEntry {
    let status = OutcomeStatus::from_success(result.is_ok());
    let actor = match result {
        Ok(value) => value.audit_actor().unwrap_or(actor),
        Err(_) => actor,
    };

    let mut entry = NewAuditEntry::new(actor, spec.action, spec.resource_type, status);
    entry.method = meta.method.clone();
    entry.endpoint = meta.endpoint.clone();
    entry.ip_address = meta.ip.clone();
    entry.user_agent = meta.user_agent.clone();
    entry.request_payload = meta.payload.clone();
    entry.duration_ms = Some(duration_ms);
    entry.resource_id = spec.resource_id;
    if let Some(description) = spec.description {
        entry.description = description;
    }

    let mut details = spec.details.unwrap_or_else(|| Value::Object(Default::default()));
    match result {
        Ok(value) => {
            entry.status_code = Some(spec.success_status.as_u16());
            if entry.resource_id.is_none() {
                entry.resource_id = value.audit_resource_id();
            }
            if let Some(extra) = value.audit_details() {
                merge(&mut details, extra);
            }
            entry.response_message = value.audit_message();
        }
        Err(err) => {
            entry.status_code = Some(err.status_code().as_u16());
            entry.error_message = Some(err.to_string());
        }
    }
    entry.details = details;

    entry
}

fn merge(into: &mut Value, extra: Value) {
    match (into, extra) {
        (Value::Object(target), Value::Object(source)) => target.extend(source),
        (target, extra) => *target = extra,
    }
}

async fn persist(store: &AuditStore, entry: &NewAuditEntry) -> bool {
    match store.insert(entry).await {
        Ok(()) => true,
        Err(err) => {
            tracing::error!(
                error = %err,
                audit_id = %entry.id,
                audit_action = %entry.action,
                "failed to write audit entry"
            );
            false
        }
    }
}

/// Background consumer of the recorder's queue. Stops when every sender is dropped.
pub struct AuditWriter {
    store: AuditStore,
}

impl AuditWriter {
    pub fn new(store: AuditStore) -> Self {
        Self { store }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<NewAuditEntry>) {
        tracing::info!("audit writer started");

        while let Some(entry) = rx.recv().await {
            if persist(&self.store, &entry).await {
                tracing::debug!(
                    audit_id = %entry.id,
                    audit_action = %entry.action,
                    resource = %entry.resource_type,
                    "audit entry recorded"
                );
            }
        }

        tracing::info!("audit queue closed, writer stopping");
    }
}
