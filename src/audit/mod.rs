//! Audit trail: request-path recording and the query/retention surface.
//!
//! Handlers record through [`AuditRecorder`], which hands entries to a
//! background [`AuditWriter`] over a bounded channel so the response never
//! waits on the insert. [`AuditLogService`] reads, aggregates and purges.

use std::time::Duration;

pub mod auditable;
pub mod context;
pub mod entry;
mod recorder;
mod service;
mod store;

pub use auditable::Auditable;
pub use context::RequestMeta;
pub use entry::{Actor, AuditAction, AuditLogEntry, NewAuditEntry, OutcomeStatus, RecordShape, ResourceType};
pub use recorder::{AuditRecorder, AuditSpec, AuditWriter};
pub use service::{
    ActionCount, ActorCount, AuditFilter, AuditLogService, AuditPage, AuditStatistics, DailyActivity, DateRange,
    PurgeReport, clamp_page_size, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use store::AuditStore;

use crate::errors::AppError;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit query failed: {0}")]
    Query(String),
    #[error("audit retention purge failed: {0}")]
    Retention(String),
    #[error("retention must be at least one day, got {0}")]
    InvalidRetention(i64),
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub queue_capacity: usize,
    pub retention_days: Option<i64>,
    pub purge_interval: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            retention_days: None,
            purge_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl AuditConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let queue_capacity = match std::env::var("AUDIT_QUEUE_CAPACITY") {
            Ok(val) => val
                .parse::<usize>()
                .ok()
                .filter(|capacity| *capacity > 0)
                .ok_or_else(|| AppError::configuration("AUDIT_QUEUE_CAPACITY must be a positive integer"))?,
            Err(_) => defaults.queue_capacity,
        };

        let retention_days = match std::env::var("AUDIT_RETENTION_DAYS") {
            Ok(val) => Some(
                val.parse::<i64>()
                    .ok()
                    .filter(|days| *days >= 1)
                    .ok_or_else(|| AppError::configuration("AUDIT_RETENTION_DAYS must be an integer >= 1"))?,
            ),
            Err(_) => None,
        };

        let purge_interval = match std::env::var("AUDIT_PURGE_INTERVAL_HOURS") {
            Ok(val) => val
                .parse::<u64>()
                .ok()
                .filter(|hours| *hours > 0)
                .map(|hours| Duration::from_secs(hours * 60 * 60))
                .ok_or_else(|| AppError::configuration("AUDIT_PURGE_INTERVAL_HOURS must be a positive integer"))?,
            Err(_) => defaults.purge_interval,
        };

        Ok(Self {
            queue_capacity,
            retention_days,
            purge_interval,
        })
    }
}
