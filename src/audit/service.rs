use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tokio::task::JoinHandle;
use utoipa::ToSchema;
use uuid::Uuid;

use super::auditable::Auditable;
use super::entry::{AuditAction, AuditLogEntry, ResourceType};
use super::recorder::AuditRecorder;
use super::AuditError;
use crate::db::row_parsers::audit_entry_from_row;
use crate::db::timestamp;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Best-available timestamp across both record shapes.
const TS_EXPR: &str = "COALESCE(NULLIF(timestamp, ''), created_at)";
/// 1 when the entry counts as a success under either shape, else 0.
const SUCCESS_EXPR: &str = "COALESCE(NULLIF(TRIM(status), '') IN ('SUCCESS', 'INFO'), success <> 0, 0)";
const ACTOR_ID_EXPR: &str = "COALESCE(json_extract(actor, '$.id'), user_id)";
const ACTOR_NAME_EXPR: &str = "COALESCE(json_extract(actor, '$.username'), username)";

const TOP_N: i64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub actor: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub success: Option<bool>,
    pub range: DateRange,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditPage {
    pub items: Vec<AuditLogEntry>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActionCount {
    pub action: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ActorCount {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DailyActivity {
    pub day: NaiveDate,
    pub total: i64,
    pub successes: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditStatistics {
    pub total_actions: i64,
    pub success_count: i64,
    pub failure_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<f64>,
    pub top_actions: Vec<ActionCount>,
    pub top_actors: Vec<ActorCount>,
    pub daily_activity: Vec<DailyActivity>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PurgeReport {
    pub days: i64,
    pub cutoff: DateTime<Utc>,
    pub deleted: u64,
}

impl Auditable for AuditPage {
    fn audit_details(&self) -> Option<serde_json::Value> {
        Some(json!({ "returned": self.items.len(), "total": self.total, "page": self.page }))
    }
}

/// Clamps a requested page size into `1..=MAX_PAGE_SIZE`.
pub fn clamp_page_size(page_size: Option<u32>) -> u32 {
    page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

fn query_error(err: impl std::fmt::Display) -> AuditError {
    AuditError::Query(err.to_string())
}

fn retention_error(err: impl std::fmt::Display) -> AuditError {
    AuditError::Retention(err.to_string())
}

fn push_range(qb: &mut QueryBuilder<'_, Sqlite>, range: &DateRange) {
    if let Some(from) = range.from {
        qb.push(format!(" AND julianday({TS_EXPR}) >= julianday("))
            .push_bind(timestamp(from))
            .push(")");
    }
    if let Some(to) = range.to {
        qb.push(format!(" AND julianday({TS_EXPR}) <= julianday("))
            .push_bind(timestamp(to))
            .push(")");
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &AuditFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(actor) = filter.actor {
        let actor = actor.to_string();
        qb.push(" AND (user_id = ")
            .push_bind(actor.clone())
            .push(" OR json_extract(actor, '$.id') = ")
            .push_bind(actor)
            .push(")");
    }
    if let Some(action) = &filter.action {
        qb.push(" AND action = ").push_bind(action.clone());
    }
    if let Some(resource_type) = &filter.resource_type {
        qb.push(" AND resource_type = ").push_bind(resource_type.clone());
    }
    if let Some(success) = filter.success {
        qb.push(format!(" AND {SUCCESS_EXPR} = ")).push_bind(i64::from(success));
    }
    push_range(qb, &filter.range);
}

/// Read side of the audit trail plus age-based retention.
#[derive(Clone)]
pub struct AuditLogService {
    pool: SqlitePool,
    recorder: AuditRecorder,
}

impl AuditLogService {
    pub fn new(pool: SqlitePool, recorder: AuditRecorder) -> Self {
        Self { pool, recorder }
    }

    /// Newest first by best-available timestamp. `page` is 1-based.
    pub async fn list(&self, filter: &AuditFilter, page: u32, page_size: u32) -> Result<AuditPage, AuditError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM audit_logs");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM audit_logs");
        push_filter(&mut select, filter);
        select
            .push(format!(" ORDER BY julianday({TS_EXPR}) DESC, id DESC LIMIT "))
            .push_bind(i64::from(page_size))
            .push(" OFFSET ")
            .push_bind(i64::from(page - 1) * i64::from(page_size));

        let rows = select.build().fetch_all(&self.pool).await.map_err(query_error)?;
        let items = rows
            .iter()
            .map(audit_entry_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;

        Ok(AuditPage {
            items,
            total,
            page,
            page_size,
        })
    }

    pub async fn for_actor(&self, user_id: Uuid, page: u32, page_size: u32) -> Result<AuditPage, AuditError> {
        let filter = AuditFilter {
            actor: Some(user_id),
            ..AuditFilter::default()
        };
        self.list(&filter, page, page_size).await
    }

    pub async fn statistics(&self, range: &DateRange) -> Result<AuditStatistics, AuditError> {
        let mut totals = QueryBuilder::<Sqlite>::new(format!(
            "SELECT COUNT(*) AS total, COALESCE(SUM({SUCCESS_EXPR}), 0) AS successes, AVG(duration_ms) AS avg_duration \
             FROM audit_logs WHERE 1 = 1"
        ));
        push_range(&mut totals, range);
        let row = totals.build().fetch_one(&self.pool).await.map_err(query_error)?;
        let total_actions: i64 = row.try_get("total").map_err(query_error)?;
        let success_count: i64 = row.try_get("successes").map_err(query_error)?;
        let avg_duration_ms: Option<f64> = row.try_get("avg_duration").map_err(query_error)?;

        let mut actions = QueryBuilder::<Sqlite>::new("SELECT action, COUNT(*) AS count FROM audit_logs WHERE 1 = 1");
        push_range(&mut actions, range);
        actions
            .push(" GROUP BY action ORDER BY count DESC, action ASC LIMIT ")
            .push_bind(TOP_N);
        let top_actions = actions
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| -> Result<ActionCount, sqlx::Error> {
                Ok(ActionCount {
                    action: row.try_get("action")?,
                    count: row.try_get("count")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;

        let mut actors = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {ACTOR_ID_EXPR} AS actor_id, MAX({ACTOR_NAME_EXPR}) AS actor_name, COUNT(*) AS count \
             FROM audit_logs WHERE {ACTOR_ID_EXPR} IS NOT NULL"
        ));
        push_range(&mut actors, range);
        actors
            .push(" GROUP BY actor_id ORDER BY count DESC, actor_id ASC LIMIT ")
            .push_bind(TOP_N);
        let top_actors = actors
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| -> Result<ActorCount, sqlx::Error> {
                Ok(ActorCount {
                    user_id: row.try_get("actor_id")?,
                    username: row.try_get("actor_name")?,
                    count: row.try_get("count")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;

        let mut daily = QueryBuilder::<Sqlite>::new(format!(
            "SELECT date({TS_EXPR}) AS day, COUNT(*) AS total, COALESCE(SUM({SUCCESS_EXPR}), 0) AS successes \
             FROM audit_logs WHERE date({TS_EXPR}) IS NOT NULL"
        ));
        push_range(&mut daily, range);
        daily.push(" GROUP BY day ORDER BY day ASC");
        let daily_activity = daily
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?
            .iter()
            .map(|row| -> Result<DailyActivity, AuditError> {
                let day: String = row.try_get("day").map_err(query_error)?;
                Ok(DailyActivity {
                    day: NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(query_error)?,
                    total: row.try_get("total").map_err(query_error)?,
                    successes: row.try_get("successes").map_err(query_error)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AuditStatistics {
            total_actions,
            success_count,
            failure_count: total_actions - success_count,
            avg_duration_ms,
            top_actions,
            top_actors,
            daily_activity,
        })
    }

    /// Deletes every entry older than `days` in one transaction, then writes
    /// a single system entry describing the purge.
    pub async fn purge_older_than(&self, days: i64, requested_by: Option<Uuid>) -> Result<PurgeReport, AuditError> {
        if days < 1 {
            return Err(AuditError::InvalidRetention(days));
        }

        let cutoff = Utc::now() - Duration::days(days);

        let mut tx = self.pool.begin().await.map_err(retention_error)?;
        let deleted = sqlx::query(&format!(
            "DELETE FROM audit_logs WHERE julianday({TS_EXPR}) < julianday(?)"
        ))
        .bind(timestamp(cutoff))
        .execute(&mut *tx)
        .await
        .map_err(retention_error)?
        .rows_affected();
        tx.commit().await.map_err(retention_error)?;

        tracing::info!(days, deleted, cutoff = %cutoff, "audit retention purge finished");

        self.recorder
            .log_system(
                AuditAction::Purge,
                ResourceType::AuditLog,
                format!("Purged {deleted} audit entries older than {days} days"),
                json!({
                    "days": days,
                    "cutoff": timestamp(cutoff),
                    "deleted": deleted,
                    "requested_by": requested_by,
                }),
            )
            .await;

        Ok(PurgeReport { days, cutoff, deleted })
    }

    /// Purges every `interval` with the configured retention.
    pub fn spawn_retention_task(self, days: i64, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.purge_older_than(days, None).await {
                    tracing::error!(error = %err, days, "scheduled audit purge failed");
                }
            }
        })
    }
}
