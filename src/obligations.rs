//! Hook into the circulation layer: does anything still hang off a user or role?

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;

/// Answers whether outstanding borrowings or reservations reference a subject.
///
/// Implemented by whatever owns circulation data; this crate only asks.
#[async_trait]
pub trait ObligationCheck: Send + Sync {
    async fn user_has_obligations(&self, user_id: Uuid) -> Result<bool, AppError>;

    async fn role_has_obligations(&self, role_id: Uuid) -> Result<bool, AppError>;
}

/// Reports nothing outstanding. Used when no circulation layer is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObligations;

#[async_trait]
impl ObligationCheck for NoObligations {
    async fn user_has_obligations(&self, _user_id: Uuid) -> Result<bool, AppError> {
        Ok(false)
    }

    async fn role_has_obligations(&self, _role_id: Uuid) -> Result<bool, AppError> {
        Ok(false)
    }
}
