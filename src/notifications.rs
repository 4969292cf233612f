use async_trait::async_trait;
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::db::PgPool;
use crate::models::{NewNotification, NotificationKind, NotificationStatus};
use crate::schema::notifications;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("database pool error: {0}")]
    Pool(String),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Best-effort fan-out of user-facing notices. Dispatch happens after the
/// staffing transaction has committed; a failed dispatch is logged and must
/// never affect the outcome of the operation that triggered it.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(
        &self,
        user_ids: &[Uuid],
        message: &str,
        kind: NotificationKind,
    ) -> NotifyResult<()>;
}

pub struct DbNotifier {
    pool: PgPool,
}

impl DbNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for DbNotifier {
    async fn notify(
        &self,
        user_ids: &[Uuid],
        message: &str,
        kind: NotificationKind,
    ) -> NotifyResult<()> {
        let mut conn = self
            .pool
            .get()
            .map_err(|err| NotifyError::Pool(err.to_string()))?;

        let mut seen = std::collections::HashSet::new();
        for user_id in user_ids {
            if user_id.is_nil() || !seen.insert(*user_id) {
                continue;
            }

            let row = NewNotification {
                id: Uuid::new_v4(),
                user_id: *user_id,
                message: message.to_string(),
                kind,
                status: NotificationStatus::Unread,
            };

            // One recipient failing must not starve the rest.
            if let Err(err) = diesel::insert_into(notifications::table)
                .values(&row)
                .execute(&mut conn)
            {
                tracing::warn!(
                    user_id = %user_id,
                    kind = %kind,
                    error = %err,
                    "failed to insert notification"
                );
            }
        }

        Ok(())
    }
}
