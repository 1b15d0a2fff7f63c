use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db_types::{QualifyingEvent, RelatedType};

#[derive(Debug, Clone, Error)]
pub enum ActivityStoreError {
    #[error("The activity store is unreachable: {0}")]
    Unavailable(String),
    #[error("Activity query failed: {0}")]
    QueryFailed(String),
}

/// A query against the engagement event store.
#[derive(Debug, Clone)]
pub struct ActivityQuery {
    pub user_ids: Vec<i64>,
    /// The `(entity type, event kind)` pairs that carry points. Pairs not listed here are never fetched.
    pub kinds: Vec<(RelatedType, String)>,
    /// Half-open UTC window `[start, end)`.
    pub window: (DateTime<Utc>, DateTime<Utc>),
}

/// Read access to the analytical store of engagement events.
///
/// The store is treated as an external system: queries can fail transiently, and each caller decides whether to
/// retry (the per-user worker) or degrade to an empty result (the live report).
#[allow(async_fn_in_trait)]
pub trait ActivityStore: Clone {
    /// Returns the earliest event per `(user, entity, kind)` triple within the window, restricted to the queried
    /// users and kind pairs. Repeat events against the same entity collapse into the first one.
    fn earliest_qualifying_events(
        &self,
        query: &ActivityQuery,
    ) -> impl std::future::Future<Output = Result<Vec<QualifyingEvent>, ActivityStoreError>> + Send;
}
