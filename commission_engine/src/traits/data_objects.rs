use crate::db_types::UsageSnapshot;

/// The set of subscription plans whose invoices count towards a computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanScope {
    /// Only invoices for these plan ids count. An empty list matches nothing.
    AllowList(Vec<i64>),
    /// All plans count except these.
    DenyList(Vec<i64>),
}

impl PlanScope {
    /// Builds the scope from explicit include/exclude lists, falling back to the plans linked to the eligible
    /// cohorts when no explicit filter is given. An explicit filter replaces the cohort-plan restriction.
    pub fn with_filter(include: Option<Vec<i64>>, exclude: Option<Vec<i64>>, cohort_plans: Vec<i64>) -> Self {
        match (include, exclude) {
            (Some(mut included), Some(excluded)) => {
                included.retain(|id| !excluded.contains(id));
                PlanScope::AllowList(included)
            },
            (Some(included), None) => PlanScope::AllowList(included),
            (None, Some(excluded)) => PlanScope::DenyList(excluded),
            (None, None) => PlanScope::AllowList(cohort_plans),
        }
    }

    pub fn matches_nothing(&self) -> bool {
        matches!(self, PlanScope::AllowList(ids) if ids.is_empty())
    }
}

/// The result of writing a usage snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotUpsert {
    /// No row existed for the snapshot's key, so one was inserted.
    Inserted(UsageSnapshot),
    /// A row existed and its monetary totals moved materially, so it was overwritten in place.
    Overwritten(UsageSnapshot),
    /// A row existed with the same totals (within tolerance) and was left untouched.
    Unchanged(UsageSnapshot),
}

impl SnapshotUpsert {
    pub fn snapshot(&self) -> &UsageSnapshot {
        match self {
            SnapshotUpsert::Inserted(s) | SnapshotUpsert::Overwritten(s) | SnapshotUpsert::Unchanged(s) => s,
        }
    }

    pub fn into_snapshot(self) -> UsageSnapshot {
        match self {
            SnapshotUpsert::Inserted(s) | SnapshotUpsert::Overwritten(s) | SnapshotUpsert::Unchanged(s) => s,
        }
    }

    /// Whether the database was actually written to.
    pub fn is_write(&self) -> bool {
        !matches!(self, SnapshotUpsert::Unchanged(_))
    }
}
