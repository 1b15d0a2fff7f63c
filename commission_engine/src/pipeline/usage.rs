//! Usage extraction: raw invoices and engagement events in, weighted per-user usage out.
use std::{collections::BTreeMap, fmt::Debug};

use chrono::{DateTime, Utc};
use log::*;

use crate::{
    db_types::{QualifyingEvent, RelatedType, UsageInvoice},
    pipeline::eligibility::EligibleCohorts,
    traits::{
        ActivityQuery,
        ActivityStore,
        ActivityStoreError,
        CommissionDatabaseError,
        InfluencerManagement,
        InvoiceManagement,
        PlanScope,
    },
};

/// The points each qualifying `(entity, kind)` pair earns. Pairs without a positive weight are never queried and
/// never score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityWeights {
    weights: BTreeMap<(RelatedType, String), i64>,
}

impl Default for ActivityWeights {
    /// The platform's standard scoring table.
    fn default() -> Self {
        ActivityWeights::empty()
            .with_weight(RelatedType::Lesson, "lesson_completed", 2)
            .with_weight(RelatedType::Project, "project_submitted", 5)
            .with_weight(RelatedType::Discussion, "comment_posted", 1)
            .with_weight(RelatedType::LiveSession, "session_attended", 3)
    }
}

impl ActivityWeights {
    pub fn empty() -> Self {
        Self { weights: BTreeMap::new() }
    }

    pub fn with_weight(mut self, related_type: RelatedType, kind: &str, points: i64) -> Self {
        if points > 0 {
            self.weights.insert((related_type, kind.to_string()), points);
        }
        self
    }

    pub fn weight_of(&self, related_type: RelatedType, kind: &str) -> i64 {
        self.weights.get(&(related_type, kind.to_string())).copied().unwrap_or(0)
    }

    /// The `(entity, kind)` pairs worth querying the activity store for.
    pub fn qualifying_pairs(&self) -> Vec<(RelatedType, String)> {
        self.weights.keys().cloned().collect()
    }
}

/// One user's weighted engagement for the month.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUsage {
    pub user_id: i64,
    /// Weighted points across every cohort the user touched, eligible or not. This is the pro-rata denominator.
    pub total_points: i64,
    /// The slice of those points earned inside the influencer's eligible cohorts, keyed by cohort id.
    pub eligible: BTreeMap<i64, CohortUsage>,
}

/// A user's engagement within a single eligible cohort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortUsage {
    pub points: i64,
    /// Points by event kind, persisted as the snapshot breakdown.
    pub by_kind: BTreeMap<String, i64>,
}

impl UserUsage {
    pub fn new(user_id: i64) -> Self {
        Self { user_id, ..Default::default() }
    }

    /// Points inside eligible cohorts only.
    pub fn eligible_points(&self) -> i64 {
        self.eligible.values().map(|c| c.points).sum()
    }

    pub fn has_eligible_points(&self) -> bool {
        self.total_points > 0 && self.eligible.values().any(|c| c.points > 0)
    }

    fn score_event(&mut self, event: &QualifyingEvent, points: i64, eligible: &EligibleCohorts) {
        self.total_points += points;
        if eligible.contains(event.cohort_id) {
            let cohort = self.eligible.entry(event.cohort_id).or_default();
            cohort.points += points;
            *cohort.by_kind.entry(event.kind.clone()).or_insert(0) += points;
        }
    }
}

/// The `UsageExtractor` owns the two raw inputs of the usage computation: billable invoices (scoped by plan) and
/// weighted engagement points (scoped by eligibility).
pub struct UsageExtractor<B, A> {
    db: B,
    activity: A,
    weights: ActivityWeights,
}

impl<B: Debug, A: Debug> Debug for UsageExtractor<B, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UsageExtractor ({:?}, {:?})", self.db, self.activity)
    }
}

impl<B, A> UsageExtractor<B, A> {
    pub fn new(db: B, activity: A) -> Self {
        Self { db, activity, weights: ActivityWeights::default() }
    }

    pub fn with_weights(mut self, weights: ActivityWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn weights(&self) -> &ActivityWeights {
        &self.weights
    }
}

impl<B, A> UsageExtractor<B, A>
where B: InfluencerManagement + InvoiceManagement
{
    /// The plan scope for a usage computation: the explicit allow/deny filter when one was given, otherwise the
    /// plans sold against the eligible cohorts.
    pub async fn plan_scope_for(
        &self,
        eligible: &EligibleCohorts,
        include: Option<Vec<i64>>,
        exclude: Option<Vec<i64>>,
    ) -> Result<PlanScope, CommissionDatabaseError> {
        let cohort_plans = match (&include, &exclude) {
            (None, None) => self.db.fetch_plan_ids_for_cohorts(&eligible.ids()).await?,
            _ => Vec::new(),
        };
        Ok(PlanScope::with_filter(include, exclude, cohort_plans))
    }

    /// The distinct users with billable usage in the window, ascending, with referral-locked users already removed.
    pub async fn billable_users(
        &self,
        window: (DateTime<Utc>, DateTime<Utc>),
        excluded_users: &[i64],
        plans: &PlanScope,
    ) -> Result<Vec<i64>, CommissionDatabaseError> {
        if plans.matches_nothing() {
            return Ok(Vec::new());
        }
        self.db.fetch_billable_user_ids(window, excluded_users, plans).await
    }

    pub async fn invoices_for_user(
        &self,
        user_id: i64,
        window: (DateTime<Utc>, DateTime<Utc>),
        plans: &PlanScope,
    ) -> Result<Vec<UsageInvoice>, CommissionDatabaseError> {
        self.db.fetch_billable_invoices_for_user(user_id, window, plans).await
    }

    pub async fn billable_invoices(
        &self,
        window: (DateTime<Utc>, DateTime<Utc>),
        excluded_users: &[i64],
        plans: &PlanScope,
    ) -> Result<Vec<UsageInvoice>, CommissionDatabaseError> {
        if plans.matches_nothing() {
            return Ok(Vec::new());
        }
        self.db.fetch_billable_invoices(window, excluded_users, plans).await
    }
}

impl<B, A> UsageExtractor<B, A>
where A: ActivityStore
{
    /// Computes weighted usage for the given users inside the window.
    ///
    /// Events are deduplicated on `(user, entity, kind)` keeping the earliest occurrence, even when the store
    /// returns repeats, so each qualifying activity scores at most once. Only positively weighted kinds contribute.
    /// Points in ineligible cohorts still raise the user's total; only the eligible slice is broken out per cohort.
    pub async fn usage_for_users(
        &self,
        user_ids: &[i64],
        window: (DateTime<Utc>, DateTime<Utc>),
        eligible: &EligibleCohorts,
    ) -> Result<BTreeMap<i64, UserUsage>, ActivityStoreError> {
        if user_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let query =
            ActivityQuery { user_ids: user_ids.to_vec(), kinds: self.weights.qualifying_pairs(), window };
        let events = self.activity.earliest_qualifying_events(&query).await?;
        let mut earliest: BTreeMap<(i64, RelatedType, i64, String), QualifyingEvent> = BTreeMap::new();
        for event in events {
            let key = (event.user_id, event.related_type, event.related_id, event.kind.clone());
            match earliest.get(&key) {
                Some(existing) if existing.occurred_at <= event.occurred_at => {},
                _ => {
                    earliest.insert(key, event);
                },
            }
        }
        let mut usage: BTreeMap<i64, UserUsage> = BTreeMap::new();
        for event in earliest.into_values() {
            let points = self.weights.weight_of(event.related_type, &event.kind);
            if points <= 0 {
                continue;
            }
            usage.entry(event.user_id).or_insert_with(|| UserUsage::new(event.user_id)).score_event(
                &event,
                points,
                eligible,
            );
        }
        trace!("🔄️ Usage scored for {} of {} queried users", usage.len(), user_ids.len());
        Ok(usage)
    }

    /// Like [`UsageExtractor::usage_for_users`], but degrades to an empty result when the activity store fails.
    /// The synchronous report path uses this; the per-user worker wants the error so its job can be retried.
    pub async fn usage_or_empty(
        &self,
        user_ids: &[i64],
        window: (DateTime<Utc>, DateTime<Utc>),
        eligible: &EligibleCohorts,
    ) -> BTreeMap<i64, UserUsage> {
        match self.usage_for_users(user_ids, window, eligible).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!("🔄️ The activity store failed. Usage degrades to zero for this run: {e}");
                BTreeMap::new()
            },
        }
    }
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;
    use crate::db_types::Cohort;

    #[derive(Clone)]
    struct FixedStore(Vec<QualifyingEvent>);

    impl ActivityStore for FixedStore {
        async fn earliest_qualifying_events(
            &self,
            _query: &ActivityQuery,
        ) -> Result<Vec<QualifyingEvent>, ActivityStoreError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Clone)]
    struct BrokenStore;

    impl ActivityStore for BrokenStore {
        async fn earliest_qualifying_events(
            &self,
            _query: &ActivityQuery,
        ) -> Result<Vec<QualifyingEvent>, ActivityStoreError> {
            Err(ActivityStoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn event(user_id: i64, related_id: i64, kind: &str, cohort_id: i64, day: u32) -> QualifyingEvent {
        let related_type = match kind {
            "lesson_completed" => RelatedType::Lesson,
            "project_submitted" => RelatedType::Project,
            "session_attended" => RelatedType::LiveSession,
            _ => RelatedType::Discussion,
        };
        QualifyingEvent {
            user_id,
            related_type,
            related_id,
            kind: kind.to_string(),
            cohort_id,
            occurred_at: Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap(),
        }
    }

    fn eligible(ids: &[i64]) -> EligibleCohorts {
        ids.iter()
            .map(|id| Cohort { id: *id, academy_id: 1, name: format!("Cohort {id}"), uses_micro_cohorts: false })
            .collect()
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let month: crate::helpers::CalendarMonth = "2024-03".parse().unwrap();
        month.window()
    }

    #[tokio::test]
    async fn repeat_events_score_once_with_the_earliest_kept() {
        let store = FixedStore(vec![
            event(7, 41, "lesson_completed", 3, 20),
            event(7, 41, "lesson_completed", 3, 5),
            event(7, 41, "lesson_completed", 3, 12),
        ]);
        let extractor = UsageExtractor::new((), store);
        let usage = extractor.usage_for_users(&[7], window(), &eligible(&[3])).await.unwrap();
        let user = &usage[&7];
        assert_eq!(user.total_points, 2);
        assert_eq!(user.eligible[&3].points, 2);
        assert_eq!(user.eligible[&3].by_kind["lesson_completed"], 2);
    }

    #[tokio::test]
    async fn ineligible_cohorts_raise_the_total_but_not_the_share() {
        let store = FixedStore(vec![
            event(7, 1, "project_submitted", 3, 4),
            event(7, 2, "project_submitted", 9, 6),
        ]);
        let extractor = UsageExtractor::new((), store);
        let usage = extractor.usage_for_users(&[7], window(), &eligible(&[3])).await.unwrap();
        let user = &usage[&7];
        assert_eq!(user.total_points, 10);
        assert_eq!(user.eligible_points(), 5);
        assert!(!user.eligible.contains_key(&9));
    }

    #[tokio::test]
    async fn unweighted_kinds_never_score() {
        let weights = ActivityWeights::empty().with_weight(RelatedType::Lesson, "lesson_completed", 2);
        let store = FixedStore(vec![event(7, 1, "lesson_completed", 3, 4), event(7, 2, "session_attended", 3, 5)]);
        let extractor = UsageExtractor::new((), store).with_weights(weights);
        let usage = extractor.usage_for_users(&[7], window(), &eligible(&[3])).await.unwrap();
        assert_eq!(usage[&7].total_points, 2);
    }

    #[tokio::test]
    async fn store_failure_degrades_to_empty() {
        let extractor = UsageExtractor::new((), BrokenStore);
        let usage = extractor.usage_or_empty(&[7], window(), &eligible(&[3])).await;
        assert!(usage.is_empty());
        let err = extractor.usage_for_users(&[7], window(), &eligible(&[3])).await.unwrap_err();
        assert!(matches!(err, ActivityStoreError::Unavailable(_)));
    }
}
