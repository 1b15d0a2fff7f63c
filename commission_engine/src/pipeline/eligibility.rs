//! Eligibility resolution: which cohorts may an influencer earn from?
use std::{collections::BTreeMap, fmt::Debug};

use log::debug;

use crate::{
    db_types::Cohort,
    traits::{CommissionDatabaseError, InfluencerManagement},
};

/// The cohorts an influencer may earn from in one run. Derived and never persisted; every run computes it afresh so
/// that assignment changes take effect immediately.
#[derive(Debug, Clone, Default)]
pub struct EligibleCohorts {
    cohorts: BTreeMap<i64, Cohort>,
}

impl EligibleCohorts {
    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    /// The eligible cohort ids in ascending order.
    pub fn ids(&self) -> Vec<i64> {
        self.cohorts.keys().copied().collect()
    }

    pub fn contains(&self, cohort_id: i64) -> bool {
        self.cohorts.contains_key(&cohort_id)
    }

    pub fn get(&self, cohort_id: i64) -> Option<&Cohort> {
        self.cohorts.get(&cohort_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cohort> {
        self.cohorts.values()
    }
}

impl FromIterator<Cohort> for EligibleCohorts {
    fn from_iter<T: IntoIterator<Item = Cohort>>(iter: T) -> Self {
        let cohorts = iter.into_iter().map(|c| (c.id, c)).collect();
        Self { cohorts }
    }
}

/// The `EligibilityApi` answers one question: which cohorts may this influencer earn from? It is a pure composition
/// of read-only backend queries.
pub struct EligibilityApi<B> {
    db: B,
}

impl<B: Debug> Debug for EligibilityApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EligibilityApi ({:?})", self.db)
    }
}

impl<B> EligibilityApi<B>
where B: InfluencerManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Resolves the academies where the influencer holds an active affiliate role, then the cohorts with an active
    /// assignment inside those academies. Cohorts that delegate to micro-cohorts are not direct earning units and
    /// are dropped. An empty result aborts the downstream computation for the influencer and month.
    pub async fn eligible_cohorts(&self, influencer_id: i64) -> Result<EligibleCohorts, CommissionDatabaseError> {
        let academies = self.db.fetch_affiliate_academy_ids(influencer_id).await?;
        if academies.is_empty() {
            debug!("🔄️ Influencer {influencer_id} holds no active affiliate role, so no cohort is eligible");
            return Ok(EligibleCohorts::default());
        }
        let assigned = self.db.fetch_assigned_cohorts(influencer_id, &academies).await?;
        let eligible: EligibleCohorts = assigned.into_iter().filter(|c| !c.uses_micro_cohorts).collect();
        debug!(
            "🔄️ Influencer {influencer_id} may earn from {} cohorts across {} academies",
            eligible.len(),
            academies.len()
        );
        Ok(eligible)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn cohort(id: i64, academy_id: i64, micro: bool) -> Cohort {
        Cohort { id, academy_id, name: format!("Cohort {id}"), uses_micro_cohorts: micro }
    }

    #[test]
    fn micro_cohorts_are_not_earning_units() {
        let eligible: EligibleCohorts =
            vec![cohort(5, 1, false), cohort(2, 1, true), cohort(9, 2, false)].into_iter().filter(|c| !c.uses_micro_cohorts).collect();
        assert_eq!(eligible.ids(), vec![5, 9]);
        assert!(eligible.contains(5));
        assert!(!eligible.contains(2));
    }

    #[test]
    fn ids_are_ascending() {
        let eligible: EligibleCohorts = vec![cohort(9, 1, false), cohort(1, 1, false), cohort(4, 2, false)].into_iter().collect();
        assert_eq!(eligible.ids(), vec![1, 4, 9]);
    }
}
