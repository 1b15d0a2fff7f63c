//! Pro-rata distribution of the usage commission pool.
//!
//! Everything in this module is a pure function of its arguments: same inputs, same shares, no matter how often or
//! in what order it runs. The worker leans on that for idempotent re-runs.
use cce_common::Money;

use crate::pipeline::usage::UserUsage;

/// The share of a user's payments that funds the usage commission pool, in basis points.
pub const USAGE_COMMISSION_RATE_BPS: i64 = 3_000;

/// The share of a referred invoice paid as referral commission, in basis points.
pub const REFERRAL_COMMISSION_RATE_BPS: i64 = 5_000;

/// One cohort's slice of a user's commission pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortShare {
    pub cohort_id: i64,
    pub points: i64,
    pub amount: Money,
}

/// The usage commission pool funded by `paid`: 30 % of it, rounded half-to-even to minor units.
pub fn usage_pool(paid: Money) -> Money {
    paid.apply_bps(USAGE_COMMISSION_RATE_BPS)
}

/// The referral commission a fulfilled invoice of `amount` earns: 50 %, rounded half-to-even to minor units.
pub fn referral_commission(amount: Money) -> Money {
    amount.apply_bps(REFERRAL_COMMISSION_RATE_BPS)
}

/// Splits a user's commission pool across their eligible cohorts, proportional to points.
///
/// Shares are rounded half-to-even and allocated in ascending cohort-id order with the running total clamped to the
/// pool, so the sum of the shares never exceeds it. Returns nothing at all when the user has no total points, no
/// positive pool, or no eligible points.
pub fn distribute_pool(pool: Money, usage: &UserUsage) -> Vec<CohortShare> {
    if usage.total_points <= 0 || !pool.is_positive() {
        return Vec::new();
    }
    let mut remaining = pool;
    let mut shares = Vec::new();
    for (cohort_id, cohort) in &usage.eligible {
        if cohort.points <= 0 {
            continue;
        }
        let exact = pool.pro_rata(cohort.points, usage.total_points);
        let amount = exact.min(remaining);
        remaining -= amount;
        shares.push(CohortShare { cohort_id: *cohort_id, points: cohort.points, amount });
    }
    shares
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use super::*;
    use crate::pipeline::usage::CohortUsage;

    fn usage(total: i64, cohorts: &[(i64, i64)]) -> UserUsage {
        let eligible: BTreeMap<i64, CohortUsage> = cohorts
            .iter()
            .map(|(id, points)| (*id, CohortUsage { points: *points, by_kind: BTreeMap::new() }))
            .collect();
        UserUsage { user_id: 1, total_points: total, eligible }
    }

    #[test]
    fn thirty_percent_pool() {
        assert_eq!(usage_pool(Money::from_major(100)), Money::from_major(30));
        assert_eq!(usage_pool(Money::from_cents(1)), Money::from_cents(0));
    }

    #[test]
    fn single_cohort_takes_the_whole_pool() {
        let pool = usage_pool(Money::from_major(100));
        let shares = distribute_pool(pool, &usage(10, &[(3, 10)]));
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].amount, Money::from_major(30));
    }

    #[test]
    fn thirty_seventy_split() {
        let pool = usage_pool(Money::from_major(200));
        assert_eq!(pool, Money::from_major(60));
        let shares = distribute_pool(pool, &usage(10, &[(1, 3), (2, 7)]));
        assert_eq!(shares[0].amount, Money::from_major(18));
        assert_eq!(shares[1].amount, Money::from_major(42));
        let total: Money = shares.iter().map(|s| s.amount).sum();
        assert_eq!(total, pool);
    }

    #[test]
    fn ineligible_points_shrink_the_payout_not_the_denominator() {
        // 10 points total, only 4 eligible: the pool splits over 10.
        let pool = Money::from_major(30);
        let shares = distribute_pool(pool, &usage(10, &[(1, 4)]));
        assert_eq!(shares[0].amount, Money::from_major(12));
    }

    #[test]
    fn shares_never_exceed_the_pool() {
        // Three equal thirds of 1.00 each round to 0.33; residue 0.01 stays in the pool.
        let shares = distribute_pool(Money::from_major(1), &usage(3, &[(1, 1), (2, 1), (3, 1)]));
        let total: Money = shares.iter().map(|s| s.amount).sum();
        assert!(total <= Money::from_major(1));
        assert_eq!(total, Money::from_cents(99));
        for share in &shares {
            assert_eq!(share.amount, Money::from_cents(33));
        }
    }

    #[test]
    fn rounding_residue_is_bounded() {
        // Residue stays under half a cent per cohort across awkward splits.
        for total in 1..=17i64 {
            let cohorts: Vec<(i64, i64)> = (1..=total).map(|id| (id, 1)).collect();
            let pool = usage_pool(Money::from_cents(99_999));
            let shares = distribute_pool(pool, &usage(total, &cohorts));
            let allocated: Money = shares.iter().map(|s| s.amount).sum();
            assert!(allocated <= pool);
            let residue = pool - allocated;
            assert!(residue.value() <= total, "residue {residue} too large for {total} cohorts");
        }
    }

    #[test]
    fn zero_points_or_zero_pool_yield_nothing() {
        assert!(distribute_pool(Money::from_major(30), &usage(0, &[(1, 0)])).is_empty());
        assert!(distribute_pool(Money::from_cents(0), &usage(10, &[(1, 10)])).is_empty());
        let shares = distribute_pool(Money::from_major(30), &usage(10, &[(1, 0), (2, 10)]));
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].cohort_id, 2);
    }

    #[test]
    fn half_rate_for_referrals() {
        assert_eq!(referral_commission(Money::from_major(50)), Money::from_major(25));
        // 0.01 halves to 0.005 and rounds to the even neighbour.
        assert_eq!(referral_commission(Money::from_cents(1)), Money::from_cents(0));
        assert_eq!(referral_commission(Money::from_cents(3)), Money::from_cents(2));
    }
}
