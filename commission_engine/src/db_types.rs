use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use cce_common::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

use crate::helpers::CalendarMonth;

/// Snapshot rows are only rewritten when a monetary total moves by more than this amount. Point counts and
/// breakdowns follow the money; a re-run that produces the same totals leaves the stored row untouched.
pub const SNAPSHOT_WRITE_TOLERANCE: Money = Money::from_cents(1);

//--------------------------------------      InvoiceId       ---------------------------------------------------------
/// A lightweight wrapper around the invoice identifier assigned by the billing provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct InvoiceId(pub String);

impl FromStr for InvoiceId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for InvoiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for InvoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl InvoiceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      Influencer      ---------------------------------------------------------
/// A geek creator participating in the affiliate programme.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Influencer {
    pub id: i64,
    pub handle: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    AffiliateRole     ---------------------------------------------------------
/// Membership of an influencer in an academy's affiliate programme. Only active roles confer eligibility.
#[derive(Debug, Clone, FromRow)]
pub struct AffiliateRole {
    pub id: i64,
    pub influencer_id: i64,
    pub academy_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------        Cohort        ---------------------------------------------------------
/// A student cohort within an academy. Cohorts running on micro-cohorts are settled elsewhere and never take part
/// in the monthly distribution.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Cohort {
    pub id: i64,
    pub academy_id: i64,
    pub name: String,
    pub uses_micro_cohorts: bool,
}

//--------------------------------------   CohortAssignment   ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct CohortAssignment {
    pub id: i64,
    pub cohort_id: i64,
    pub influencer_id: i64,
    pub assigned_at: DateTime<Utc>,
    pub is_active: bool,
}

//--------------------------------------         Plan         ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct Plan {
    pub id: i64,
    pub slug: String,
    pub name: String,
}

//--------------------------------------    InvoiceStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum InvoiceStatus {
    /// The invoice has been issued, but payment has not landed yet.
    Pending,
    /// Payment has been received in full.
    Fulfilled,
    /// The payment was returned to the user. Refunded invoices never earn commission.
    Refunded,
}

impl Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceStatus::Pending => write!(f, "Pending"),
            InvoiceStatus::Fulfilled => write!(f, "Fulfilled"),
            InvoiceStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid status: {0}")]
pub struct ConversionError(pub String);

impl FromStr for InvoiceStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Fulfilled" => Ok(Self::Fulfilled),
            "Refunded" => Ok(Self::Refunded),
            s => Err(ConversionError(format!("Invalid invoice status: {s}"))),
        }
    }
}

//--------------------------------------     UsageInvoice     ---------------------------------------------------------
/// A subscription invoice as mirrored from the billing provider.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UsageInvoice {
    pub id: InvoiceId,
    pub user_id: i64,
    pub plan_id: i64,
    pub amount: Money,
    pub currency: String,
    pub status: InvoiceStatus,
    /// The referral coupon the user redeemed at checkout, if any.
    pub coupon_code: Option<String>,
    pub fulfilled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    ReferralCoupon    ---------------------------------------------------------
#[derive(Debug, Clone, FromRow)]
pub struct ReferralCoupon {
    pub code: String,
    pub influencer_id: i64,
    pub is_active: bool,
}

//--------------------------------------     RelatedType      ---------------------------------------------------------
/// The kind of learning entity an engagement event is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Type, Serialize, Deserialize)]
pub enum RelatedType {
    Lesson,
    Project,
    Discussion,
    LiveSession,
}

impl Display for RelatedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelatedType::Lesson => write!(f, "Lesson"),
            RelatedType::Project => write!(f, "Project"),
            RelatedType::Discussion => write!(f, "Discussion"),
            RelatedType::LiveSession => write!(f, "LiveSession"),
        }
    }
}

impl FromStr for RelatedType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Lesson" => Ok(Self::Lesson),
            "Project" => Ok(Self::Project),
            "Discussion" => Ok(Self::Discussion),
            "LiveSession" => Ok(Self::LiveSession),
            s => Err(ConversionError(format!("Invalid related entity type: {s}"))),
        }
    }
}

//--------------------------------------  NewEngagementEvent  ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewEngagementEvent {
    pub user_id: i64,
    pub related_type: RelatedType,
    pub related_id: i64,
    pub kind: String,
    pub cohort_id: i64,
    pub occurred_at: DateTime<Utc>,
}

//--------------------------------------   QualifyingEvent    ---------------------------------------------------------
/// The earliest engagement event for a `(user, entity, kind)` triple inside a billing window. Repeat events against
/// the same entity are collapsed into this single row, so each triple counts once.
#[derive(Debug, Clone, FromRow)]
pub struct QualifyingEvent {
    pub user_id: i64,
    pub related_type: RelatedType,
    pub related_id: i64,
    pub kind: String,
    pub cohort_id: i64,
    pub occurred_at: DateTime<Utc>,
}

//--------------------------------------     UsageSnapshot    ---------------------------------------------------------
/// A persisted per-(influencer, user, cohort, month, currency) usage commission record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub id: i64,
    pub influencer_id: i64,
    pub user_id: i64,
    pub cohort_id: i64,
    pub month: CalendarMonth,
    pub currency: String,
    /// The user's total qualifying points across all cohorts for the month.
    pub user_total_points: i64,
    /// The points the user earned inside this snapshot's cohort.
    pub cohort_points: i64,
    /// What the user paid in this currency during the month.
    pub paid_amount: Money,
    /// This cohort's pro-rata slice of the commission pool.
    pub commission_amount: Money,
    pub kind_breakdown: BTreeMap<String, i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(feature = "sqlite")]
impl FromRow<'_, sqlx::sqlite::SqliteRow> for UsageSnapshot {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let raw: String = row.try_get("kind_breakdown")?;
        let kind_breakdown = serde_json::from_str(&raw)
            .map_err(|e| sqlx::Error::ColumnDecode { index: "kind_breakdown".to_string(), source: Box::new(e) })?;
        Ok(Self {
            id: row.try_get("id")?,
            influencer_id: row.try_get("influencer_id")?,
            user_id: row.try_get("user_id")?,
            cohort_id: row.try_get("cohort_id")?,
            month: row.try_get("month")?,
            currency: row.try_get("currency")?,
            user_total_points: row.try_get("user_total_points")?,
            cohort_points: row.try_get("cohort_points")?,
            paid_amount: row.try_get("paid_amount")?,
            commission_amount: row.try_get("commission_amount")?,
            kind_breakdown,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

//--------------------------------------   NewUsageSnapshot   ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewUsageSnapshot {
    pub influencer_id: i64,
    pub user_id: i64,
    pub cohort_id: i64,
    pub month: CalendarMonth,
    pub currency: String,
    pub user_total_points: i64,
    pub cohort_points: i64,
    pub paid_amount: Money,
    pub commission_amount: Money,
    pub kind_breakdown: BTreeMap<String, i64>,
}

impl NewUsageSnapshot {
    /// Whether storing this snapshot over `existing` would change a monetary total by more than
    /// [`SNAPSHOT_WRITE_TOLERANCE`].
    pub fn differs_materially(&self, existing: &UsageSnapshot) -> bool {
        self.paid_amount.abs_diff(existing.paid_amount) > SNAPSHOT_WRITE_TOLERANCE
            || self.commission_amount.abs_diff(existing.commission_amount) > SNAPSHOT_WRITE_TOLERANCE
    }

    pub fn breakdown_json(&self) -> String {
        serde_json::to_string(&self.kind_breakdown).unwrap_or_else(|_| "{}".to_string())
    }
}

//-------------------------------------- StatusTransitionError -------------------------------------------------------
#[derive(Debug, Clone, Error)]
pub enum StatusTransitionError {
    #[error("The requested status change would result in a no-op.")]
    NoOp,
    #[error("The status change from {from} to {to} is forbidden.")]
    Forbidden { from: String, to: String },
}

//--------------------------------------    ReferralStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ReferralStatus {
    /// The referral has been registered and is waiting for its hold period to lapse.
    Pending,
    /// The referral has been settled with the creator. Terminal.
    Paid,
    /// The referral was voided by an admin or a refund. Terminal.
    Cancelled,
}

impl Display for ReferralStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferralStatus::Pending => write!(f, "Pending"),
            ReferralStatus::Paid => write!(f, "Paid"),
            ReferralStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl FromStr for ReferralStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Paid" => Ok(Self::Paid),
            "Cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid referral status: {s}"))),
        }
    }
}

impl ReferralStatus {
    /// Checks that moving from `self` to `new` is an allowed transition. Pending records may be paid out or
    /// cancelled; paid and cancelled records are frozen.
    pub fn validate_transition(&self, new: ReferralStatus) -> Result<(), StatusTransitionError> {
        use ReferralStatus::*;
        match (*self, new) {
            (from, to) if from == to => Err(StatusTransitionError::NoOp),
            (Pending, Paid) | (Pending, Cancelled) => Ok(()),
            (from, to) => Err(StatusTransitionError::Forbidden { from: from.to_string(), to: to.to_string() }),
        }
    }
}

//-------------------------------- ReferralCommissionRecord -----------------------------------------------------------
/// A referral commission earned when a referred user's first invoice is fulfilled.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ReferralCommissionRecord {
    pub id: i64,
    pub influencer_id: i64,
    pub user_id: i64,
    pub invoice_id: InvoiceId,
    pub coupon_code: String,
    pub amount: Money,
    pub currency: String,
    pub status: ReferralStatus,
    pub created_at: DateTime<Utc>,
    /// The moment the hold period lapses and the commission becomes payable.
    pub available_at: DateTime<Utc>,
}

impl ReferralCommissionRecord {
    pub fn is_matured(&self, now: DateTime<Utc>) -> bool {
        now >= self.available_at
    }
}

//------------------------------- NewReferralCommission ---------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewReferralCommission {
    pub influencer_id: i64,
    pub user_id: i64,
    pub invoice_id: InvoiceId,
    pub coupon_code: String,
    pub amount: Money,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub available_at: DateTime<Utc>,
}

//--------------------------------------   CommissionType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Type, Serialize, Deserialize)]
pub enum CommissionType {
    Usage,
    Referral,
}

impl Display for CommissionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommissionType::Usage => write!(f, "Usage"),
            CommissionType::Referral => write!(f, "Referral"),
        }
    }
}

impl FromStr for CommissionType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Usage" => Ok(Self::Usage),
            "Referral" => Ok(Self::Referral),
            s => Err(ConversionError(format!("Invalid commission type: {s}"))),
        }
    }
}

//------------------------------- AggregatedCommission ----------------------------------------------------------------
/// A monthly rollup of snapshots or referrals, keyed by `(influencer, cohort, month, type, currency)`.
/// `cohort_id` is only set for usage rollups; referral totals are cohort-less.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct AggregatedCommission {
    pub id: i64,
    pub influencer_id: i64,
    pub cohort_id: Option<i64>,
    pub month: CalendarMonth,
    pub commission_type: CommissionType,
    pub currency: String,
    pub amount_paid: Money,
    pub num_users: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//------------------------------- NewAggregatedCommission -------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewAggregatedCommission {
    pub influencer_id: i64,
    pub cohort_id: Option<i64>,
    pub month: CalendarMonth,
    pub commission_type: CommissionType,
    pub currency: String,
    pub amount_paid: Money,
    pub num_users: i64,
    /// The snapshot ids (usage) or referral record ids (referral) this rollup was computed from.
    pub source_ids: Vec<i64>,
}

impl NewAggregatedCommission {
    /// Whether an existing row with the same key already carries these totals, in which case the row is left alone.
    pub fn matches(&self, existing: &AggregatedCommission) -> bool {
        self.amount_paid == existing.amount_paid && self.num_users == existing.num_users
    }
}

//--------------------------------------     PayoutStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum PayoutStatus {
    /// The batch is awaiting settlement.
    Pending,
    /// The batch has been settled. Terminal; recomputes may adjust totals but never the status.
    Paid,
    /// A dry-run batch. Preview batches cannot be transitioned; a non-preview aggregation replaces them.
    Preview,
}

impl Display for PayoutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayoutStatus::Pending => write!(f, "Pending"),
            PayoutStatus::Paid => write!(f, "Paid"),
            PayoutStatus::Preview => write!(f, "Preview"),
        }
    }
}

impl FromStr for PayoutStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Paid" => Ok(Self::Paid),
            "Preview" => Ok(Self::Preview),
            s => Err(ConversionError(format!("Invalid payout status: {s}"))),
        }
    }
}

impl PayoutStatus {
    /// The only admin-facing transition is settling a pending batch.
    pub fn validate_transition(&self, new: PayoutStatus) -> Result<(), StatusTransitionError> {
        use PayoutStatus::*;
        match (*self, new) {
            (from, to) if from == to => Err(StatusTransitionError::NoOp),
            (Pending, Paid) => Ok(()),
            (from, to) => Err(StatusTransitionError::Forbidden { from: from.to_string(), to: to.to_string() }),
        }
    }
}

//--------------------------------------     PayoutBatch      ---------------------------------------------------------
/// One settlement batch per (influencer, month, currency), carrying the sum of that month's aggregated commissions.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct PayoutBatch {
    pub id: i64,
    pub influencer_id: i64,
    pub month: CalendarMonth,
    pub currency: String,
    pub total_amount: Money,
    pub status: PayoutStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------   NewPayoutBatch     ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewPayoutBatch {
    pub currency: String,
    pub total_amount: Money,
    pub aggregate_ids: Vec<i64>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn referral_transitions() {
        use ReferralStatus::*;
        assert!(Pending.validate_transition(Paid).is_ok());
        assert!(Pending.validate_transition(Cancelled).is_ok());
        assert!(matches!(Pending.validate_transition(Pending), Err(StatusTransitionError::NoOp)));
        assert!(matches!(Paid.validate_transition(Pending), Err(StatusTransitionError::Forbidden { .. })));
        assert!(matches!(Paid.validate_transition(Cancelled), Err(StatusTransitionError::Forbidden { .. })));
        assert!(matches!(Cancelled.validate_transition(Paid), Err(StatusTransitionError::Forbidden { .. })));
    }

    #[test]
    fn payout_transitions() {
        use PayoutStatus::*;
        assert!(Pending.validate_transition(Paid).is_ok());
        assert!(matches!(Paid.validate_transition(Pending), Err(StatusTransitionError::Forbidden { .. })));
        assert!(matches!(Preview.validate_transition(Paid), Err(StatusTransitionError::Forbidden { .. })));
        assert!(matches!(Preview.validate_transition(Pending), Err(StatusTransitionError::Forbidden { .. })));
        assert!(matches!(Pending.validate_transition(Pending), Err(StatusTransitionError::NoOp)));
    }

    #[test]
    fn snapshot_material_difference() {
        let existing = UsageSnapshot {
            id: 1,
            influencer_id: 10,
            user_id: 20,
            cohort_id: 30,
            month: "2024-03".parse().unwrap(),
            currency: "USD".to_string(),
            user_total_points: 10,
            cohort_points: 10,
            paid_amount: Money::from_major(100),
            commission_amount: Money::from_major(30),
            kind_breakdown: BTreeMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let mut candidate = NewUsageSnapshot {
            influencer_id: 10,
            user_id: 20,
            cohort_id: 30,
            month: "2024-03".parse().unwrap(),
            currency: "USD".to_string(),
            user_total_points: 12,
            cohort_points: 12,
            paid_amount: Money::from_major(100),
            commission_amount: Money::from_major(30),
            kind_breakdown: BTreeMap::new(),
        };
        // Point movement alone is not material.
        assert!(!candidate.differs_materially(&existing));
        candidate.paid_amount = Money::from_cents(10_001);
        assert!(!candidate.differs_materially(&existing));
        candidate.paid_amount = Money::from_cents(10_002);
        assert!(candidate.differs_materially(&existing));
    }
}
