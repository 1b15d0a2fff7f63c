//! Wire objects for the reporting API.
//!
//! Monetary amounts serialize as decimal strings ("30.00") rather than raw minor units, so report consumers never
//! have to know the scale.
use std::collections::BTreeMap;

use cce_common::Money;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    db_types::{CommissionType, InvoiceId},
    helpers::CalendarMonth,
};

pub fn money_to_decimal<S>(amount: &Money, serializer: S) -> Result<S::Ok, S::Error>
where S: serde::Serializer {
    serializer.serialize_str(&amount.to_string())
}

pub fn money_map_to_decimal<S>(totals: &BTreeMap<String, Money>, serializer: S) -> Result<S::Ok, S::Error>
where S: serde::Serializer {
    use serde::ser::SerializeMap;
    let mut map = serializer.serialize_map(Some(totals.len()))?;
    for (currency, amount) in totals {
        map.serialize_entry(currency, &amount.to_string())?;
    }
    map.end()
}

/// Parameters of a monthly report request.
#[derive(Debug, Clone)]
pub struct ReportParams {
    pub creator_id: i64,
    pub month: CalendarMonth,
    /// Restrict the usage computation to plans with these slugs.
    pub include_plans: Vec<String>,
    /// Drop plans with these slugs from the usage computation.
    pub exclude_plans: Vec<String>,
    /// Queue the full build instead of computing figures synchronously.
    pub run_async: bool,
    /// Allow a month that has not closed yet; payout batches written by the build are marked `Preview`.
    pub preview: bool,
}

impl ReportParams {
    pub fn new(creator_id: i64, month: CalendarMonth) -> Self {
        Self { creator_id, month, include_plans: Vec::new(), exclude_plans: Vec::new(), run_async: false, preview: false }
    }

    pub fn with_included_plans(mut self, slugs: Vec<String>) -> Self {
        self.include_plans = slugs;
        self
    }

    pub fn with_excluded_plans(mut self, slugs: Vec<String>) -> Self {
        self.exclude_plans = slugs;
        self
    }

    pub fn run_async(mut self) -> Self {
        self.run_async = true;
        self
    }

    pub fn preview(mut self) -> Self {
        self.preview = true;
        self
    }
}

/// The month's headline figures for one creator.
#[derive(Debug, Clone, Serialize)]
pub struct MonthlySummary {
    pub creator_id: i64,
    pub month: CalendarMonth,
    /// Matured, still-collectible referral commission per currency.
    #[serde(serialize_with = "money_map_to_decimal")]
    pub matured_referral_total: BTreeMap<String, Money>,
    /// Usage commission per currency, computed live from invoices and engagement.
    #[serde(serialize_with = "money_map_to_decimal")]
    pub usage_total: BTreeMap<String, Money>,
    /// True when the figures were not computed here: a build job was queued and the totals arrive once it lands.
    pub scheduled: bool,
}

impl MonthlySummary {
    pub fn scheduled(creator_id: i64, month: CalendarMonth) -> Self {
        Self {
            creator_id,
            month,
            matured_referral_total: BTreeMap::new(),
            usage_total: BTreeMap::new(),
            scheduled: true,
        }
    }
}

/// One commission detail line. Referral rows come from referral records, usage rows from persisted snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct CommissionRow {
    pub commission_type: CommissionType,
    /// The invoice behind a referral row. Usage rows aggregate several invoices and carry none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<InvoiceId>,
    /// The cohort behind a usage row. Referral rows have no cohort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cohort_id: Option<i64>,
    pub user_id: i64,
    pub currency: String,
    /// Referral rows carry the record status. Usage rows carry the status of the month's payout batch in their
    /// currency, or `Pending` when the month has not been aggregated yet.
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// The end of the hold period for referral rows. Usage rows are payable once the month is aggregated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_at: Option<DateTime<Utc>>,
    /// Whether the row counts towards the month's payable total right now.
    pub is_effective: bool,
    /// Weighted engagement points behind a usage row. Zero for referral rows.
    pub points: i64,
    /// What the user paid.
    #[serde(serialize_with = "money_to_decimal")]
    pub paid_amount: Money,
    #[serde(serialize_with = "money_to_decimal")]
    pub commission_amount: Money,
}
