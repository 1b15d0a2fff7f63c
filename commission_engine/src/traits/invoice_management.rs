use chrono::{DateTime, Utc};

use crate::{
    db_types::{InvoiceId, UsageInvoice},
    traits::{CommissionDatabaseError, PlanScope},
};

/// Queries over the invoices mirrored from the billing provider.
///
/// A *billable* invoice is fulfilled, has a positive amount, was fulfilled inside the window and falls inside the
/// plan scope. Refunded and pending invoices never count.
#[allow(async_fn_in_trait)]
pub trait InvoiceManagement {
    fn fetch_invoice(
        &self,
        invoice_id: &InvoiceId,
    ) -> impl std::future::Future<Output = Result<Option<UsageInvoice>, CommissionDatabaseError>> + Send;

    /// The distinct users with at least one billable invoice in the window, excluding `excluded_users`.
    /// The result is sorted by user id so that batch partitioning is deterministic.
    fn fetch_billable_user_ids(
        &self,
        window: (DateTime<Utc>, DateTime<Utc>),
        excluded_users: &[i64],
        plans: &PlanScope,
    ) -> impl std::future::Future<Output = Result<Vec<i64>, CommissionDatabaseError>> + Send;

    /// All billable invoices for one user in the window, ordered by fulfilment time.
    fn fetch_billable_invoices_for_user(
        &self,
        user_id: i64,
        window: (DateTime<Utc>, DateTime<Utc>),
        plans: &PlanScope,
    ) -> impl std::future::Future<Output = Result<Vec<UsageInvoice>, CommissionDatabaseError>> + Send;

    /// All billable invoices in the window for users outside `excluded_users`, ordered by user then fulfilment time.
    async fn fetch_billable_invoices(
        &self,
        window: (DateTime<Utc>, DateTime<Utc>),
        excluded_users: &[i64],
        plans: &PlanScope,
    ) -> Result<Vec<UsageInvoice>, CommissionDatabaseError>;
}
