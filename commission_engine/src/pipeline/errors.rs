//! Error taxonomy for the pipeline.
//!
//! The split that matters operationally is [`PipelineError::Permanent`] versus [`PipelineError::Transient`]:
//! permanent aborts are business outcomes (logged, never retried, never propagated to sibling jobs), transients are
//! infrastructure hiccups (the dispatcher re-enqueues the same job after a delay). Everything else is a hard
//! failure.
use thiserror::Error;

use crate::{db_types::InvoiceId, helpers::CalendarMonth, jobs::JobQueueError, traits::CommissionDatabaseError};

/// The permanent reasons a pipeline stage can refuse to produce anything. Retrying changes nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("Influencer {0} does not exist")]
    UnknownInfluencer(i64),
    #[error("Influencer {0} has no eligible cohorts")]
    NoEligibleCohorts(i64),
    #[error("User {user_id} has no billable invoices in {month}")]
    NoUsageInvoices { user_id: i64, month: CalendarMonth },
    #[error("User {user_id} is settled through the referral channel in {month}")]
    ReferralAttributed { user_id: i64, month: CalendarMonth },
    #[error("Batch {batch_number} of {total_batches} contains no users")]
    EmptyBatch { batch_number: usize, total_batches: usize },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The stage cannot produce anything for these inputs.
    #[error("The stage aborted: {0}")]
    Permanent(#[from] AbortReason),
    /// An external dependency failed. The same job may well succeed on a later attempt.
    #[error("A transient failure interrupted the stage: {0}")]
    Transient(String),
    #[error("Database error: {0}")]
    Database(#[from] CommissionDatabaseError),
    #[error("Could not hand a follow-up job to the queue: {0}")]
    Scheduling(#[from] JobQueueError),
}

/// Errors raised while registering or settling referral commissions.
#[derive(Debug, Error)]
pub enum ReferralApiError {
    #[error("Invoice {0} does not exist")]
    UnknownInvoice(InvoiceId),
    #[error("Invoice {0} has not been fulfilled, so it cannot carry a referral commission")]
    NotFulfilled(InvoiceId),
    #[error("Database error: {0}")]
    Database(#[from] CommissionDatabaseError),
}

/// Errors raised by the reporting API. These are user-visible; the server maps them onto 4xx responses.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Creator {0} does not exist")]
    UnknownCreator(i64),
    #[error("Unknown plan slugs: {}", .0.join(", "))]
    UnknownPlanSlugs(Vec<String>),
    #[error("{0} has not closed yet. Month-end figures exist only for completed months")]
    MonthNotClosed(CalendarMonth),
    #[error("Database error: {0}")]
    Database(#[from] CommissionDatabaseError),
    #[error("Could not schedule the build: {0}")]
    Scheduling(#[from] JobQueueError),
}
