//! # Creator Commission Engine
//!
//! The commission engine computes monthly referral and usage commissions for geek creators (affiliate instructors)
//! on the platform. This library contains the core logic for the commission pipeline. It is storage-agnostic.
//!
//! The library is divided into two main sections:
//! 1. Database management and control ([`mod@sqlite`]). Currently, SQLite is the supported backend. You should never
//!    need to access the database directly. Instead, use the public API provided by the pipeline. The exception is
//!    the data types used in the database. These are defined in the `db_types` module and are public.
//! 2. The commission pipeline public API. This provides the public-facing functionality of the engine: eligibility
//!    resolution, usage extraction, pro-rata distribution, batch orchestration, aggregation, referral registration
//!    and reporting. Specific backends need to implement the traits in [`mod@traits`] in order to act as a backend
//!    for the commission server.
//!
//! The engine also ships an in-process job queue ([`mod@jobs`]). Every pipeline stage is addressable as a
//! [`jobs::CommissionJob`], so a monthly build fans out into per-user jobs and a deferred aggregation job without
//! any external queueing infrastructure.
mod pipeline;

pub mod db_types;
pub mod helpers;
pub mod jobs;
pub mod traits;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteActivityStore, SqliteDatabase};

pub use pipeline::{
    aggregator::{AggregationOutcome, CommissionAggregator},
    distribution,
    eligibility::{EligibilityApi, EligibleCohorts},
    errors::{AbortReason, PipelineError, ReferralApiError, ReportError},
    objects,
    orchestrator::{BatchOrchestrator, BatchOutcome, MonthBuildPlan, PipelineConfig},
    referrals::ReferralApi,
    report::ReportApi,
    usage::{ActivityWeights, UsageExtractor, UserUsage},
    worker::{UserMonthResult, UserMonthWorker},
};
