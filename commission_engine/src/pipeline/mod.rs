//! The commission pipeline.
//!
//! A monthly build flows through the stages in this module, leaves first:
//! [`eligibility`] answers which cohorts an influencer may earn from; [`usage`] turns invoices and engagement
//! events into weighted points; [`distribution`] splits the commission pool pro rata; [`orchestrator`] fans the
//! user set out into batches of deferred jobs; [`worker`] computes and persists one user's snapshots;
//! [`aggregator`] rolls the month up into payout records. [`referrals`] handles the other commission channel, and
//! [`report`] reads the results back out.
//!
//! Every stage is a thin struct over the backend traits, so the whole pipeline runs against any
//! [`crate::traits::CommissionDatabase`].
pub mod aggregator;
pub mod distribution;
pub mod eligibility;
pub mod errors;
pub mod objects;
pub mod orchestrator;
pub mod referrals;
pub mod report;
pub mod usage;
pub mod worker;
