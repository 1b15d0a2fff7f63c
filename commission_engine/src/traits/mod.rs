//! # Database management and control.
//!
//! This module provides the interfaces that define the contracts of the commission engine database *backends*.
//!
//! ## Commission data
//! An influencer (geek creator) accrues two kinds of commission: referral commissions, registered when a referred
//! user's first invoice is fulfilled, and usage commissions, computed monthly from what their cohort students paid
//! and did. Both funnel into aggregated rollups and one payout batch per currency.
//!
//! ## Traits
//! The module defines the behaviour a database backend needs to expose in order to be supported by the commission
//! engine.
//!
//! * [`CommissionDatabase`] defines the highest level of behaviour for backends supporting the engine.
//! * [`InfluencerManagement`] covers creators, affiliate roles, cohort assignments and the plan catalogue.
//! * [`InvoiceManagement`] covers the mirrored billing invoices.
//! * [`CommissionManagement`] covers usage snapshots and referral commission records.
//! * [`PayoutManagement`] covers monthly rollups and payout batches.
//! * [`ActivityStore`] is the read-side contract for the analytical store of engagement events. It is a separate
//!   trait because the store is an external system with its own failure modes.
mod activity_store;
mod commission_database;
mod commission_management;
mod data_objects;
mod influencer_management;
mod invoice_management;
mod payout_management;

pub use activity_store::{ActivityQuery, ActivityStore, ActivityStoreError};
pub use commission_database::{CommissionDatabase, CommissionDatabaseError};
pub use commission_management::CommissionManagement;
pub use data_objects::{PlanScope, SnapshotUpsert};
pub use influencer_management::InfluencerManagement;
pub use invoice_management::InvoiceManagement;
pub use payout_management::PayoutManagement;
