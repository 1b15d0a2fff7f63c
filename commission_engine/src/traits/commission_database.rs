use thiserror::Error;

use crate::{
    db_types::{InvoiceId, StatusTransitionError},
    traits::{CommissionManagement, InfluencerManagement, InvoiceManagement, PayoutManagement},
};

/// This trait defines the highest level of behaviour for backends supporting the commission engine.
///
/// It is an umbrella over the management traits, each of which covers one slice of the data model. Pipeline
/// components take the umbrella so that a single backend handle can be threaded through the whole flow.
#[allow(async_fn_in_trait)]
pub trait CommissionDatabase:
    Clone + InfluencerManagement + InvoiceManagement + CommissionManagement + PayoutManagement
{
    /// The URL of the database
    fn url(&self) -> &str;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), CommissionDatabaseError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum CommissionDatabaseError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("The requested influencer id {0} does not exist")]
    InfluencerNotFound(i64),
    #[error("The requested invoice {0} does not exist")]
    InvoiceNotFound(InvoiceId),
    #[error("The requested referral record (internal id {0}) does not exist")]
    ReferralNotFound(i64),
    #[error("The requested payout batch (internal id {0}) does not exist")]
    PayoutBatchNotFound(i64),
    #[error("Illegal status change. {0}")]
    StatusUpdateError(#[from] StatusTransitionError),
}

impl From<sqlx::Error> for CommissionDatabaseError {
    fn from(e: sqlx::Error) -> Self {
        CommissionDatabaseError::DatabaseError(e.to_string())
    }
}
