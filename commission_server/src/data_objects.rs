use std::fmt::Display;

use commission_engine::db_types::{PayoutStatus, ReferralStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

/// Query string for the report endpoints. Plan lists are comma-separated slugs; flags accept the usual
/// true/false/1/0 spellings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    pub include_plans: Option<String>,
    pub exclude_plans: Option<String>,
    #[serde(rename = "async")]
    pub run_async: Option<String>,
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub influencer_id: i64,
    pub year: i32,
    pub month: u32,
}

/// The fulfilment webhook payload. Billing sends the invoice id only; everything else is looked up here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceFulfilledEvent {
    pub invoice_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralStatusUpdate {
    pub status: ReferralStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutStatusUpdate {
    pub status: PayoutStatus,
}
