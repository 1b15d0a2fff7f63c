use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use commission_engine::{traits::CommissionDatabaseError, ReportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<ReportError> for ServerError {
    fn from(e: ReportError) -> Self {
        match e {
            ReportError::UnknownCreator(_) => Self::NoRecordFound(e.to_string()),
            ReportError::UnknownPlanSlugs(_) => Self::InvalidRequestBody(e.to_string()),
            ReportError::MonthNotClosed(_) => Self::InvalidRequestBody(e.to_string()),
            ReportError::Database(e) => Self::BackendError(format!("Database error: {e}")),
            ReportError::Scheduling(e) => Self::BackendError(format!("Job queue error: {e}")),
        }
    }
}

impl From<CommissionDatabaseError> for ServerError {
    fn from(e: CommissionDatabaseError) -> Self {
        match e {
            CommissionDatabaseError::InfluencerNotFound(_) |
            CommissionDatabaseError::InvoiceNotFound(_) |
            CommissionDatabaseError::ReferralNotFound(_) |
            CommissionDatabaseError::PayoutBatchNotFound(_) => Self::NoRecordFound(e.to_string()),
            CommissionDatabaseError::StatusUpdateError(_) => Self::InvalidRequestBody(e.to_string()),
            CommissionDatabaseError::DatabaseError(e) => Self::BackendError(format!("Database error: {e}")),
        }
    }
}
