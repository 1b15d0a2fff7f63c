//! Request handler definitions
//!
//! Define each route and its handler here. Handlers that are more than a line or two MUST go into a separate
//! module. Keep this module neat and tidy 🙏
//!
//! Handlers never do the heavy lifting themselves: anything slower than a couple of database reads is handed to the
//! job queue and answered with a 202.
use actix_web::{get, post, web, HttpResponse, Responder};
use cce_common::parse_boolean_flag;
use chrono::Utc;
use commission_engine::{
    helpers::CalendarMonth,
    jobs::{CommissionJob, InProcessJobQueue, JobQueue},
    objects::ReportParams,
    traits::{InfluencerManagement, PayoutManagement},
    ReferralApi,
    ReportApi,
    SqliteActivityStore,
    SqliteDatabase,
};
use log::*;
use regex::Regex;
use serde_json::json;

use crate::{
    data_objects::{BuildRequest, InvoiceFulfilledEvent, JsonResponse, PayoutStatusUpdate, ReferralStatusUpdate, ReportQuery},
    errors::ServerError,
};

type Reports = ReportApi<SqliteDatabase, SqliteActivityStore, InProcessJobQueue>;
type Referrals = ReferralApi<SqliteDatabase>;

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

// ----------------------------------------------  Reports  ----------------------------------------------------

/// Route handler for the monthly summary report.
///
/// Returns the month's headline figures per currency. With `async=1` the full build is queued instead and the
/// response is a 202 with `scheduled` set. `preview=1` allows reporting on a month that has not closed yet.
#[get("/api/report/{creator_id}/{month}")]
pub async fn monthly_report(
    path: web::Path<(i64, String)>,
    query: web::Query<ReportQuery>,
    api: web::Data<Reports>,
) -> Result<HttpResponse, ServerError> {
    let (creator_id, month) = path.into_inner();
    let month = parse_month(&month)?;
    let params = report_params(creator_id, month, query.into_inner())?;
    debug!("💻️ GET monthly report for creator {creator_id}, {month}");
    let summary = api.monthly_summary(&params, Utc::now()).await?;
    if summary.scheduled {
        Ok(HttpResponse::Accepted().json(summary))
    } else {
        Ok(HttpResponse::Ok().json(summary))
    }
}

/// Route handler for the commission detail rows behind the monthly report. CSV rendering is the caller's problem.
#[get("/api/report/{creator_id}/{month}/rows")]
pub async fn report_rows(
    path: web::Path<(i64, String)>,
    query: web::Query<ReportQuery>,
    api: web::Data<Reports>,
) -> Result<HttpResponse, ServerError> {
    let (creator_id, month) = path.into_inner();
    let month = parse_month(&month)?;
    let params = report_params(creator_id, month, query.into_inner())?;
    debug!("💻️ GET commission rows for creator {creator_id}, {month}");
    let rows = api.commission_rows(&params, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(rows))
}

// ----------------------------------------------   Builds  ----------------------------------------------------

/// Route handler for kicking off a monthly build. The work happens on the job dispatcher; this returns 202 as soon
/// as the root job is queued.
#[post("/api/commissions/build")]
pub async fn build_month(
    body: web::Json<BuildRequest>,
    queue: web::Data<InProcessJobQueue>,
) -> Result<HttpResponse, ServerError> {
    let req = body.into_inner();
    let month =
        CalendarMonth::new(req.year, req.month).map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
    let job = CommissionJob::BuildMonth { influencer_id: req.influencer_id, month, preview: false };
    queue.enqueue(job).await.map_err(|e| ServerError::BackendError(e.to_string()))?;
    info!("💻️ {month} build accepted for influencer {}", req.influencer_id);
    Ok(HttpResponse::Accepted().json(JsonResponse::success(format!("{month} build queued"))))
}

// ----------------------------------------------  Webhooks  ----------------------------------------------------

/// Route handler for the invoice fulfilment webhook.
///
/// Registration itself runs on the job dispatcher and is idempotent on the invoice, so billing can deliver this as
/// often as it likes. Responses must stay in the 200 range, otherwise billing retries forever.
#[post("/webhooks/invoice-fulfilled")]
pub async fn invoice_fulfilled(
    body: web::Json<InvoiceFulfilledEvent>,
    queue: web::Data<InProcessJobQueue>,
) -> HttpResponse {
    let event = body.into_inner();
    trace!("💻️ Invoice fulfilment webhook for {}", event.invoice_id);
    let job = CommissionJob::RegisterReferral { invoice_id: event.invoice_id.clone().into() };
    let result = match queue.enqueue(job).await {
        Ok(()) => JsonResponse::success("Referral registration queued."),
        Err(e) => {
            warn!("💻️ Could not queue referral registration for invoice {}: {e}", event.invoice_id);
            JsonResponse::failure("Could not queue referral registration.")
        },
    };
    HttpResponse::Ok().json(result)
}

// ---------------------------------------------- Admin: statuses ----------------------------------------------

/// Route handler for settling or cancelling a referral commission. The transition is validated against the record's
/// state machine; anything illegal comes back as a 400.
#[post("/api/referrals/{id}/status")]
pub async fn update_referral_status(
    path: web::Path<i64>,
    body: web::Json<ReferralStatusUpdate>,
    api: web::Data<Referrals>,
) -> Result<HttpResponse, ServerError> {
    let referral_id = path.into_inner();
    let record = api.update_status(referral_id, body.status).await?;
    Ok(HttpResponse::Ok().json(record))
}

/// Route handler for settling a payout batch.
#[post("/api/payouts/{id}/status")]
pub async fn update_payout_status(
    path: web::Path<i64>,
    body: web::Json<PayoutStatusUpdate>,
    db: web::Data<SqliteDatabase>,
) -> Result<HttpResponse, ServerError> {
    let batch_id = path.into_inner();
    let batch = db.update_payout_status(batch_id, body.status).await?;
    info!("💻️ Payout batch {batch_id} is now {}", batch.status);
    Ok(HttpResponse::Ok().json(batch))
}

/// Route handler for a creator's payout batches and the rollups behind them.
#[get("/api/payouts/{creator_id}/{month}")]
pub async fn month_payouts(
    path: web::Path<(i64, String)>,
    db: web::Data<SqliteDatabase>,
) -> Result<HttpResponse, ServerError> {
    let (creator_id, month) = path.into_inner();
    let month = parse_month(&month)?;
    db.fetch_influencer(creator_id)
        .await?
        .ok_or_else(|| ServerError::NoRecordFound(format!("Creator {creator_id} does not exist")))?;
    let batches = db.fetch_payout_batches_for_month(creator_id, month).await?;
    let aggregates = db.fetch_aggregates_for_month(creator_id, month).await?;
    Ok(HttpResponse::Ok().json(json!({ "batches": batches, "aggregates": aggregates })))
}

// ----------------------------------------------  Helpers  ----------------------------------------------------

fn parse_month(raw: &str) -> Result<CalendarMonth, ServerError> {
    raw.parse().map_err(|e: commission_engine::helpers::MonthParseError| {
        ServerError::InvalidRequestPath(e.to_string())
    })
}

/// Splits a comma-separated slug list and rejects anything that is not lowercase kebab case.
fn parse_plan_list(raw: Option<String>, field: &str) -> Result<Vec<String>, ServerError> {
    let Some(raw) = raw else { return Ok(Vec::new()) };
    let slug_re = Regex::new(r"^[a-z0-9][a-z0-9_-]*$").unwrap();
    let mut slugs = Vec::new();
    for slug in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !slug_re.is_match(slug) {
            return Err(ServerError::InvalidRequestBody(format!("'{slug}' is not a valid plan slug in {field}")));
        }
        slugs.push(slug.to_string());
    }
    Ok(slugs)
}

fn report_params(creator_id: i64, month: CalendarMonth, query: ReportQuery) -> Result<ReportParams, ServerError> {
    let include = parse_plan_list(query.include_plans, "include_plans")?;
    let exclude = parse_plan_list(query.exclude_plans, "exclude_plans")?;
    let mut params = ReportParams::new(creator_id, month);
    if !include.is_empty() {
        params = params.with_included_plans(include);
    }
    if !exclude.is_empty() {
        params = params.with_excluded_plans(exclude);
    }
    if parse_boolean_flag(query.run_async, false) {
        params = params.run_async();
    }
    if parse_boolean_flag(query.preview, false) {
        params = params.preview();
    }
    Ok(params)
}
