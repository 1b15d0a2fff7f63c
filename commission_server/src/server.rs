use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use commission_engine::{
    jobs::{CommissionJob, InProcessJobQueue, JobQueue, JobRunner},
    ReferralApi,
    ReportApi,
    SqliteActivityStore,
    SqliteDatabase,
};
use log::*;

use crate::{
    config::ServerConfig,
    errors::ServerError,
    routes::{
        build_month,
        health,
        invoice_fulfilled,
        month_payouts,
        monthly_report,
        report_rows,
        update_payout_status,
        update_referral_status,
    },
};

/// Brings the whole deployment up: database pool, job dispatcher and HTTP server. Blocks until the server stops,
/// then drains the dispatcher so queued builds are not lost on shutdown.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let activity = SqliteActivityStore::new(db.pool().clone());
    let runner =
        JobRunner::new(db.clone(), activity.clone(), config.job_buffer_size).with_config(config.pipeline.clone());
    let (queue, runner_handle) = runner.start();

    let srv = create_server_instance(config, db, activity, queue.clone())?;
    let result = srv.await.map_err(|e| ServerError::Unspecified(e.to_string()));

    info!("🚀️ HTTP server stopped. Draining the job dispatcher");
    if queue.enqueue(CommissionJob::Shutdown).await.is_err() {
        warn!("🚀️ The job queue was already closed at shutdown");
    }
    if let Err(e) = runner_handle.await {
        warn!("🚀️ The job dispatcher did not shut down cleanly: {e}");
    }
    result
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    activity: SqliteActivityStore,
    queue: InProcessJobQueue,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let report_api = ReportApi::new(db.clone(), activity.clone(), queue.clone());
        let referral_api = ReferralApi::new(db.clone());
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("cce::access_log"))
            .app_data(web::Data::new(report_api))
            .app_data(web::Data::new(referral_api))
            .app_data(web::Data::new(db.clone()))
            .app_data(web::Data::new(queue.clone()))
            .service(health)
            .service(monthly_report)
            .service(report_rows)
            .service(build_month)
            .service(invoice_fulfilled)
            .service(update_referral_status)
            .service(update_payout_status)
            .service(month_payouts)
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
