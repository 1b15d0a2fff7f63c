//! Endpoint tests against a real SQLite backend. These exercise routing, extraction and error mapping; the
//! pipeline logic itself is covered in the engine's own tests.
use actix_web::{http::StatusCode, test, web, App};
use commission_engine::{
    jobs::{job_channel, CommissionJob},
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    ReferralApi,
    ReportApi,
    SqliteActivityStore,
    SqliteDatabase,
};

use crate::{
    data_objects::JsonResponse,
    routes::{build_month, health, invoice_fulfilled, monthly_report},
};

async fn new_db() -> (SqliteDatabase, SqliteActivityStore) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    let activity = SqliteActivityStore::new(db.pool().clone());
    (db, activity)
}

#[actix_web::test]
async fn health_answers_with_a_thumbs_up() {
    let app = test::init_service(App::new().service(health)).await;
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    assert_eq!(body, "👍️\n".as_bytes());
}

#[actix_web::test]
async fn malformed_months_are_bad_requests() {
    let (db, activity) = new_db().await;
    let (queue, _listener) = job_channel(8);
    let api = ReportApi::new(db.clone(), activity, queue);
    let app = test::init_service(App::new().app_data(web::Data::new(api)).service(monthly_report)).await;

    let req = test::TestRequest::get().uri("/api/report/1/March-2024").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn unknown_creators_are_not_found() {
    let (db, activity) = new_db().await;
    let (queue, _listener) = job_channel(8);
    let api = ReportApi::new(db.clone(), activity, queue);
    let app = test::init_service(App::new().app_data(web::Data::new(api)).service(monthly_report)).await;

    let req = test::TestRequest::get().uri("/api/report/42/2024-03").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn build_requests_are_accepted_and_queued() {
    let (queue, mut listener) = job_channel(8);
    let app = test::init_service(App::new().app_data(web::Data::new(queue)).service(build_month)).await;

    let req = test::TestRequest::post()
        .uri("/api/commissions/build")
        .set_json(serde_json::json!({ "influencer_id": 7, "year": 2024, "month": 3 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let queued = listener.recv().await.unwrap();
    assert_eq!(
        queued,
        CommissionJob::BuildMonth { influencer_id: 7, month: "2024-03".parse().unwrap(), preview: false }
    );

    let req = test::TestRequest::post()
        .uri("/api/commissions/build")
        .set_json(serde_json::json!({ "influencer_id": 7, "year": 2024, "month": 13 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn the_fulfilment_webhook_never_errors() {
    let (queue, listener) = job_channel(8);
    // A closed queue is the worst case; the webhook must still answer 200.
    drop(listener);
    let app = test::init_service(App::new().app_data(web::Data::new(queue)).service(invoice_fulfilled)).await;

    let req = test::TestRequest::post()
        .uri("/webhooks/invoice-fulfilled")
        .set_json(serde_json::json!({ "invoice_id": "inv-1" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: JsonResponse = test::read_body_json(resp).await;
    assert!(!body.success);
}

#[actix_web::test]
async fn referral_status_updates_map_errors() {
    let (db, _activity) = new_db().await;
    let api = ReferralApi::new(db.clone());
    let app = test::init_service(
        App::new().app_data(web::Data::new(api)).service(crate::routes::update_referral_status),
    )
    .await;

    // No such referral.
    let req = test::TestRequest::post()
        .uri("/api/referrals/99/status")
        .set_json(serde_json::json!({ "status": "Paid" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
