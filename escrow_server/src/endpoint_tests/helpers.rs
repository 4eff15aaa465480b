use actix_web::{body::to_bytes, http::StatusCode, test, test::TestRequest, web::ServiceConfig, App};
use chrono::{TimeZone, Utc};
use escrow_engine::db_types::{EscrowId, EscrowStatus, EscrowTransaction, Money};
use log::debug;
use serde_json::Value;

use crate::auth::ACTOR_HEADER;

pub async fn get_request<F>(actor: &str, path: &str, configure: F) -> (StatusCode, String)
where F: FnOnce(&mut ServiceConfig) {
    let req = with_actor(TestRequest::get().uri(path), actor);
    call(req, configure).await
}

pub async fn post_request<F>(actor: &str, path: &str, body: Option<Value>, configure: F) -> (StatusCode, String)
where F: FnOnce(&mut ServiceConfig) {
    let mut req = with_actor(TestRequest::post().uri(path), actor);
    if let Some(body) = body {
        req = req.set_json(body);
    }
    call(req, configure).await
}

fn with_actor(req: TestRequest, actor: &str) -> TestRequest {
    if actor.is_empty() {
        req
    } else {
        req.insert_header((ACTOR_HEADER, actor))
    }
}

/// Calls the app and returns the status and body. Errors raised by middleware are turned into their responses.
pub async fn call<F>(req: TestRequest, configure: F) -> (StatusCode, String)
where F: FnOnce(&mut ServiceConfig) {
    let app = App::new().configure(configure);
    let service = test::init_service(app).await;
    debug!("Making request");
    match test::try_call_service(&service, req.to_request()).await {
        Ok(res) => {
            let status = res.status();
            let body = test::read_body(res).await;
            (status, String::from_utf8_lossy(&body).into_owned())
        },
        Err(e) => {
            let res = e.error_response();
            let status = res.status();
            let body = to_bytes(res.into_body()).await.unwrap_or_default();
            (status, String::from_utf8_lossy(&body).into_owned())
        },
    }
}

/// A held escrow of 100.00 with a 10% commission.
pub fn held_escrow(id: i64, order_id: &str, seller_id: &str) -> EscrowTransaction {
    let created_at = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
    EscrowTransaction {
        id: EscrowId(id),
        order_id: order_id.to_string(),
        payment_reference: format!("pay-{order_id}"),
        seller_id: seller_id.to_string(),
        store_id: "store-a".to_string(),
        currency: "USD".to_string(),
        total_amount: Money::from(10_000),
        platform_fee: Money::from(1_000),
        seller_amount: Money::from(9_000),
        commission_rate_bps: 1000,
        status: EscrowStatus::Held,
        delivery_confirmed: false,
        delivery_confirmed_at: None,
        delivery_confirmed_by: None,
        hold_period_days: 7,
        auto_release_at: None,
        released_at: None,
        released_by: None,
        refunded_at: None,
        refunded_by: None,
        refund_reason: None,
        disputed_at: None,
        dispute_reason: None,
        auto_release_attempts: 0,
        last_auto_release_error: None,
        created_at,
        updated_at: created_at,
    }
}

pub fn error_message(body: &str) -> String {
    let value: Value = serde_json::from_str(body).expect("error body is not JSON");
    value["error"].as_str().unwrap_or_default().to_string()
}
