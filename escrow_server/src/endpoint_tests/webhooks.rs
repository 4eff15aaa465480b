use std::net::{IpAddr, SocketAddr};

use actix_web::{
    http::{header::ContentType, StatusCode},
    test::TestRequest,
    web,
    web::ServiceConfig,
};
use escrow_common::Secret;
use escrow_engine::{
    db_types::{EscrowStatus, EscrowTransaction, Money},
    test_utils::{
        fakes::{FakeAuthorizer, FakeBalanceLedger, FakePaymentGateway},
        prepare_env::drop_database,
        system::{TestFlowApi, TestSystem},
    },
    EscrowPolicy,
    LedgerQueries,
    SqliteDatabase,
};
use serde_json::json;

use super::helpers::{call, error_message, post_request};
use crate::{
    data_objects::TransitionResponse,
    middleware::{HmacMiddlewareFactory, IpWhitelistFactory, HMAC_HEADER},
    routes::webhook_routes,
};

const SECRET: &str = "webhook-secret";
const ORDER_JSON: &str = r#"{"order_id":"order-1","payment_reference":"pay-order-1","currency":"USD","subtotal":15000,"total":15000,"items":[{"seller_id":"alice","store_id":"store-a","amount":10000},{"seller_id":"bob","store_id":"store-b","amount":5000}]}"#;
// HMAC-SHA256 of ORDER_JSON keyed with SECRET
const ORDER_HMAC: &str = "UkV6l0MgtQ0l9gmx0cxKomMu71vQCN/9mPv70vDuSLo=";

struct WebhookTest {
    db_path: String,
    api: web::Data<TestFlowApi>,
}

impl WebhookTest {
    async fn new() -> Self {
        let _ = env_logger::try_init().ok();
        let TestSystem { db_path, api, .. } = TestSystem::new(EscrowPolicy::default()).await;
        Self { db_path, api: web::Data::new(api) }
    }

    fn configure(&self, hmac_checks: bool, whitelist: Option<Vec<IpAddr>>) -> impl FnOnce(&mut ServiceConfig) {
        self.configure_with_secret(SECRET, hmac_checks, whitelist)
    }

    fn configure_with_secret(
        &self,
        secret: &str,
        hmac_checks: bool,
        whitelist: Option<Vec<IpAddr>>,
    ) -> impl FnOnce(&mut ServiceConfig) {
        let api = self.api.clone();
        let secret = Secret::new(secret.to_string());
        move |cfg: &mut ServiceConfig| {
            let scope = webhook_routes::<SqliteDatabase, FakePaymentGateway, FakeBalanceLedger, FakeAuthorizer>(
                web::scope("/webhook"),
            )
            .wrap(HmacMiddlewareFactory::new(HMAC_HEADER, secret, hmac_checks))
            .wrap(IpWhitelistFactory::new(whitelist, false, false));
            cfg.service(scope).app_data(api);
        }
    }

    /// Sends an unsigned webhook to a server with signature checks switched off.
    async fn unsigned(&self, path: &str, body: serde_json::Value) -> (StatusCode, String) {
        post_request("", path, Some(body), self.configure(false, None)).await
    }

    async fn finish(self) {
        drop_database(&self.db_path).await;
    }
}

fn signed_order(signature: Option<&str>) -> TestRequest {
    let mut req = TestRequest::post()
        .uri("/webhook/order_confirmed")
        .insert_header(ContentType::json())
        .peer_addr(peer("192.168.1.10"))
        .set_payload(ORDER_JSON);
    if let Some(signature) = signature {
        req = req.insert_header((HMAC_HEADER, signature));
    }
    req
}

fn peer(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse().unwrap(), 44_123)
}

#[actix_web::test]
async fn order_confirmed_with_valid_signature() {
    let test = WebhookTest::new().await;
    let (status, body) = call(signed_order(Some(ORDER_HMAC)), test.configure(true, None)).await;
    assert_eq!(status, StatusCode::OK);
    let escrows: Vec<EscrowTransaction> = serde_json::from_str(&body).unwrap();
    assert_eq!(escrows.len(), 2);
    let alice = escrows.iter().find(|e| e.seller_id == "alice").unwrap();
    assert_eq!(alice.status, EscrowStatus::Held);
    assert_eq!(alice.platform_fee, Money::from(1_000));
    assert_eq!(alice.seller_amount, Money::from(9_000));
    let bob = escrows.iter().find(|e| e.seller_id == "bob").unwrap();
    assert_eq!(bob.total_amount, Money::from(5_000));

    // The checkout retries webhooks. The second delivery returns the same escrows.
    let (status, body) = call(signed_order(Some(ORDER_HMAC)), test.configure(true, None)).await;
    assert_eq!(status, StatusCode::OK);
    let replayed: Vec<EscrowTransaction> = serde_json::from_str(&body).unwrap();
    assert_eq!(replayed, escrows);
    test.finish().await;
}

#[actix_web::test]
async fn order_confirmed_with_invalid_signature() {
    let test = WebhookTest::new().await;
    let (status, body) = call(signed_order(Some("AAAAbad+signature=")), test.configure(true, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&body), "Invalid HMAC signature.");
    let escrows = test.api.db().fetch_escrows_for_order("order-1").await.unwrap();
    assert!(escrows.is_empty());
    test.finish().await;
}

#[actix_web::test]
async fn order_confirmed_without_signature() {
    let test = WebhookTest::new().await;
    let (status, body) = call(signed_order(None), test.configure(true, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&body), "No HMAC signature found.");
    test.finish().await;
}

#[actix_web::test]
async fn webhooks_are_refused_without_a_signing_secret() {
    let test = WebhookTest::new().await;
    let (status, body) = call(signed_order(Some(ORDER_HMAC)), test.configure_with_secret("", true, None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(error_message(&body).contains("No webhook signing secret is configured"), "{body}");
    let escrows = test.api.db().fetch_escrows_for_order("order-1").await.unwrap();
    assert!(escrows.is_empty());
    test.finish().await;
}

#[actix_web::test]
async fn signature_checks_can_be_disabled() {
    let test = WebhookTest::new().await;
    let (status, _) = call(signed_order(None), test.configure(false, None)).await;
    assert_eq!(status, StatusCode::OK);
    test.finish().await;
}

#[actix_web::test]
async fn webhooks_from_peers_outside_the_whitelist() {
    let test = WebhookTest::new().await;
    let whitelist = Some(vec!["10.0.0.5".parse().unwrap()]);
    let (status, body) = call(signed_order(Some(ORDER_HMAC)), test.configure(true, whitelist.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&body), "Forbidden peer.");

    let req = signed_order(Some(ORDER_HMAC)).peer_addr(peer("10.0.0.5"));
    let (status, _) = call(req, test.configure(true, whitelist)).await;
    assert_eq!(status, StatusCode::OK);
    test.finish().await;
}

#[actix_web::test]
async fn inconsistent_orders_are_rejected() {
    let test = WebhookTest::new().await;
    let order = json!({
        "order_id": "order-2",
        "payment_reference": "pay-order-2",
        "currency": "USD",
        "subtotal": 10000,
        "total": 12000,
        "items": [{"seller_id": "alice", "store_id": "store-a", "amount": 10000}]
    });
    let (status, body) = test.unsigned("/webhook/order_confirmed", order).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(error_message(&body).contains("but the total is"));
    test.finish().await;
}

#[actix_web::test]
async fn delivery_then_dispute() {
    let test = WebhookTest::new().await;
    let (status, _) = call(signed_order(None), test.configure(false, None)).await;
    assert_eq!(status, StatusCode::OK);

    let delivery = json!({"order_id": "order-1", "store_id": "store-b", "confirmed_by": "buyer"});
    let (status, body) = test.unsigned("/webhook/delivery_confirmed", delivery.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let confirmed: Vec<EscrowTransaction> = serde_json::from_str(&body).unwrap();
    assert_eq!(confirmed.len(), 1);
    let escrow = &confirmed[0];
    assert_eq!(escrow.seller_id, "bob");
    assert_eq!(escrow.status, EscrowStatus::PendingRelease);
    assert!(escrow.delivery_confirmed);
    let release_at = escrow.delivery_confirmed_at.unwrap() + chrono::Duration::days(7);
    assert_eq!(escrow.auto_release_at, Some(release_at));

    // Delivery cannot be confirmed twice
    let (status, _) = test.unsigned("/webhook/delivery_confirmed", delivery).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let dispute = json!({"id": escrow.id, "raised_by": "buyer", "reason": "Box was empty"});
    let (status, body) = test.unsigned("/webhook/dispute_raised", dispute.clone()).await;
    assert_eq!(status, StatusCode::OK);
    let response: TransitionResponse = serde_json::from_str(&body).unwrap();
    assert!(response.applied);
    assert_eq!(response.escrow.status, EscrowStatus::Disputed);
    assert_eq!(response.escrow.dispute_reason.as_deref(), Some("Box was empty"));

    // A repeated dispute is acknowledged without changing anything
    let (status, body) = test.unsigned("/webhook/dispute_raised", dispute).await;
    assert_eq!(status, StatusCode::OK);
    let response: TransitionResponse = serde_json::from_str(&body).unwrap();
    assert!(!response.applied);
    test.finish().await;
}

#[actix_web::test]
async fn dispute_on_unknown_escrow() {
    let test = WebhookTest::new().await;
    let dispute = json!({"id": 99, "raised_by": "buyer", "reason": "Box was empty"});
    let (status, _) = test.unsigned("/webhook/dispute_raised", dispute).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    test.finish().await;
}
