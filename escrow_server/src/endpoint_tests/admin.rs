use actix_web::{http::StatusCode, web, web::ServiceConfig};
use chrono::{Duration, Utc};
use escrow_engine::{
    db_types::{EscrowId, EscrowStatus, Money},
    escrow_objects::{DeliveryConfirmation, DisputeRequest},
    test_utils::{
        fakes::{FakeAuthorizer, FakeBalanceLedger, FakePaymentGateway},
        prepare_env::drop_database,
        system::{confirmed_order, TestFlowApi, TestSystem},
    },
    AutoReleaseReport,
    EscrowPolicy,
    LedgerQueries,
    Permission,
    SqliteDatabase,
};
use serde_json::json;

use super::helpers::{error_message, post_request};
use crate::{config::AutoReleaseConfig, data_objects::TransitionResponse, routes::admin_routes};

const ADMIN: &str = "admin";

struct AdminTest {
    db_path: String,
    api: web::Data<TestFlowApi>,
    gateway: FakePaymentGateway,
    balances: FakeBalanceLedger,
    authorizer: FakeAuthorizer,
}

impl AdminTest {
    async fn new() -> Self {
        let _ = env_logger::try_init().ok();
        let TestSystem { db_path, api, gateway, balances, authorizer, .. } = TestSystem::new(EscrowPolicy::default()).await;
        Self { db_path, api: web::Data::new(api), gateway, balances, authorizer }
    }

    /// Creates a single-seller order of 100.00 and returns the escrow id.
    async fn held_escrow(&self, order_id: &str) -> EscrowId {
        let escrows =
            self.api.create_escrows_for_order(confirmed_order(order_id, &[("alice", "store-a", 10_000)])).await.unwrap();
        escrows[0].id
    }

    async fn delivered_escrow(&self, order_id: &str, confirmed_days_ago: i64) -> EscrowId {
        let id = self.held_escrow(order_id).await;
        let confirmation = DeliveryConfirmation {
            order_id: order_id.to_string(),
            store_id: None,
            confirmed_by: "buyer".to_string(),
            confirmed_at: Some(Utc::now() - Duration::days(confirmed_days_ago)),
        };
        self.api.confirm_delivery(confirmation).await.unwrap();
        id
    }

    async fn status_of(&self, id: EscrowId) -> EscrowStatus {
        self.api.db().fetch_escrow(id).await.unwrap().unwrap().status
    }

    fn configure(&self) -> impl FnOnce(&mut ServiceConfig) {
        let api = self.api.clone();
        move |cfg: &mut ServiceConfig| {
            cfg.service(admin_routes::<SqliteDatabase, FakePaymentGateway, FakeBalanceLedger, FakeAuthorizer>(
                web::scope("/api"),
            ))
            .app_data(api)
            .app_data(web::Data::new(AutoReleaseConfig::default()));
        }
    }

    async fn post(&self, actor: &str, path: &str, body: Option<serde_json::Value>) -> (StatusCode, String) {
        post_request(actor, path, body, self.configure()).await
    }

    async fn finish(self) {
        drop_database(&self.db_path).await;
    }
}

#[actix_web::test]
async fn release_after_delivery() {
    let test = AdminTest::new().await;
    let id = test.delivered_escrow("order-1", 1).await;
    let path = format!("/api/escrows/{}/release", id.value());
    let (status, body) = test.post(ADMIN, &path, None).await;
    assert_eq!(status, StatusCode::OK);
    let response: TransitionResponse = serde_json::from_str(&body).unwrap();
    assert!(response.applied);
    assert_eq!(response.escrow.status, EscrowStatus::Released);
    assert_eq!(response.escrow.released_by.as_deref(), Some(ADMIN));
    assert_eq!(test.balances.credited_to("alice"), Money::from(9_000));

    // Terminal escrows cannot be released again, and the seller is not paid twice
    let (status, body) = test.post(ADMIN, &path, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_message(&body), format!("Cannot release escrow {id} while it is RELEASED"));
    assert_eq!(test.balances.credits().len(), 1);
    test.finish().await;
}

#[actix_web::test]
async fn release_needs_an_actor() {
    let test = AdminTest::new().await;
    let id = test.delivered_escrow("order-1", 1).await;
    let (status, _) = test.post("", &format!("/api/escrows/{}/release", id.value()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(test.status_of(id).await, EscrowStatus::PendingRelease);
    test.finish().await;
}

#[actix_web::test]
async fn release_unknown_escrow() {
    let test = AdminTest::new().await;
    let (status, body) = test.post(ADMIN, "/api/escrows/42/release", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "Escrow #42 not found");
    test.finish().await;
}

#[actix_web::test]
async fn undelivered_escrows_need_an_override() {
    let test = AdminTest::new().await;
    test.authorizer.set_allow_all(false);
    test.authorizer.grant("bob", &[Permission::Release]);
    test.authorizer.grant("root", &[Permission::Release, Permission::ReleaseUndelivered]);
    let id = test.held_escrow("order-1").await;

    let (status, _) = test.post("bob", &format!("/api/escrows/{}/release", id.value()), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = test.post("bob", &format!("/api/escrows/{}/release_undelivered", id.value()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(test.status_of(id).await, EscrowStatus::Held);
    assert_eq!(test.balances.call_count(), 0);

    let (status, body) = test.post("root", &format!("/api/escrows/{}/release_undelivered", id.value()), None).await;
    assert_eq!(status, StatusCode::OK);
    let response: TransitionResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(response.escrow.status, EscrowStatus::Released);
    assert!(!response.escrow.delivery_confirmed);
    assert_eq!(test.balances.credited_to("alice"), Money::from(9_000));
    test.finish().await;
}

#[actix_web::test]
async fn refund_held_escrow() {
    let test = AdminTest::new().await;
    let id = test.held_escrow("order-1").await;
    let path = format!("/api/escrows/{}/refund", id.value());

    let (status, _) = test.post(ADMIN, &path, Some(json!({"reason": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(test.gateway.call_count(), 0);

    let (status, body) = test.post(ADMIN, &path, Some(json!({"reason": "Item out of stock"}))).await;
    assert_eq!(status, StatusCode::OK);
    let response: TransitionResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(response.escrow.status, EscrowStatus::Refunded);
    assert_eq!(response.escrow.refund_reason.as_deref(), Some("Item out of stock"));
    let refunds = test.gateway.refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].payment_reference, "pay-order-1");
    assert_eq!(refunds[0].amount, Money::from(10_000));
    assert!(test.balances.credits().is_empty());
    test.finish().await;
}

#[actix_web::test]
async fn refund_while_gateway_is_down() {
    let test = AdminTest::new().await;
    let id = test.held_escrow("order-1").await;
    test.gateway.set_unavailable(true);
    let path = format!("/api/escrows/{}/refund", id.value());
    let (status, _) = test.post(ADMIN, &path, Some(json!({"reason": "Item out of stock"}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(test.status_of(id).await, EscrowStatus::Held);

    // The escrow was left untouched, so the refund can simply be retried
    test.gateway.set_unavailable(false);
    let (status, _) = test.post(ADMIN, &path, Some(json!({"reason": "Item out of stock"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(test.status_of(id).await, EscrowStatus::Refunded);
    test.finish().await;
}

#[actix_web::test]
async fn refund_without_permission() {
    let test = AdminTest::new().await;
    let id = test.held_escrow("order-1").await;
    test.authorizer.set_allow_all(false);
    test.authorizer.grant("viewer", &[Permission::ViewLedger]);
    let path = format!("/api/escrows/{}/refund", id.value());
    let (status, body) = test.post("viewer", &path, Some(json!({"reason": "Item out of stock"}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&body), "viewer is not authorized to refund escrow funds");
    assert_eq!(test.gateway.call_count(), 0);
    test.finish().await;
}

#[actix_web::test]
async fn resolve_dispute_in_favour_of_the_buyer() {
    let test = AdminTest::new().await;
    let id = test.delivered_escrow("order-1", 1).await;
    let path = format!("/api/escrows/{}/resolve", id.value());

    // Only disputed escrows can be resolved
    let (status, _) = test.post(ADMIN, &path, Some(json!({"outcome": "release"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let dispute = DisputeRequest { id, raised_by: "buyer".into(), reason: "Not as described".into() };
    test.api.raise_dispute(dispute).await.unwrap();
    let body = json!({"outcome": "refund", "reason": "Seller agreed to take it back"});
    let (status, body) = test.post(ADMIN, &path, Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    let response: TransitionResponse = serde_json::from_str(&body).unwrap();
    assert_eq!(response.escrow.status, EscrowStatus::Refunded);
    assert_eq!(test.gateway.refunds().len(), 1);
    assert!(test.balances.credits().is_empty());
    test.finish().await;
}

#[actix_web::test]
async fn resolve_dispute_in_favour_of_the_seller() {
    let test = AdminTest::new().await;
    let id = test.held_escrow("order-1").await;
    let dispute = DisputeRequest { id, raised_by: "buyer".into(), reason: "Never arrived".into() };
    test.api.raise_dispute(dispute).await.unwrap();

    // A plain release does not bypass the dispute
    let (status, _) = test.post(ADMIN, &format!("/api/escrows/{}/release", id.value()), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let path = format!("/api/escrows/{}/resolve", id.value());
    let (status, _) = test.post(ADMIN, &path, Some(json!({"outcome": "release"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(test.status_of(id).await, EscrowStatus::Released);
    assert_eq!(test.balances.credited_to("alice"), Money::from(9_000));
    test.finish().await;
}

#[actix_web::test]
async fn trigger_auto_release() {
    let test = AdminTest::new().await;
    let due = test.delivered_escrow("order-1", 8).await;
    let waiting = test.delivered_escrow("order-2", 2).await;
    let held = test.held_escrow("order-3").await;

    let (status, body) = test.post(ADMIN, "/api/escrows/auto_release?batch_size=10", None).await;
    assert_eq!(status, StatusCode::OK);
    let report: AutoReleaseReport = serde_json::from_str(&body).unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(test.status_of(due).await, EscrowStatus::Released);
    assert_eq!(test.status_of(waiting).await, EscrowStatus::PendingRelease);
    assert_eq!(test.status_of(held).await, EscrowStatus::Held);
    test.finish().await;
}

#[actix_web::test]
async fn trigger_auto_release_rejects_empty_batches() {
    let test = AdminTest::new().await;
    let due = test.delivered_escrow("order-1", 8).await;
    for batch_size in ["0", "-3"] {
        let path = format!("/api/escrows/auto_release?batch_size={batch_size}");
        let (status, body) = test.post(ADMIN, &path, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_message(&body).contains("Batch size must be positive"), "{body}");
    }
    assert_eq!(test.status_of(due).await, EscrowStatus::PendingRelease);

    let (status, body) = test.post(ADMIN, "/api/escrows/auto_release?batch_size=1000000", None).await;
    assert_eq!(status, StatusCode::OK);
    let report: AutoReleaseReport = serde_json::from_str(&body).unwrap();
    assert_eq!(report.successful, 1);
    test.finish().await;
}

#[actix_web::test]
async fn trigger_auto_release_without_permission() {
    let test = AdminTest::new().await;
    let due = test.delivered_escrow("order-1", 8).await;
    test.authorizer.set_allow_all(false);
    let (status, _) = test.post("bob", "/api/escrows/auto_release", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(test.status_of(due).await, EscrowStatus::PendingRelease);
    test.finish().await;
}
