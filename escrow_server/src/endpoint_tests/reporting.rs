use actix_web::{http::StatusCode, web, web::ServiceConfig};
use chrono::{TimeZone, Utc};
use escrow_engine::{
    db_types::{AuditAction, AuditEntry, EscrowId, EscrowStatus, EscrowTransaction, Money},
    test_utils::fakes::FakeAuthorizer,
    EscrowPage,
    EscrowStatistics,
    LedgerError,
    Permission,
    ReportingApi,
    SellerEscrowSummary,
    StatusBucket,
};
use serde_json::Value;

use super::{
    helpers::{error_message, get_request, held_escrow},
    mocks::MockLedgerQueries,
};
use crate::routes::reporting_routes;

const AUDITOR: &str = "auditor";

#[actix_web::test]
async fn fetch_escrow_without_actor_header() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_escrow().never();
    let (status, body) = get_request("", "/api/escrows/1", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_message(&body), "No actor id was provided in the esg_actor_id header");
}

#[actix_web::test]
async fn fetch_escrow() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger
        .expect_fetch_escrow()
        .withf(|id| *id == EscrowId(1))
        .times(1)
        .returning(|_| Ok(Some(held_escrow(1, "order-1", "alice"))));
    let (status, body) = get_request(AUDITOR, "/api/escrows/1", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::OK);
    let escrow: EscrowTransaction = serde_json::from_str(&body).unwrap();
    assert_eq!(escrow, held_escrow(1, "order-1", "alice"));
}

#[actix_web::test]
async fn fetch_escrow_without_permission() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_escrow().never();
    let (status, body) = get_request("mallory", "/api/escrows/1", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_message(&body), "mallory is not authorized to view the escrow ledger");
}

#[actix_web::test]
async fn fetch_missing_escrow() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_escrow().returning(|_| Ok(None));
    let (status, body) = get_request(AUDITOR, "/api/escrows/7", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&body), "Escrow #7 not found");
}

#[actix_web::test]
async fn authorization_service_down() {
    let _ = env_logger::try_init().ok();
    let authorizer = auditor();
    authorizer.set_unavailable(true);
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_escrow().never();
    let (status, _) = get_request(AUDITOR, "/api/escrows/1", configure(ledger, authorizer)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[actix_web::test]
async fn database_errors_are_server_errors() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_escrow().returning(|_| Err(LedgerError::DatabaseError("database is locked".into())));
    let (status, body) = get_request(AUDITOR, "/api/escrows/1", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_message(&body), "Database error: database is locked");
}

#[actix_web::test]
async fn fetch_escrows_for_order() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger
        .expect_fetch_escrows_for_order()
        .withf(|order_id| order_id.to_string() == "order-1")
        .returning(|_| Ok(vec![held_escrow(1, "order-1", "alice"), held_escrow(2, "order-1", "bob")]));
    let (status, body) = get_request(AUDITOR, "/api/escrows/order/order-1", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::OK);
    let escrows: Vec<EscrowTransaction> = serde_json::from_str(&body).unwrap();
    assert_eq!(escrows.len(), 2);
    assert_eq!(escrows[1].seller_id, "bob");
}

#[actix_web::test]
async fn fetch_escrows_for_unknown_order() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_escrows_for_order().returning(|_| Ok(vec![]));
    let (status, _) = get_request(AUDITOR, "/api/escrows/order/order-99", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn search_escrows() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger
        .expect_search_escrows()
        .withf(|filter, pagination| {
            filter.status == vec![EscrowStatus::Held, EscrowStatus::Disputed] &&
                filter.seller_id.as_deref() == Some("alice") &&
                filter.order_id.is_none() &&
                pagination.page() == 2 &&
                pagination.limit() == 1
        })
        .times(1)
        .returning(|_, _| {
            Ok(EscrowPage {
                items: vec![held_escrow(2, "order-2", "alice")],
                page: 2,
                limit: 1,
                total: 2,
                total_pages: 2,
            })
        });
    let (status, body) = get_request(
        AUDITOR,
        "/api/escrows?status=HELD,DISPUTED&seller_id=alice&page=2&limit=1",
        configure(ledger, auditor()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let page: EscrowPage = serde_json::from_str(&body).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].id, EscrowId(2));
}

#[actix_web::test]
async fn search_with_unknown_status() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_search_escrows().never();
    let (status, _) = get_request(AUDITOR, "/api/escrows?status=SHIPPED", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn search_with_empty_window() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_search_escrows().never();
    let (status, _) = get_request(
        AUDITOR,
        "/api/escrows?since=2024-06-10T00:00:00Z&until=2024-06-01T00:00:00Z",
        configure(ledger, auditor()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn escrow_statistics() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_statistics().withf(|seller| seller.is_none()).returning(|_| Ok(statistics()));
    let (status, body) = get_request(AUDITOR, "/api/escrows/stats", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::OK);
    let value: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["platform_revenue"], 2_000);
    assert_eq!(value["total_in_escrow"], 15_000);
    assert_eq!(value["statistics"]["released"]["count"], 2);
}

#[actix_web::test]
async fn sellers_can_read_their_own_summary() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger
        .expect_fetch_statistics()
        .withf(|seller| seller.as_deref() == Some("alice"))
        .times(1)
        .returning(|_| Ok(statistics()));
    // alice has no grants at all
    let (status, body) = get_request("alice", "/api/sellers/alice/escrow_summary", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::OK);
    let summary: SellerEscrowSummary = serde_json::from_str(&body).unwrap();
    assert_eq!(summary.seller_id, "alice");
    assert_eq!(summary.available_for_payout, Money::from(18_000));
}

#[actix_web::test]
async fn sellers_cannot_read_each_others_summaries() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_statistics().never();
    let (status, _) = get_request("bob", "/api/sellers/alice/escrow_summary", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn fetch_audit_log() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_audit_log().withf(|id| *id == EscrowId(3)).returning(|id| {
        let at = Utc.with_ymd_and_hms(2024, 6, 10, 12, 0, 0).unwrap();
        Ok(vec![AuditEntry {
            id: 1,
            escrow_id: id,
            action: AuditAction::Created,
            actor: "system".to_string(),
            from_status: None,
            to_status: EscrowStatus::Held,
            note: None,
            created_at: at,
        }])
    });
    let (status, body) = get_request(AUDITOR, "/api/escrows/3/audit", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::OK);
    let entries: Vec<AuditEntry> = serde_json::from_str(&body).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::Created);
}

#[actix_web::test]
async fn audit_log_of_unknown_escrow() {
    let _ = env_logger::try_init().ok();
    let mut ledger = MockLedgerQueries::new();
    ledger.expect_fetch_audit_log().returning(|_| Ok(vec![]));
    let (status, _) = get_request(AUDITOR, "/api/escrows/3/audit", configure(ledger, auditor())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn auditor() -> FakeAuthorizer {
    let authorizer = FakeAuthorizer::new();
    authorizer.grant(AUDITOR, &[Permission::ViewLedger]);
    authorizer
}

fn configure(ledger: MockLedgerQueries, authorizer: FakeAuthorizer) -> impl FnOnce(&mut ServiceConfig) {
    move |cfg: &mut ServiceConfig| {
        let api = ReportingApi::new(ledger, authorizer);
        cfg.service(reporting_routes::<MockLedgerQueries, FakeAuthorizer>(web::scope("/api")))
            .app_data(web::Data::new(api));
    }
}

fn statistics() -> EscrowStatistics {
    EscrowStatistics {
        held: StatusBucket {
            count: 1,
            total_amount: Money::from(10_000),
            seller_amount: Money::from(9_000),
            platform_fee: Money::from(1_000),
        },
        disputed: StatusBucket {
            count: 1,
            total_amount: Money::from(5_000),
            seller_amount: Money::from(4_500),
            platform_fee: Money::from(500),
        },
        released: StatusBucket {
            count: 2,
            total_amount: Money::from(20_000),
            seller_amount: Money::from(18_000),
            platform_fee: Money::from(2_000),
        },
        ..Default::default()
    }
}
