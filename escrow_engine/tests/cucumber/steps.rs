use std::str::FromStr;

use chrono::{DateTime, Utc};
use cucumber::{gherkin::Step, then, when};
use escrow_engine::{
    db_types::EscrowStatus,
    escrow_objects::{
        DeliveryConfirmation,
        DisputeRequest,
        DisputeResolution,
        OrderItem,
        RefundRequest,
        ReleaseRequest,
        ResolutionOutcome,
    },
    test_utils::system::confirmed_order,
    EscrowError,
    DEFAULT_AUTO_RELEASE_BATCH_SIZE,
};

use crate::cucumber::{escrow_world::minor_units, EscrowWorld};

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).expect("Not an RFC 3339 timestamp").with_timezone(&Utc)
}

fn error_kind(e: &EscrowError) -> &'static str {
    match e {
        EscrowError::ValidationError(_) => "validation",
        EscrowError::InvalidStateError { .. } => "invalid_state",
        EscrowError::ExternalDependencyError(_) => "external_dependency",
        EscrowError::NotFound(_) => "not_found",
        EscrowError::Unauthorized { .. } => "unauthorized",
        EscrowError::DatabaseError(_) => "database",
    }
}

//                       | seller | store       | amount |
//                       | alice  | alice-store | 8000   |
#[when(expr = "order {word} is paid with the items")]
async fn order_paid(world: &mut EscrowWorld, order_id: String, step: &Step) {
    let table = step.table.as_ref().expect("The step needs a table of order items");
    let items = table
        .rows
        .iter()
        .skip(1)
        .map(|row| {
            let amount = i64::from_str(&row[2]).expect("Item amounts must be integers");
            (row[0].clone(), row[1].clone(), amount)
        })
        .collect::<Vec<_>>();
    let mut order = confirmed_order(&order_id, &[]);
    order.items = items.into_iter().map(|(seller, store, amount)| OrderItem::new(seller, store, minor_units(amount))).collect();
    order.subtotal = order.items.iter().map(|i| i.amount).sum();
    order.total = order.subtotal;
    let result = world.system().api.create_escrows_for_order(order).await;
    world.record(result);
}

#[when(expr = "order {word} is paid with a stated subtotal of {int} for {int} from '{word}' at '{word}'")]
async fn inconsistent_order(
    world: &mut EscrowWorld,
    order_id: String,
    subtotal: i64,
    amount: i64,
    seller: String,
    store: String,
) {
    let mut order = confirmed_order(&order_id, &[(seller.as_str(), store.as_str(), amount)]);
    order.subtotal = minor_units(subtotal);
    order.total = minor_units(subtotal);
    let result = world.system().api.create_escrows_for_order(order).await;
    world.record(result);
}

#[when(expr = "delivery of order {word} is confirmed at {string}")]
async fn delivery_confirmed(world: &mut EscrowWorld, order_id: String, at: String) {
    let confirmation = DeliveryConfirmation {
        order_id,
        store_id: None,
        confirmed_by: "courier".into(),
        confirmed_at: Some(parse_time(&at)),
    };
    let result = world.system().api.confirm_delivery(confirmation).await;
    world.record(result);
}

#[when(expr = "delivery of order {word} is confirmed for store '{word}' at {string}")]
async fn store_delivery_confirmed(world: &mut EscrowWorld, order_id: String, store_id: String, at: String) {
    let confirmation = DeliveryConfirmation {
        order_id,
        store_id: Some(store_id),
        confirmed_by: "courier".into(),
        confirmed_at: Some(parse_time(&at)),
    };
    let result = world.system().api.confirm_delivery(confirmation).await;
    world.record(result);
}

#[when(expr = "'{word}' releases the escrow for '{word}' on order {word}")]
async fn release(world: &mut EscrowWorld, actor: String, seller: String, order_id: String) {
    let escrow = world.escrow_for(&seller, &order_id).await;
    let result = world.system().api.release_escrow(ReleaseRequest::new(escrow.id, actor)).await;
    world.record(result);
}

#[when(expr = "'{word}' releases the undelivered escrow for '{word}' on order {word}")]
async fn release_undelivered(world: &mut EscrowWorld, actor: String, seller: String, order_id: String) {
    let escrow = world.escrow_for(&seller, &order_id).await;
    let result = world.system().api.release_escrow(ReleaseRequest::undelivered(escrow.id, actor)).await;
    world.record(result);
}

#[when(expr = "'{word}' refunds the escrow for '{word}' on order {word} because {string}")]
async fn refund(world: &mut EscrowWorld, actor: String, seller: String, order_id: String, reason: String) {
    let escrow = world.escrow_for(&seller, &order_id).await;
    let request = RefundRequest { id: escrow.id, actor_id: actor, reason };
    let result = world.system().api.refund_escrow(request).await;
    world.record(result);
}

#[when(expr = "the buyer disputes the escrow for '{word}' on order {word} because {string}")]
async fn dispute(world: &mut EscrowWorld, seller: String, order_id: String, reason: String) {
    let escrow = world.escrow_for(&seller, &order_id).await;
    let request = DisputeRequest { id: escrow.id, raised_by: "buyer".into(), reason };
    let result = world.system().api.raise_dispute(request).await;
    world.record(result);
}

#[when(expr = "'{word}' resolves the dispute for '{word}' on order {word} in favour of the seller")]
async fn resolve_for_seller(world: &mut EscrowWorld, actor: String, seller: String, order_id: String) {
    let escrow = world.escrow_for(&seller, &order_id).await;
    let resolution = DisputeResolution { id: escrow.id, actor_id: actor, outcome: ResolutionOutcome::Release };
    let result = world.system().api.resolve_dispute(resolution).await;
    world.record(result);
}

#[when(expr = "'{word}' resolves the dispute for '{word}' on order {word} in favour of the buyer because {string}")]
async fn resolve_for_buyer(world: &mut EscrowWorld, actor: String, seller: String, order_id: String, reason: String) {
    let escrow = world.escrow_for(&seller, &order_id).await;
    let resolution = DisputeResolution { id: escrow.id, actor_id: actor, outcome: ResolutionOutcome::Refund { reason } };
    let result = world.system().api.resolve_dispute(resolution).await;
    world.record(result);
}

#[when(expr = "the auto-release job runs at {string}")]
async fn auto_release(world: &mut EscrowWorld, at: String) {
    let result = world.system().api.release_due_escrows(parse_time(&at), DEFAULT_AUTO_RELEASE_BATCH_SIZE).await;
    match result {
        Ok(report) => {
            world.last_report = Some(report);
            world.last_error = None;
        },
        Err(e) => world.last_error = Some(e),
    }
}

#[when("the seller balance ledger is down")]
async fn balance_ledger_down(world: &mut EscrowWorld) {
    world.system().balances.set_unavailable(true);
}

#[when("the seller balance ledger is back up")]
async fn balance_ledger_up(world: &mut EscrowWorld) {
    world.system().balances.set_unavailable(false);
}

#[when(expr = "the seller balance ledger rejects credits for '{word}'")]
async fn balance_ledger_rejects(world: &mut EscrowWorld, seller: String) {
    world.system().balances.fail_for_seller(&seller);
}

#[when("the payment gateway is down")]
async fn gateway_down(world: &mut EscrowWorld) {
    world.system().gateway.set_unavailable(true);
}

#[when("only explicitly granted actions are allowed")]
async fn restrict_authorizer(world: &mut EscrowWorld) {
    world.system().authorizer.set_allow_all(false);
}

#[then(expr = "order {word} has {int} escrow(s)")]
async fn escrow_count(world: &mut EscrowWorld, order_id: String, count: usize) {
    let escrows = world.system().reporting.escrows_for_order("admin", &order_id).await;
    let found = escrows.map(|e| e.len()).unwrap_or(0);
    assert_eq!(found, count, "Unexpected number of escrows for order {order_id}");
}

#[then(expr = "the escrow for '{word}' on order {word} is {word}")]
async fn escrow_status(world: &mut EscrowWorld, seller: String, order_id: String, status: String) {
    let expected = EscrowStatus::from_str(&status).expect("Not a valid escrow status");
    let escrow = world.escrow_for(&seller, &order_id).await;
    assert_eq!(escrow.status, expected, "Escrow {} has the wrong status", escrow.id);
    assert_eq!(escrow.check_invariants(), Ok(()));
}

#[then(expr = "the escrow for '{word}' on order {word} holds {int} with a fee of {int} and {int} for the seller")]
async fn escrow_split(world: &mut EscrowWorld, seller: String, order_id: String, total: i64, fee: i64, net: i64) {
    let escrow = world.escrow_for(&seller, &order_id).await;
    assert_eq!(escrow.total_amount, minor_units(total), "Total amount is incorrect");
    assert_eq!(escrow.platform_fee, minor_units(fee), "Platform fee is incorrect");
    assert_eq!(escrow.seller_amount, minor_units(net), "Seller amount is incorrect");
}

#[then(expr = "the escrow for '{word}' on order {word} auto-releases at {string}")]
async fn escrow_auto_release_at(world: &mut EscrowWorld, seller: String, order_id: String, at: String) {
    let escrow = world.escrow_for(&seller, &order_id).await;
    assert_eq!(escrow.auto_release_at, Some(parse_time(&at)));
}

#[then(expr = "'{word}' has been credited {int}")]
async fn seller_credited(world: &mut EscrowWorld, seller: String, amount: i64) {
    assert_eq!(world.system().balances.credited_to(&seller), minor_units(amount));
}

#[then(expr = "the buyer of order {word} has been refunded {int}")]
async fn buyer_refunded(world: &mut EscrowWorld, order_id: String, amount: i64) {
    let reference = format!("pay-{order_id}");
    let refunded: escrow_engine::db_types::Money = world
        .system()
        .gateway
        .refunds()
        .iter()
        .filter(|r| r.payment_reference == reference)
        .map(|r| r.amount)
        .sum();
    assert_eq!(refunded, minor_units(amount));
}

#[then("the request succeeds")]
async fn request_succeeded(world: &mut EscrowWorld) {
    if let Some(e) = &world.last_error {
        panic!("Expected the last request to succeed, but it failed with: {e}");
    }
}

#[then(expr = "the request fails with a(n) {word} error")]
async fn request_failed_with(world: &mut EscrowWorld, kind: String) {
    check_error(world, &kind);
}

fn check_error(world: &EscrowWorld, kind: &str) {
    let e = world.last_error.as_ref().expect("Expected the last request to fail, but it succeeded");
    assert_eq!(error_kind(e), kind, "Unexpected error: {e}");
}

#[then(expr = "the auto-release job processed {int}, released {int} and failed {int}")]
async fn auto_release_report(world: &mut EscrowWorld, processed: usize, successful: usize, failed: usize) {
    let report = world.last_report.as_ref().expect("The auto-release job has not run");
    assert_eq!(report.processed, processed, "Processed count is incorrect");
    assert_eq!(report.successful, successful, "Successful count is incorrect");
    assert_eq!(report.failed, failed, "Failed count is incorrect");
    assert_eq!(report.failures.len(), failed);
}

#[then(expr = "the platform has earned {int} and {int} is still in escrow")]
async fn ledger_totals(world: &mut EscrowWorld, revenue: i64, in_escrow: i64) {
    let stats = world.system().reporting.statistics("admin").await.expect("Error fetching statistics");
    assert_eq!(stats.platform_revenue(), minor_units(revenue), "Platform revenue is incorrect");
    assert_eq!(stats.total_in_escrow(), minor_units(in_escrow), "Escrowed total is incorrect");
}
