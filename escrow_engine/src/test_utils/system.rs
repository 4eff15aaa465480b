use std::{fmt::Debug, time::Duration};

use escrow_common::Money;

use crate::{
    escrow_objects::{ConfirmedOrder, OrderItem},
    events::EventProducers,
    test_utils::{
        fakes::{FakeAuthorizer, FakeBalanceLedger, FakePaymentGateway},
        prepare_env::{prepare_test_env, random_db_path},
    },
    EscrowFlowApi,
    EscrowPolicy,
    ReportingApi,
    SqliteDatabase,
};

pub type TestFlowApi = EscrowFlowApi<SqliteDatabase, FakePaymentGateway, FakeBalanceLedger, FakeAuthorizer>;
pub type TestReportingApi = ReportingApi<SqliteDatabase, FakeAuthorizer>;

/// A complete engine on a fresh database, with handles to its fake collaborators.
pub struct TestSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub api: TestFlowApi,
    pub reporting: TestReportingApi,
    pub gateway: FakePaymentGateway,
    pub balances: FakeBalanceLedger,
    pub authorizer: FakeAuthorizer,
}

impl Debug for TestSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestSystem ({})", self.db_path)
    }
}

impl TestSystem {
    pub async fn new(policy: EscrowPolicy) -> Self {
        Self::with_producers(policy, EventProducers::default()).await
    }

    pub async fn with_producers(policy: EscrowPolicy, producers: EventProducers) -> Self {
        let db_path = random_db_path();
        prepare_test_env(&db_path).await;
        let db = SqliteDatabase::new_with_url(&db_path, 5).await.expect("Error creating connection to database");
        let gateway = FakePaymentGateway::new();
        let balances = FakeBalanceLedger::new();
        let authorizer = FakeAuthorizer::allow_all();
        let api = EscrowFlowApi::new(db.clone(), gateway.clone(), balances.clone(), authorizer.clone(), producers)
            .with_policy(policy)
            .with_call_timeout(Duration::from_secs(2));
        let reporting = ReportingApi::new(db.clone(), authorizer.clone());
        Self { db_path, db, api, reporting, gateway, balances, authorizer }
    }
}

/// A paid order with no shipping or tax. Items are `(seller, store, amount in minor units)`.
pub fn confirmed_order(order_id: &str, items: &[(&str, &str, i64)]) -> ConfirmedOrder {
    let items: Vec<OrderItem> =
        items.iter().map(|(seller, store, amount)| OrderItem::new(*seller, *store, Money::from(*amount))).collect();
    let subtotal: Money = items.iter().map(|i| i.amount).sum();
    ConfirmedOrder {
        order_id: order_id.to_string(),
        payment_reference: format!("pay-{order_id}"),
        currency: "USD".to_string(),
        subtotal,
        shipping: Money::from(0),
        tax: Money::from(0),
        total: subtotal,
        items,
        confirmed_at: None,
    }
}
