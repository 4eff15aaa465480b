use cucumber::World;
use escrow_engine::{
    db_types::{EscrowTransaction, Money},
    test_utils::system::TestSystem,
    AutoReleaseReport,
    EscrowError,
    EscrowPolicy,
    LedgerQueries,
};

#[derive(Default, Debug, World)]
pub struct EscrowWorld {
    pub policy: EscrowPolicy,
    pub system: Option<TestSystem>,
    pub last_error: Option<EscrowError>,
    pub last_report: Option<AutoReleaseReport>,
}

impl EscrowWorld {
    pub fn system(&self) -> &TestSystem {
        self.system.as_ref().expect("The escrow system has not been initialised")
    }

    /// Remembers the error from a request, if there was one, so that later steps can check it.
    pub fn record<T>(&mut self, result: Result<T, EscrowError>) {
        self.last_error = result.err();
    }

    pub async fn escrow_for(&self, seller_id: &str, order_id: &str) -> EscrowTransaction {
        let escrows = self.system().db.fetch_escrows_for_order(order_id).await.expect("Error fetching escrows");
        escrows
            .into_iter()
            .find(|e| e.seller_id == seller_id)
            .unwrap_or_else(|| panic!("No escrow for {seller_id} on order {order_id}"))
    }
}

pub fn minor_units(amount: i64) -> Money {
    Money::from(amount)
}
