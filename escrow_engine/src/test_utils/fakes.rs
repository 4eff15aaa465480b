//! In-memory stand-ins for the payment gateway, the seller balance ledger and the authorization service.
//!
//! All fakes are cheap to clone and clones share state, so a test can keep a handle to inspect what the engine did.
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use escrow_common::Money;

use crate::traits::{ActionAuthorizer, CollaboratorError, PaymentGateway, Permission, SellerBalanceLedger};

//--------------------------------------  FakeBalanceLedger    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditRecord {
    pub seller_id: String,
    pub amount: Money,
    pub currency: String,
    pub reference: String,
}

#[derive(Default)]
struct BalanceState {
    credits: Vec<CreditRecord>,
    calls: usize,
    fail_all: bool,
    failing_sellers: HashSet<String>,
    delay: Option<Duration>,
}

/// Records credits instead of paying sellers. Credits are idempotent on their reference, like the real ledger.
#[derive(Clone, Default)]
pub struct FakeBalanceLedger {
    state: Arc<Mutex<BalanceState>>,
}

impl FakeBalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every credit fail until switched off again.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().fail_all = unavailable;
    }

    pub fn fail_for_seller(&self, seller_id: &str) {
        self.state.lock().unwrap().failing_sellers.insert(seller_id.to_string());
    }

    pub fn recover_seller(&self, seller_id: &str) {
        self.state.lock().unwrap().failing_sellers.remove(seller_id);
    }

    /// Delays every credit call. Useful for exercising timeouts and concurrent requests.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn credits(&self) -> Vec<CreditRecord> {
        self.state.lock().unwrap().credits.clone()
    }

    /// The number of credit calls received, including failed and repeated ones.
    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }

    pub fn credited_to(&self, seller_id: &str) -> Money {
        self.state.lock().unwrap().credits.iter().filter(|c| c.seller_id == seller_id).map(|c| c.amount).sum()
    }
}

impl SellerBalanceLedger for FakeBalanceLedger {
    async fn credit(
        &self,
        seller_id: &str,
        amount: Money,
        currency: &str,
        reference: &str,
    ) -> Result<(), CollaboratorError> {
        let (delay, fail) = {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            (state.delay, state.fail_all || state.failing_sellers.contains(seller_id))
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(CollaboratorError::Unavailable(format!("balance ledger rejected credit for {seller_id}")));
        }
        let mut state = self.state.lock().unwrap();
        if !state.credits.iter().any(|c| c.reference == reference) {
            state.credits.push(CreditRecord {
                seller_id: seller_id.to_string(),
                amount,
                currency: currency.to_string(),
                reference: reference.to_string(),
            });
        }
        Ok(())
    }
}

//--------------------------------------  FakePaymentGateway   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundRecord {
    pub payment_reference: String,
    pub amount: Money,
    pub currency: String,
}

#[derive(Default)]
struct GatewayState {
    refunds: Vec<RefundRecord>,
    calls: usize,
    fail_all: bool,
    delay: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct FakePaymentGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl FakePaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().fail_all = unavailable;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn refunds(&self) -> Vec<RefundRecord> {
        self.state.lock().unwrap().refunds.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls
    }
}

impl PaymentGateway for FakePaymentGateway {
    async fn refund(&self, payment_reference: &str, amount: Money, currency: &str) -> Result<(), CollaboratorError> {
        let (delay, fail) = {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            (state.delay, state.fail_all)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(CollaboratorError::Unavailable(format!("gateway could not refund {payment_reference}")));
        }
        self.state.lock().unwrap().refunds.push(RefundRecord {
            payment_reference: payment_reference.to_string(),
            amount,
            currency: currency.to_string(),
        });
        Ok(())
    }
}

//--------------------------------------    FakeAuthorizer     ---------------------------------------------------------
#[derive(Default)]
struct AuthorizerState {
    allow_all: bool,
    unavailable: bool,
    grants: HashMap<String, HashSet<Permission>>,
}

#[derive(Clone, Default)]
pub struct FakeAuthorizer {
    state: Arc<Mutex<AuthorizerState>>,
}

impl FakeAuthorizer {
    /// An authorizer that denies everything until permissions are granted.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_all() -> Self {
        let authorizer = Self::default();
        authorizer.state.lock().unwrap().allow_all = true;
        authorizer
    }

    /// Switches between allowing everything and only allowing what was granted.
    pub fn set_allow_all(&self, allow_all: bool) {
        self.state.lock().unwrap().allow_all = allow_all;
    }

    pub fn grant(&self, actor_id: &str, permissions: &[Permission]) {
        let mut state = self.state.lock().unwrap();
        state.grants.entry(actor_id.to_string()).or_default().extend(permissions.iter().copied());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }
}

impl ActionAuthorizer for FakeAuthorizer {
    async fn is_authorized(&self, actor_id: &str, permission: Permission) -> Result<bool, CollaboratorError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(CollaboratorError::Unavailable("authorization service is down".into()));
        }
        Ok(state.allow_all || state.grants.get(actor_id).map(|p| p.contains(&permission)).unwrap_or(false))
    }
}
