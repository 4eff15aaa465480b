use std::{fmt::Display, time::Duration};

use escrow_common::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("The request was rejected: {0}")]
    Rejected(String),
    #[error("The service is unavailable: {0}")]
    Unavailable(String),
    #[error("No response within {0:?}")]
    Timeout(Duration),
}

/// Refunds buyers through the payment provider that captured the original payment.
#[allow(async_fn_in_trait)]
pub trait PaymentGateway {
    /// Refunds `amount` of the payment identified by `payment_reference` back to the buyer.
    async fn refund(&self, payment_reference: &str, amount: Money, currency: &str) -> Result<(), CollaboratorError>;
}

/// The sellers' withdrawable balances. Crediting is idempotent on `reference`: crediting twice with the same reference
/// must not credit the seller twice.
#[allow(async_fn_in_trait)]
pub trait SellerBalanceLedger {
    async fn credit(
        &self,
        seller_id: &str,
        amount: Money,
        currency: &str,
        reference: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Administrative actions that must be authorized before the engine performs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewLedger,
    Release,
    /// Release an escrow whose delivery has not been confirmed.
    ReleaseUndelivered,
    Refund,
    ResolveDispute,
    RunAutoRelease,
}

impl Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Permission::ViewLedger => "view the escrow ledger",
            Permission::Release => "release escrow funds",
            Permission::ReleaseUndelivered => "release undelivered escrow funds",
            Permission::Refund => "refund escrow funds",
            Permission::ResolveDispute => "resolve escrow disputes",
            Permission::RunAutoRelease => "run the auto-release sweep",
        };
        f.write_str(s)
    }
}

#[allow(async_fn_in_trait)]
pub trait ActionAuthorizer {
    /// Returns `true` if `actor_id` may perform actions requiring `permission`.
    async fn is_authorized(&self, actor_id: &str, permission: Permission) -> Result<bool, CollaboratorError>;
}
