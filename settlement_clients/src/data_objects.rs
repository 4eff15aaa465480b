//! Request bodies sent to the downstream services.
use escrow_common::Money;
use serde::{Deserialize, Serialize};

/// `POST /refunds` on the payment gateway. Amounts are in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundBody {
    pub payment_reference: String,
    pub amount: Money,
    pub currency: String,
}

/// `POST /credits` on the seller balance ledger. The ledger ignores a second credit with the same reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBody {
    pub seller_id: String,
    pub amount: Money,
    pub currency: String,
    pub reference: String,
}

/// `POST /events` on the notification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationBody {
    pub topic: String,
    pub payload: serde_json::Value,
}
