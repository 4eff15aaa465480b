use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use escrow_common::{is_currency_code, Money};
use serde::{Deserialize, Serialize};

use crate::db_types::{EscrowId, EscrowStatus};

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

//--------------------------------------     ConfirmedOrder    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub seller_id: String,
    pub store_id: String,
    /// The price of the line item, including quantity.
    pub amount: Money,
}

impl OrderItem {
    pub fn new<S: Into<String>>(seller_id: S, store_id: S, amount: Money) -> Self {
        Self { seller_id: seller_id.into(), store_id: store_id.into(), amount }
    }
}

/// A paid order, as reported by the checkout once payment has been captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedOrder {
    pub order_id: String,
    pub payment_reference: String,
    pub currency: String,
    pub subtotal: Money,
    #[serde(default)]
    pub shipping: Money,
    #[serde(default)]
    pub tax: Money,
    pub total: Money,
    pub items: Vec<OrderItem>,
    /// When payment was confirmed. Defaults to the time the order is processed.
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl ConfirmedOrder {
    /// Checks that the order is internally consistent. The line items must add up to the subtotal, and the subtotal,
    /// shipping and tax must add up to the total.
    pub fn validate(&self) -> Result<(), String> {
        if self.order_id.trim().is_empty() {
            return Err("The order id cannot be empty".into());
        }
        if self.payment_reference.trim().is_empty() {
            return Err(format!("Order {} has no payment reference", self.order_id));
        }
        if !is_currency_code(&self.currency) {
            return Err(format!("'{}' is not a valid ISO-4217 currency code", self.currency));
        }
        if self.items.is_empty() {
            return Err(format!("Order {} has no line items", self.order_id));
        }
        if let Some(item) = self.items.iter().find(|i| i.seller_id.trim().is_empty() || i.store_id.trim().is_empty()) {
            return Err(format!("Order {} has a line item of {} without a seller or store", self.order_id, item.amount));
        }
        let amounts = [self.subtotal, self.shipping, self.tax, self.total];
        if amounts.iter().chain(self.items.iter().map(|i| &i.amount)).any(|a| a.is_negative()) {
            return Err(format!("Order {} contains a negative amount", self.order_id));
        }
        let item_total = self
            .items
            .iter()
            .try_fold(Money::from(0), |acc, i| acc.checked_add(i.amount))
            .ok_or_else(|| format!("Order {} line items overflow", self.order_id))?;
        if item_total != self.subtotal {
            return Err(format!(
                "Order {} line items add up to {item_total}, but the subtotal is {}",
                self.order_id, self.subtotal
            ));
        }
        let grand_total = self
            .subtotal
            .checked_add(self.shipping)
            .and_then(|t| t.checked_add(self.tax))
            .ok_or_else(|| format!("Order {} totals overflow", self.order_id))?;
        if grand_total != self.total {
            return Err(format!(
                "Order {} subtotal, shipping and tax add up to {grand_total}, but the total is {}",
                self.order_id, self.total
            ));
        }
        Ok(())
    }

    /// Sums the line items per (seller, store) pair. Pairs are returned in a stable order.
    pub fn seller_totals(&self) -> Vec<(String, String, Money)> {
        let mut groups = BTreeMap::<(String, String), Money>::new();
        for item in &self.items {
            *groups.entry((item.seller_id.clone(), item.store_id.clone())).or_default() += item.amount;
        }
        groups.into_iter().map(|((seller, store), amount)| (seller, store, amount)).collect()
    }
}

//--------------------------------------  DeliveryConfirmation ---------------------------------------------------------
/// Delivery of an order, or of one store's part of an order, has been confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryConfirmation {
    pub order_id: String,
    /// Only confirm the escrow of this store. All of the order's escrows are confirmed when absent.
    #[serde(default)]
    pub store_id: Option<String>,
    pub confirmed_by: String,
    #[serde(default)]
    pub confirmed_at: Option<DateTime<Utc>>,
}

//--------------------------------------    Admin requests     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub id: EscrowId,
    pub actor_id: String,
    /// Release even though delivery has not been confirmed. Requires an elevated permission.
    #[serde(default)]
    pub allow_undelivered: bool,
}

impl ReleaseRequest {
    pub fn new<S: Into<String>>(id: EscrowId, actor_id: S) -> Self {
        Self { id, actor_id: actor_id.into(), allow_undelivered: false }
    }

    pub fn undelivered<S: Into<String>>(id: EscrowId, actor_id: S) -> Self {
        Self { id, actor_id: actor_id.into(), allow_undelivered: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: EscrowId,
    pub actor_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRequest {
    pub id: EscrowId,
    pub raised_by: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// Pay the seller.
    Release,
    /// Return the funds to the buyer.
    Refund { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResolution {
    pub id: EscrowId,
    pub actor_id: String,
    pub outcome: ResolutionOutcome,
}

//--------------------------------------   EscrowQueryFilter   ---------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowQueryFilter {
    #[serde(default)]
    pub status: Vec<EscrowStatus>,
    pub seller_id: Option<String>,
    pub store_id: Option<String>,
    pub order_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl EscrowQueryFilter {
    pub fn is_empty(&self) -> bool {
        self.status.is_empty() &&
            self.seller_id.is_none() &&
            self.store_id.is_none() &&
            self.order_id.is_none() &&
            self.since.is_none() &&
            self.until.is_none()
    }

    pub fn with_status(mut self, status: EscrowStatus) -> Self {
        self.status.push(status);
        self
    }

    pub fn with_seller_id<S: Into<String>>(mut self, seller_id: S) -> Self {
        self.seller_id = Some(seller_id.into());
        self
    }

    pub fn with_store_id<S: Into<String>>(mut self, store_id: S) -> Self {
        self.store_id = Some(store_id.into());
        self
    }

    pub fn with_order_id<S: Into<String>>(mut self, order_id: S) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }
}

//--------------------------------------      Pagination       ---------------------------------------------------------
/// One-based page selection. Out-of-range values are normalised rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    page: u32,
    limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: DEFAULT_PAGE_LIMIT }
    }
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let limit = match limit {
            None | Some(0) => DEFAULT_PAGE_LIMIT,
            Some(l) => l.min(MAX_PAGE_LIMIT),
        };
        Self { page, limit }
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.limit)
    }

    pub fn total_pages(&self, total: i64) -> i64 {
        let limit = i64::from(self.limit);
        (total + limit - 1) / limit
    }
}
