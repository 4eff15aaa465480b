//! Data types that are persisted in, or read back from, the escrow ledger.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
pub use escrow_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

use crate::fees::{CommissionRate, FeeSplit};

#[derive(Debug, Clone, Error)]
#[error("Conversion error: {0}")]
pub struct ConversionError(String);

//--------------------------------------       EscrowId        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct EscrowId(pub i64);

impl EscrowId {
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<i64> for EscrowId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Display for EscrowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

//--------------------------------------     EscrowStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Funds are held. Delivery has not been confirmed yet.
    Held,
    /// Delivery is confirmed and the hold period is running.
    PendingRelease,
    /// The seller's share has been credited. Terminal.
    Released,
    /// The buyer has been refunded. Terminal.
    Refunded,
    /// Automatic release is suspended until an administrator resolves the dispute.
    Disputed,
}

impl EscrowStatus {
    pub const ALL: [EscrowStatus; 5] = [
        EscrowStatus::Held,
        EscrowStatus::PendingRelease,
        EscrowStatus::Released,
        EscrowStatus::Refunded,
        EscrowStatus::Disputed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Released | EscrowStatus::Refunded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Held => "HELD",
            EscrowStatus::PendingRelease => "PENDING_RELEASE",
            EscrowStatus::Released => "RELEASED",
            EscrowStatus::Refunded => "REFUNDED",
            EscrowStatus::Disputed => "DISPUTED",
        }
    }
}

impl Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EscrowStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HELD" => Ok(Self::Held),
            "PENDING_RELEASE" => Ok(Self::PendingRelease),
            "RELEASED" => Ok(Self::Released),
            "REFUNDED" => Ok(Self::Refunded),
            "DISPUTED" => Ok(Self::Disputed),
            s => Err(ConversionError(format!("Invalid escrow status: {s}"))),
        }
    }
}

//--------------------------------------     ReleaseKind       ---------------------------------------------------------
/// How a release came about. Each kind is recorded distinctly in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseKind {
    /// An administrator released a delivered escrow before the hold period ended.
    Manual,
    /// An administrator released an escrow whose delivery was never confirmed.
    Override,
    /// The scheduler released an escrow whose hold period had elapsed.
    Automatic,
    /// An administrator resolved a dispute in the seller's favour.
    DisputeResolution,
}

impl ReleaseKind {
    pub fn audit_action(&self) -> AuditAction {
        match self {
            ReleaseKind::Manual => AuditAction::Release,
            ReleaseKind::Override => AuditAction::OverrideRelease,
            ReleaseKind::Automatic => AuditAction::AutoRelease,
            ReleaseKind::DisputeResolution => AuditAction::DisputeRelease,
        }
    }
}

impl Display for ReleaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseKind::Manual => write!(f, "manual release"),
            ReleaseKind::Override => write!(f, "undelivered release"),
            ReleaseKind::Automatic => write!(f, "automatic release"),
            ReleaseKind::DisputeResolution => write!(f, "dispute release"),
        }
    }
}

//--------------------------------------  EscrowTransaction    ---------------------------------------------------------
/// One escrow row: the funds of one order held for one (seller, store) pair.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: EscrowId,
    pub order_id: String,
    /// The buyer payment this escrow was funded from. Refunds are issued against it.
    pub payment_reference: String,
    pub seller_id: String,
    pub store_id: String,
    pub currency: String,
    pub total_amount: Money,
    pub platform_fee: Money,
    pub seller_amount: Money,
    /// Commission in basis points that was in force when the escrow was created.
    pub commission_rate_bps: i64,
    pub status: EscrowStatus,
    pub delivery_confirmed: bool,
    pub delivery_confirmed_at: Option<DateTime<Utc>>,
    pub delivery_confirmed_by: Option<String>,
    /// Hold period in days that was in force when the escrow was created.
    pub hold_period_days: i64,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub released_by: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refunded_by: Option<String>,
    pub refund_reason: Option<String>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub dispute_reason: Option<String>,
    /// Failed automatic releases since delivery was confirmed. Sweeps try escrows with fewer failures first.
    #[serde(default)]
    pub auto_release_attempts: i64,
    #[serde(default)]
    pub last_auto_release_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowTransaction {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The idempotency key used when crediting the seller for this escrow.
    pub fn credit_reference(&self) -> String {
        format!("escrow-{}", self.id.value())
    }

    /// Checks the per-row ledger invariants, returning a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.total_amount.is_negative() || self.platform_fee.is_negative() || self.seller_amount.is_negative() {
            return Err(format!("escrow {} has a negative amount", self.id));
        }
        if self.platform_fee + self.seller_amount != self.total_amount {
            return Err(format!("escrow {} fee and seller amount do not add up to the total", self.id));
        }
        if self.released_at.is_some() && self.refunded_at.is_some() {
            return Err(format!("escrow {} is both released and refunded", self.id));
        }
        if self.auto_release_at.is_some() && !self.delivery_confirmed {
            return Err(format!("escrow {} has an auto-release time without a delivery confirmation", self.id));
        }
        match self.status {
            EscrowStatus::Released if self.released_at.is_none() => {
                Err(format!("escrow {} is released without a release time", self.id))
            },
            EscrowStatus::Refunded if self.refunded_at.is_none() => {
                Err(format!("escrow {} is refunded without a refund time", self.id))
            },
            EscrowStatus::Refunded if self.refund_reason.as_deref().map(str::trim).unwrap_or_default().is_empty() => {
                Err(format!("escrow {} is refunded without a reason", self.id))
            },
            EscrowStatus::PendingRelease if !self.delivery_confirmed || self.auto_release_at.is_none() => {
                Err(format!("escrow {} is pending release without a confirmed delivery", self.id))
            },
            _ => Ok(()),
        }
    }
}

//--------------------------------------      NewEscrow        ---------------------------------------------------------
/// A fully computed escrow row, ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewEscrow {
    pub order_id: String,
    pub payment_reference: String,
    pub seller_id: String,
    pub store_id: String,
    pub currency: String,
    pub split: FeeSplit,
    pub commission: CommissionRate,
    pub hold_period_days: u32,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------    DeliveryUpdate     ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct DeliveryUpdate {
    pub id: EscrowId,
    pub confirmed_by: String,
    pub confirmed_at: DateTime<Utc>,
    pub auto_release_at: DateTime<Utc>,
}

//--------------------------------------     AuditAction       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Created,
    DeliveryConfirmed,
    Release,
    OverrideRelease,
    AutoRelease,
    DisputeRelease,
    Refund,
    Dispute,
}

//--------------------------------------      AuditEntry       ---------------------------------------------------------
/// An append-only record of a single state change.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub escrow_id: EscrowId,
    pub action: AuditAction,
    pub actor: String,
    pub from_status: Option<EscrowStatus>,
    pub to_status: EscrowStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}
