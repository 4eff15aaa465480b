use serde::{Deserialize, Serialize};

use crate::db_types::{EscrowTransaction, ReleaseKind};

/// The seller's share of an escrow has been credited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowReleasedEvent {
    pub escrow: EscrowTransaction,
    pub kind: ReleaseKind,
}

impl EscrowReleasedEvent {
    pub const TOPIC: &'static str = "escrow.released";

    pub fn new(escrow: EscrowTransaction, kind: ReleaseKind) -> Self {
        Self { escrow, kind }
    }
}

/// The buyer has been refunded the escrowed amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowRefundedEvent {
    pub escrow: EscrowTransaction,
}

impl EscrowRefundedEvent {
    pub const TOPIC: &'static str = "escrow.refunded";

    pub fn new(escrow: EscrowTransaction) -> Self {
        Self { escrow }
    }
}

/// A dispute was raised and automatic release is suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowDisputedEvent {
    pub escrow: EscrowTransaction,
}

impl EscrowDisputedEvent {
    pub const TOPIC: &'static str = "escrow.disputed";

    pub fn new(escrow: EscrowTransaction) -> Self {
        Self { escrow }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    EscrowReleased(EscrowReleasedEvent),
    EscrowRefunded(EscrowRefundedEvent),
    EscrowDisputed(EscrowDisputedEvent),
}

impl EventType {
    pub fn topic(&self) -> &'static str {
        match self {
            EventType::EscrowReleased(_) => EscrowReleasedEvent::TOPIC,
            EventType::EscrowRefunded(_) => EscrowRefundedEvent::TOPIC,
            EventType::EscrowDisputed(_) => EscrowDisputedEvent::TOPIC,
        }
    }

    pub fn escrow(&self) -> &EscrowTransaction {
        match self {
            EventType::EscrowReleased(e) => &e.escrow,
            EventType::EscrowRefunded(e) => &e.escrow,
            EventType::EscrowDisputed(e) => &e.escrow,
        }
    }
}
