use escrow_common::Money;
use serde::{Deserialize, Serialize};

use crate::db_types::{EscrowId, EscrowStatus, EscrowTransaction};

//--------------------------------------  TransitionOutcome    ---------------------------------------------------------
/// The result of a successful transition request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "escrow", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// This request performed the transition.
    Applied(EscrowTransaction),
    /// An identical transition was committed by a concurrent request, and this one had no further effect.
    AlreadyApplied(EscrowTransaction),
}

impl TransitionOutcome {
    pub fn escrow(&self) -> &EscrowTransaction {
        match self {
            TransitionOutcome::Applied(e) | TransitionOutcome::AlreadyApplied(e) => e,
        }
    }

    pub fn into_escrow(self) -> EscrowTransaction {
        match self {
            TransitionOutcome::Applied(e) | TransitionOutcome::AlreadyApplied(e) => e,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

//--------------------------------------      EscrowPage       ---------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowPage {
    pub items: Vec<EscrowTransaction>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

//--------------------------------------    EscrowStatistics   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBucket {
    pub count: i64,
    pub total_amount: Money,
    pub seller_amount: Money,
    pub platform_fee: Money,
}

/// Per-status totals taken from one snapshot of the ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowStatistics {
    pub held: StatusBucket,
    pub pending_release: StatusBucket,
    pub released: StatusBucket,
    pub refunded: StatusBucket,
    pub disputed: StatusBucket,
}

impl EscrowStatistics {
    pub fn bucket(&self, status: EscrowStatus) -> &StatusBucket {
        match status {
            EscrowStatus::Held => &self.held,
            EscrowStatus::PendingRelease => &self.pending_release,
            EscrowStatus::Released => &self.released,
            EscrowStatus::Refunded => &self.refunded,
            EscrowStatus::Disputed => &self.disputed,
        }
    }

    pub fn bucket_mut(&mut self, status: EscrowStatus) -> &mut StatusBucket {
        match status {
            EscrowStatus::Held => &mut self.held,
            EscrowStatus::PendingRelease => &mut self.pending_release,
            EscrowStatus::Released => &mut self.released,
            EscrowStatus::Refunded => &mut self.refunded,
            EscrowStatus::Disputed => &mut self.disputed,
        }
    }

    pub fn total_count(&self) -> i64 {
        EscrowStatus::ALL.iter().map(|s| self.bucket(*s).count).sum()
    }

    /// Commission earned by the platform. Only released escrows count.
    pub fn platform_revenue(&self) -> Money {
        self.released.platform_fee
    }

    /// Funds that are still held on behalf of buyers and sellers.
    pub fn total_in_escrow(&self) -> Money {
        self.held.total_amount + self.pending_release.total_amount + self.disputed.total_amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerEscrowSummary {
    pub seller_id: String,
    pub statistics: EscrowStatistics,
    /// The seller's share of all released escrows.
    pub available_for_payout: Money,
}

impl SellerEscrowSummary {
    pub fn new(seller_id: String, statistics: EscrowStatistics) -> Self {
        let available_for_payout = statistics.released.seller_amount;
        Self { seller_id, statistics, available_for_payout }
    }
}

//--------------------------------------   AutoReleaseReport   ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoReleaseFailure {
    pub escrow_id: EscrowId,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoReleaseReport {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub failures: Vec<AutoReleaseFailure>,
}
