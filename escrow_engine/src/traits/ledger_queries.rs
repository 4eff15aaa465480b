use chrono::{DateTime, Utc};

use crate::{
    db_types::{AuditEntry, EscrowId, EscrowTransaction},
    escrow_objects::{EscrowQueryFilter, Pagination},
    traits::{EscrowPage, EscrowStatistics, LedgerError},
};

/// Read-only access to the escrow ledger.
#[allow(async_fn_in_trait)]
pub trait LedgerQueries {
    async fn fetch_escrow(&self, id: EscrowId) -> Result<Option<EscrowTransaction>, LedgerError>;

    /// All escrow rows created for the order, ordered by id.
    async fn fetch_escrows_for_order(&self, order_id: &str) -> Result<Vec<EscrowTransaction>, LedgerError>;

    /// Up to `limit` rows in `PENDING_RELEASE` whose auto-release time is at or before `now`, oldest first.
    async fn fetch_due_for_release(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EscrowTransaction>, LedgerError>;

    /// Fetches one page of the escrow rows matching `filter`, newest first. The page and the total count are read
    /// from the same snapshot.
    async fn search_escrows(&self, filter: EscrowQueryFilter, pagination: Pagination)
        -> Result<EscrowPage, LedgerError>;

    /// Per-status counts and sums, optionally restricted to one seller. All buckets come from a single consistent
    /// snapshot of the ledger.
    async fn fetch_statistics(&self, seller_id: Option<String>) -> Result<EscrowStatistics, LedgerError>;

    /// The audit trail of an escrow, oldest entry first.
    async fn fetch_audit_log(&self, id: EscrowId) -> Result<Vec<AuditEntry>, LedgerError>;
}
