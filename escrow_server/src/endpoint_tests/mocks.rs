use chrono::{DateTime, Utc};
use escrow_engine::{
    db_types::{AuditEntry, EscrowId, EscrowTransaction},
    escrow_objects::{EscrowQueryFilter, Pagination},
    EscrowPage,
    EscrowStatistics,
    LedgerError,
    LedgerQueries,
};
use mockall::mock;

mock! {
    pub LedgerQueries {}
    impl LedgerQueries for LedgerQueries {
        async fn fetch_escrow(&self, id: EscrowId) -> Result<Option<EscrowTransaction>, LedgerError>;
        async fn fetch_escrows_for_order(&self, order_id: &str) -> Result<Vec<EscrowTransaction>, LedgerError>;
        async fn fetch_due_for_release(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EscrowTransaction>, LedgerError>;
        async fn search_escrows(&self, filter: EscrowQueryFilter, pagination: Pagination) -> Result<EscrowPage, LedgerError>;
        async fn fetch_statistics(&self, seller_id: Option<String>) -> Result<EscrowStatistics, LedgerError>;
        async fn fetch_audit_log(&self, id: EscrowId) -> Result<Vec<AuditEntry>, LedgerError>;
    }
}
