use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{AuditEntry, EscrowId, EscrowTransaction},
    escrow_api::{authorize, errors::EscrowError},
    escrow_objects::{EscrowQueryFilter, Pagination},
    traits::{ActionAuthorizer, EscrowPage, EscrowStatistics, LedgerQueries, Permission, SellerEscrowSummary},
};

/// Read-only views of the escrow ledger.
///
/// Every query requires the `ViewLedger` permission, except that sellers may always read their own summary.
pub struct ReportingApi<B, A> {
    db: B,
    authorizer: A,
}

impl<B: Debug, A> Debug for ReportingApi<B, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReportingApi ({:?})", self.db)
    }
}

impl<B, A> ReportingApi<B, A>
where
    B: LedgerQueries,
    A: ActionAuthorizer,
{
    pub fn new(db: B, authorizer: A) -> Self {
        Self { db, authorizer }
    }

    pub async fn escrow(&self, actor_id: &str, id: EscrowId) -> Result<EscrowTransaction, EscrowError> {
        authorize(&self.authorizer, actor_id, Permission::ViewLedger).await?;
        self.db.fetch_escrow(id).await?.ok_or_else(|| EscrowError::NotFound(format!("Escrow {id}")))
    }

    pub async fn escrows_for_order(&self, actor_id: &str, order_id: &str) -> Result<Vec<EscrowTransaction>, EscrowError> {
        authorize(&self.authorizer, actor_id, Permission::ViewLedger).await?;
        let escrows = self.db.fetch_escrows_for_order(order_id).await?;
        if escrows.is_empty() {
            return Err(EscrowError::NotFound(format!("Escrow for order {order_id}")));
        }
        Ok(escrows)
    }

    pub async fn search(
        &self,
        actor_id: &str,
        filter: EscrowQueryFilter,
        pagination: Pagination,
    ) -> Result<EscrowPage, EscrowError> {
        authorize(&self.authorizer, actor_id, Permission::ViewLedger).await?;
        if let (Some(since), Some(until)) = (filter.since, filter.until) {
            if since > until {
                return Err(EscrowError::ValidationError(format!("The search window {since} - {until} is empty")));
            }
        }
        let page = self.db.search_escrows(filter, pagination).await?;
        trace!("📊️ Search returned {} of {} escrows", page.items.len(), page.total);
        Ok(page)
    }

    pub async fn statistics(&self, actor_id: &str) -> Result<EscrowStatistics, EscrowError> {
        authorize(&self.authorizer, actor_id, Permission::ViewLedger).await?;
        let stats = self.db.fetch_statistics(None).await?;
        Ok(stats)
    }

    pub async fn seller_summary(&self, actor_id: &str, seller_id: &str) -> Result<SellerEscrowSummary, EscrowError> {
        if actor_id.trim().is_empty() || actor_id != seller_id {
            authorize(&self.authorizer, actor_id, Permission::ViewLedger).await?;
        }
        let stats = self.db.fetch_statistics(Some(seller_id.to_string())).await?;
        Ok(SellerEscrowSummary::new(seller_id.to_string(), stats))
    }

    pub async fn audit_log(&self, actor_id: &str, id: EscrowId) -> Result<Vec<AuditEntry>, EscrowError> {
        authorize(&self.authorizer, actor_id, Permission::ViewLedger).await?;
        let entries = self.db.fetch_audit_log(id).await?;
        // Every escrow has at least its creation entry
        if entries.is_empty() {
            return Err(EscrowError::NotFound(format!("Escrow {id}")));
        }
        Ok(entries)
    }
}
