//! `SqliteDatabase` is a concrete implementation of an escrow ledger backend.
//!
//! It uses SQLite as the backend and implements both [`EscrowLedger`] and [`LedgerQueries`].
use std::{fmt::Debug, future::Future};

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{
    audit::{self, AuditRecord},
    db_url,
    escrows,
    new_pool,
    statistics,
};
use crate::{
    db_types::{
        AuditAction,
        AuditEntry,
        DeliveryUpdate,
        EscrowId,
        EscrowStatus,
        EscrowTransaction,
        NewEscrow,
        ReleaseKind,
    },
    escrow_objects::{EscrowQueryFilter, Pagination},
    traits::{
        CollaboratorError,
        EscrowLedger,
        EscrowPage,
        EscrowStatistics,
        LedgerError,
        LedgerQueries,
        SettleOutcome,
    },
};

/// The actor recorded for rows created from order webhooks.
const SYSTEM_ACTOR: &str = "system";

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

impl EscrowLedger for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_escrows(&self, new_escrows: Vec<NewEscrow>) -> Result<(Vec<EscrowTransaction>, bool), LedgerError> {
        let Some(first) = new_escrows.first() else {
            return Ok((Vec::new(), false));
        };
        let order_id = first.order_id.clone();
        let mixed = new_escrows.iter().any(|e| {
            e.order_id != first.order_id ||
                e.payment_reference != first.payment_reference ||
                e.currency != first.currency
        });
        if mixed {
            return Err(LedgerError::MixedOrderBatch);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = Vec::with_capacity(new_escrows.len());
        for new_escrow in &new_escrows {
            let escrow = match escrows::insert_escrow(new_escrow, &mut tx).await {
                Ok(escrow) => escrow,
                Err(e) if is_unique_violation(&e) => {
                    // The order was processed before (or is being processed right now). Keep what is there.
                    tx.rollback().await?;
                    let mut conn = self.pool.acquire().await?;
                    let existing = escrows::fetch_escrows_for_order(&order_id, &mut conn).await?;
                    debug!("🗃️ Order {order_id} already has {} escrow(s)", existing.len());
                    return Ok((existing, false));
                },
                Err(e) => return Err(e.into()),
            };
            let note = format!(
                "{} held for {}; fee {} at {} bps",
                escrow.total_amount, escrow.seller_id, escrow.platform_fee, escrow.commission_rate_bps
            );
            let record = AuditRecord {
                escrow_id: escrow.id,
                action: AuditAction::Created,
                actor: SYSTEM_ACTOR,
                from_status: None,
                to_status: EscrowStatus::Held,
                note: Some(note.as_str()),
                at: escrow.created_at,
            };
            audit::append(record, &mut tx).await?;
            inserted.push(escrow);
        }
        tx.commit().await?;
        debug!("🗃️ {} escrow(s) for order {order_id} saved", inserted.len());
        Ok((inserted, true))
    }

    async fn confirm_delivery(&self, updates: Vec<DeliveryUpdate>) -> Result<Option<Vec<EscrowTransaction>>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let mut confirmed = Vec::with_capacity(updates.len());
        for update in &updates {
            let Some(escrow) = escrows::mark_delivery_confirmed(update, &mut tx).await? else {
                debug!("🗃️ Escrow {} is no longer HELD. Rolling back the delivery confirmation", update.id);
                tx.rollback().await?;
                return Ok(None);
            };
            let record = AuditRecord {
                escrow_id: escrow.id,
                action: AuditAction::DeliveryConfirmed,
                actor: &update.confirmed_by,
                from_status: Some(EscrowStatus::Held),
                to_status: EscrowStatus::PendingRelease,
                note: None,
                at: update.confirmed_at,
            };
            audit::append(record, &mut tx).await?;
            confirmed.push(escrow);
        }
        tx.commit().await?;
        Ok(Some(confirmed))
    }

    async fn settle_release<F>(
        &self,
        id: EscrowId,
        expected: EscrowStatus,
        released_by: &str,
        kind: ReleaseKind,
        released_at: DateTime<Utc>,
        credit: F,
    ) -> Result<SettleOutcome, LedgerError>
    where
        F: Future<Output = Result<(), CollaboratorError>>,
    {
        if !self.status_matches(id, expected).await? {
            return Ok(SettleOutcome::StatusChanged);
        }
        trace!("🗃️ Escrow {id} is {expected}. Waiting for the seller credit before marking it as released");
        if let Err(e) = credit.await {
            return Ok(SettleOutcome::EffectFailed(e));
        }
        let mut tx = self.pool.begin().await?;
        let Some(released) = escrows::mark_released(id, expected, released_by, released_at, &mut tx).await? else {
            tx.rollback().await?;
            warn!("🗃️ Escrow {id} left {expected} while its seller credit was in flight. Not marking it as released");
            return Ok(SettleOutcome::StatusChanged);
        };
        let record = AuditRecord {
            escrow_id: id,
            action: kind.audit_action(),
            actor: released_by,
            from_status: Some(expected),
            to_status: EscrowStatus::Released,
            note: None,
            at: released_at,
        };
        audit::append(record, &mut tx).await?;
        tx.commit().await?;
        Ok(SettleOutcome::Committed(released))
    }

    async fn settle_refund<F>(
        &self,
        id: EscrowId,
        expected: EscrowStatus,
        refunded_by: &str,
        reason: &str,
        refunded_at: DateTime<Utc>,
        refund: F,
    ) -> Result<SettleOutcome, LedgerError>
    where
        F: Future<Output = Result<(), CollaboratorError>>,
    {
        if !self.status_matches(id, expected).await? {
            return Ok(SettleOutcome::StatusChanged);
        }
        trace!("🗃️ Escrow {id} is {expected}. Waiting for the gateway refund before marking it as refunded");
        if let Err(e) = refund.await {
            return Ok(SettleOutcome::EffectFailed(e));
        }
        let mut tx = self.pool.begin().await?;
        let Some(refunded) = escrows::mark_refunded(id, expected, refunded_by, reason, refunded_at, &mut tx).await?
        else {
            tx.rollback().await?;
            warn!("🗃️ Escrow {id} left {expected} while its gateway refund was in flight. Not marking it as refunded");
            return Ok(SettleOutcome::StatusChanged);
        };
        let record = AuditRecord {
            escrow_id: id,
            action: AuditAction::Refund,
            actor: refunded_by,
            from_status: Some(expected),
            to_status: EscrowStatus::Refunded,
            note: Some(reason),
            at: refunded_at,
        };
        audit::append(record, &mut tx).await?;
        tx.commit().await?;
        Ok(SettleOutcome::Committed(refunded))
    }

    async fn mark_disputed(
        &self,
        id: EscrowId,
        expected: EscrowStatus,
        raised_by: &str,
        reason: &str,
        disputed_at: DateTime<Utc>,
    ) -> Result<Option<EscrowTransaction>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let Some(disputed) = escrows::mark_disputed(id, expected, reason, disputed_at, &mut tx).await? else {
            return Ok(None);
        };
        let record = AuditRecord {
            escrow_id: id,
            action: AuditAction::Dispute,
            actor: raised_by,
            from_status: Some(expected),
            to_status: EscrowStatus::Disputed,
            note: Some(reason),
            at: disputed_at,
        };
        audit::append(record, &mut tx).await?;
        tx.commit().await?;
        Ok(Some(disputed))
    }

    async fn record_auto_release_failure(
        &self,
        id: EscrowId,
        error: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let recorded = escrows::record_auto_release_failure(id, error, failed_at, &mut conn).await?;
        Ok(recorded)
    }

    async fn close(&mut self) -> Result<(), LedgerError> {
        self.pool.close().await;
        Ok(())
    }
}

impl LedgerQueries for SqliteDatabase {
    async fn fetch_escrow(&self, id: EscrowId) -> Result<Option<EscrowTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let escrow = escrows::fetch_escrow(id, &mut conn).await?;
        Ok(escrow)
    }

    async fn fetch_escrows_for_order(&self, order_id: &str) -> Result<Vec<EscrowTransaction>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let escrows = escrows::fetch_escrows_for_order(order_id, &mut conn).await?;
        Ok(escrows)
    }

    async fn fetch_due_for_release(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<EscrowTransaction>, LedgerError> {
        if limit <= 0 {
            return Err(LedgerError::QueryError(format!("Batch size must be positive, not {limit}")));
        }
        let mut conn = self.pool.acquire().await?;
        let escrows = escrows::fetch_due_for_release(now, limit, &mut conn).await?;
        trace!("🗃️ {} escrow(s) due for release at {now}", escrows.len());
        Ok(escrows)
    }

    async fn search_escrows(
        &self,
        filter: EscrowQueryFilter,
        pagination: Pagination,
    ) -> Result<EscrowPage, LedgerError> {
        // A read transaction, so that the count and the page come from the same snapshot
        let mut tx = self.pool.begin().await?;
        let (items, total) = escrows::search_escrows(&filter, pagination, &mut tx).await?;
        tx.commit().await?;
        Ok(EscrowPage {
            items,
            page: pagination.page(),
            limit: pagination.limit(),
            total,
            total_pages: pagination.total_pages(total),
        })
    }

    async fn fetch_statistics(&self, seller_id: Option<String>) -> Result<EscrowStatistics, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let stats = statistics::fetch_statistics(seller_id, &mut conn).await?;
        Ok(stats)
    }

    async fn fetch_audit_log(&self, id: EscrowId) -> Result<Vec<AuditEntry>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let entries = audit::fetch_for_escrow(id, &mut conn).await?;
        Ok(entries)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("🗃️ Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Applies any outstanding schema migrations.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./src/sqlite/migrations").run(&self.pool).await?;
        info!("🗃️ Database migrations complete");
        Ok(())
    }

    /// Reads the escrow's status outside of any transaction. A missing escrow is an error.
    async fn status_matches(&self, id: EscrowId, expected: EscrowStatus) -> Result<bool, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        let escrow = escrows::fetch_escrow(id, &mut conn).await?.ok_or(LedgerError::EscrowNotFound(id))?;
        Ok(escrow.status == expected)
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
