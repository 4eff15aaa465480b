use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    db_types::{DeliveryUpdate, EscrowId, EscrowStatus, EscrowTransaction, NewEscrow, ReleaseKind},
    traits::{CollaboratorError, LedgerQueries},
};

/// The write side of the escrow ledger.
///
/// Every transition is a compare-and-set: the row is only updated if its status still equals `expected`. The update
/// and its audit log entry are committed in a single database transaction, so readers never observe one without the
/// other. Rows in a terminal state are never modified, and rows are never deleted.
#[allow(async_fn_in_trait)]
pub trait EscrowLedger: Clone + LedgerQueries {
    /// The URL of the database
    fn url(&self) -> &str;

    /// Stores all the escrow rows of one order in a single atomic transaction.
    ///
    /// This call is idempotent on the order id. If the order already has escrow rows, nothing is inserted and the
    /// existing rows are returned with `false` as the second value.
    async fn insert_escrows(&self, escrows: Vec<NewEscrow>) -> Result<(Vec<EscrowTransaction>, bool), LedgerError>;

    /// Marks delivery as confirmed on every row in `updates`, moving each from `HELD` to `PENDING_RELEASE`.
    ///
    /// All rows are updated or none are. If any row is no longer `HELD`, the whole batch is rolled back and `None` is
    /// returned.
    async fn confirm_delivery(&self, updates: Vec<DeliveryUpdate>) -> Result<Option<Vec<EscrowTransaction>>, LedgerError>;

    /// Moves the escrow from `expected` to `RELEASED`, but only once `credit` has resolved successfully.
    ///
    /// The status is checked first and `credit` is only polled if it still equals `expected`. No database transaction
    /// is open while `credit` runs, so a slow collaborator never blocks other writers. The compare-and-set and its
    /// audit entry are then committed together. If `credit` fails, the row is left exactly as it was.
    ///
    /// Callers must serialize settlements of the same escrow (see [`crate::locks::TransitionLocks`]). A status change
    /// from elsewhere while `credit` is in flight is reported as [`SettleOutcome::StatusChanged`]; seller credits are
    /// idempotent on [`EscrowTransaction::credit_reference`], so retrying is safe.
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
        F: Future<Output = Result<(), CollaboratorError>>;

    /// Moves the escrow from `expected` to `REFUNDED`, but only once `refund` has resolved successfully. See
    /// [`EscrowLedger::settle_release`].
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
        F: Future<Output = Result<(), CollaboratorError>>;

    /// Moves the escrow from `expected` to `DISPUTED`. Returns `None` if the status no longer matches.
    async fn mark_disputed(
        &self,
        id: EscrowId,
        expected: EscrowStatus,
        raised_by: &str,
        reason: &str,
        disputed_at: DateTime<Utc>,
    ) -> Result<Option<EscrowTransaction>, LedgerError>;

    /// Counts a failed automatic release against a `PENDING_RELEASE` escrow and records the error. Returns `false` if
    /// the escrow is no longer pending release.
    async fn record_auto_release_failure(
        &self,
        id: EscrowId,
        error: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError>;

    /// Closes the database connection(s).
    async fn close(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// The result of a transition that carries an external side effect.
#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// The side effect succeeded and the new status was committed.
    Committed(EscrowTransaction),
    /// The row's status no longer matched the expected status. The side effect was not attempted, unless the status
    /// changed while it was in flight.
    StatusChanged,
    /// The side effect failed. Nothing was committed.
    EffectFailed(CollaboratorError),
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("We have an internal database engine (configuration/uptime etc.) : {0}")]
    DatabaseError(String),
    #[error("The requested escrow {0} does not exist")]
    EscrowNotFound(EscrowId),
    #[error("Escrow rows for one order must share the order id, payment reference and currency")]
    MixedOrderBatch,
    #[error("User error constructing query: {0}")]
    QueryError(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}
