//! Escrow Engine
//!
//! The escrow engine holds buyer payments for multi-vendor marketplace orders until delivery is confirmed, then pays
//! each seller their share minus the platform's commission, or refunds the buyer.
//!
//! The library is divided into these main sections:
//! 1. The data model ([`db_types`]) and the fee calculator ([`fees`]).
//! 2. The ledger store. The [`EscrowLedger`] and [`LedgerQueries`] traits define what a backend must provide, and
//!    [`SqliteDatabase`] is the SQLite implementation. You should never need to access the database directly.
//! 3. The public API. [`EscrowFlowApi`] drives the escrow lifecycle and the automatic release sweep, and
//!    [`ReportingApi`] answers questions about the ledger.
//!
//! The engine also emits events when escrows are released, refunded or disputed. See [`events`] for how to hook into
//! them.
pub mod db_types;
pub mod events;
pub mod fees;
pub mod locks;

mod escrow_api;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use escrow_api::{
    errors::EscrowError,
    escrow_flow_api::{
        EscrowFlowApi,
        AUTO_RELEASE_ACTOR,
        DEFAULT_AUTO_RELEASE_BATCH_SIZE,
        DEFAULT_CALL_TIMEOUT,
        MAX_AUTO_RELEASE_BATCH_SIZE,
    },
    escrow_objects,
    policy::{EscrowPolicy, DEFAULT_COMMISSION_BPS, DEFAULT_HOLD_PERIOD_DAYS},
    reporting_api::ReportingApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::{db::BUSY_TIMEOUT as SQLITE_BUSY_TIMEOUT, SqliteDatabase};
pub use traits::{
    ActionAuthorizer,
    AutoReleaseFailure,
    AutoReleaseReport,
    CollaboratorError,
    EscrowLedger,
    EscrowPage,
    EscrowStatistics,
    LedgerError,
    LedgerQueries,
    PaymentGateway,
    Permission,
    SellerBalanceLedger,
    SellerEscrowSummary,
    SettleOutcome,
    StatusBucket,
    TransitionOutcome,
};
