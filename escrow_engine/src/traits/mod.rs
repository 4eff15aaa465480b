//! # Ledger backends and external collaborators
//!
//! This module defines the contracts that the escrow engine relies on, without tying it to a particular database or
//! payment provider.
//!
//! * [`EscrowLedger`] is the write side of the ledger store. Every state change it performs is a compare-and-set on
//!   the escrow's current status, executed atomically together with its audit log entry.
//! * [`LedgerQueries`] provides read-only access to escrow rows, search, statistics and the audit log.
//! * [`PaymentGateway`], [`SellerBalanceLedger`] and [`ActionAuthorizer`] are the external systems the engine calls
//!   into to refund buyers, credit sellers and authorize administrative actions.
mod collaborators;
mod data_objects;
mod escrow_ledger;
mod ledger_queries;

pub use collaborators::{ActionAuthorizer, CollaboratorError, PaymentGateway, Permission, SellerBalanceLedger};
pub use data_objects::{
    AutoReleaseFailure,
    AutoReleaseReport,
    EscrowPage,
    EscrowStatistics,
    SellerEscrowSummary,
    StatusBucket,
    TransitionOutcome,
};
pub use escrow_ledger::{EscrowLedger, LedgerError, SettleOutcome};
pub use ledger_queries::LedgerQueries;
