use thiserror::Error;

use crate::{
    db_types::{EscrowId, EscrowStatus, EscrowTransaction},
    fees::FeeError,
    traits::{LedgerError, Permission},
};

#[derive(Debug, Clone, Error)]
pub enum EscrowError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Cannot {action} escrow {id} while it is {status}")]
    InvalidStateError { id: EscrowId, status: EscrowStatus, action: &'static str },
    #[error("External dependency error: {0}")]
    ExternalDependencyError(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{actor} is not authorized to {permission}")]
    Unauthorized { actor: String, permission: Permission },
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl EscrowError {
    pub fn invalid_state(escrow: &EscrowTransaction, action: &'static str) -> Self {
        Self::InvalidStateError { id: escrow.id, status: escrow.status, action }
    }
}

impl From<LedgerError> for EscrowError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::EscrowNotFound(id) => EscrowError::NotFound(format!("Escrow {id}")),
            LedgerError::MixedOrderBatch | LedgerError::QueryError(_) => EscrowError::ValidationError(e.to_string()),
            LedgerError::DatabaseError(s) => EscrowError::DatabaseError(s),
        }
    }
}

impl From<FeeError> for EscrowError {
    fn from(e: FeeError) -> Self {
        EscrowError::ValidationError(e.to_string())
    }
}
