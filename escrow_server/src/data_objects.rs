use std::str::FromStr;

use chrono::{DateTime, Utc};
use escrow_engine::{
    db_types::EscrowStatus,
    escrow_objects::{EscrowQueryFilter, Pagination},
    TransitionOutcome,
};
use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

/// Body of `POST /api/escrows/{id}/refund`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundParams {
    pub reason: String,
}

/// Query of `POST /api/escrows/auto_release`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoReleaseParams {
    pub batch_size: Option<i64>,
}

/// Query of `GET /api/escrows`. `status` is a comma-separated list, e.g. `HELD,DISPUTED`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchParams {
    pub status: Option<String>,
    pub seller_id: Option<String>,
    pub store_id: Option<String>,
    pub order_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl SearchParams {
    pub fn into_query(self) -> Result<(EscrowQueryFilter, Pagination), ServerError> {
        let status = match self.status.as_deref() {
            None => Vec::new(),
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    EscrowStatus::from_str(s)
                        .map_err(|e| ServerError::InvalidRequestQuery(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        let filter = EscrowQueryFilter {
            status,
            seller_id: self.seller_id,
            store_id: self.store_id,
            order_id: self.order_id,
            since: self.since,
            until: self.until,
        };
        Ok((filter, Pagination::new(self.page, self.limit)))
    }
}

/// Response to a transition request. `applied` is false when a concurrent request had already made the same change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResponse {
    pub applied: bool,
    pub escrow: escrow_engine::db_types::EscrowTransaction,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        let applied = outcome.was_applied();
        Self { applied, escrow: outcome.into_escrow() }
    }
}
