//! # Escrow engine public API
//!
//! * [`escrow_flow_api`] is the primary API. It creates escrows for confirmed orders and drives every state
//!   transition: delivery confirmation, release, refund, disputes and the automatic release sweep.
//! * [`reporting_api`] answers read-only questions about the ledger: single escrows, filtered listings, per-status
//!   statistics and seller summaries.
//!
//! An API instance is created by supplying a ledger backend and the external collaborators it needs:
//!
//! ```rust,ignore
//! use escrow_engine::{events::EventProducers, EscrowFlowApi, SqliteDatabase};
//! let db = SqliteDatabase::new_with_url(...).await?;
//! let api = EscrowFlowApi::new(db, gateway, balances, authorizer, EventProducers::default());
//! let escrows = api.create_escrows_for_order(order).await?;
//! ```
use log::warn;

use crate::traits::{ActionAuthorizer, Permission};

pub mod errors;
pub mod escrow_flow_api;
pub mod escrow_objects;
pub mod policy;
pub mod reporting_api;

use errors::EscrowError;

pub(crate) async fn authorize<A: ActionAuthorizer>(
    authorizer: &A,
    actor_id: &str,
    permission: Permission,
) -> Result<(), EscrowError> {
    let denied = || EscrowError::Unauthorized { actor: actor_id.to_string(), permission };
    if actor_id.trim().is_empty() {
        return Err(denied());
    }
    match authorizer.is_authorized(actor_id, permission).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            warn!("🔒️ {actor_id} tried to {permission} without permission");
            Err(denied())
        },
        Err(e) => Err(EscrowError::ExternalDependencyError(format!("Authorization check failed. {e}"))),
    }
}
