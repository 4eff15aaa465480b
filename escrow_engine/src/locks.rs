//! Striped per-escrow locks.
//!
//! Transitions on the same escrow row are serialized in-process so that a second caller only looks at the row after
//! the first caller's transaction has committed or rolled back. Rows share a stripe when their ids are congruent modulo
//! the stripe count, which only costs some unnecessary waiting.
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db_types::EscrowId;

pub const DEFAULT_LOCK_STRIPES: usize = 64;

#[derive(Clone)]
pub struct TransitionLocks {
    stripes: Arc<Vec<Arc<Mutex<()>>>>,
}

impl Default for TransitionLocks {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_STRIPES)
    }
}

impl TransitionLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Arc::new(Mutex::new(()))).collect();
        Self { stripes: Arc::new(stripes) }
    }

    /// Waits for exclusive access to the given escrow. Access is held until the guard is dropped.
    pub async fn acquire(&self, id: EscrowId) -> OwnedMutexGuard<()> {
        let index = id.value().rem_euclid(self.stripes.len() as i64) as usize;
        Arc::clone(&self.stripes[index]).lock_owned().await
    }
}
