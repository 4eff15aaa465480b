use std::collections::HashMap;

use crate::fees::CommissionRate;

pub const DEFAULT_COMMISSION_BPS: u32 = 1000;
pub const DEFAULT_HOLD_PERIOD_DAYS: u32 = 7;

/// Commission and hold-period settings. The values in force when an escrow is created are copied onto the escrow row,
/// so later policy changes never affect existing escrows.
#[derive(Debug, Clone)]
pub struct EscrowPolicy {
    pub default_commission: CommissionRate,
    pub store_commissions: HashMap<String, CommissionRate>,
    pub hold_period_days: u32,
}

impl Default for EscrowPolicy {
    fn default() -> Self {
        Self {
            default_commission: CommissionRate::clamped(DEFAULT_COMMISSION_BPS),
            store_commissions: HashMap::new(),
            hold_period_days: DEFAULT_HOLD_PERIOD_DAYS,
        }
    }
}

impl EscrowPolicy {
    pub fn new(default_commission: CommissionRate, hold_period_days: u32) -> Self {
        Self { default_commission, store_commissions: HashMap::new(), hold_period_days }
    }

    pub fn with_store_commission<S: Into<String>>(mut self, store_id: S, rate: CommissionRate) -> Self {
        self.store_commissions.insert(store_id.into(), rate);
        self
    }

    pub fn commission_for_store(&self, store_id: &str) -> CommissionRate {
        self.store_commissions.get(store_id).copied().unwrap_or(self.default_commission)
    }
}
