use cucumber::given;
use escrow_engine::{fees::CommissionRate, test_utils::system::TestSystem};
use log::*;

use crate::cucumber::EscrowWorld;

#[given(expr = "a marketplace charging {int} bps commission with a {int} day hold period")]
async fn marketplace_policy(world: &mut EscrowWorld, bps: u32, days: u32) {
    world.policy.default_commission = CommissionRate::from_bps(bps).expect("Invalid commission rate");
    world.policy.hold_period_days = days;
}

#[given(expr = "store '{word}' is charged {int} bps commission")]
async fn store_commission(world: &mut EscrowWorld, store_id: String, bps: u32) {
    let rate = CommissionRate::from_bps(bps).expect("Invalid commission rate");
    world.policy.store_commissions.insert(store_id, rate);
}

#[given("a fresh install")]
async fn fresh_database(world: &mut EscrowWorld) {
    let system = TestSystem::new(world.policy.clone()).await;
    debug!("🚀️ Created escrow system on {}", system.db_path);
    world.system = Some(system);
}
