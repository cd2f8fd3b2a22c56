use cucumber::given;
use delivery_engine::SettlementPolicy;

use crate::{cucumber::MarketplaceWorld, support::low_floor_policy};

#[given("a fresh marketplace")]
async fn fresh_marketplace(world: &mut MarketplaceWorld) {
    world.start(SettlementPolicy::default()).await;
}

#[given("a fresh marketplace with low payout floors")]
async fn fresh_marketplace_low_floors(world: &mut MarketplaceWorld) {
    world.start(low_floor_policy()).await;
}
