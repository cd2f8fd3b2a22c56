use chrono::Duration;
use dlv_common::Money;
use serde::{Deserialize, Serialize};

use crate::db_types::{Party, PartyKind};

/// The money rules applied when an order settles and when parties are paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPolicy {
    /// Platform commission on the restaurant's share of an order, in basis points.
    pub commission_bps: i64,
    /// The courier's share of the delivery fee, in basis points.
    pub courier_fee_share_bps: i64,
    pub courier_payout_floor: Money,
    pub restaurant_payout_floor: Money,
    /// The largest remittance discrepancy that does not raise an alert.
    pub remittance_tolerance: Money,
    /// `new` orders older than this are cancelled by the expiry job.
    pub unaccepted_order_timeout_minutes: i64,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            commission_bps: 1_500,
            courier_fee_share_bps: 8_000,
            courier_payout_floor: Money::from(1_000),
            restaurant_payout_floor: Money::from(5_000),
            remittance_tolerance: Money::from(100),
            unaccepted_order_timeout_minutes: 10,
        }
    }
}

impl SettlementPolicy {
    /// The minimum balance a party needs before a payout request can be created. `None` for parties that are never
    /// paid out.
    pub fn payout_floor(&self, party: &Party) -> Option<Money> {
        match party.kind {
            PartyKind::Restaurant => Some(self.restaurant_payout_floor),
            PartyKind::Delivery => Some(self.courier_payout_floor),
            _ => None,
        }
    }

    pub fn unaccepted_order_timeout(&self) -> Duration {
        Duration::minutes(self.unaccepted_order_timeout_minutes)
    }
}
