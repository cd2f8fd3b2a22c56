use std::{collections::HashMap, fmt::Debug};

use cucumber::World;
use delivery_engine::{db_types::Order, DeliveryError, SettlementPolicy};

use crate::support::Marketplace;

#[derive(Default, World)]
pub struct MarketplaceWorld {
    pub system: Option<Marketplace>,
    /// Orders by the label the scenario gave them
    pub orders: HashMap<String, Order>,
    pub last_error: Option<DeliveryError>,
}

impl Debug for MarketplaceWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceWorld")
            .field("running", &self.system.is_some())
            .field("orders", &self.orders.keys().collect::<Vec<_>>())
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl MarketplaceWorld {
    pub async fn start(&mut self, policy: SettlementPolicy) {
        self.system = Some(Marketplace::with_policy(policy).await);
    }

    pub fn market(&self) -> &Marketplace {
        self.system.as_ref().expect("Marketplace not initialised")
    }

    pub fn order_id(&self, label: &str) -> i64 {
        self.orders.get(label).map(|o| o.id).unwrap_or_else(|| panic!("No order labelled {label}"))
    }

    /// Stores the outcome of an action that a later step may inspect.
    pub fn record<T>(&mut self, result: Result<T, DeliveryError>) -> Option<T> {
        match result {
            Ok(v) => {
                self.last_error = None;
                Some(v)
            },
            Err(e) => {
                self.last_error = Some(e);
                None
            },
        }
    }
}
