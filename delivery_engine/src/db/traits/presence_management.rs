use crate::{db_types::CourierPresence, DeliveryError};

/// Courier dispatch availability. The table behind this trait is the only source for "active couriers" views.
#[allow(async_fn_in_trait)]
pub trait PresenceManagement {
    /// Idempotent. Setting the current value again only refreshes `updated_at`.
    async fn set_availability(&self, courier_id: i64, available: bool) -> Result<CourierPresence, DeliveryError>;

    async fn update_location(
        &self,
        courier_id: i64,
        latitude: f64,
        longitude: f64,
    ) -> Result<CourierPresence, DeliveryError>;

    async fn fetch_presence(&self, courier_id: i64) -> Result<Option<CourierPresence>, DeliveryError>;

    async fn active_couriers(&self) -> Result<Vec<CourierPresence>, DeliveryError>;
}
