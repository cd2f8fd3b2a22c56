use chrono::{DateTime, Utc};

use crate::{db_types::PromoCode, DeliveryError};

#[allow(async_fn_in_trait)]
pub trait PromoManagement {
    async fn insert_promo_code(&self, promo: PromoCode) -> Result<PromoCode, DeliveryError>;

    async fn fetch_promo_code(&self, code: &str) -> Result<Option<PromoCode>, DeliveryError>;

    /// Marks every active code that expired before `now` as expired and returns the codes that changed.
    async fn expire_promo_codes(&self, now: DateTime<Utc>) -> Result<Vec<String>, DeliveryError>;
}
