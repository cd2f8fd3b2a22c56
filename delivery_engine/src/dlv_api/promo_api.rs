use chrono::{DateTime, Utc};
use dlv_common::Money;
use log::*;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    db::traits::PromoManagement,
    db_types::{PromoCode, PromoStatus},
    DeliveryError,
};

static PROMO_CODE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[A-Z0-9_-]{3,32}$").unwrap()
});

pub fn is_valid_promo_code(code: &str) -> bool {
    PROMO_CODE.is_match(code)
}

#[derive(Debug)]
pub struct PromoApi<B> {
    db: B,
}

impl<B> PromoApi<B>
where B: PromoManagement
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    pub async fn create_promo_code(
        &self,
        code: &str,
        discount: Money,
        expires_at: DateTime<Utc>,
    ) -> Result<PromoCode, DeliveryError> {
        let code = code.trim().to_uppercase();
        if !is_valid_promo_code(&code) {
            return Err(DeliveryError::validation(format!(
                "'{code}' is not a valid promo code. Use 3-32 letters, digits, '-' or '_'"
            )));
        }
        if !discount.is_positive() {
            return Err(DeliveryError::validation("A promo code must give a positive discount"));
        }
        let now = Utc::now();
        if expires_at <= now {
            return Err(DeliveryError::validation("A promo code must expire in the future"));
        }
        let promo = PromoCode { code, discount, status: PromoStatus::Active, expires_at, created_at: now };
        let promo = self.db.insert_promo_code(promo).await?;
        info!("🔄️🏷️ Promo code {} worth {} created, valid until {}", promo.code, promo.discount, promo.expires_at);
        Ok(promo)
    }

    pub async fn promo_code(&self, code: &str) -> Result<PromoCode, DeliveryError> {
        let code = code.trim().to_uppercase();
        self.db.fetch_promo_code(&code).await?.ok_or_else(|| DeliveryError::not_found(format!("Promo code {code}")))
    }

    pub async fn expire_promo_codes(&self, now: DateTime<Utc>) -> Result<Vec<String>, DeliveryError> {
        self.db.expire_promo_codes(now).await
    }
}
