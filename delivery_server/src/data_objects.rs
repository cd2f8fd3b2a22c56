use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use delivery_engine::{
    db_types::{OrderStatusType, Party, PartyKind, PaymentMethod},
    order_objects::OrderQueryFilter,
};
use dlv_common::Money;
use serde::{Deserialize, Serialize};

use crate::errors::ServerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }
}

/// `{kind}/{id}` path segments naming a ledger party.
#[derive(Debug, Clone, Deserialize)]
pub struct PartyPath {
    pub kind: String,
    pub id: i64,
}

impl PartyPath {
    pub fn party(&self) -> Result<Party, ServerError> {
        parse_party(&self.kind, self.id).map_err(|e| ServerError::InvalidRequestPath(e.to_string()))
    }
}

/// Accepts `courier` as well as `delivery` for couriers, and `customer` for users.
pub fn parse_party(kind: &str, id: i64) -> Result<Party, ServerError> {
    let kind = PartyKind::from_str(kind.trim()).map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?;
    Ok(Party::new(kind, id))
}

/// Query parameters for order searches. `status` is a comma-separated list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderSearchParams {
    pub customer_id: Option<i64>,
    pub restaurant_id: Option<i64>,
    pub courier_id: Option<i64>,
    pub payment_method: Option<PaymentMethod>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

impl TryFrom<OrderSearchParams> for OrderQueryFilter {
    type Error = ServerError;

    fn try_from(params: OrderSearchParams) -> Result<Self, Self::Error> {
        let status = match params.status {
            Some(s) => Some(
                s.split(',')
                    .map(|v| OrderStatusType::from_str(v.trim()))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| ServerError::InvalidRequestBody(e.to_string()))?,
            ),
            None => None,
        };
        Ok(OrderQueryFilter {
            customer_id: params.customer_id,
            restaurant_id: params.restaurant_id,
            courier_id: params.courier_id,
            payment_method: params.payment_method,
            since: params.since,
            until: params.until,
            status,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelParams {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureParams {
    pub reference: String,
}

/// Couriers assigning themselves may leave out the courier id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignParams {
    pub courier_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestaurantPaidParams {
    pub amount: Money,
}

/// Restaurants and couriers request payouts for themselves. Operators name the party.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutParams {
    pub party_kind: Option<String>,
    pub party_id: Option<i64>,
    pub payout_method: Option<String>,
    pub payout_account: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayoutPaidParams {
    pub transaction_ref: Option<String>,
    pub proof_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectParams {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentParams {
    pub party_kind: String,
    pub party_id: i64,
    /// Positive amounts credit the party, negative amounts debit it.
    pub amount: Money,
    pub reason: String,
    /// Repeating a reference returns the original entry.
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemittanceParams {
    pub amount: Money,
    pub order_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewParams {
    pub verified_amount: Money,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCodeParams {
    pub code: String,
    pub discount: Money,
    pub expires_at: DateTime<Utc>,
}

/// The token query parameter accepted on WebSocket upgrades, for clients that cannot set headers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SocketParams {
    pub token: Option<String>,
}
