use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
pub use dlv_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value. {0}")]
pub struct ConversionError(pub String);

/// Generates `Display` and `FromStr` for a fieldless enum whose database and wire representation is snake_case text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let s = match self {
                    $($name::$variant => $text,)+
                };
                f.write_str(s)
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ConversionError(format!("'{s}' is not a valid {}", stringify!($name)))),
                }
            }
        }
    };
}

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    /// Placed by the customer, waiting for the restaurant.
    New,
    Accepted,
    Preparing,
    /// Cooked and waiting for pickup.
    Ready,
    /// Picked up by the courier and on its way to the customer.
    Delivering,
    Delivered,
    Cancelled,
}

text_enum!(OrderStatusType {
    New => "new",
    Accepted => "accepted",
    Preparing => "preparing",
    Ready => "ready",
    Delivering => "delivering",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

impl OrderStatusType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// The order column that records when an order entered this status.
    pub fn timestamp_column(&self) -> &'static str {
        match self {
            Self::New => "placed_at",
            Self::Accepted => "accepted_at",
            Self::Preparing => "preparing_at",
            Self::Ready => "ready_at",
            Self::Delivering => "picked_up_at",
            Self::Delivered => "delivered_at",
            Self::Cancelled => "cancelled_at",
        }
    }
}

//--------------------------------------   PaymentMethod       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Wallet,
}

text_enum!(PaymentMethod { Cash => "cash", Card => "card", Wallet => "wallet" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Captured,
    Refunded,
    Failed,
}

text_enum!(PaymentStatus { Pending => "pending", Captured => "captured", Refunded => "refunded", Failed => "failed" });

//--------------------------------------        Role           ---------------------------------------------------------
/// The closed set of actors that can drive the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Restaurant,
    Courier,
    Operator,
    /// Scheduled jobs and other internal callers.
    System,
}

text_enum!(Role {
    Customer => "customer",
    Restaurant => "restaurant",
    Courier => "courier",
    Operator => "operator",
    System => "system",
});

/// An authenticated caller: a role plus the id of the party acting in that role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub role: Role,
    pub id: i64,
}

impl Actor {
    pub fn new(role: Role, id: i64) -> Self {
        Self { role, id }
    }

    pub fn customer(id: i64) -> Self {
        Self::new(Role::Customer, id)
    }

    pub fn restaurant(id: i64) -> Self {
        Self::new(Role::Restaurant, id)
    }

    pub fn courier(id: i64) -> Self {
        Self::new(Role::Courier, id)
    }

    pub fn operator(id: i64) -> Self {
        Self::new(Role::Operator, id)
    }

    pub fn system() -> Self {
        Self::new(Role::System, 0)
    }

    /// The ledger party this actor represents, if it holds a balance.
    pub fn party(&self) -> Option<Party> {
        match self.role {
            Role::Customer => Some(Party::customer(self.id)),
            Role::Restaurant => Some(Party::restaurant(self.id)),
            Role::Courier => Some(Party::courier(self.id)),
            Role::Operator | Role::System => None,
        }
    }
}

impl Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

//--------------------------------------        Party          ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PartyKind {
    Platform,
    User,
    Restaurant,
    /// A courier
    Delivery,
    /// The outside world. Payouts leave the ledger to here.
    None,
}

impl Display for PartyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PartyKind::Platform => "platform",
            PartyKind::User => "user",
            PartyKind::Restaurant => "restaurant",
            PartyKind::Delivery => "delivery",
            PartyKind::None => "none",
        };
        f.write_str(s)
    }
}

impl FromStr for PartyKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform" => Ok(Self::Platform),
            "user" | "customer" => Ok(Self::User),
            "restaurant" => Ok(Self::Restaurant),
            "delivery" | "courier" => Ok(Self::Delivery),
            "none" => Ok(Self::None),
            _ => Err(ConversionError(format!("'{s}' is not a valid party kind"))),
        }
    }
}

/// A source or destination of money in the ledger. Platform and the outside world use id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Party {
    pub kind: PartyKind,
    pub id: i64,
}

impl Party {
    pub fn new(kind: PartyKind, id: i64) -> Self {
        match kind {
            PartyKind::Platform | PartyKind::None => Self { kind, id: 0 },
            _ => Self { kind, id },
        }
    }

    pub fn platform() -> Self {
        Self::new(PartyKind::Platform, 0)
    }

    pub fn none() -> Self {
        Self::new(PartyKind::None, 0)
    }

    pub fn customer(id: i64) -> Self {
        Self::new(PartyKind::User, id)
    }

    pub fn restaurant(id: i64) -> Self {
        Self::new(PartyKind::Restaurant, id)
    }

    pub fn courier(id: i64) -> Self {
        Self::new(PartyKind::Delivery, id)
    }

    /// Only restaurants and couriers are paid out.
    pub fn is_payable(&self) -> bool {
        matches!(self.kind, PartyKind::Restaurant | PartyKind::Delivery)
    }
}

impl Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            PartyKind::Platform | PartyKind::None => write!(f, "{}", self.kind),
            _ => write!(f, "{}#{}", self.kind, self.id),
        }
    }
}

//--------------------------------------    DeliveryAddress    ---------------------------------------------------------
/// Snapshot of the address at placement time. Later edits to the customer's address book do not affect the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeliveryAddress {
    #[serde(default)]
    pub label: Option<String>,
    pub street: String,
    pub city: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub client_reference: Option<String>,
    pub customer_id: i64,
    pub restaurant_id: i64,
    pub courier_id: Option<i64>,
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
    #[sqlx(json)]
    pub delivery_address: DeliveryAddress,
    pub status: OrderStatusType,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub restaurant_paid_by_courier: bool,
    pub restaurant_paid_amount: Money,
    pub promo_code: Option<String>,
    pub cancel_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub placed_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub preparing_at: Option<DateTime<Utc>>,
    pub ready_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The part of the order total that belongs to the restaurant before commission.
    pub fn restaurant_gross(&self) -> Money {
        self.total - self.delivery_fee
    }

    pub fn totals_balance(&self) -> bool {
        self.total == self.subtotal + self.delivery_fee + self.tax - self.discount
    }

    /// The transition timestamps that have been set, in lifecycle order.
    pub fn timeline(&self) -> Vec<(OrderStatusType, DateTime<Utc>)> {
        use OrderStatusType::*;
        [
            (New, Some(self.placed_at)),
            (Accepted, self.accepted_at),
            (Preparing, self.preparing_at),
            (Ready, self.ready_at),
            (Delivering, self.picked_up_at),
            (Delivered, self.delivered_at),
            (Cancelled, self.cancelled_at),
        ]
        .into_iter()
        .filter_map(|(s, t)| t.map(|t| (s, t)))
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub menu_item_id: i64,
    pub name: String,
    pub unit_price: Money,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub menu_item_id: i64,
    pub name: String,
    pub unit_price: Money,
    pub quantity: i64,
}

impl NewOrderItem {
    pub fn new<S: Into<String>>(menu_item_id: i64, name: S, unit_price: Money, quantity: i64) -> Self {
        Self { menu_item_id, name: name.into(), unit_price, quantity }
    }

    /// `None` if the line total does not fit in a `Money`.
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// A fully priced order, ready to be written to the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_number: String,
    pub client_reference: Option<String>,
    pub customer_id: i64,
    pub restaurant_id: i64,
    pub items: Vec<NewOrderItem>,
    pub subtotal: Money,
    pub delivery_fee: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
    pub delivery_address: DeliveryAddress,
    pub payment_method: PaymentMethod,
    pub promo_code: Option<String>,
    pub placed_at: DateTime<Utc>,
}

//--------------------------------------     LedgerEntry       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    OrderPayment,
    Commission,
    DeliveryFee,
    Refund,
    Payout,
    Adjustment,
}

text_enum!(TransactionType {
    OrderPayment => "order_payment",
    Commission => "commission",
    DeliveryFee => "delivery_fee",
    Refund => "refund",
    Payout => "payout",
    Adjustment => "adjustment",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(EntryStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled"
});

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub order_id: Option<i64>,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub from_kind: PartyKind,
    pub from_id: i64,
    pub to_kind: PartyKind,
    pub to_id: i64,
    pub status: EntryStatus,
    pub payment_reference: String,
    pub payout_id: Option<i64>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_party(&self) -> Party {
        Party::new(self.from_kind, self.from_id)
    }

    pub fn to_party(&self) -> Party {
        Party::new(self.to_kind, self.to_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub order_id: Option<i64>,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub from: Party,
    pub to: Party,
    pub status: EntryStatus,
    /// The idempotency key. A second entry with the same key is never written.
    pub payment_reference: String,
    pub payout_id: Option<i64>,
    pub description: Option<String>,
}

impl NewLedgerEntry {
    pub fn new<S: Into<String>>(
        transaction_type: TransactionType,
        amount: Money,
        from: Party,
        to: Party,
        payment_reference: S,
    ) -> Self {
        Self {
            order_id: None,
            transaction_type,
            amount,
            from,
            to,
            status: EntryStatus::Completed,
            payment_reference: payment_reference.into(),
            payout_id: None,
            description: None,
        }
    }

    /// Builds an entry for the given order, keyed `order:<id>:<purpose>`.
    pub fn for_order(
        order_id: i64,
        purpose: &str,
        transaction_type: TransactionType,
        amount: Money,
        from: Party,
        to: Party,
    ) -> Self {
        let mut entry = Self::new(transaction_type, amount, from, to, order_key(order_id, purpose));
        entry.order_id = Some(order_id);
        entry
    }

    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_payout(mut self, payout_id: i64) -> Self {
        self.payout_id = Some(payout_id);
        self
    }
}

/// The idempotency key for a ledger entry caused by an order event.
pub fn order_key(order_id: i64, purpose: &str) -> String {
    format!("order:{order_id}:{purpose}")
}

/// The idempotency key for the ledger entry that records a payout leaving the marketplace.
pub fn payout_key(payout_id: i64) -> String {
    format!("payout:{payout_id}")
}

//--------------------------------------       Balance         ---------------------------------------------------------
/// A derived balance. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub party: Party,
    pub credits: Money,
    pub debits: Money,
    /// Pending and processing payout requests.
    pub outstanding_payouts: Money,
    pub available: Money,
}

impl Balance {
    pub fn new(party: Party, credits: Money, debits: Money, outstanding_payouts: Money) -> Self {
        let available = credits - debits - outstanding_payouts;
        Self { party, credits, debits, outstanding_payouts, available }
    }
}

//--------------------------------------    PayoutRequest      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Paid,
    Rejected,
    Cancelled,
}

text_enum!(PayoutStatus {
    Pending => "pending",
    Processing => "processing",
    Paid => "paid",
    Rejected => "rejected",
    Cancelled => "cancelled",
});

impl PayoutStatus {
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: i64,
    pub party_kind: PartyKind,
    pub party_id: i64,
    pub amount: Money,
    pub payment_method: Option<String>,
    pub payment_account: Option<String>,
    pub status: PayoutStatus,
    pub transaction_reference: Option<String>,
    pub proof_reference: Option<String>,
    pub authorized_by: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutRequest {
    pub fn party(&self) -> Party {
        Party::new(self.party_kind, self.party_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPayoutRequest {
    pub party: Party,
    pub payment_method: Option<String>,
    pub payment_account: Option<String>,
}

impl NewPayoutRequest {
    pub fn new(party: Party) -> Self {
        Self { party, payment_method: None, payment_account: None }
    }

    pub fn with_destination<S: Into<String>>(mut self, method: S, account: S) -> Self {
        self.payment_method = Some(method.into());
        self.payment_account = Some(account.into());
        self
    }
}

/// Evidence that money actually left the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutProof {
    pub transaction_reference: String,
    pub proof_reference: String,
    pub authorized_by: String,
}

//--------------------------------------    CashRemittance     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RemittanceStatus {
    Pending,
    Verified,
    Flagged,
}

text_enum!(RemittanceStatus { Pending => "pending", Verified => "verified", Flagged => "flagged" });

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CashRemittance {
    pub id: i64,
    pub courier_id: i64,
    pub declared_amount: Money,
    pub expected_amount: Money,
    pub verified_amount: Option<Money>,
    /// verified − declared
    pub discrepancy: Option<Money>,
    pub status: RemittanceStatus,
    pub reviewer_notes: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    #[serde(default)]
    pub order_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemittanceReview {
    pub verified_amount: Money,
    pub notes: Option<String>,
    pub reviewer: String,
}

//--------------------------------------   CourierPresence     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct CourierPresence {
    pub courier_id: i64,
    pub available: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      PromoCode        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PromoStatus {
    Active,
    Expired,
}

text_enum!(PromoStatus { Active => "active", Expired => "expired" });

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct PromoCode {
    pub code: String,
    pub discount: Money,
    pub status: PromoStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PromoCode {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PromoStatus::Active && self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct PartyStats {
    pub party_kind: PartyKind,
    pub party_id: i64,
    pub delivered_orders: i64,
    pub gross_amount: Money,
}
