//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! Every handler is generic over the storage backend so that the endpoint tests can run against mocks. Authorization
//! happens in two layers. The `requires [..]` clause on a route is a coarse role check made by the ACL middleware.
//! Whether an actor may touch a particular order, balance or payout is decided by the engine, or by the ownership
//! checks below for the read-only money endpoints.
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Handlers must only ever `await` on I/O.
use actix_web::{get, web, HttpResponse, Responder};
use delivery_engine::{
    db_types::{Actor, Party, Role},
    order_objects::{OrderQueryFilter, PlaceOrderRequest},
    LedgerManagement,
    OrderFlowApi,
    OrderManagement,
    PromoApi,
    PromoManagement,
    RemittanceApi,
    RemittanceManagement,
    SettlementApi,
    SettlementManagement,
};
use log::*;

use crate::{
    auth::JwtClaims,
    data_objects::{
        parse_party,
        AdjustmentParams,
        AssignParams,
        CancelParams,
        CaptureParams,
        JsonResponse,
        OrderSearchParams,
        PartyPath,
        PayoutPaidParams,
        PayoutParams,
        PromoCodeParams,
        RejectParams,
        RemittanceParams,
        RestaurantPaidParams,
        ReviewParams,
    },
    errors::ServerError,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($bounds:path),+) => {
        paste::paste! { pub struct [<$name:camel Route>]<B>(core::marker::PhantomData<fn() -> B>);}
        paste::paste! { impl<B> [<$name:camel Route>]<B> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> B>)
            }
        }}
        paste::paste! { impl<B> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<B>
        where
            B: $($bounds +)+ 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<B>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:path),+ where requires [$($roles:expr),+]) => {
        paste::paste! { pub struct [<$name:camel Route>]<B>(core::marker::PhantomData<fn() -> B>);}
        paste::paste! { impl<B> [<$name:camel Route>]<B> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> B>)
            }
        }}
        paste::paste! { impl<B> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<B>
        where
            B: $($bounds +)+ 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<B>)
                    .wrap($crate::middleware::AclMiddlewareFactory::new(&[$($roles),+]));
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

/// Operators see every party's money. Everyone else only sees their own.
fn ensure_party_access(actor: &Actor, party: &Party) -> Result<(), ServerError> {
    if actor.role == Role::Operator || actor.party().as_ref() == Some(party) {
        Ok(())
    } else {
        Err(ServerError::InsufficientPermissions(format!("{actor} cannot access the accounts of {party}")))
    }
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Orders  ----------------------------------------------------
route!(place_order => Post "/orders" impl OrderManagement, PromoManagement);
/// Customers place orders for themselves. The response carries the priced order and its item lines.
///
/// Sending the same `client_reference` twice returns the original order, so clients can safely retry a placement
/// that timed out.
pub async fn place_order<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    body: web::Json<PlaceOrderRequest>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    debug!("💻️ POST place_order from {actor}");
    let order = api.place_order(actor, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(order_by_id => Get "/orders/{order_id}" impl OrderManagement, PromoManagement);
/// Fetches an order with its item lines. Callers that are not a party to the order get 403.
pub async fn order_by_id<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let order_id = path.into_inner();
    debug!("💻️ GET order #{order_id} for {actor}");
    let order = api.order_by_id(actor, order_id).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(my_orders => Get "/orders" impl OrderManagement, PromoManagement);
/// Searches the caller's orders. Customers, restaurants and couriers are always restricted to their own orders;
/// operators can search everything.
pub async fn my_orders<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    query: web::Query<OrderSearchParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let filter = OrderQueryFilter::try_from(query.into_inner())?;
    debug!("💻️ GET orders for {actor} [{filter}]");
    let orders = api.orders_for_actor(actor, filter).await?;
    Ok(HttpResponse::Ok().json(orders))
}

route!(accept_order => Post "/orders/{order_id}/accept" impl OrderManagement, PromoManagement);
pub async fn accept_order<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.accept(claims.actor()?, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(start_preparing => Post "/orders/{order_id}/start_preparing" impl OrderManagement, PromoManagement);
pub async fn start_preparing<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.start_preparing(claims.actor()?, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(mark_ready => Post "/orders/{order_id}/mark_ready" impl OrderManagement, PromoManagement);
pub async fn mark_ready<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.mark_ready(claims.actor()?, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(pick_up => Post "/orders/{order_id}/pick_up" impl OrderManagement, PromoManagement);
pub async fn pick_up<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.pick_up(claims.actor()?, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(mark_delivered => Post "/orders/{order_id}/mark_delivered" impl OrderManagement, PromoManagement);
/// Completes the delivery. The order's ledger entries are written in the same transaction as the status change.
pub async fn mark_delivered<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.mark_delivered(claims.actor()?, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(cancel_order => Post "/orders/{order_id}/cancel" impl OrderManagement, PromoManagement);
/// Cancels an order. The body is optional, except for operators, who must give a `reason`.
pub async fn cancel_order<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    body: Option<web::Json<CancelParams>>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let reason = body.and_then(|b| b.into_inner().reason);
    let order = api.cancel(actor, path.into_inner(), reason).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(capture_payment => Post "/orders/{order_id}/capture" impl OrderManagement, PromoManagement where requires [Role::Operator]);
/// Records the payment gateway's confirmation for a card or wallet order.
pub async fn capture_payment<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    body: web::Json<CaptureParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.capture_payment(claims.actor()?, path.into_inner(), body.into_inner().reference).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(assign_courier => Post "/orders/{order_id}/assign" impl OrderManagement, PromoManagement where requires [Role::Operator, Role::Courier]);
/// Operators dispatch any available courier. Couriers can only claim an order for themselves, and may leave out
/// `courier_id`.
pub async fn assign_courier<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    body: Option<web::Json<AssignParams>>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let courier_id = match (body.and_then(|b| b.into_inner().courier_id), actor.role) {
        (Some(id), _) => id,
        (None, Role::Courier) => actor.id,
        (None, _) => return Err(ServerError::InvalidRequestBody("A courier_id is required".into())),
    };
    let order = api.assign_courier(actor, path.into_inner(), courier_id).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(restaurant_paid => Post "/orders/{order_id}/paid_restaurant" impl OrderManagement, PromoManagement where requires [Role::Courier]);
/// The assigned courier paid the restaurant for a cash order in person.
pub async fn restaurant_paid<B: OrderManagement + PromoManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    body: web::Json<RestaurantPaidParams>,
    api: web::Data<OrderFlowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let order = api.mark_restaurant_paid_by_courier(claims.actor()?, path.into_inner(), body.amount).await?;
    Ok(HttpResponse::Ok().json(order))
}

//----------------------------------------------   Balance  ----------------------------------------------------
route!(balance => Get "/balance/{kind:[a-z]+}/{id}" impl LedgerManagement, SettlementManagement);
/// The derived balance of a party: credits, debits, outstanding payouts and what is available to pay out.
pub async fn balance<B: LedgerManagement + SettlementManagement>(
    claims: JwtClaims,
    path: web::Path<PartyPath>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let party = path.party()?;
    ensure_party_access(&actor, &party)?;
    debug!("💻️ GET balance for {party}");
    let balance = api.get_balance(party).await?;
    Ok(HttpResponse::Ok().json(balance))
}

route!(refresh_balance => Post "/balance/{kind:[a-z]+}/{id}/refresh" impl LedgerManagement, SettlementManagement);
/// Recomputes the balance from the ledger. Balances are never stored, so this is a read.
pub async fn refresh_balance<B: LedgerManagement + SettlementManagement>(
    claims: JwtClaims,
    path: web::Path<PartyPath>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let party = path.party()?;
    ensure_party_access(&actor, &party)?;
    let balance = api.refresh_balance(party).await?;
    Ok(HttpResponse::Ok().json(balance))
}

route!(my_balance => Get "/my_balance" impl LedgerManagement, SettlementManagement);
pub async fn my_balance<B: LedgerManagement + SettlementManagement>(
    claims: JwtClaims,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let party =
        actor.party().ok_or_else(|| ServerError::InsufficientPermissions(format!("{actor} has no ledger account")))?;
    debug!("💻️ GET my_balance for {party}");
    let balance = api.get_balance(party).await?;
    Ok(HttpResponse::Ok().json(balance))
}

route!(ledger => Get "/ledger/{kind:[a-z]+}/{id}" impl LedgerManagement, SettlementManagement);
/// Every ledger entry touching the party, oldest first.
pub async fn ledger<B: LedgerManagement + SettlementManagement>(
    claims: JwtClaims,
    path: web::Path<PartyPath>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let party = path.party()?;
    ensure_party_access(&actor, &party)?;
    let entries = api.ledger_for_party(party).await?;
    Ok(HttpResponse::Ok().json(entries))
}

route!(adjustment => Post "/adjustments" impl LedgerManagement, SettlementManagement where requires [Role::Operator]);
/// A manual credit or debit against a party, booked against the platform. The `reference` makes the call idempotent.
pub async fn adjustment<B: LedgerManagement + SettlementManagement>(
    claims: JwtClaims,
    body: web::Json<AdjustmentParams>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let params = body.into_inner();
    let party = parse_party(&params.party_kind, params.party_id)?;
    info!("💻️ Adjustment of {} for {party} requested by {actor}", params.amount);
    let result = api.record_adjustment(party, params.amount, params.reason, params.reference, actor.to_string()).await?;
    Ok(HttpResponse::Ok().json(result))
}

//----------------------------------------------   Payouts  ----------------------------------------------------
route!(request_payout => Post "/payouts" impl LedgerManagement, SettlementManagement where requires [Role::Restaurant, Role::Courier, Role::Operator]);
/// Requests a payout of the party's full available balance. Restaurants and couriers always request for
/// themselves. Operators must name the party.
pub async fn request_payout<B: LedgerManagement + SettlementManagement>(
    claims: JwtClaims,
    body: Option<web::Json<PayoutParams>>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let params = body.map(|b| b.into_inner()).unwrap_or_default();
    let party = match (actor.party(), &params.party_kind, params.party_id) {
        (Some(own), None, None) => own,
        (_, Some(kind), Some(id)) => parse_party(kind, id)?,
        _ => return Err(ServerError::InvalidRequestBody("Both party_kind and party_id are required".into())),
    };
    ensure_party_access(&actor, &party)?;
    let payout = api.create_payout(party, params.payout_method, params.payout_account).await?;
    Ok(HttpResponse::Ok().json(payout))
}

route!(payouts_for_party => Get "/payouts/{kind:[a-z]+}/{id}" impl LedgerManagement, SettlementManagement);
pub async fn payouts_for_party<B: LedgerManagement + SettlementManagement>(
    claims: JwtClaims,
    path: web::Path<PartyPath>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let party = path.party()?;
    ensure_party_access(&actor, &party)?;
    let payouts = api.payouts_for_party(party).await?;
    Ok(HttpResponse::Ok().json(payouts))
}

route!(start_payout => Post "/payouts/{payout_id:\\d+}/processing" impl LedgerManagement, SettlementManagement where requires [Role::Operator]);
pub async fn start_payout<B: LedgerManagement + SettlementManagement>(
    path: web::Path<i64>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payout = api.start_processing(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(payout))
}

route!(payout_paid => Post "/payouts/{payout_id:\\d+}/paid" impl LedgerManagement, SettlementManagement where requires [Role::Operator]);
/// Marks a payout as paid. Both a transaction reference and a proof reference are required, and the ledger debit
/// is written with the status change.
pub async fn payout_paid<B: LedgerManagement + SettlementManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    body: Option<web::Json<PayoutPaidParams>>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let params = body.map(|b| b.into_inner()).unwrap_or_default();
    let payout =
        api.mark_payout_paid(path.into_inner(), params.transaction_ref, params.proof_ref, actor.to_string()).await?;
    Ok(HttpResponse::Ok().json(payout))
}

route!(reject_payout => Post "/payouts/{payout_id:\\d+}/reject" impl LedgerManagement, SettlementManagement where requires [Role::Operator]);
pub async fn reject_payout<B: LedgerManagement + SettlementManagement>(
    path: web::Path<i64>,
    body: web::Json<RejectParams>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let payout = api.reject_payout(path.into_inner(), body.into_inner().reason).await?;
    Ok(HttpResponse::Ok().json(payout))
}

route!(cancel_payout => Post "/payouts/{payout_id:\\d+}/cancel" impl LedgerManagement, SettlementManagement where requires [Role::Restaurant, Role::Courier, Role::Operator]);
/// Withdraws a payout request that has not been paid. Parties can withdraw their own requests.
pub async fn cancel_payout<B: LedgerManagement + SettlementManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let payout_id = path.into_inner();
    let payout = api.payout_by_id(payout_id).await?;
    ensure_party_access(&actor, &payout.party())?;
    let payout = api.cancel_payout(payout_id).await?;
    Ok(HttpResponse::Ok().json(payout))
}

route!(reconcile_payouts => Post "/payouts/reconcile" impl LedgerManagement, SettlementManagement where requires [Role::Operator]);
/// Writes the missing ledger debit for any paid payout that lacks one.
pub async fn reconcile_payouts<B: LedgerManagement + SettlementManagement>(
    api: web::Data<SettlementApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let repaired = api.reconcile_payouts().await?;
    let message = match repaired.len() {
        0 => "Every paid payout has its ledger entry".to_string(),
        n => format!("Ledger entries written for {n} paid payouts: {repaired:?}"),
    };
    Ok(HttpResponse::Ok().json(JsonResponse::success(message)))
}

//----------------------------------------------   Remittances  ------------------------------------------------
route!(declare_remittance => Post "/remittances" impl RemittanceManagement where requires [Role::Courier]);
/// A courier declares the cash collected for a set of delivered cash orders. The amount must equal the orders'
/// totals exactly.
pub async fn declare_remittance<B: RemittanceManagement>(
    claims: JwtClaims,
    body: web::Json<RemittanceParams>,
    api: web::Data<RemittanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let params = body.into_inner();
    let remittance = api.declare_remittance(actor.id, params.amount, params.order_ids).await?;
    Ok(HttpResponse::Ok().json(remittance))
}

route!(pending_remittance_orders => Get "/remittances/pending_orders" impl RemittanceManagement where requires [Role::Courier]);
/// The caller's delivered cash orders that no remittance covers yet.
pub async fn pending_remittance_orders<B: RemittanceManagement>(
    claims: JwtClaims,
    api: web::Data<RemittanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let orders = api.cash_orders_pending_remittance(actor.id).await?;
    Ok(HttpResponse::Ok().json(orders))
}

route!(remittance_by_id => Get "/remittances/{remittance_id:\\d+}" impl RemittanceManagement where requires [Role::Courier, Role::Operator]);
pub async fn remittance_by_id<B: RemittanceManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    api: web::Data<RemittanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let remittance = api.remittance_by_id(path.into_inner()).await?;
    ensure_party_access(&actor, &Party::courier(remittance.courier_id))?;
    Ok(HttpResponse::Ok().json(remittance))
}

route!(review_remittance => Post "/remittances/{remittance_id:\\d+}/review" impl RemittanceManagement where requires [Role::Operator]);
/// Records the cash actually counted. A discrepancy beyond the tolerance flags the remittance and raises an alert.
pub async fn review_remittance<B: RemittanceManagement>(
    claims: JwtClaims,
    path: web::Path<i64>,
    body: web::Json<ReviewParams>,
    api: web::Data<RemittanceApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let actor = claims.actor()?;
    let params = body.into_inner();
    let remittance =
        api.review_remittance(path.into_inner(), params.verified_amount, params.notes, actor.to_string()).await?;
    Ok(HttpResponse::Ok().json(remittance))
}

//----------------------------------------------   Promo codes  ------------------------------------------------
route!(create_promo_code => Post "/promo_codes" impl PromoManagement where requires [Role::Operator]);
pub async fn create_promo_code<B: PromoManagement>(
    body: web::Json<PromoCodeParams>,
    api: web::Data<PromoApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let params = body.into_inner();
    let promo = api.create_promo_code(&params.code, params.discount, params.expires_at).await?;
    Ok(HttpResponse::Ok().json(promo))
}
