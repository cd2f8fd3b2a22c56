use std::{sync::Arc, time::Duration};

use actix_web::{dev::Server, error::InternalError, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use delivery_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    realtime::EventFabric,
    OrderFlowApi,
    PromoApi,
    RemittanceApi,
    SettlementApi,
    SettlementJobs,
    SqliteDatabase,
};
use log::*;

use crate::{
    auth::TokenVerifier,
    config::ServerConfig,
    errors::ServerError,
    middleware::JwtMiddlewareFactory,
    routes::*,
    sockets::{CustomerSocketRoute, OperationsSocketRoute, PartnerSocketRoute},
    workers::start_settlement_workers,
};

const EVENT_BUFFER_SIZE: usize = 256;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.run_migrations().await.map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let fabric = Arc::new(EventFabric::new(db.clone()));
    let producers = start_event_handlers(fabric.clone()).await;
    let _workers = if config.workers.enabled {
        let jobs = SettlementJobs::new(db.clone(), producers.clone(), config.policy)
            .with_retry_policy(config.retry.clone());
        Some(start_settlement_workers(jobs, config.workers))
    } else {
        warn!("💻️ DLV_RUN_WORKERS is off. This instance will not run the settlement passes.");
        None
    };
    let srv = create_server_instance(config, db, producers, fabric)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

/// Wires the post-commit events into the real-time fabric and starts the handler tasks.
pub async fn start_event_handlers(fabric: Arc<EventFabric<SqliteDatabase>>) -> EventProducers {
    let mut hooks = EventHooks::default();
    let f = fabric.clone();
    hooks.on_order_status(move |ev| {
        let f = f.clone();
        Box::pin(async move {
            let n = f.publish_order_status(&ev);
            trace!("💻️ Order #{} is {}. Delivered to {n} connections", ev.order.id, ev.order.status);
        })
    });
    let f = fabric.clone();
    hooks.on_payout(move |ev| {
        let f = f.clone();
        Box::pin(async move {
            f.publish_payout(&ev);
        })
    });
    hooks.on_remittance(move |ev| {
        let f = fabric.clone();
        Box::pin(async move {
            if ev.alert {
                warn!(
                    "💻️ Remittance #{} from courier #{} is flagged for a cash discrepancy",
                    ev.remittance.id, ev.remittance.courier_id
                );
            }
            f.publish_remittance(&ev);
        })
    });
    let handlers = EventHandlers::new(EVENT_BUFFER_SIZE, hooks);
    let producers = handlers.producers();
    handlers.start_handlers().await;
    producers
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    producers: EventProducers,
    fabric: Arc<EventFabric<SqliteDatabase>>,
) -> Result<Server, ServerError> {
    let srv = HttpServer::new(move || {
        let orders_api = OrderFlowApi::new(db.clone(), producers.clone())
            .with_policy(config.policy)
            .with_retry_policy(config.retry.clone());
        let settlement_api = SettlementApi::new(db.clone(), producers.clone())
            .with_policy(config.policy)
            .with_retry_policy(config.retry.clone());
        let remittance_api = RemittanceApi::new(db.clone(), producers.clone()).with_policy(config.policy);
        let promo_api = PromoApi::new(db.clone());
        let verifier = TokenVerifier::new(&config.auth);
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("dlv::access_log"))
            .app_data(web::Data::new(orders_api))
            .app_data(web::Data::new(settlement_api))
            .app_data(web::Data::new(remittance_api))
            .app_data(web::Data::new(promo_api))
            .app_data(web::Data::new(verifier.clone()))
            .app_data(web::Data::from(fabric.clone()))
            .app_data(json_config())
            .app_data(path_config())
            .app_data(query_config());
        // Routes that require authentication
        let auth_scope = web::scope("/api")
            .wrap(JwtMiddlewareFactory::new(verifier))
            .service(PlaceOrderRoute::<SqliteDatabase>::new())
            .service(MyOrdersRoute::<SqliteDatabase>::new())
            .service(OrderByIdRoute::<SqliteDatabase>::new())
            .service(AcceptOrderRoute::<SqliteDatabase>::new())
            .service(StartPreparingRoute::<SqliteDatabase>::new())
            .service(MarkReadyRoute::<SqliteDatabase>::new())
            .service(PickUpRoute::<SqliteDatabase>::new())
            .service(MarkDeliveredRoute::<SqliteDatabase>::new())
            .service(CancelOrderRoute::<SqliteDatabase>::new())
            .service(CapturePaymentRoute::<SqliteDatabase>::new())
            .service(AssignCourierRoute::<SqliteDatabase>::new())
            .service(RestaurantPaidRoute::<SqliteDatabase>::new())
            .service(BalanceRoute::<SqliteDatabase>::new())
            .service(RefreshBalanceRoute::<SqliteDatabase>::new())
            .service(MyBalanceRoute::<SqliteDatabase>::new())
            .service(LedgerRoute::<SqliteDatabase>::new())
            .service(AdjustmentRoute::<SqliteDatabase>::new())
            .service(RequestPayoutRoute::<SqliteDatabase>::new())
            .service(ReconcilePayoutsRoute::<SqliteDatabase>::new())
            .service(PayoutsForPartyRoute::<SqliteDatabase>::new())
            .service(StartPayoutRoute::<SqliteDatabase>::new())
            .service(PayoutPaidRoute::<SqliteDatabase>::new())
            .service(RejectPayoutRoute::<SqliteDatabase>::new())
            .service(CancelPayoutRoute::<SqliteDatabase>::new())
            .service(DeclareRemittanceRoute::<SqliteDatabase>::new())
            .service(PendingRemittanceOrdersRoute::<SqliteDatabase>::new())
            .service(RemittanceByIdRoute::<SqliteDatabase>::new())
            .service(ReviewRemittanceRoute::<SqliteDatabase>::new())
            .service(CreatePromoCodeRoute::<SqliteDatabase>::new());
        app.service(auth_scope)
            .service(health)
            .service(CustomerSocketRoute::<SqliteDatabase>::new())
            .service(PartnerSocketRoute::<SqliteDatabase>::new())
            .service(OperationsSocketRoute::<SqliteDatabase>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

/// Malformed bodies, paths and queries get the same JSON error shape as every other failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let e = ServerError::InvalidRequestBody(err.to_string());
        InternalError::from_response(err, actix_web::ResponseError::error_response(&e)).into()
    })
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req| {
        let e = ServerError::InvalidRequestPath(err.to_string());
        InternalError::from_response(err, actix_web::ResponseError::error_response(&e)).into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        let e = ServerError::InvalidRequestBody(err.to_string());
        InternalError::from_response(err, actix_web::ResponseError::error_response(&e)).into()
    })
}
