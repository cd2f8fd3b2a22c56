use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, OrderStatusEvent, PayoutEvent, RemittanceEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub order_status_producer: Vec<EventProducer<OrderStatusEvent>>,
    pub payout_producer: Vec<EventProducer<PayoutEvent>>,
    pub remittance_producer: Vec<EventProducer<RemittanceEvent>>,
}

impl EventProducers {
    pub async fn publish_order_status(&self, event: OrderStatusEvent) {
        for producer in &self.order_status_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_payout(&self, event: PayoutEvent) {
        for producer in &self.payout_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_remittance(&self, event: RemittanceEvent) {
        for producer in &self.remittance_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_order_status: Option<EventHandler<OrderStatusEvent>>,
    pub on_payout: Option<EventHandler<PayoutEvent>>,
    pub on_remittance: Option<EventHandler<RemittanceEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_order_status = hooks.on_order_status.map(|f| EventHandler::new(buffer_size, f));
        let on_payout = hooks.on_payout.map(|f| EventHandler::new(buffer_size, f));
        let on_remittance = hooks.on_remittance.map(|f| EventHandler::new(buffer_size, f));
        Self { on_order_status, on_payout, on_remittance }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_order_status {
            result.order_status_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payout {
            result.payout_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_remittance {
            result.remittance_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_order_status {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_payout {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_remittance {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_status: Option<Handler<OrderStatusEvent>>,
    pub on_payout: Option<Handler<PayoutEvent>>,
    pub on_remittance: Option<Handler<RemittanceEvent>>,
}

impl EventHooks {
    pub fn on_order_status<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderStatusEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_status = Some(Arc::new(f));
        self
    }

    pub fn on_payout<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PayoutEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_payout = Some(Arc::new(f));
        self
    }

    pub fn on_remittance<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(RemittanceEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_remittance = Some(Arc::new(f));
        self
    }
}
