use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    EscrowDisputedEvent,
    EscrowRefundedEvent,
    EscrowReleasedEvent,
    EventHandler,
    EventProducer,
    Handler,
};

pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventProducers {
    pub escrow_released_producer: Vec<EventProducer<EscrowReleasedEvent>>,
    pub escrow_refunded_producer: Vec<EventProducer<EscrowRefundedEvent>>,
    pub escrow_disputed_producer: Vec<EventProducer<EscrowDisputedEvent>>,
}

impl EventProducers {
    pub async fn publish_released(&self, event: EscrowReleasedEvent) {
        for producer in &self.escrow_released_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_refunded(&self, event: EscrowRefundedEvent) {
        for producer in &self.escrow_refunded_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_disputed(&self, event: EscrowDisputedEvent) {
        for producer in &self.escrow_disputed_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_escrow_released: Option<EventHandler<EscrowReleasedEvent>>,
    pub on_escrow_refunded: Option<EventHandler<EscrowRefundedEvent>>,
    pub on_escrow_disputed: Option<EventHandler<EscrowDisputedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_escrow_released = hooks.on_escrow_released.map(|f| EventHandler::new(buffer_size, f));
        let on_escrow_refunded = hooks.on_escrow_refunded.map(|f| EventHandler::new(buffer_size, f));
        let on_escrow_disputed = hooks.on_escrow_disputed.map(|f| EventHandler::new(buffer_size, f));
        Self { on_escrow_released, on_escrow_refunded, on_escrow_disputed }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_escrow_released {
            result.escrow_released_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_escrow_refunded {
            result.escrow_refunded_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_escrow_disputed {
            result.escrow_disputed_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_escrow_released {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_escrow_refunded {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_escrow_disputed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_escrow_released: Option<Handler<EscrowReleasedEvent>>,
    pub on_escrow_refunded: Option<Handler<EscrowRefundedEvent>>,
    pub on_escrow_disputed: Option<Handler<EscrowDisputedEvent>>,
}

impl EventHooks {
    pub fn on_escrow_released<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(EscrowReleasedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_escrow_released = Some(Arc::new(f));
        self
    }

    pub fn on_escrow_refunded<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(EscrowRefundedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_escrow_refunded = Some(Arc::new(f));
        self
    }

    pub fn on_escrow_disputed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(EscrowDisputedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_escrow_disputed = Some(Arc::new(f));
        self
    }
}
