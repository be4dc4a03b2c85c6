use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EventHandler, EventProducer, Handler, JournalCompletedEvent, OrderTransitionEvent};

/// The set of producers handed to the API objects. Each successful transition or completed journal is published to
/// every registered producer.
#[derive(Default, Clone)]
pub struct EventProducers {
    pub order_transition_producer: Vec<EventProducer<OrderTransitionEvent>>,
    pub journal_completed_producer: Vec<EventProducer<JournalCompletedEvent>>,
}

pub struct EventHandlers {
    pub on_order_transition: Option<EventHandler<OrderTransitionEvent>>,
    pub on_journal_completed: Option<EventHandler<JournalCompletedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_order_transition = hooks.on_order_transition.map(|f| EventHandler::new(buffer_size, f));
        let on_journal_completed = hooks.on_journal_completed.map(|f| EventHandler::new(buffer_size, f));
        Self { on_order_transition, on_journal_completed }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_order_transition {
            result.order_transition_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_journal_completed {
            result.journal_completed_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_order_transition {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_journal_completed {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

/// The hooks the notification dispatcher registers at startup.
#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_order_transition: Option<Handler<OrderTransitionEvent>>,
    pub on_journal_completed: Option<Handler<JournalCompletedEvent>>,
}

impl EventHooks {
    pub fn on_order_transition<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(OrderTransitionEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_order_transition = Some(Arc::new(f));
        self
    }

    pub fn on_journal_completed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(JournalCompletedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_journal_completed = Some(Arc::new(f));
        self
    }
}
