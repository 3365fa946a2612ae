//! Event fanout: built-in state updates first, then user callbacks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::session::Session;

type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Handler = Box<dyn Fn(Arc<Session>, Event) -> BoxFuture + Send + Sync>;

/// User callback registry, populated in the `connect` setup closure before
/// Identify is sent.
#[derive(Default)]
pub struct Handlers {
    map: HashMap<EventKind, Handler>,
    fallback: Option<Handler>,
}

impl Handlers {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one event kind. The last registration for a
    /// kind wins.
    pub fn on<F, Fut>(&mut self, kind: EventKind, handler: F)
    where
        F: Fn(Arc<Session>, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.map.insert(
            kind,
            Box::new(move |session, event| Box::pin(handler(session, event))),
        );
    }

    /// Register the callback invoked for events with no dedicated handler,
    /// including unrecognized event names.
    pub fn on_default<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Arc<Session>, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.fallback = Some(Box::new(move |session, event| {
            Box::pin(handler(session, event))
        }));
    }

    fn handler_for(&self, kind: EventKind) -> Option<&Handler> {
        self.map.get(&kind).or(self.fallback.as_ref())
    }
}

/// Serial dispatch loop for one session.
///
/// The built-in handler mutates the state store before the user callback
/// runs, so callbacks always observe post-event state. Callback errors are
/// logged and never abort the loop.
pub(crate) async fn run(
    session: Arc<Session>,
    mut events: mpsc::Receiver<Event>,
    handlers: Handlers,
) {
    while let Some(event) = events.recv().await {
        session.apply_event(&event);

        if let Some(handler) = handlers.handler_for(event.kind) {
            let name = event.name.clone();
            if let Err(err) = handler(Arc::clone(&session), event).await {
                warn!(event = %name, error = %err, "event handler failed");
            }
        }
    }
    debug!("dispatch loop ended");
}
