//! Awaiting multicast event sources.

use crate::activation::Step;
use crate::cancel::Registration;
use crate::computation::{Computation, Value};
use crate::context;
use crate::gate::Latch;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Identifier of a subscribed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// A minimal multicast event source.
///
/// Handlers fire in subscription order on the emitting thread. The
/// handler list is snapshotted before firing, so a handler may
/// unsubscribe (itself included) while an emit is in progress.
pub struct EventSource<A> {
    handlers: Mutex<Vec<(u64, Handler<A>)>>,
    next_id: AtomicU64,
}

impl<A> EventSource<A> {
    /// Creates an event source with no subscribers.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Subscribes a handler; it fires on every emit until unsubscribed.
    pub fn subscribe(&self, handler: impl Fn(&A) + Send + Sync + 'static) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, Arc::new(handler)));
        HandlerId(id)
    }

    /// Removes a handler. Removing twice is a no-op.
    pub fn unsubscribe(&self, id: HandlerId) {
        let mut handlers = self.handlers.lock();
        if let Some(pos) = handlers.iter().position(|(entry, _)| *entry == id.0) {
            handlers.remove(pos);
        }
    }

    /// Fires all current handlers with `argument`.
    pub fn emit(&self, argument: &A) {
        let snapshot: Vec<Handler<A>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            (*handler)(argument);
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl<A> fmt::Debug for EventSource<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

/// Suspends until `source` fires once, yielding the event argument.
///
/// The subscription removes itself on the first fire. Cancellation of the
/// ambient token removes the handler, runs `cancel_action` when supplied,
/// and resumes the cancellation continuation; a latch keeps the paths
/// exclusive.
pub fn await_event<A: Value + Clone>(
    source: &Arc<EventSource<A>>,
    cancel_action: Option<Arc<dyn Fn() + Send + Sync>>,
) -> Computation<A> {
    let source = Arc::clone(source);
    Computation::new(move |ctxt| {
        if let Some(step) = ctxt.check_cancel() {
            return step;
        }
        let latch = Arc::new(Latch::new());
        let captured_context = context::current();
        let registration: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));
        let handler_id: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        // Hold the id slot across subscription so a handler firing from
        // another thread observes its own id.
        let id = {
            let mut id_slot = handler_id.lock();
            let latch = Arc::clone(&latch);
            let registration = Arc::clone(&registration);
            let handler_id = Arc::clone(&handler_id);
            let source = Arc::clone(&source);
            let captured_context = captured_context.clone();
            let ctxt = ctxt.clone();
            let id = source.clone().subscribe(move |argument: &A| {
                if latch.enter() {
                    if let Some(id) = *handler_id.lock() {
                        source.unsubscribe(id);
                    }
                    let _ = registration.lock().take();
                    let resume = ctxt.clone();
                    let value = argument.clone();
                    ctxt.holder()
                        .post_or_queue_with_trampoline(&captured_context, move || {
                            resume.succeed(value)
                        });
                }
            });
            *id_slot = Some(id);
            id
        };

        let cancel_hook = {
            let latch = Arc::clone(&latch);
            let source = Arc::clone(&source);
            let cancel_action = cancel_action.clone();
            let ctxt = ctxt.clone();
            move || {
                if latch.enter() {
                    source.unsubscribe(id);
                    if let Some(action) = &cancel_action {
                        (**action)();
                    }
                    let resume = ctxt.clone();
                    ctxt.holder()
                        .post_or_queue_with_trampoline(&captured_context, move || {
                            resume.cancel_with_token()
                        });
                }
            }
        };
        let reg = ctxt.token().register(cancel_hook);
        *registration.lock() = Some(reg);
        if latch.is_entered() {
            let _ = registration.lock().take();
        }
        Step::done()
    })
}
