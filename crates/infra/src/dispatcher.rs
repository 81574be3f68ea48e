//! Fan-out of one event to every configured destination.
//!
//! Destinations run concurrently and in isolation: an error or a panic in one
//! never affects the others, and the aggregate never fails. Whether the caller
//! waits ([`Dispatcher::dispatch_all`]) or not
//! ([`Dispatcher::dispatch_detached`]) is the entry point's choice.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use beacon_events::{AnalyticsEvent, RequestContext};
use futures::FutureExt;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::destination::{Destination, DestinationError};
use crate::remote::truncate_body;

/// Logged error messages are cut at this many characters.
pub const MAX_LOGGED_ERROR_CHARS: usize = 1000;

/// Receives `(destination type, error)` for every failed delivery.
pub type ErrorHandler = Arc<dyn Fn(&str, &DestinationError) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub destination: String,
    pub error: String,
}

/// Outcome of one fan-out, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: Vec<String>,
    pub failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failures.len()
    }

    pub fn all_delivered(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct Dispatcher {
    destinations: Arc<[Arc<dyn Destination>]>,
    error_handler: Option<ErrorHandler>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let described: Vec<String> = self.destinations.iter().map(|d| d.describe()).collect();
        f.debug_struct("Dispatcher")
            .field("destinations", &described)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(destinations: Vec<Arc<dyn Destination>>) -> Self {
        Self {
            destinations: destinations.into(),
            error_handler: None,
        }
    }

    pub fn with_error_handler(
        mut self,
        handler: impl Fn(&str, &DestinationError) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn describe(&self) -> Vec<String> {
        self.destinations.iter().map(|d| d.describe()).collect()
    }

    /// Send to every destination and wait until all of them settled.
    pub async fn dispatch_all(
        &self,
        event: &AnalyticsEvent,
        ctx: &dyn RequestContext,
    ) -> DispatchReport {
        let sends = self.destinations.iter().map(|destination| async move {
            let outcome = send_isolated(destination.as_ref(), event, ctx).await;
            (destination, outcome)
        });

        let mut report = DispatchReport::default();
        for (destination, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => {
                    debug!(
                        destination = %destination.describe(),
                        message_id = %event.message_id,
                        "destination accepted event"
                    );
                    report.delivered.push(destination.destination_type().to_string());
                }
                Err(error) => {
                    self.report_failure(destination.as_ref(), &error);
                    report.failures.push(DispatchFailure {
                        destination: destination.destination_type().to_string(),
                        error: error.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Start the fan-out on the runtime and return at once.
    pub fn dispatch_detached(
        &self,
        event: AnalyticsEvent,
        ctx: Arc<dyn RequestContext>,
    ) -> JoinHandle<DispatchReport> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch_all(&event, ctx.as_ref()).await })
    }

    fn report_failure(&self, destination: &dyn Destination, error: &DestinationError) {
        match &self.error_handler {
            Some(handler) => handler(destination.destination_type(), error),
            None => warn!(
                destination = %destination.describe(),
                error = %truncate_body(&error.to_string(), MAX_LOGGED_ERROR_CHARS),
                "failed to deliver event"
            ),
        }
    }
}

/// Run one send, turning panics (at call time or while polling) into errors.
async fn send_isolated(
    destination: &dyn Destination,
    event: &AnalyticsEvent,
    ctx: &dyn RequestContext,
) -> Result<(), DestinationError> {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| destination.send(event, ctx))) {
        Ok(future) => future,
        Err(panic) => return Err(DestinationError::Panicked(panic_message(panic))),
    };
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(DestinationError::Panicked(panic_message(panic))))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use beacon_core::AnonymousId;
    use beacon_events::HttpRequestContext;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    enum Behaviour {
        FailImmediately,
        FailAfter(Duration),
        SucceedAfter(Duration),
        Panic,
        WaitFor(Arc<Notify>),
    }

    struct Scripted {
        name: &'static str,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
        completed: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour,
                calls: Arc::new(AtomicUsize::new(0)),
                completed: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    #[async_trait]
    impl Destination for Scripted {
        async fn send(
            &self,
            _event: &AnalyticsEvent,
            _ctx: &dyn RequestContext,
        ) -> Result<(), DestinationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let result = match &self.behaviour {
                Behaviour::FailImmediately => Err(DestinationError::rejected("refused")),
                Behaviour::FailAfter(delay) => {
                    tokio::time::sleep(*delay).await;
                    Err(DestinationError::rejected("late failure"))
                }
                Behaviour::SucceedAfter(delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(())
                }
                Behaviour::Panic => panic!("destination bug"),
                Behaviour::WaitFor(notify) => {
                    notify.notified().await;
                    Ok(())
                }
            };
            self.completed.fetch_add(1, Ordering::SeqCst);
            result
        }

        fn destination_type(&self) -> &str {
            self.name
        }

        fn describe(&self) -> String {
            format!("scripted {}", self.name)
        }
    }

    fn fixtures() -> (AnalyticsEvent, HttpRequestContext) {
        let request = http::Request::builder().uri("/").body(()).unwrap();
        (
            AnalyticsEvent::new("page_view", AnonymousId::new("a")),
            HttpRequestContext::from_request(&request, None),
        )
    }

    #[tokio::test]
    async fn failures_are_isolated_and_all_settle() {
        let sync_fail = Scripted::new("sync_fail", Behaviour::FailImmediately);
        let async_fail = Scripted::new("async_fail", Behaviour::FailAfter(Duration::from_millis(50)));
        let ok = Scripted::new("ok", Behaviour::SucceedAfter(Duration::from_millis(20)));
        let dispatcher = Dispatcher::new(vec![sync_fail.clone(), async_fail.clone(), ok.clone()]);

        let (event, ctx) = fixtures();
        let report = dispatcher.dispatch_all(&event, &ctx).await;

        for dest in [&sync_fail, &async_fail, &ok] {
            assert_eq!(dest.calls.load(Ordering::SeqCst), 1, "{}", dest.name);
            assert_eq!(dest.completed.load(Ordering::SeqCst), 1, "{}", dest.name);
        }
        assert_eq!(report.delivered, vec!["ok".to_string()]);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.destination.as_str()).collect();
        assert_eq!(failed, vec!["sync_fail", "async_fail"]);
        assert_eq!(report.attempted(), 3);
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let panicking = Scripted::new("panics", Behaviour::Panic);
        let ok = Scripted::new("ok", Behaviour::SucceedAfter(Duration::ZERO));
        let dispatcher = Dispatcher::new(vec![panicking, ok.clone()]);

        let (event, ctx) = fixtures();
        let report = dispatcher.dispatch_all(&event, &ctx).await;

        assert_eq!(report.delivered, vec!["ok".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("destination bug"));
    }

    #[tokio::test]
    async fn error_handler_receives_type_and_error() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = seen.clone();
        let dispatcher = Dispatcher::new(vec![
            Scripted::new("first", Behaviour::FailImmediately),
            Scripted::new("second", Behaviour::SucceedAfter(Duration::ZERO)),
        ])
        .with_error_handler(move |destination_type, error| {
            sink.lock()
                .unwrap()
                .push(format!("{destination_type}: {error}"));
        });

        let (event, ctx) = fixtures();
        dispatcher.dispatch_all(&event, &ctx).await;

        assert_eq!(*seen.lock().unwrap(), vec!["first: event rejected: refused".to_string()]);
    }

    #[tokio::test]
    async fn detached_dispatch_returns_before_delivery() {
        let gate = Arc::new(Notify::new());
        let slow = Scripted::new("slow", Behaviour::WaitFor(gate.clone()));
        let dispatcher = Dispatcher::new(vec![slow.clone()]);

        let (event, ctx) = fixtures();
        let handle = dispatcher.dispatch_detached(event, Arc::new(ctx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(slow.completed.load(Ordering::SeqCst), 0);
        assert!(!handle.is_finished());

        gate.notify_one();
        let report = handle.await.unwrap();
        assert!(report.all_delivered());
        assert_eq!(slow.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_dispatcher_is_a_no_op() {
        let (event, ctx) = fixtures();
        let report = Dispatcher::default().dispatch_all(&event, &ctx).await;
        assert_eq!(report, DispatchReport::default());
    }
}
