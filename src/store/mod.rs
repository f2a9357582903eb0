//! The store — a client-side state container bound to a remote-data client.
//!
//! [`Store`] owns one [`CacheState`] and keeps it in sync with a
//! [`ServiceClient`] three ways:
//!
//! - **Calls** — [`Store::dispatch`] with [`Action::Call`] starts a remote
//!   call on a background Tokio task and reduces the response into the cache
//!   when it lands (fire-and-forget); [`Store::execute`] does the same
//!   inline and hands the response back (awaitable). The per-service
//!   [`ServiceHandle`] wraps `execute` in one method per CRUD verb.
//! - **Events** — [`Store::watch_events`] pumps a service's real-time stream
//!   into the cache, so mutations committed elsewhere show up without a
//!   refetch.
//! - **Failures** — errors are forwarded verbatim to the caller-supplied
//!   [`ErrorHook`]; the store never classifies or retries.
//!
//! Readers take snapshots ([`Store::snapshot`], [`Store::with_state`]) and
//! learn about changes through [`Store::subscribe`], a watch channel carrying
//! a revision counter that bumps once per reduction.
//!
//! All concurrency is delegated to Tokio: spawned workers for calls and
//! pumps, a watch channel for change notification. The state lock is plain
//! `std::sync::RwLock`, held only for the duration of one reduction and
//! never across an `.await`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheState, normalize};
use crate::client::{CallArgs, ServiceClient, ServiceError, ServiceEvent, ServiceMethod};

pub mod handle;

pub use handle::ServiceHandle;

/// Identifier field assumed when the builder is given nothing else.
const DEFAULT_ID_FIELD: &str = "id";

/// An action accepted by [`Store::dispatch`].
///
/// The four variants are the store's complete input vocabulary: start a
/// call, reduce a response, report a failure, replay an event. `Call` is the
/// one consumers normally dispatch; the other three exist so the feedback
/// half of the cycle is expressible (and testable) without a client round
/// trip.
#[derive(Debug, Clone)]
pub enum Action {
    /// Start a remote call; the response (or failure) feeds back into the
    /// store when the call completes.
    Call {
        service: String,
        method: ServiceMethod,
        args: CallArgs,
    },
    /// Reduce a successful response into the cache.
    CallSucceeded {
        service: String,
        method: ServiceMethod,
        response: Value,
    },
    /// Forward a failed call to the error hook.
    CallFailed {
        service: String,
        method: ServiceMethod,
        error: ServiceError,
    },
    /// Replay one real-time event into the cache.
    Event {
        service: String,
        event: ServiceEvent,
    },
}

/// Everything the error hook learns about one failed call.
#[derive(Debug, Clone)]
pub struct CallFailure {
    /// Service the call addressed.
    pub service: String,
    /// Method that failed.
    pub method: ServiceMethod,
    /// The client's error, forwarded verbatim.
    pub error: ServiceError,
}

/// Type-erased, reference-counted callback observing failed calls.
///
/// Stored behind `Arc<dyn Fn(…)>` so the hook can be invoked from any
/// worker task. Built for you by [`StoreBuilder::on_error`].
pub type ErrorHook = Arc<dyn Fn(&CallFailure) + Send + Sync + 'static>;

/// Configures and builds a [`Store`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use syncstore::{MemoryClient, Store};
///
/// let store = Store::builder(Arc::new(MemoryClient::new()))
///     .id_field("_id")
///     .id_field_for("legacy-users", "uuid")
///     .on_error(|failure| eprintln!("{}: {}", failure.service, failure.error))
///     .build();
/// ```
pub struct StoreBuilder {
    client: Arc<dyn ServiceClient>,
    id_field: String,
    id_overrides: HashMap<String, String>,
    on_error: Option<ErrorHook>,
}

impl StoreBuilder {
    fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self {
            client,
            id_field: DEFAULT_ID_FIELD.to_owned(),
            id_overrides: HashMap::new(),
            on_error: None,
        }
    }

    /// Sets the identifier field records are keyed by (default `"id"`).
    #[must_use]
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Overrides the identifier field for one service.
    ///
    /// Services without an override use the store-wide field.
    #[must_use]
    pub fn id_field_for(mut self, service: impl Into<String>, field: impl Into<String>) -> Self {
        self.id_overrides.insert(service.into(), field.into());
        self
    }

    /// Installs the error hook invoked once per failed call.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CallFailure) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Builds the store.
    pub fn build(self) -> Store {
        let (revision, _) = watch::channel(0);
        info!(id_field = %self.id_field, "store created");
        Store {
            inner: Arc::new(StoreInner {
                client: self.client,
                state: RwLock::new(CacheState::new()),
                revision,
                on_error: self.on_error,
                id_field: self.id_field,
                id_overrides: self.id_overrides,
                pumps: Mutex::new(HashSet::new()),
            }),
        }
    }
}

/// The state container. Cheap to clone — clones share one cache.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use serde_json::json;
/// use syncstore::{MemoryClient, Params, Store};
///
/// # async fn example() -> Result<(), syncstore::ServiceError> {
/// let client = Arc::new(MemoryClient::new());
/// client.register("messages");
///
/// let store = Store::new(client);
/// let messages = store.service("messages");
/// messages.watch();
///
/// messages.create(json!({ "text": "hello" }), Params::new()).await?;
/// assert!(store.with_state(|s| s.service("messages").is_some()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    client: Arc<dyn ServiceClient>,
    state: RwLock<CacheState>,
    revision: watch::Sender<u64>,
    on_error: Option<ErrorHook>,
    id_field: String,
    id_overrides: HashMap<String, String>,
    // Services that already have an event pump running.
    pumps: Mutex<HashSet<String>>,
}

impl Store {
    /// Creates a store over the given client with default configuration.
    pub fn new(client: Arc<dyn ServiceClient>) -> Self {
        Self::builder(client).build()
    }

    /// Starts configuring a store over the given client.
    pub fn builder(client: Arc<dyn ServiceClient>) -> StoreBuilder {
        StoreBuilder::new(client)
    }

    /// Returns the bound call surface for one service.
    pub fn service(&self, name: impl Into<String>) -> ServiceHandle {
        ServiceHandle::new(self.clone(), name.into())
    }

    /// Dispatches an action, fire-and-forget.
    ///
    /// `Call` spawns a worker task that performs the remote call and feeds
    /// the outcome back into the store, so it must be dispatched from within
    /// a Tokio runtime. The other variants reduce (or report) synchronously
    /// on the calling thread.
    pub fn dispatch(&self, action: Action) {
        match action {
            Action::Call {
                service,
                method,
                args,
            } => {
                debug!(service = %service, method = %method, "dispatching service call");
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    match inner.client.call(&service, method, args).await {
                        Ok(response) => inner.apply_response(&service, method, &response),
                        Err(err) => inner.report_failure(service, method, err),
                    }
                });
            }
            Action::CallSucceeded {
                service,
                method,
                response,
            } => self.inner.apply_response(&service, method, &response),
            Action::CallFailed {
                service,
                method,
                error,
            } => self.inner.report_failure(service, method, error),
            Action::Event { service, event } => self.inner.apply_event(&service, &event),
        }
    }

    /// Performs one remote call, reduces the response into the cache, and
    /// returns it.
    ///
    /// The awaitable twin of dispatching [`Action::Call`]: same reduction,
    /// same failure reporting, but the caller also gets the outcome.
    ///
    /// # Errors
    ///
    /// Returns the client's error verbatim. The error hook has already seen
    /// it by the time this returns.
    pub async fn execute(
        &self,
        service: &str,
        method: ServiceMethod,
        args: CallArgs,
    ) -> Result<Value, ServiceError> {
        match self.inner.client.call(service, method, args).await {
            Ok(response) => {
                self.inner.apply_response(service, method, &response);
                Ok(response)
            }
            Err(err) => {
                self.inner
                    .report_failure(service.to_owned(), method, err.clone());
                Err(err)
            }
        }
    }

    /// Starts mirroring a service's real-time events into the cache.
    ///
    /// Spawns at most one live pump task per service (calling this while
    /// that pump runs is a no-op), so it must be called from within a Tokio
    /// runtime. The subscription is taken before this returns; events
    /// committed afterwards are not missed. The pump holds only a weak
    /// reference to the store and stops when the store is dropped or the
    /// client closes the stream; a stopped pump frees its slot, and calling
    /// this again then starts a fresh one. A stream that is already closed
    /// when this is called — typically a service the client does not know —
    /// is not watched at all; call again once the service exists.
    pub fn watch_events(&self, service: &str) {
        {
            let mut pumps = lock_or_recover(&self.inner.pumps);
            if !pumps.insert(service.to_owned()) {
                return;
            }
        }
        // Subscribe before spawning so no event can slip past the pump.
        let mut events = self.inner.client.events(service);
        match events.try_recv() {
            // An event squeezed in between subscribing and here.
            Ok(event) => self.inner.apply_event(service, &event),
            Err(broadcast::error::TryRecvError::Closed) => {
                // A dead stream must not hold the slot, or the watch could
                // never be re-armed once the service appears.
                lock_or_recover(&self.inner.pumps).remove(service);
                warn!(service = %service, "event stream already closed, not watching");
                return;
            }
            Err(_) => {}
        }
        let store = Arc::downgrade(&self.inner);
        let service = service.to_owned();
        tokio::spawn(run_event_pump(store, service, events));
    }

    /// Subscribes to change notifications.
    ///
    /// The receiver yields a revision counter that bumps once per reduction;
    /// await [`changed`](watch::Receiver::changed) and then read a fresh
    /// snapshot. Subscribers only see changes made after they subscribe.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Returns the current revision (0 until the first reduction).
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Returns a clone of the entire cache.
    pub fn snapshot(&self) -> CacheState {
        self.inner.read_state().clone()
    }

    /// Runs a closure against the cache without cloning it.
    pub fn with_state<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
        f(&self.inner.read_state())
    }
}

impl StoreInner {
    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, CacheState> {
        // A panicking holder can at worst leave a page partially merged,
        // which is still a structurally valid cache, so recover instead of
        // poisoning every later access.
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn id_field_of(&self, service: &str) -> &str {
        self.id_overrides
            .get(service)
            .map(String::as_str)
            .unwrap_or(&self.id_field)
    }

    fn apply_response(&self, service: &str, method: ServiceMethod, response: &Value) {
        let id_field = self.id_field_of(service);
        {
            let mut state = self.write_state();
            normalize::apply_response(state.service_mut(service), method, response, id_field);
        }
        self.revision.send_modify(|rev| *rev += 1);
        debug!(service = %service, method = %method, "reduced service response");
    }

    fn apply_event(&self, service: &str, event: &ServiceEvent) {
        let id_field = self.id_field_of(service);
        {
            let mut state = self.write_state();
            normalize::apply_event(state.service_mut(service), event, id_field);
        }
        self.revision.send_modify(|rev| *rev += 1);
        debug!(service = %service, kind = %event.kind, "replayed service event");
    }

    fn report_failure(&self, service: String, method: ServiceMethod, error: ServiceError) {
        error!(service = %service, method = %method, error = %error, "service call failed");
        if let Some(hook) = &self.on_error {
            hook(&CallFailure {
                service,
                method,
                error,
            });
        }
    }
}

/// Forwards one service's event stream into the store until either side
/// goes away.
async fn run_event_pump(
    store: Weak<StoreInner>,
    service: String,
    mut events: broadcast::Receiver<ServiceEvent>,
) {
    debug!(service = %service, "event pump started");
    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(inner) = store.upgrade() else {
                    break;
                };
                inner.apply_event(&service, &event);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(service = %service, missed, "event stream lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    // Free the slot so a later watch_events can start a fresh pump.
    if let Some(inner) = store.upgrade() {
        lock_or_recover(&inner.pumps).remove(&service);
    }
    debug!(service = %service, "event pump stopped");
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
