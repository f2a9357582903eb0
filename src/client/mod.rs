//! Remote service boundary — the CRUD method set, call arguments, errors,
//! and real-time events.
//!
//! This module defines the contract between the store and whatever actually
//! talks to the remote data source: the [`ServiceClient`] trait. A client
//! exposes one dynamic entry point, [`ServiceClient::call`], covering the six
//! per-service CRUD methods, plus a per-service real-time event stream via
//! [`ServiceClient::events`]. The binding treats both as opaque: it never
//! inspects how the client moves bytes, only the JSON values that come back.
//!
//! | Method   | Arguments           | Typical response              |
//! |----------|---------------------|-------------------------------|
//! | `find`   | params              | page of records or bare array |
//! | `get`    | id, params          | one record                    |
//! | `create` | data, params        | the created record            |
//! | `update` | id, data, params    | the replaced record           |
//! | `patch`  | id, data, params    | the merged record             |
//! | `remove` | id, params          | the removed record            |

use std::fmt;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::cache::RecordId;

/// A per-service CRUD method.
///
/// Standard methods are unit variants for zero-cost comparison; there is no
/// escape hatch for non-standard methods — the remote contract is exactly
/// these six.
///
/// # Examples
///
/// ```
/// use syncstore::client::ServiceMethod;
///
/// let method: ServiceMethod = "find".parse().unwrap();
/// assert_eq!(method, ServiceMethod::Find);
/// assert_eq!(method.as_str(), "find");
/// assert!(!method.is_mutation());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceMethod {
    /// `find` — fetch a page of records matching a query.
    Find,
    /// `get` — fetch one record by identifier.
    Get,
    /// `create` — store a new record.
    Create,
    /// `update` — replace one record wholly.
    Update,
    /// `patch` — merge changes into one record.
    Patch,
    /// `remove` — delete one record.
    Remove,
}

impl ServiceMethod {
    /// Returns the method as its lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Remove => "remove",
        }
    }

    /// Returns `true` if this method operates on a single identified record.
    ///
    /// Record-targeting methods: `get`, `update`, `patch`, `remove`.
    pub fn targets_record(self) -> bool {
        matches!(self, Self::Get | Self::Update | Self::Patch | Self::Remove)
    }

    /// Returns `true` if this method changes remote state.
    ///
    /// Mutations: `create`, `update`, `patch`, `remove`.
    pub fn is_mutation(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Patch | Self::Remove)
    }
}

impl fmt::Display for ServiceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceMethod {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "find" => Ok(Self::Find),
            "get" => Ok(Self::Get),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "patch" => Ok(Self::Patch),
            "remove" => Ok(Self::Remove),
            other => Err(ServiceError::UnknownMethod {
                method: other.to_owned(),
            }),
        }
    }
}

impl AsRef<str> for ServiceMethod {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Call parameters forwarded to the service.
///
/// The binding interprets only the `query` object (the service may read
/// operators such as `"$limit"` and `"$skip"` from it); anything else a
/// transport needs rides outside this type.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use syncstore::client::Params;
///
/// let params = Params::with_query(json!({ "$limit": 10, "room": "lobby" }));
/// assert!(params.query.is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Query object forwarded verbatim to the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
}

impl Params {
    /// Creates empty parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates parameters carrying the given query object.
    pub fn with_query(query: Value) -> Self {
        Self { query: Some(query) }
    }
}

/// The arguments of one service call — the explicit form of a variadic
/// `(service, method, ...args)` invocation.
///
/// Which fields are populated depends on the method; use the per-method
/// constructors to get the shapes right.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    /// Record identifier for methods that target one record.
    pub id: Option<RecordId>,
    /// Payload for `create`, `update`, and `patch`.
    pub data: Option<Value>,
    /// Call parameters (query object and friends).
    pub params: Params,
}

impl CallArgs {
    /// Arguments for `find(params)`.
    pub fn find(params: Params) -> Self {
        Self {
            id: None,
            data: None,
            params,
        }
    }

    /// Arguments for `get(id, params)`.
    pub fn get(id: impl Into<RecordId>, params: Params) -> Self {
        Self {
            id: Some(id.into()),
            data: None,
            params,
        }
    }

    /// Arguments for `create(data, params)`.
    pub fn create(data: Value, params: Params) -> Self {
        Self {
            id: None,
            data: Some(data),
            params,
        }
    }

    /// Arguments for `update(id, data, params)`.
    pub fn update(id: impl Into<RecordId>, data: Value, params: Params) -> Self {
        Self {
            id: Some(id.into()),
            data: Some(data),
            params,
        }
    }

    /// Arguments for `patch(id, data, params)`.
    pub fn patch(id: impl Into<RecordId>, data: Value, params: Params) -> Self {
        Self {
            id: Some(id.into()),
            data: Some(data),
            params,
        }
    }

    /// Arguments for `remove(id, params)`.
    pub fn remove(id: impl Into<RecordId>, params: Params) -> Self {
        Self {
            id: Some(id.into()),
            data: None,
            params,
        }
    }
}

/// Errors produced at the remote service boundary.
///
/// The store forwards these verbatim — no classification, no retry. Variants
/// are `Clone` so a single failure can reach both the awaiting caller and the
/// error hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The named service does not exist on the client.
    #[error("service `{service}` is not registered")]
    UnknownService { service: String },

    /// The method name does not belong to the CRUD method set.
    #[error("unknown service method `{method}`")]
    UnknownMethod { method: String },

    /// The event name does not belong to the real-time event set.
    #[error("unknown service event `{kind}`")]
    UnknownEventKind { kind: String },

    /// No record with the given identifier.
    #[error("no record with id `{id}` in service `{service}`")]
    NotFound { service: String, id: RecordId },

    /// The call was missing a required argument for its method.
    #[error("{method} requires {what}")]
    MissingArgument {
        method: ServiceMethod,
        what: &'static str,
    },

    /// The service rejected the call's payload or query.
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// The transport underneath the client failed.
    #[error("transport error: {message}")]
    Transport { message: String },
}

/// The kind of a real-time service event.
///
/// Services announce every committed mutation as one of these four kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A record was created.
    Created,
    /// A record was replaced wholly.
    Updated,
    /// A record was merged with changes.
    Patched,
    /// A record was deleted.
    Removed,
}

impl EventKind {
    /// Returns the event kind as its lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Patched => "patched",
            Self::Removed => "removed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "patched" => Ok(Self::Patched),
            "removed" => Ok(Self::Removed),
            other => Err(ServiceError::UnknownEventKind {
                kind: other.to_owned(),
            }),
        }
    }
}

/// One real-time push event for a service: what happened, and the record it
/// happened to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEvent {
    /// What kind of mutation the service committed.
    pub kind: EventKind,
    /// The record after the mutation (for `removed`: the record as deleted).
    pub record: Value,
}

impl ServiceEvent {
    /// Creates an event of the given kind for the given record.
    pub fn new(kind: EventKind, record: Value) -> Self {
        Self { kind, record }
    }
}

/// Type-erased, heap-allocated future returned by [`ServiceClient::call`].
///
/// Boxing keeps the trait object-safe so clients can live behind
/// `Arc<dyn ServiceClient>`.
pub type CallFuture = Pin<Box<dyn Future<Output = Result<Value, ServiceError>> + Send>>;

/// A remote-data client: per-service CRUD calls plus per-service real-time
/// events.
///
/// Implementations are shared across Tokio tasks, so they must be
/// `Send + Sync`. The crate ships one implementation,
/// [`MemoryClient`](crate::memory::MemoryClient); network transports plug in
/// by implementing this trait.
pub trait ServiceClient: Send + Sync {
    /// Performs one CRUD call against the named service.
    ///
    /// This is the dynamic dispatch point: `(service, method, args)` selects
    /// what runs remotely, and the response comes back as an opaque JSON
    /// value. Implementations decide what each method means; the store only
    /// normalizes whatever they return.
    fn call(&self, service: &str, method: ServiceMethod, args: CallArgs) -> CallFuture;

    /// Subscribes to the named service's real-time event stream.
    ///
    /// A service that does not exist yields an already-closed receiver, so
    /// consumers can treat "unknown service" and "stream over" uniformly.
    /// Slow receivers may observe [`Lagged`](broadcast::error::RecvError::Lagged)
    /// errors; whether and how to tolerate lag is the subscriber's call.
    fn events(&self, service: &str) -> broadcast::Receiver<ServiceEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── ServiceMethod ─────────────────────────────────────────────────────────

    #[test]
    fn method_round_trips_through_str() {
        for name in ["find", "get", "create", "update", "patch", "remove"] {
            let method: ServiceMethod = name.parse().unwrap();
            assert_eq!(method.as_str(), name);
            assert_eq!(method.to_string(), name);
        }
    }

    #[test]
    fn method_rejects_unknown_names() {
        let err = "destroy".parse::<ServiceMethod>().unwrap_err();
        assert_eq!(
            err,
            ServiceError::UnknownMethod {
                method: "destroy".into()
            }
        );
    }

    #[test]
    fn method_predicates() {
        assert!(!ServiceMethod::Find.targets_record());
        assert!(!ServiceMethod::Create.targets_record());
        assert!(ServiceMethod::Get.targets_record());
        assert!(ServiceMethod::Remove.targets_record());

        assert!(!ServiceMethod::Find.is_mutation());
        assert!(!ServiceMethod::Get.is_mutation());
        assert!(ServiceMethod::Create.is_mutation());
        assert!(ServiceMethod::Patch.is_mutation());
    }

    // ── EventKind ─────────────────────────────────────────────────────────────

    #[test]
    fn event_kind_round_trips_through_str() {
        for name in ["created", "updated", "patched", "removed"] {
            let kind: EventKind = name.parse().unwrap();
            assert_eq!(kind.as_str(), name);
        }
    }

    #[test]
    fn event_kind_rejects_unknown_names() {
        assert!(matches!(
            "renamed".parse::<EventKind>(),
            Err(ServiceError::UnknownEventKind { .. })
        ));
    }

    #[test]
    fn event_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&EventKind::Created).unwrap(), "\"created\"");
        let kind: EventKind = serde_json::from_str("\"removed\"").unwrap();
        assert_eq!(kind, EventKind::Removed);
    }

    // ── CallArgs ──────────────────────────────────────────────────────────────

    #[test]
    fn call_args_shapes_match_methods() {
        let find = CallArgs::find(Params::new());
        assert!(find.id.is_none() && find.data.is_none());

        let get = CallArgs::get(7, Params::new());
        assert_eq!(get.id, Some(7.into()));
        assert!(get.data.is_none());

        let create = CallArgs::create(json!({ "text": "hi" }), Params::new());
        assert!(create.id.is_none());
        assert_eq!(create.data, Some(json!({ "text": "hi" })));

        let update = CallArgs::update("a1", json!({ "text": "hi" }), Params::new());
        assert_eq!(update.id, Some("a1".into()));
        assert!(update.data.is_some());

        let remove = CallArgs::remove(3, Params::new());
        assert_eq!(remove.id, Some(3.into()));
        assert!(remove.data.is_none());
    }

    #[test]
    fn params_serialization_skips_empty_query() {
        let empty = serde_json::to_value(Params::new()).unwrap();
        assert_eq!(empty, json!({}));

        let with_query = serde_json::to_value(Params::with_query(json!({ "done": true }))).unwrap();
        assert_eq!(with_query, json!({ "query": { "done": true } }));
    }
}
