//! In-process [`ServiceClient`] backed by plain maps.
//!
//! [`MemoryClient`] is the crate's reference client: every call is served
//! from memory and completes on the first poll, and every mutation is
//! broadcast on the service's event channel exactly like a remote server
//! pushing real-time events. That makes it the substrate for tests, demos,
//! and offline prototyping — a [`Store`](crate::store::Store) wired to a
//! `MemoryClient` exercises the full call/reduce/replay cycle with no
//! network.
//!
//! Behavior in brief:
//!
//! - `find` filters on equality against the query's plain keys, honors
//!   `$skip` and `$limit`, and answers with a paginated envelope
//!   `{ total, limit, skip, data }`. Records come back in id order.
//! - `create` assigns ids counting up from 1 when the data carries none,
//!   and steps the counter past any explicit integer id it sees.
//! - `update` replaces, `patch` shallow-merges (the id field wins over the
//!   patch), `remove` answers with the record it deleted.
//! - Calls to services never [`register`](MemoryClient::register)ed fail
//!   with [`ServiceError::UnknownService`], and their event streams are
//!   born closed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tracing::debug;

use crate::cache::RecordId;
use crate::client::{
    CallArgs, CallFuture, EventKind, ServiceClient, ServiceError, ServiceEvent, ServiceMethod,
};

/// Event channel capacity used when the builder is given nothing else.
const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Configures and builds a [`MemoryClient`].
pub struct MemoryClientBuilder {
    id_field: String,
    event_capacity: usize,
}

impl MemoryClientBuilder {
    fn new() -> Self {
        Self {
            id_field: "id".to_owned(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Sets the field records carry their identifier in (default `"id"`).
    ///
    /// Pair this with the matching store-side setting
    /// ([`StoreBuilder::id_field`](crate::store::StoreBuilder::id_field)) so
    /// both ends key records the same way.
    #[must_use]
    pub fn id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Sets the per-service event channel capacity (default 16, minimum 1).
    ///
    /// Subscribers that fall more than this many events behind observe a
    /// `Lagged` error instead of the missed events.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Builds the client with no services registered.
    pub fn build(self) -> MemoryClient {
        MemoryClient {
            services: RwLock::new(HashMap::new()),
            id_field: self.id_field,
            event_capacity: self.event_capacity,
        }
    }
}

/// An in-memory service registry implementing [`ServiceClient`].
pub struct MemoryClient {
    services: RwLock<HashMap<String, MemoryService>>,
    id_field: String,
    event_capacity: usize,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    /// Creates a client with default configuration and no services.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts configuring a client.
    pub fn builder() -> MemoryClientBuilder {
        MemoryClientBuilder::new()
    }

    /// Registers an empty service. Idempotent: an existing service keeps its
    /// records and its event channel.
    pub fn register(&self, name: impl Into<String>) {
        let name = name.into();
        let mut services = self.write_services();
        services
            .entry(name)
            .or_insert_with(|| MemoryService::new(self.event_capacity));
    }

    /// Registers a service seeded with the given records.
    ///
    /// Seeding is silent — no events are emitted, mirroring a server whose
    /// data predates the connection. Seeds without an id are assigned one.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::BadRequest`] if any seed record is not a
    /// JSON object.
    pub fn register_with(
        &self,
        name: impl Into<String>,
        records: Vec<Value>,
    ) -> Result<(), ServiceError> {
        let name = name.into();
        let mut services = self.write_services();
        let service = services
            .entry(name)
            .or_insert_with(|| MemoryService::new(self.event_capacity));
        for record in records {
            service.insert_seed(record, &self.id_field)?;
        }
        Ok(())
    }

    fn write_services(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<String, MemoryService>> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_services(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, MemoryService>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn perform(
        &self,
        service: &str,
        method: ServiceMethod,
        args: CallArgs,
    ) -> Result<Value, ServiceError> {
        let mut services = self.write_services();
        let state = services
            .get_mut(service)
            .ok_or_else(|| ServiceError::UnknownService {
                service: service.to_owned(),
            })?;
        debug!(service = %service, method = %method, "serving call from memory");
        match method {
            ServiceMethod::Find => Ok(state.find(args.params.query.as_ref())),
            ServiceMethod::Get => state.get(&require_id(method, &args)?, service),
            ServiceMethod::Create => {
                let data = require_data(method, &args)?;
                state.create(data, &self.id_field)
            }
            ServiceMethod::Update => {
                let id = require_id(method, &args)?;
                let data = require_data(method, &args)?;
                state.update(&id, data, &self.id_field, service)
            }
            ServiceMethod::Patch => {
                let id = require_id(method, &args)?;
                let data = require_data(method, &args)?;
                state.patch(&id, data, &self.id_field, service)
            }
            ServiceMethod::Remove => state.remove(&require_id(method, &args)?, service),
        }
    }
}

impl ServiceClient for MemoryClient {
    fn call(&self, service: &str, method: ServiceMethod, args: CallArgs) -> CallFuture {
        // Serve synchronously; the future exists only to satisfy the trait.
        let result = self.perform(service, method, args);
        Box::pin(async move { result })
    }

    fn events(&self, service: &str) -> broadcast::Receiver<ServiceEvent> {
        match self.read_services().get(service) {
            Some(state) => state.events.subscribe(),
            None => closed_receiver(),
        }
    }
}

/// One service's records plus its event channel.
struct MemoryService {
    records: BTreeMap<RecordId, Value>,
    next_id: i64,
    events: broadcast::Sender<ServiceEvent>,
}

impl MemoryService {
    fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            records: BTreeMap::new(),
            next_id: 1,
            events,
        }
    }

    fn insert_seed(&mut self, record: Value, id_field: &str) -> Result<(), ServiceError> {
        let mut record = as_object(record)?;
        let id = self.claim_id(&mut record, id_field);
        self.records.insert(id, Value::Object(record));
        Ok(())
    }

    /// Reads the record's id, assigning and writing in a fresh one when the
    /// data carries none. Keeps `next_id` ahead of every integer id seen.
    fn claim_id(&mut self, record: &mut Map<String, Value>, id_field: &str) -> RecordId {
        match record.get(id_field).and_then(RecordId::from_value) {
            Some(id) => {
                if let RecordId::Int(n) = id {
                    self.next_id = self.next_id.max(n + 1);
                }
                id
            }
            None => {
                let id = RecordId::Int(self.next_id);
                self.next_id += 1;
                record.insert(id_field.to_owned(), id.to_value());
                id
            }
        }
    }

    fn find(&self, query: Option<&Value>) -> Value {
        let filters = query.and_then(Value::as_object);
        let skip = query
            .and_then(|q| q.get("$skip"))
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0);
        let limit = query
            .and_then(|q| q.get("$limit"))
            .and_then(Value::as_i64)
            .map(|l| l.max(0) as usize);

        let matched: Vec<&Value> = self
            .records
            .values()
            .filter(|record| matches_filters(record, filters))
            .collect();
        let total = matched.len();
        let data: Vec<Value> = matched
            .into_iter()
            .skip(skip as usize)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        json!({
            "total": total,
            "limit": limit.map_or(total as i64, |l| l as i64),
            "skip": skip,
            "data": data,
        })
    }

    fn get(&self, id: &RecordId, service: &str) -> Result<Value, ServiceError> {
        self.records.get(id).cloned().ok_or_else(|| not_found(service, id))
    }

    fn create(&mut self, data: Value, id_field: &str) -> Result<Value, ServiceError> {
        let mut record = as_object(data)?;
        let id = self.claim_id(&mut record, id_field);
        let record = Value::Object(record);
        self.records.insert(id, record.clone());
        self.emit(EventKind::Created, record.clone());
        Ok(record)
    }

    fn update(
        &mut self,
        id: &RecordId,
        data: Value,
        id_field: &str,
        service: &str,
    ) -> Result<Value, ServiceError> {
        if !self.records.contains_key(id) {
            return Err(not_found(service, id));
        }
        let mut record = as_object(data)?;
        // The addressed id wins over whatever the replacement carries.
        record.insert(id_field.to_owned(), id.to_value());
        let record = Value::Object(record);
        self.records.insert(id.clone(), record.clone());
        self.emit(EventKind::Updated, record.clone());
        Ok(record)
    }

    fn patch(
        &mut self,
        id: &RecordId,
        data: Value,
        id_field: &str,
        service: &str,
    ) -> Result<Value, ServiceError> {
        let patch = as_object(data)?;
        let Some(existing) = self.records.get_mut(id) else {
            return Err(not_found(service, id));
        };
        if let Some(fields) = existing.as_object_mut() {
            for (key, value) in patch {
                if key != id_field {
                    fields.insert(key, value);
                }
            }
        }
        let record = existing.clone();
        self.emit(EventKind::Patched, record.clone());
        Ok(record)
    }

    fn remove(&mut self, id: &RecordId, service: &str) -> Result<Value, ServiceError> {
        let record = self.records.remove(id).ok_or_else(|| not_found(service, id))?;
        self.emit(EventKind::Removed, record.clone());
        Ok(record)
    }

    fn emit(&self, kind: EventKind, record: Value) {
        // No subscribers is fine.
        let _ = self.events.send(ServiceEvent::new(kind, record));
    }
}

fn matches_filters(record: &Value, filters: Option<&Map<String, Value>>) -> bool {
    let Some(filters) = filters else {
        return true;
    };
    filters
        .iter()
        .filter(|(key, _)| !key.starts_with('$'))
        .all(|(key, expected)| record.get(key) == Some(expected))
}

fn as_object(data: Value) -> Result<Map<String, Value>, ServiceError> {
    match data {
        Value::Object(map) => Ok(map),
        other => Err(ServiceError::BadRequest {
            message: format!("record data must be a JSON object, got {other}"),
        }),
    }
}

fn require_id(method: ServiceMethod, args: &CallArgs) -> Result<RecordId, ServiceError> {
    args.id
        .clone()
        .ok_or(ServiceError::MissingArgument { method, what: "id" })
}

fn require_data(method: ServiceMethod, args: &CallArgs) -> Result<Value, ServiceError> {
    args.data
        .clone()
        .ok_or(ServiceError::MissingArgument {
            method,
            what: "data",
        })
}

fn not_found(service: &str, id: &RecordId) -> ServiceError {
    ServiceError::NotFound {
        service: service.to_owned(),
        id: id.clone(),
    }
}

fn closed_receiver() -> broadcast::Receiver<ServiceEvent> {
    let (sender, receiver) = broadcast::channel(1);
    drop(sender);
    receiver
}
