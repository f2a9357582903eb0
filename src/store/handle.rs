//! Per-service call surface.
//!
//! A [`ServiceHandle`] binds one service name to a store so call sites read
//! like the remote API itself — `messages.create(…)` rather than assembling
//! an [`Action`](super::Action) by hand. Each method performs the call
//! through [`Store::execute`], so the cache is already updated by the time
//! the response is returned. Handles are cheap to clone and every clone
//! drives the same store.

use serde_json::Value;

use super::{Action, Store};
use crate::cache::{RecordId, ServiceCache};
use crate::client::{CallArgs, Params, ServiceError, ServiceMethod};

/// One service's CRUD surface, bound to a [`Store`].
///
/// Created by [`Store::service`].
#[derive(Clone)]
pub struct ServiceHandle {
    store: Store,
    name: String,
}

impl ServiceHandle {
    pub(super) fn new(store: Store, name: String) -> Self {
        Self { store, name }
    }

    /// The service name this handle addresses.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetches records matching `params` and merges them into the cache.
    ///
    /// # Errors
    ///
    /// Returns the client's error verbatim; the store's error hook has
    /// already seen it.
    pub async fn find(&self, params: Params) -> Result<Value, ServiceError> {
        self.store
            .execute(&self.name, ServiceMethod::Find, CallArgs::find(params))
            .await
    }

    /// Fetches one record by id and merges it into the cache.
    ///
    /// # Errors
    ///
    /// Returns the client's error verbatim; the store's error hook has
    /// already seen it.
    pub async fn get(
        &self,
        id: impl Into<RecordId>,
        params: Params,
    ) -> Result<Value, ServiceError> {
        self.store
            .execute(&self.name, ServiceMethod::Get, CallArgs::get(id, params))
            .await
    }

    /// Creates a record and merges the service's response into the cache.
    ///
    /// # Errors
    ///
    /// Returns the client's error verbatim; the store's error hook has
    /// already seen it.
    pub async fn create(&self, data: Value, params: Params) -> Result<Value, ServiceError> {
        self.store
            .execute(
                &self.name,
                ServiceMethod::Create,
                CallArgs::create(data, params),
            )
            .await
    }

    /// Replaces a record wholesale and merges the result into the cache.
    ///
    /// # Errors
    ///
    /// Returns the client's error verbatim; the store's error hook has
    /// already seen it.
    pub async fn update(
        &self,
        id: impl Into<RecordId>,
        data: Value,
        params: Params,
    ) -> Result<Value, ServiceError> {
        self.store
            .execute(
                &self.name,
                ServiceMethod::Update,
                CallArgs::update(id, data, params),
            )
            .await
    }

    /// Merges fields into a record and merges the result into the cache.
    ///
    /// # Errors
    ///
    /// Returns the client's error verbatim; the store's error hook has
    /// already seen it.
    pub async fn patch(
        &self,
        id: impl Into<RecordId>,
        data: Value,
        params: Params,
    ) -> Result<Value, ServiceError> {
        self.store
            .execute(
                &self.name,
                ServiceMethod::Patch,
                CallArgs::patch(id, data, params),
            )
            .await
    }

    /// Deletes a record and drops it from the cache.
    ///
    /// # Errors
    ///
    /// Returns the client's error verbatim; the store's error hook has
    /// already seen it.
    pub async fn remove(
        &self,
        id: impl Into<RecordId>,
        params: Params,
    ) -> Result<Value, ServiceError> {
        self.store
            .execute(
                &self.name,
                ServiceMethod::Remove,
                CallArgs::remove(id, params),
            )
            .await
    }

    /// Starts the call fire-and-forget; the response (or failure) feeds back
    /// into the store when it completes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch(&self, method: ServiceMethod, args: CallArgs) {
        self.store.dispatch(Action::Call {
            service: self.name.clone(),
            method,
            args,
        });
    }

    /// Starts mirroring this service's real-time events into the cache.
    ///
    /// Idempotent; must be called from within a Tokio runtime.
    pub fn watch(&self) {
        self.store.watch_events(&self.name);
    }

    /// Returns a clone of this service's cache bucket, if any reduction has
    /// created it yet.
    pub fn state(&self) -> Option<ServiceCache> {
        self.store.with_state(|s| s.service(&self.name).cloned())
    }
}
