//! # syncstore
//!
//! A client-side state container that mirrors remote CRUD services into a
//! normalized record cache.
//!
//! Point a [`Store`] at anything implementing [`ServiceClient`] and it keeps
//! one [`ServiceCache`] per service: call a method, and the response — a
//! single record, a paginated page, or a deletion receipt — is folded into
//! `records`, a map keyed by each record's identifier field. Subscribe a
//! service to its real-time event stream and mutations committed elsewhere
//! land in the same cache without a refetch. Failed calls are forwarded
//! verbatim to a caller-supplied hook; the store never interprets errors.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use syncstore::{MemoryClient, Params, Store};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), syncstore::ServiceError> {
//!     let client = Arc::new(MemoryClient::new());
//!     client.register("messages");
//!
//!     let store = Store::new(client);
//!     let messages = store.service("messages");
//!     messages.watch(); // mirror real-time events into the cache
//!
//!     let created = messages.create(json!({ "text": "hello" }), Params::new()).await?;
//!     let page = messages.find(Params::new()).await?;
//!     assert_eq!(page["total"], 1);
//!
//!     // Both calls have already been reduced into the cache.
//!     let bucket = messages.state().unwrap();
//!     assert_eq!(bucket.record(created["id"].as_i64().unwrap()), Some(&created));
//!     Ok(())
//! }
//! ```

// ── Core modules ──────────────────────────────────────────────────────────────
pub mod cache;
pub mod client;
pub mod store;

// ── Bundled client implementations ────────────────────────────────────────────
pub mod memory;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheState, RecordId, ServiceCache};
pub use client::{
    CallArgs, CallFuture, EventKind, Params, ServiceClient, ServiceError, ServiceEvent,
    ServiceMethod,
};
pub use memory::MemoryClient;
pub use store::{Action, CallFailure, ErrorHook, ServiceHandle, Store, StoreBuilder};
