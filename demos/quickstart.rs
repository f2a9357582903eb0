//! Two stores sharing one in-memory client: one performs calls, the other
//! mirrors real-time events into its own cache.
//!
//! Run with `cargo run --example quickstart`, and set `RUST_LOG` to see the
//! store's reduction traces (defaults to `syncstore=debug`).

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use syncstore::{MemoryClient, Params, ServiceClient, Store};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), syncstore::ServiceError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syncstore=debug".into()),
        )
        .init();

    let client = Arc::new(MemoryClient::new());
    client.register_with(
        "messages",
        vec![json!({ "id": 1, "text": "seeded before anyone connected" })],
    )?;

    // The writer drives the service; the mirror never calls it and relies
    // entirely on the event stream.
    let writer = Store::new(Arc::clone(&client) as Arc<dyn ServiceClient>);
    let mirror = Store::builder(client)
        .on_error(|failure| {
            eprintln!(
                "call failed: {} {} -> {}",
                failure.service, failure.method, failure.error
            );
        })
        .build();
    mirror.service("messages").watch();

    let messages = writer.service("messages");
    // Pull the seed into the writer's cache, then mutate a few times.
    messages.find(Params::new()).await?;
    let hello = messages
        .create(json!({ "text": "hello" }), Params::new())
        .await?;
    let id = hello["id"].as_i64().unwrap_or_default();
    messages
        .patch(id, json!({ "read": true }), Params::new())
        .await?;

    // Let the mirror's pump drain before comparing caches. The seed record
    // predates the subscription, so only the mutations reach the mirror.
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("writer cache: {:#?}", writer.snapshot());
    println!("mirror cache: {:#?}", mirror.snapshot());
    Ok(())
}
