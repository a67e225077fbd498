//! Causal chaining across sessions with bookmarks.
//!
//! Writes a node in one session, then reads it back in a second session
//! seeded with the first session's bookmark, so the read is guaranteed to
//! observe the write even against a cluster.
//!
//! Run with: cargo run --example bookmarks

use graphwire::{Driver, Query, SessionConfig, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), graphwire::Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphwire=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let uri = std::env::var("GRAPHWIRE_URI")
        .unwrap_or_else(|_| "graphwire://localhost:7687".to_string());

    let driver = Driver::connect(&uri).await?;

    let mut writer = driver.session();
    let mut stream = writer
        .run(
            Query::new("CREATE (n {key: $key, value: $value})")
                .param("key", "greeting")
                .param("value", "hello from graphwire"),
        )
        .await?;
    let summary = stream.consume().await?;
    println!("created {} node(s)", summary.counters.nodes_created);

    let Some(bookmark) = writer.last_bookmark() else {
        println!("server returned no bookmark, nothing to chain");
        driver.close().await;
        return Ok(());
    };
    println!("commit bookmark: {bookmark}");

    let mut reader = driver.session_with_config(SessionConfig::new().bookmarks([bookmark]));
    let mut stream = reader
        .run(Query::new("MATCH (n {key: $key}) RETURN n.value AS value").param("key", "greeting"))
        .await?;
    while let Some(record) = stream.next().await? {
        if let Some(value) = record.get("value").and_then(Value::as_str) {
            println!("read back: {value}");
        }
    }

    driver.close().await;
    Ok(())
}
