//! Streams a range of integers out of the server.
//!
//! Run with: cargo run --example unwind
//!
//! Point `GRAPHWIRE_URI` at your server; defaults to
//! `graphwire://localhost:7687`.

use graphwire::{Driver, Query, Value};
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
    let mut session = driver.session();

    let mut stream = session
        .run(
            Query::new("UNWIND range($from, $to) AS n RETURN n")
                .param("from", 1)
                .param("to", 10),
        )
        .await?;

    while let Some(record) = stream.next().await? {
        if let Some(n) = record.get("n").and_then(Value::as_int) {
            println!("n = {n}");
        }
    }

    let summary = stream.summary().await?;
    println!("query type: {:?}", summary.query_type);
    if let Some(elapsed) = summary.consumed_after {
        println!("consumed after {elapsed:?}");
    }

    driver.close().await;
    Ok(())
}
