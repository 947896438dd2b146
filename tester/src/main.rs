use std::time::Duration;

use clap::Parser;
use collections::CollectionSet;
use poller::Poller;
use serde_json::Value;
use tokio::{signal::ctrl_c, time::sleep};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Polls a sync endpoint and logs every change")]
struct Args {
    /// Base URL of the backend, `/sync` is appended
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(long, default_value_t = 3000)]
    interval_ms: u64,

    /// Comma separated, defaults to every collection
    #[arg(long)]
    collections: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    duration_secs: Option<u64>,
}

fn describe(value: &Value) -> String {
    match value {
        Value::Object(records) => format!("{} records", records.len()),
        other => other.to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let collections = CollectionSet::parse(args.collections.as_deref());

    let poller = Poller::http(&args.url)?
        .with_interval(Duration::from_millis(args.interval_ms))
        .with_collections(collections.clone());

    let subscriptions: Vec<_> = collections
        .iter()
        .map(|collection| {
            poller.subscribe(collection.name(), move |value| {
                info!("{collection} changed: {}", describe(value));
            })
        })
        .collect();

    info!("Watching {} at {}", collections.to_query(), args.url);
    poller.start();

    match args.duration_secs {
        Some(secs) => sleep(Duration::from_secs(secs)).await,
        None => ctrl_c().await?,
    }

    poller.stop();
    for subscription in &subscriptions {
        subscription.unsubscribe();
    }

    info!("Stopped");
    Ok(())
}
