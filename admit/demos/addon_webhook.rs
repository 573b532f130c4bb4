//! Mutating admission webhook example
//!
//! Serves the last operation tracker for `Addon` resources over plain HTTP.
//! The API server only talks to webhooks over TLS, so put a terminating proxy
//! in front of it or serve the filter with your own TLS setup.
//!
//! An optional JSON config file may be passed as the first argument.

use std::sync::Arc;

use admit::{Addon, Config, LastOperationTracker, MutatorRouter};
use warp::Filter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_json(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    let router = MutatorRouter::new().mutator(LastOperationTracker::<Addon>::new(config.tracker));

    for rule in router.rules() {
        tracing::info!(?rule, "webhook rule");
    }

    let routes = warp::path(config.webhook.path).and(Arc::new(router).filter());

    tracing::info!(addr = %config.webhook.bind_address, "serving mutating webhook");
    warp::serve(routes).run(config.webhook.bind_address).await;

    Ok(())
}
