use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{
    Layer, Registry, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber at INFO unless `RUST_LOG` says otherwise.
///
/// Panics if a global subscriber is already set.
pub fn init_tracing() {
    tracing_subscriber::registry().with(build_layer(LevelFilter::INFO)).init();
}

/// Same as [`init_tracing`] but ignores an already installed subscriber.
///
/// Tests call this from every case, only the first install wins.
pub fn try_init_tracing() {
    let _ = tracing_subscriber::registry().with(build_layer(LevelFilter::INFO)).try_init();
}

/// `RUST_LOG_FORMAT=json` selects JSON lines, anything else the compact format.
fn build_layer(level: LevelFilter) -> BoxedLayer {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_format = var("RUST_LOG_FORMAT")
        .inspect_err(|error| {
            warn!("Failed to read RUST_LOG_FORMAT, falling back to default: {error}")
        })
        .unwrap_or_default();

    match log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    }
}
