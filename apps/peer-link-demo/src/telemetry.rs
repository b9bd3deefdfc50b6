use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "info,peer_link=debug";

/// Installs the fmt subscriber.
pub fn init_tracing(filter: Option<&str>) {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact();
    Registry::default()
        .with(env_filter(filter))
        .with(fmt_layer)
        .init();
}

/// An explicit filter wins over `RUST_LOG`; anything unparsable falls back to
/// [`DEFAULT_FILTER`].
fn env_filter(filter: Option<&str>) -> EnvFilter {
    match filter {
        Some(directives) => EnvFilter::try_new(directives).ok(),
        None => EnvFilter::try_from_default_env().ok(),
    }
    .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
