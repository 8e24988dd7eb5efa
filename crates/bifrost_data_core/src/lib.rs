pub mod config;
pub mod mediawiki;
pub mod reagents;
pub mod redirects;
pub mod runtime;

/// Install the stderr tracing subscriber. Stdout stays reserved for command output.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bifrost_data=info,bifrost_data_core=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}
