use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize tracing with an env-driven filter and a fmt layer.
///
/// `RUST_LOG` overrides the default `pharmproof=info`.
pub fn init() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pharmproof=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
