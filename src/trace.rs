//! Tracing setup for embedding binaries

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` overrides the default `info` level. Call once at startup;
/// calling again is a no-op failure swallowed by `try_init`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}
