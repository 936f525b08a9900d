pub mod config;
pub mod models;
pub mod store;
pub mod scheduler; // per-day reminder schedule derivation + alarm fan-out
pub mod session; // sign-in/out, profile mutations, local/remote sync
pub mod chat; // doctor-patient message log assembly

use tracing_subscriber::EnvFilter;

/// Initialize tracing for an embedding application. Call once at startup.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("Saqtan core starting v{}", config::APP_VERSION);
}
