//! Sentra Trade-Decision Core
//!
//! This library provides the decision pipeline of an automated trading
//! system: it turns enriched market observations into admit/reject
//! decisions, sized orders, supervised trade lifecycles, and a
//! self-adjusting acceptance threshold. Venue connectivity, prediction
//! models and feature extraction are supplied by the embedding binary
//! through the traits in [`domain`].

pub mod application;
pub mod config;
pub mod domain;
pub mod persistence;

/// Install the global tracing subscriber. Honors `RUST_LOG`, defaults
/// to `info`. Call once from the embedding binary before starting the
/// engine.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
