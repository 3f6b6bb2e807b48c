//! Tracing setup.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Environment;

/// Directives used when `RUST_LOG` is unset.
///
/// Workflow fallbacks and unknown materials log at `warn`, so they stay
/// visible in every environment.
pub fn default_filter(env: &Environment) -> &'static str {
    match env {
        Environment::Dev => "renovation_estimator=debug,tower_http=debug,info",
        Environment::Staging => "renovation_estimator=debug,tower_http=info,info",
        Environment::Prod => "renovation_estimator=info,tower_http=warn,warn",
    }
}

/// Install the global subscriber: JSON lines in prod, pretty output elsewhere.
///
/// Fails when a subscriber is already installed.
pub fn init_logging(env: &Environment) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(env)));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(env.is_dev())
        .with_line_number(env.is_dev());

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if env.is_prod() {
        registry.with(fmt_layer.json()).try_init()
    } else {
        registry.with(fmt_layer.pretty()).try_init()
    };
    installed.context("Failed to install tracing subscriber")?;

    tracing::info!(env = ?env, "Logging initialized");
    Ok(())
}
