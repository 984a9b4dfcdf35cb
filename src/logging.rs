//! Tracing setup and per-component logging context.
//!
//! The subscriber is installed once by the binary. Library components never
//! touch it; they receive a [`LogContext`] at construction and run their work
//! inside its span, so every event carries the emitting component.

use crate::config::LogFormat;
use anyhow::{anyhow, Result};
use tracing::level_filters::LevelFilter;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// The level filter is read from `LOG_LEVEL` and defaults to `info`.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("LOG_LEVEL")
        .from_env_lossy();

    let (text, json) = match format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(text)
        .with(json)
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}

/// Logging context handed to a component at construction.
#[derive(Debug, Clone)]
pub struct LogContext {
    span: Span,
}

impl LogContext {
    pub fn new(component: &'static str) -> Self {
        Self {
            span: tracing::info_span!("component", name = component),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn in_scope<F: FnOnce() -> T, T>(&self, f: F) -> T {
        self.span.in_scope(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_runs_closure() {
        let log = LogContext::new("test");
        let value = log.in_scope(|| 41 + 1);
        assert_eq!(value, 42);
    }
}
