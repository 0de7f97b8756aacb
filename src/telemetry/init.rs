// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Subscriber setup for supervisor logs.
//!
//! Log lines go to stderr so stdout stays free for command output.

use std::io::{self, IsTerminal};

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Shape of each log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One short line per event.
    Compact,
    /// Full fields and span context.
    Full,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Used when neither `directives` nor `RUST_LOG` is set.
    pub level: Level,
    /// Explicit `EnvFilter` directives. These win over `RUST_LOG`.
    pub directives: Option<String>,
    pub format: LogFormat,
    /// Log span open and close.
    pub span_events: bool,
    /// Prefix events with source file and line.
    pub source_location: bool,
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            directives: None,
            format: LogFormat::Compact,
            span_events: false,
            source_location: false,
            ansi: io::stderr().is_terminal(),
        }
    }
}

impl TelemetryConfig {
    /// Debug level with spans and source locations.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Full,
            span_events: true,
            source_location: true,
            ..Self::default()
        }
    }

    /// Warnings only, no colors.
    pub fn production() -> Self {
        Self {
            level: Level::WARN,
            ansi: false,
            ..Self::default()
        }
    }

    /// Trace-level output restricted to this crate.
    pub fn testing() -> Self {
        Self {
            level: Level::TRACE,
            directives: Some("agentvisor=trace".to_string()),
            format: LogFormat::Full,
            source_location: true,
            ansi: false,
            ..Self::default()
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match &self.directives {
            Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Returned by [`init_telemetry`]; keep it alive until shutdown.
///
/// Dropping it logs a metrics summary at debug level when the `telemetry`
/// feature is enabled.
pub struct TelemetryGuard {
    _private: (),
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "telemetry")]
        {
            let snapshot = super::metrics::GLOBAL_METRICS.snapshot();
            if !snapshot.is_empty() {
                tracing::debug!("{}", snapshot.format_report());
            }
        }
    }
}

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(config.ansi)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_span_events(span_events);
    let layer = match config.format {
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Full => layer.boxed(),
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let default = TelemetryConfig::default();
        assert_eq!(default.level, Level::INFO);
        assert_eq!(default.format, LogFormat::Compact);
        assert!(!default.span_events);

        let development = TelemetryConfig::development();
        assert_eq!(development.level, Level::DEBUG);
        assert_eq!(development.format, LogFormat::Full);
        assert!(development.source_location);

        let production = TelemetryConfig::production();
        assert_eq!(production.level, Level::WARN);
        assert!(!production.ansi);
    }

    #[test]
    fn test_testing_preset_scopes_to_crate() {
        let config = TelemetryConfig::testing();
        assert_eq!(config.level, Level::TRACE);
        assert_eq!(config.directives.as_deref(), Some("agentvisor=trace"));
        assert!(!config.ansi);
    }

    #[test]
    fn test_builder() {
        let config = TelemetryConfig::production()
            .with_level(Level::DEBUG)
            .with_directives("agentvisor::supervisor=debug")
            .with_ansi(true);

        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.directives.as_deref(), Some("agentvisor::supervisor=debug"));
        assert!(config.ansi);
    }
}
