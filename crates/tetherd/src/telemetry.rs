//! Structured telemetry initialisation.
//!
//! Diagnostics always go to stderr: stdout carries the request stream in the
//! proxy and standalone roles.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, info, subscriber::SetGlobalDefaultError, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use tether_config::{Config, LogFormat};

pub(crate) const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static ACTIVE: OnceCell<TelemetrySettings> = OnceCell::new();

/// Logging settings resolved from the daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    filter: String,
    format: LogFormat,
}

impl TelemetrySettings {
    /// Filter directives applied to every event.
    #[must_use]
    pub fn filter(&self) -> &str {
        &self.filter
    }

    #[must_use]
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Colour is only used for human-readable output on a terminal.
    fn ansi(&self) -> bool {
        self.format == LogFormat::Compact && io::stderr().is_terminal()
    }
}

impl From<&Config> for TelemetrySettings {
    fn from(config: &Config) -> Self {
        Self {
            filter: config.log_filter().trim().to_owned(),
            format: config.log_format(),
        }
    }
}

/// Settings governing the process-wide subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryHandle {
    active: TelemetrySettings,
}

impl TelemetryHandle {
    /// Settings of the subscriber that is actually installed, which may
    /// predate the configuration passed to the latest call.
    #[must_use]
    pub fn active(&self) -> &TelemetrySettings {
        &self.active
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// Offending directives.
        filter: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global subscriber described by `config` on first use.
///
/// Later calls keep the installed subscriber and report its settings; a
/// configuration asking for different settings is logged and ignored.
///
/// # Errors
///
/// Fails when the filter does not parse or a subscriber was installed
/// outside this function.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    let requested = TelemetrySettings::from(config);
    let active = ACTIVE.get_or_try_init(|| {
        install_subscriber(&requested)?;
        info!(
            target: TELEMETRY_TARGET,
            filter = %requested.filter,
            format = %requested.format,
            socket = %config.daemon_socket(),
            "telemetry ready"
        );
        Ok::<_, TelemetryError>(requested.clone())
    })?;
    if *active != requested {
        warn!(
            target: TELEMETRY_TARGET,
            requested_filter = %requested.filter,
            requested_format = %requested.format,
            "telemetry already configured; keeping active settings"
        );
    }
    Ok(TelemetryHandle {
        active: active.clone(),
    })
}

fn build_filter(settings: &TelemetrySettings) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&settings.filter).map_err(|error| TelemetryError::Filter {
        filter: settings.filter.clone(),
        message: error.to_string(),
    })
}

fn install_subscriber(settings: &TelemetrySettings) -> Result<(), TelemetryError> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(build_filter(settings)?)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(settings.ansi())
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match settings.format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config(filter: &str, format: LogFormat) -> Config {
        Config {
            log_filter: filter.to_owned(),
            log_format: format,
            ..Config::default()
        }
    }

    #[rstest]
    #[case(" tetherd=debug ", LogFormat::Compact, "tetherd=debug")]
    #[case("warn", LogFormat::Json, "warn")]
    fn settings_follow_the_configuration(
        #[case] filter: &str,
        #[case] format: LogFormat,
        #[case] expected_filter: &str,
    ) {
        let settings = TelemetrySettings::from(&config(filter, format));
        assert_eq!(settings.filter(), expected_filter);
        assert_eq!(settings.format(), format);
    }

    #[test]
    fn json_output_is_never_coloured() {
        assert!(!TelemetrySettings::from(&config("info", LogFormat::Json)).ansi());
    }

    #[test]
    fn rejects_unparseable_filters() {
        let settings = TelemetrySettings::from(&config("tetherd=loudest", LogFormat::Json));
        let error = install_subscriber(&settings).expect_err("filter should not parse");
        assert!(matches!(
            &error,
            TelemetryError::Filter { filter, .. } if filter == "tetherd=loudest"
        ));
        assert!(error.to_string().contains("tetherd=loudest"));
    }

    #[test]
    fn repeated_initialisation_reports_the_installed_settings() {
        let first = initialise(&config("info", LogFormat::Json)).expect("telemetry");
        let second = initialise(&config("trace", LogFormat::Compact)).expect("telemetry");
        assert_eq!(first, second);
    }
}
