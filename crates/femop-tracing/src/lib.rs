//! Shared tracing configuration and profiling-region instrumentation for femop.
//!
//! The helpers in this crate centralise how the benchmark binary, integration
//! tests and library code install `tracing` subscribers, and how operator
//! applications are bracketed in named profiling regions that an external
//! profiler can observe.
//!
//! Regions are ordinary `tracing` spans (target [`REGION_TARGET`]). Without a
//! [`RegionLayer`] installed they only cost a disabled-span check; with one
//! installed every enter/exit is forwarded to a [`Profiler`].

pub mod profiler;
pub mod region;

#[macro_use]
pub mod macros;

use std::env;
use std::sync::Arc;
pub use tracing::{debug, error, info, trace, warn};

use tracing::Subscriber;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Registry};

pub use profiler::{Profiler, RegionEvent, RegionLayer, RegionRecorder, RegionStats, RegionSummary};
pub use region::{ProfilingRegion, RegionColor, REGION_SPAN_NAME, REGION_TARGET};

/// Configuration describing how the shared tracing subscriber should behave.
#[derive(Clone, Debug)]
pub struct TracingConfig {
    /// Optional tracing directives (e.g. `femop_core=debug,info`). When
    /// absent the crate will fall back to `RUST_LOG` and finally to
    /// [`default_directive`](Self::default_directive).
    pub directives: Option<String>,
    /// Fallback directive used when neither `directives` nor `RUST_LOG`
    /// resolve to a valid filter.
    pub default_directive: String,
    /// Controls whether event targets (module paths) appear in output.
    pub include_targets: bool,
    /// Controls ANSI formatting. Disable for CI logs that strip colour codes.
    pub ansi: bool,
    /// Span lifecycle events to emit. Defaults to [`FmtSpan::NONE`].
    pub span_events: FmtSpan,
    /// Output format for the formatter layer.
    pub output: TracingOutput,
    /// Emit a `region_complete` event with the duration of every profiling
    /// region. Off by default: inside the timed loop this is pure overhead.
    pub region_timing: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self::for_local()
    }
}

impl TracingConfig {
    /// Returns a configuration tuned for local development (pretty, ANSI-enabled output).
    pub fn for_local() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: true,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Pretty,
            region_timing: false,
        }
    }

    /// Returns a configuration tuned for CI or log collection environments (JSON, no ANSI).
    pub fn for_ci() -> Self {
        Self {
            directives: None,
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: false,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Json,
            region_timing: false,
        }
    }

    /// Returns a configuration for looking at individual operator applications.
    ///
    /// Debug output for the femop crates, region durations on, compact text.
    pub fn for_profiling() -> Self {
        Self {
            directives: Some("femop_core=debug,femop_backends=debug,info".to_string()),
            default_directive: "info".to_string(),
            include_targets: true,
            ansi: false,
            span_events: FmtSpan::NONE,
            output: TracingOutput::Compact,
            region_timing: true,
        }
    }

    /// Build a configuration using environment hints.
    ///
    /// # Environment Variables
    ///
    /// - `FEMOP_TRACING_PROFILE` - Profile preset: `local` (default), `ci`, or `profiling`
    /// - `FEMOP_TRACING_DIRECTIVES` - Overrides tracing directives
    /// - `FEMOP_TRACING_FORMAT` - Output format: `pretty`, `compact`, or `json`
    /// - `FEMOP_REGION_TIMING` - Log per-region durations: `true` or `false`
    pub fn from_env() -> Self {
        let profile = env::var("FEMOP_TRACING_PROFILE")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase();

        let mut config = match profile.as_str() {
            "ci" => Self::for_ci(),
            "profiling" => Self::for_profiling(),
            _ => Self::for_local(),
        };

        if let Ok(directives) = env::var("FEMOP_TRACING_DIRECTIVES") {
            if !directives.trim().is_empty() {
                config.directives = Some(directives);
            }
        }

        if let Ok(format) = env::var("FEMOP_TRACING_FORMAT") {
            if let Some(parsed) = TracingOutput::from_env_value(&format) {
                config.output = parsed;
                if matches!(config.output, TracingOutput::Json) {
                    config.ansi = false;
                }
            }
        }

        if let Ok(timing) = env::var("FEMOP_REGION_TIMING") {
            config.region_timing = parse_flag(&timing);
        }

        config
    }

    /// Resolve the `EnvFilter` to use for the formatter layer.
    fn resolve_filter(&self) -> Result<EnvFilter, TracingSetupError> {
        let filter = if let Some(directives) = &self.directives {
            EnvFilter::try_new(directives).map_err(|err| TracingSetupError::InvalidFilter(err.to_string()))?
        } else {
            match EnvFilter::try_from_default_env() {
                Ok(filter) => filter,
                Err(_) => EnvFilter::new(self.default_directive.clone()),
            }
        };

        if self.region_timing {
            let directive: Directive = format!("{REGION_TARGET}=trace")
                .parse()
                .map_err(|err| TracingSetupError::InvalidFilter(format!("{err}")))?;
            Ok(filter.add_directive(directive))
        } else {
            Ok(filter)
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1" || value.eq_ignore_ascii_case("yes")
}

/// Errors surfaced when configuring the shared tracing subscriber fails.
#[derive(Debug, thiserror::Error)]
pub enum TracingSetupError {
    /// The provided directive string could not be parsed.
    #[error("invalid tracing directive: {0}")]
    InvalidFilter(String),
    /// Installing the global subscriber failed (usually because one is
    /// already set).
    #[error("failed to install global tracing subscriber: {0}")]
    SubscriberInit(#[source] tracing_subscriber::util::TryInitError),
}

/// Build the formatting layer, filtered by the configured directives.
///
/// The filter is attached to this layer only, so a [`RegionLayer`] composed
/// next to it still sees every region span regardless of log verbosity.
pub fn fmt_layer(config: &TracingConfig) -> Result<Box<dyn Layer<Registry> + Send + Sync>, TracingSetupError> {
    let filter = config.resolve_filter()?;
    let span_events = config.span_events.clone();
    let include_targets = config.include_targets;
    let ansi = config.ansi;

    let layer = match config.output {
        TracingOutput::Compact => tracing_fmt::layer()
            .compact()
            .with_target(include_targets)
            .with_ansi(ansi)
            .with_span_events(span_events)
            .with_filter(filter)
            .boxed(),
        TracingOutput::Pretty => tracing_fmt::layer()
            .pretty()
            .with_target(include_targets)
            .with_ansi(ansi)
            .with_span_events(span_events)
            .with_filter(filter)
            .boxed(),
        TracingOutput::Json => tracing_fmt::layer()
            .json()
            .with_target(include_targets)
            .with_span_events(span_events)
            .with_ansi(false)
            .with_filter(filter)
            .boxed(),
    };

    Ok(layer)
}

/// Build a `tracing` subscriber using the provided configuration.
pub fn build_subscriber(config: &TracingConfig) -> Result<impl Subscriber + Send + Sync, TracingSetupError> {
    Ok(Registry::default().with(fmt_layer(config)?))
}

/// Build a subscriber that also forwards profiling regions to `profiler`.
pub fn build_subscriber_with_profiler<P>(
    config: &TracingConfig,
    profiler: Arc<P>,
) -> Result<impl Subscriber + Send + Sync, TracingSetupError>
where
    P: Profiler + ?Sized + 'static,
{
    Ok(Registry::default()
        .with(fmt_layer(config)?)
        .with(RegionLayer::new(profiler)))
}

/// Install the configured subscriber as the process-wide default.
pub fn init_global_tracing(config: &TracingConfig) -> Result<(), TracingSetupError> {
    build_subscriber(config)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)
}

/// Install the configured subscriber plus a [`RegionLayer`] for `profiler`.
pub fn init_with_profiler<P>(config: &TracingConfig, profiler: Arc<P>) -> Result<(), TracingSetupError>
where
    P: Profiler + ?Sized + 'static,
{
    build_subscriber_with_profiler(config, profiler)?
        .try_init()
        .map_err(TracingSetupError::SubscriberInit)
}

/// Output format choices for the tracing formatter layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TracingOutput {
    Compact,
    Pretty,
    Json,
}

impl TracingOutput {
    fn from_env_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_env(keys: &[&str]) {
        for key in keys {
            env::remove_var(key);
        }
    }

    const ENV_KEYS: &[&str] = &[
        "FEMOP_TRACING_PROFILE",
        "FEMOP_TRACING_FORMAT",
        "FEMOP_TRACING_DIRECTIVES",
        "FEMOP_REGION_TIMING",
        "RUST_LOG",
    ];

    #[test]
    #[serial]
    fn rejects_invalid_directive() {
        reset_env(ENV_KEYS);
        let config = TracingConfig {
            directives: Some("=::invalid".to_string()),
            ..TracingConfig::default()
        };
        let result = build_subscriber(&config);
        assert!(matches!(result, Err(TracingSetupError::InvalidFilter(_))));
    }

    #[test]
    fn setup_error_messages() {
        use std::error::Error as _;

        let err = TracingSetupError::InvalidFilter("=::invalid".to_string());
        assert_eq!(err.to_string(), "invalid tracing directive: =::invalid");
        assert!(err.source().is_none());
    }

    #[test]
    #[serial]
    fn builds_with_defaults() {
        reset_env(ENV_KEYS);
        let config = TracingConfig::default();
        assert!(build_subscriber(&config).is_ok());
    }

    #[test]
    #[serial]
    fn builds_with_profiler_and_region_timing() {
        reset_env(ENV_KEYS);
        let config = TracingConfig::for_profiling();
        let recorder = Arc::new(RegionRecorder::new());
        assert!(build_subscriber_with_profiler(&config, recorder).is_ok());
    }

    #[test]
    #[serial]
    fn from_env_respects_profile_and_format() {
        reset_env(ENV_KEYS);

        env::set_var("FEMOP_TRACING_PROFILE", "ci");
        env::set_var("FEMOP_TRACING_FORMAT", "compact");
        env::set_var("FEMOP_TRACING_DIRECTIVES", "femop_core=debug");

        let config = TracingConfig::from_env();
        assert_eq!(config.directives.as_deref(), Some("femop_core=debug"));
        assert!(!config.ansi);
        assert_eq!(config.output, TracingOutput::Compact);
        assert!(!config.region_timing);

        reset_env(ENV_KEYS);
    }

    #[test]
    #[serial]
    fn from_env_enables_region_timing() {
        reset_env(ENV_KEYS);
        env::set_var("FEMOP_REGION_TIMING", "yes");

        let config = TracingConfig::from_env();
        assert!(config.region_timing);
        assert_eq!(config.output, TracingOutput::Pretty);

        reset_env(ENV_KEYS);
    }

    #[test]
    #[serial]
    fn profiling_profile_from_env() {
        reset_env(ENV_KEYS);
        env::set_var("FEMOP_TRACING_PROFILE", "profiling");

        let config = TracingConfig::from_env();
        assert!(config.region_timing);
        assert!(config.directives.is_some());

        reset_env(ENV_KEYS);
    }

    #[test]
    fn parses_output_format_values() {
        assert_eq!(TracingOutput::from_env_value(" JSON "), Some(TracingOutput::Json));
        assert_eq!(TracingOutput::from_env_value("yaml"), None);
    }
}
