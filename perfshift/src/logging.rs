//! Logging configuration for perfshift.
//!
//! The crate logs through `tracing`. [`LogConfig`] controls how chatty the
//! pipelines are about individual series; [`setup`] installs a subscriber for
//! applications that do not bring their own.

use tracing::Level;

/// Runtime logging knobs shared by the filter and analysis pipelines.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub base_level: Level,
    /// Log each series as a worker picks it up.
    pub log_series_details: bool,
    /// Log the stage that rejected a series.
    pub log_filter_rejections: bool,
    /// Log counts at the end of a filter or analysis run.
    pub log_summaries: bool,
    /// Test names and revisions longer than this are cut in log fields.
    pub max_field_length: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            base_level: Level::INFO,
            log_series_details: false,
            log_filter_rejections: true,
            log_summaries: true,
            max_field_length: 256,
        }
    }
}

impl LogConfig {
    /// Everything on, long identifiers kept.
    pub fn verbose() -> Self {
        Self {
            base_level: Level::DEBUG,
            log_series_details: true,
            log_filter_rejections: true,
            log_summaries: true,
            max_field_length: 1024,
        }
    }

    /// Only warnings and errors. No per-series or summary events.
    pub fn production() -> Self {
        Self {
            base_level: Level::WARN,
            log_series_details: false,
            log_filter_rejections: false,
            log_summaries: false,
            max_field_length: 128,
        }
    }

    /// Same as the default: summaries and rejections, no per-series detail.
    pub fn balanced() -> Self {
        Self::default()
    }
}

/// Emits a `debug!` event when the configured base level includes debug.
#[macro_export]
macro_rules! log_debug {
    ($config:expr, $($arg:tt)*) => {
        if $config.base_level >= tracing::Level::DEBUG {
            tracing::debug!($($arg)*);
        }
    };
}

/// Emits a `debug!` event when per-series logging is enabled.
#[macro_export]
macro_rules! log_series {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_series_details {
            tracing::debug!($($arg)*);
        }
    };
}

/// Emits a `debug!` event when rejection logging is enabled.
#[macro_export]
macro_rules! log_rejection {
    ($config:expr, $($arg:tt)*) => {
        if $config.log_filter_rejections {
            tracing::debug!($($arg)*);
        }
    };
}

/// Cuts `value` to at most `max_length` bytes on a char boundary and marks
/// the cut.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if max_length >= value.len() {
        return value.to_owned();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// Subscriber installation for binaries and tests.
pub mod setup {
    use tracing::Level;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    /// How log lines are rendered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum OutputFormat {
        #[default]
        Text,
        Json,
    }

    /// What [`init_logging`] installs.
    #[derive(Debug, Clone)]
    pub struct LoggingConfig {
        /// Level for every target other than perfshift.
        pub level: Level,
        /// Level for `perfshift::*` targets.
        pub crate_level: Level,
        pub format: OutputFormat,
        /// Full filter directive string, used instead of the two levels.
        pub directives: Option<String>,
    }

    impl Default for LoggingConfig {
        fn default() -> Self {
            Self {
                level: Level::INFO,
                crate_level: Level::DEBUG,
                format: OutputFormat::Text,
                directives: None,
            }
        }
    }

    impl LoggingConfig {
        /// JSON lines, warnings from dependencies and info from perfshift.
        pub fn production() -> Self {
            Self {
                level: Level::WARN,
                crate_level: Level::INFO,
                format: OutputFormat::Json,
                directives: None,
            }
        }

        /// Text output with debug everywhere.
        pub fn development() -> Self {
            Self {
                level: Level::DEBUG,
                ..Self::default()
            }
        }

        pub fn with_level(mut self, level: Level) -> Self {
            self.level = level;
            self
        }

        pub fn with_crate_level(mut self, level: Level) -> Self {
            self.crate_level = level;
            self
        }

        pub fn with_format(mut self, format: OutputFormat) -> Self {
            self.format = format;
            self
        }

        /// Replaces the level pair with raw `EnvFilter` directives.
        pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
            self.directives = Some(directives.into());
            self
        }

        /// The directive string handed to `EnvFilter`.
        pub fn directive_string(&self) -> String {
            match &self.directives {
                Some(directives) => directives.clone(),
                None => format!(
                    "{},perfshift={}",
                    self.level.as_str().to_lowercase(),
                    self.crate_level.as_str().to_lowercase()
                ),
            }
        }
    }

    /// Installs the global subscriber. `RUST_LOG`, when set and valid, wins
    /// over the configured directives. Fails if a global subscriber is already
    /// installed.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use perfshift::logging::setup::{init_logging, LoggingConfig, OutputFormat};
    ///
    /// init_logging(LoggingConfig::development().with_format(OutputFormat::Json)).unwrap();
    /// ```
    pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(from_env) => from_env,
            Err(_) => EnvFilter::try_new(config.directive_string())?,
        };

        let output = match config.format {
            OutputFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .boxed(),
            OutputFormat::Text => tracing_subscriber::fmt::layer().with_target(true).boxed(),
        };

        tracing_subscriber::registry()
            .with(output.with_filter(filter))
            .try_init()?;
        Ok(())
    }
}
