// Logging: subscriber configuration and the built-in request logger.

use crate::{Flow, Middleware};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log level filter for [`LogConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Output format for [`LogConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Structured JSON, machine-readable.
    Json,
    /// Colored multi-line output for development.
    Pretty,
    /// Single-line minimal output.
    Compact,
}

/// Subscriber configuration for the engine's `tracing` output.
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// ```no_run
/// use trellis_core::logging::{LogConfig, LogFormat, LogLevel};
///
/// LogConfig::new()
///     .level(LogLevel::Debug)
///     .format(LogFormat::Pretty)
///     .init();
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// Custom filter directive, e.g. `"trellis=debug,hyper=info"`.
    /// Overrides `level` when set.
    pub env_filter: Option<String>,
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Install the global subscriber. Call once at startup.
    pub fn init(self) {
        let filter = match &self.env_filter {
            Some(directive) => EnvFilter::try_new(directive)
                .unwrap_or_else(|_| EnvFilter::new(self.level.as_str())),
            None => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.level.as_str())),
        };

        let registry = tracing_subscriber::registry().with(filter);
        match self.format {
            LogFormat::Json => {
                registry
                    .with(tracing_subscriber::fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                registry
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .init();
            }
            LogFormat::Compact => {
                registry
                    .with(tracing_subscriber::fmt::layer().compact())
                    .init();
            }
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            env_filter: None,
        }
    }
}

/// Structured request logger. Mount globally or on a scope; logs the method
/// and path on entry. Completion status is logged by the serving layer,
/// since middleware runs before the handler sends.
pub fn request_logger() -> Middleware {
    Middleware::named("request_logger", |req, _res| {
        Box::pin(async move {
            let (method, path) = {
                let parts = req.parts();
                (parts.method.clone(), parts.path.clone())
            };
            tracing::info!(%method, %path, "request");
            Ok(Flow::Continue)
        })
    })
}
