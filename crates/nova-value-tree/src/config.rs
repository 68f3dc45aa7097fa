use std::{path::Path, sync::Once, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::options::{NumberBase, ValueFormatterOptions};

static TRACING_INIT: Once = Once::new();

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueTreeConfig {
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub formatting: FormattingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ValueTreeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationConfig {
    /// Budget for a single request, measured from submission.
    #[serde(default = "EvaluationConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of children requested from a language evaluator in one call.
    #[serde(default = "EvaluationConfig::default_children_batch_size")]
    pub children_batch_size: usize,

    /// Threads used to deliver completions of non-blocking requests.
    #[serde(default = "EvaluationConfig::default_callback_threads")]
    pub callback_threads: usize,
}

impl EvaluationConfig {
    fn default_timeout_ms() -> u64 {
        5_000
    }

    fn default_children_batch_size() -> usize {
        256
    }

    fn default_callback_threads() -> usize {
        2
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_children_batch_size(mut self, size: usize) -> Self {
        self.children_batch_size = size;
        self
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            children_batch_size: Self::default_children_batch_size(),
            callback_threads: Self::default_callback_threads(),
        }
    }
}

/// Defaults for [`ValueFormatterOptions`] when the caller has no preference of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormattingConfig {
    #[serde(default = "FormattingConfig::default_max_string_len")]
    pub max_string_len: usize,
    #[serde(default)]
    pub digit_separators: bool,
    #[serde(default)]
    pub number_base: NumberBase,
}

impl FormattingConfig {
    fn default_max_string_len() -> usize {
        80
    }

    pub fn value_options(&self) -> ValueFormatterOptions {
        ValueFormatterOptions::default()
            .with_max_string_len(self.max_string_len)
            .with_digit_separators(self.digit_separators)
            .with_number_base(self.number_base)
    }
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            max_string_len: Self::default_max_string_len(),
            digit_separators: false,
            number_base: NumberBase::Decimal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    /// Filter built from `level`, with `RUST_LOG` directives appended when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let config_directives = Self::normalize_level_directives(&self.level);
        let fallback = || {
            tracing_subscriber::EnvFilter::try_new(&config_directives).unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::default()
                    .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
            })
        };

        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match env_directives {
            Some(env_directives) => {
                tracing_subscriber::EnvFilter::try_new(format!("{config_directives},{env_directives}"))
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(&env_directives))
                    .unwrap_or_else(|_| fallback())
            }
            None => fallback(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

/// Install a global `tracing` subscriber writing to stderr.
///
/// Safe to call multiple times; only the first call has an effect, and an already
/// installed global subscriber is left in place.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(config.env_filter())
            .with_writer(std::io::stderr);
        let _ = if config.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
    });
}
