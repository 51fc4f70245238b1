use std::{env, time::Duration};

use dynastore_core::MarshallOptions;

/// Store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Namespace prepended to every table name as `prefix.base` (default: none)
    pub table_prefix: Option<String>,
    /// Wait after a new table reports active (default: 5000 ms)
    pub settle_delay: Duration,
    /// Interval between active-state polls (default: 500 ms)
    pub poll_interval: Duration,
    /// Verbose pre/post-call state dumps (default: false)
    pub debug: bool,
    pub marshall: MarshallOptions,
    /// Custom endpoint URL, for local DynamoDB (default: none)
    pub endpoint_url: Option<String>,
    /// AWS region (default: "us-east-1")
    pub region: String,
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DYNASTORE_TABLE_PREFIX` - Table name prefix
    /// - `DYNASTORE_SETTLE_DELAY_MS` - Post-creation settle delay (default: 5000)
    /// - `DYNASTORE_POLL_INTERVAL_MS` - Active-state poll interval (default: 500)
    /// - `DYNASTORE_DEBUG` - Enable debug dumps (default: false)
    /// - `DYNASTORE_CONVERT_EMPTY_VALUES` - Store empty strings as NULL (default: false)
    /// - `DYNASTORE_REMOVE_UNDEFINED_VALUES` - Drop null fields (default: true)
    /// - `AWS_ENDPOINT_URL` - Custom endpoint
    /// - `AWS_REGION` - AWS region (default: "us-east-1")
    pub fn from_env() -> Self {
        let defaults = MarshallOptions::default();
        Self {
            table_prefix: env::var("DYNASTORE_TABLE_PREFIX")
                .ok()
                .filter(|p| !p.is_empty()),
            settle_delay: Duration::from_millis(env_parse("DYNASTORE_SETTLE_DELAY_MS", 5_000)),
            poll_interval: Duration::from_millis(env_parse("DYNASTORE_POLL_INTERVAL_MS", 500)),
            debug: env_parse("DYNASTORE_DEBUG", false),
            marshall: MarshallOptions {
                convert_empty_values: env_parse(
                    "DYNASTORE_CONVERT_EMPTY_VALUES",
                    defaults.convert_empty_values,
                ),
                remove_undefined_values: env_parse(
                    "DYNASTORE_REMOVE_UNDEFINED_VALUES",
                    defaults.remove_undefined_values,
                ),
            },
            endpoint_url: env::var("AWS_ENDPOINT_URL").ok(),
            region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        }
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = Some(prefix.into());
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_marshall_options(mut self, options: MarshallOptions) -> Self {
        self.marshall = options;
        self
    }

    /// Full table name for a base name.
    pub fn table_name(&self, base: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{prefix}.{base}"),
            None => base.to_string(),
        }
    }

    /// Returns a display string for the target environment.
    pub fn target_display(&self) -> String {
        match &self.endpoint_url {
            Some(url) => format!("Local DynamoDB ({})", url),
            None => format!("AWS DynamoDB (region: {})", self.region),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
