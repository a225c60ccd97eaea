use std::time::Duration;

use ledstrip_proto::Brightness;
use serde::Deserialize;

/// Server settings, read from `LEDSTRIP_*` environment variables (nested keys
/// use `__`) layered over an optional config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_led_count")]
    pub led_count: usize,
    #[serde(default)]
    pub brightness: Brightness,
    #[serde(default)]
    pub use_auth: bool,
    /// Comma separated list of accepted API keys.
    #[serde(default)]
    pub api_keys: Option<String>,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Program launched for animations. Defaults to this executable.
    #[serde(default)]
    pub animator_program: Option<String>,
    #[serde(default = "default_true")]
    pub log_requests: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            led_count: default_led_count(),
            brightness: Brightness::default(),
            use_auth: false,
            api_keys: None,
            query_timeout_ms: default_query_timeout_ms(),
            animator_program: None,
            log_requests: true,
        }
    }
}

impl AppConfig {
    pub fn load(file: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("LEDSTRIP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
            .map(AppConfig::normalize)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn api_keys(&self) -> Vec<String> {
        self.api_keys
            .as_deref()
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn normalize(mut self) -> Self {
        self.api_keys = Self::normalize_opt(self.api_keys.take());
        self.animator_program = Self::normalize_opt(self.animator_program.take());
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:45451".to_string()
}

fn default_led_count() -> usize {
    141
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_are_split_and_trimmed() {
        let config = AppConfig {
            api_keys: Some(" alpha, ,beta ".into()),
            ..AppConfig::default()
        };
        assert_eq!(config.api_keys(), vec!["alpha", "beta"]);
        assert!(AppConfig::default().api_keys().is_empty());
    }

    #[test]
    fn blank_values_normalize_to_none() {
        let config = AppConfig {
            api_keys: Some("   ".into()),
            animator_program: Some(" /usr/bin/animate ".into()),
            ..AppConfig::default()
        }
        .normalize();
        assert_eq!(config.api_keys, None);
        assert_eq!(config.animator_program.as_deref(), Some("/usr/bin/animate"));
    }

    #[test]
    fn defaults_match_the_reference_install() {
        let config = AppConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:45451");
        assert_eq!(config.led_count, 141);
        assert_eq!(config.brightness, Brightness::FULL);
        assert_eq!(config.query_timeout(), Duration::from_secs(5));
    }
}
