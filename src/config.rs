use crate::clock::{max_secs, secs_to_duration, valid_secs};
use crate::retry_policy::RetryPolicy;
use crate::wait::WaitOptions;
use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "SETTLE";
pub const AUTH_TOKEN_VAR: &str = "SETTLE_AUTH_TOKEN";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    pub wait: WaitSettings,
    pub retry: RetryPolicy,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    pub max_wait_secs: f64,
    pub interval_secs: f64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            max_wait_secs: 60.0,
            interval_secs: 5.0,
        }
    }
}

impl WaitSettings {
    pub fn max_wait(&self) -> Duration {
        secs_to_duration(self.max_wait_secs)
    }

    pub fn interval(&self) -> Duration {
        secs_to_duration(self.interval_secs)
    }

    pub fn to_options(&self) -> WaitOptions {
        WaitOptions::new(self.max_wait(), self.interval())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub base_url: Option<String>,
    pub timeout_secs: f64,
    pub user_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 30.0,
            user_agent: format!("settle/{}", crate::VERSION),
            auth_token: None,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs)
    }
}

impl SettleConfig {
    pub fn validate(&self) -> Result<()> {
        if !valid_secs(self.wait.max_wait_secs) {
            return Err(anyhow::anyhow!(
                "wait.max_wait_secs must be >= 0 and at most {} seconds",
                max_secs()
            ));
        }

        if !valid_secs(self.wait.interval_secs) || self.wait.interval_secs <= 0.0 {
            return Err(anyhow::anyhow!(
                "wait.interval_secs must be greater than 0"
            ));
        }

        self.retry
            .validate()
            .map_err(|e| anyhow::anyhow!("retry: {e}"))?;

        if !valid_secs(self.http.timeout_secs) || self.http.timeout_secs <= 0.0 {
            return Err(anyhow::anyhow!("http.timeout_secs must be greater than 0"));
        }

        if let Some(base_url) = &self.http.base_url {
            if base_url.trim().is_empty() {
                return Err(anyhow::anyhow!("http.base_url must not be empty"));
            }
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "http.base_url must be an http(s) URL: {base_url}"
                ));
            }
        }

        Ok(())
    }

    /// Layer defaults, an optional TOML file and `SETTLE_*` environment
    /// variables. `env` replaces the process environment when given.
    pub fn from_sources(
        config_path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder().add_source(
            Config::try_from(&SettleConfig::default())
                .context("Failed to build default config")?,
        );

        if let Some(path) = config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
                log::info!("Loaded configuration from file: {}", path.display());
            } else {
                log::info!(
                    "Config file not found: {}, using defaults",
                    path.display()
                );
            }
        }

        let auth_token = match &env {
            Some(vars) => vars.get(AUTH_TOKEN_VAR).cloned(),
            None => std::env::var(AUTH_TOKEN_VAR).ok(),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let mut config: SettleConfig = builder
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        if let Some(token) = auth_token.filter(|t| !t.is_empty()) {
            config.http.auth_token = Some(token);
        }

        Ok(config)
    }

    pub fn apply_cli_overrides(&mut self, matches: &ArgMatches) {
        if let Some(max_wait) = matches.get_one::<f64>("max-wait") {
            self.wait.max_wait_secs = *max_wait;
        }

        if let Some(interval) = matches.get_one::<f64>("interval") {
            self.wait.interval_secs = *interval;
        }

        if let Some(attempts) = matches.get_one::<u32>("max-attempts") {
            self.retry.stop.max_attempts = *attempts;
        }

        if let Some(base_url) = matches.get_one::<String>("base-url") {
            self.http.base_url = Some(base_url.clone());
        }

        if let Some(timeout) = matches.get_one::<f64>("timeout") {
            self.http.timeout_secs = *timeout;
        }
    }
}

/// Arguments read by [`SettleConfig::apply_cli_overrides`].
pub fn override_args() -> Vec<Arg> {
    vec![
        Arg::new("config")
            .long("config")
            .short('c')
            .value_name("FILE")
            .help("Configuration file path"),
        Arg::new("max-wait")
            .long("max-wait")
            .value_name("SECONDS")
            .value_parser(value_parser!(f64))
            .help("Upper bound on waiting for a condition"),
        Arg::new("interval")
            .long("interval")
            .value_name("SECONDS")
            .value_parser(value_parser!(f64))
            .help("Pause between condition evaluations"),
        Arg::new("max-attempts")
            .long("max-attempts")
            .value_name("N")
            .value_parser(value_parser!(u32))
            .help("Attempts per remote call, including the first"),
        Arg::new("base-url")
            .long("base-url")
            .value_name("URL")
            .help("Base URL that relative paths are resolved against"),
        Arg::new("timeout")
            .long("timeout")
            .value_name("SECONDS")
            .value_parser(value_parser!(f64))
            .help("Per-request HTTP timeout"),
    ]
}

/// Load configuration: CLI args > env vars > config file > defaults
pub fn load_config(config_path: Option<&str>, matches: &ArgMatches) -> Result<SettleConfig> {
    let mut config = SettleConfig::from_sources(config_path.map(Path::new), None)?;
    config.apply_cli_overrides(matches);

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    log::info!("Configuration loaded successfully");
    log::debug!(
        "Final config: wait={:?} retry={:?} base_url={:?}",
        config.wait,
        config.retry,
        config.http.base_url
    );

    Ok(config)
}

/// Create a sample configuration file
pub fn create_sample_config(path: &str) -> Result<()> {
    let config = SettleConfig::default();
    let toml_content =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    fs::write(path, toml_content)
        .with_context(|| format!("Failed to write sample config to: {path}"))?;

    println!("Sample configuration written to: {path}");
    Ok(())
}
