use crate::clock::{secs_to_duration, valid_secs};
use crate::error::{TransientKind, RETRIABLE_STATUS_CODES, TOO_MANY_REQUESTS};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default)]
    pub stop: StopConfig,
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_version() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32, // total invocations, including the first
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default = "default_strategy")]
    pub strategy: WaitStrategy,
    #[serde(default = "default_delay")]
    pub delay: f64, // seconds, fixed and fixed_jitter
    #[serde(default)]
    pub min_delay: f64, // seconds, random lower bound
    #[serde(default = "default_delay")]
    pub max_delay: f64, // seconds, random upper bound
    #[serde(default)]
    pub jitter: f64, // seconds, fixed_jitter upper bound on the extra delay
}

fn default_strategy() -> WaitStrategy {
    WaitStrategy::Fixed
}

fn default_delay() -> f64 {
    10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    Fixed,       // always `delay`
    Random,      // uniform in [min_delay, max_delay]
    FixedJitter, // `delay` plus uniform in [0, jitter]
}

/// Which transient kinds the policy is willing to retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_statuses")]
    pub statuses: Vec<u16>,
    #[serde(default)]
    pub rate_limited: bool,
    #[serde(default = "default_network")]
    pub network: bool, // timeouts, refused/reset connections, truncated responses
}

fn default_statuses() -> Vec<u16> {
    RETRIABLE_STATUS_CODES.to_vec()
}

fn default_network() -> bool {
    true
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            version: 1,
            stop: StopConfig::default(),
            wait: WaitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for StopConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            strategy: WaitStrategy::Fixed,
            delay: 10.0,
            min_delay: 0.0,
            max_delay: 10.0,
            jitter: 0.0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            statuses: default_statuses(),
            rate_limited: false,
            network: true,
        }
    }
}

fn uniform(low: f64, high: f64) -> f64 {
    if high > low && (high - low).is_finite() {
        rand::thread_rng().gen_range(low..=high)
    } else {
        low
    }
}

impl WaitConfig {
    pub fn calculate_delay(&self) -> Duration {
        let delay_secs = match self.strategy {
            WaitStrategy::Fixed => self.delay,
            WaitStrategy::Random => uniform(self.min_delay, self.max_delay),
            WaitStrategy::FixedJitter => self.delay + uniform(0.0, self.jitter),
        };

        secs_to_duration(delay_secs)
    }
}

impl RetryConfig {
    pub fn should_retry(&self, kind: TransientKind) -> bool {
        match kind {
            TransientKind::ServiceUnavailable(code) => self.statuses.contains(&code),
            TransientKind::RateLimited => {
                self.rate_limited || self.statuses.contains(&TOO_MANY_REQUESTS)
            }
            TransientKind::Timeout | TransientKind::Connection | TransientKind::Protocol => {
                self.network
            }
        }
    }
}

impl RetryPolicy {
    /// Fixed delay between attempts, default attempt bound.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            wait: WaitConfig {
                strategy: WaitStrategy::Fixed,
                delay: delay.as_secs_f64(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Uniformly random delay in `[min, max]` between attempts.
    pub fn random(min: Duration, max: Duration) -> Self {
        Self {
            wait: WaitConfig {
                strategy: WaitStrategy::Random,
                min_delay: min.as_secs_f64(),
                max_delay: max.as_secs_f64(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Fixed delay plus up to `jitter` extra.
    pub fn fixed_with_jitter(delay: Duration, jitter: Duration) -> Self {
        Self {
            wait: WaitConfig {
                strategy: WaitStrategy::FixedJitter,
                delay: delay.as_secs_f64(),
                jitter: jitter.as_secs_f64(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Single attempt, nothing is retried.
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO).with_max_attempts(1)
    }

    /// Policy for wrapping a whole remote client: rides out roughly two
    /// minutes of gateway errors and dropped connections.
    pub fn transient_client() -> Self {
        Self::fixed(Duration::from_secs(5)).with_max_attempts(24)
    }

    /// Policy for endpoints that answer 429 under load: only rate limiting is
    /// retried, with randomised spacing between callers.
    pub fn rate_limited() -> Self {
        let mut policy =
            Self::random(Duration::from_secs(2), Duration::from_secs(10)).with_max_attempts(5);
        policy.retry = RetryConfig {
            statuses: vec![],
            rate_limited: true,
            network: false,
        };
        policy
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.stop.max_attempts = attempts;
        self
    }

    pub fn with_statuses(mut self, statuses: &[u16]) -> Self {
        self.retry.statuses = statuses.to_vec();
        self
    }

    pub fn with_rate_limited(mut self, retry: bool) -> Self {
        self.retry.rate_limited = retry;
        self
    }

    pub fn with_network(mut self, retry: bool) -> Self {
        self.retry.network = retry;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.stop.max_attempts
    }

    pub fn from_json(json: &serde_json::Value) -> Result<Self, String> {
        let policy: Self =
            serde_json::from_value(json.clone()).map_err(|e| format!("Invalid retry policy: {e}"))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.version != 1 {
            return Err("Unsupported retry policy version".to_string());
        }

        if self.stop.max_attempts == 0 {
            return Err("max_attempts must be >= 1".to_string());
        }

        let delays = [
            self.wait.delay,
            self.wait.min_delay,
            self.wait.max_delay,
            self.wait.jitter,
        ];
        if delays.iter().any(|d| !valid_secs(*d)) {
            return Err("delay values must be finite, >= 0 and fit in a Duration".to_string());
        }

        if self.wait.strategy == WaitStrategy::FixedJitter
            && !valid_secs(self.wait.delay + self.wait.jitter)
        {
            return Err("delay plus jitter must fit in a Duration".to_string());
        }

        if self.wait.strategy == WaitStrategy::Random && self.wait.min_delay > self.wait.max_delay
        {
            return Err("min_delay must be <= max_delay".to_string());
        }

        Ok(())
    }
}
