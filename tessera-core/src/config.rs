//! Configuration types
//!
//! [`ClientConfig`] describes one remote endpoint and how to talk to it.
//! [`LayerSettings`] holds the process-wide knobs of the access layer.
//! Both load from `TESSERA_*` environment variables with defaults suitable
//! for development.

use crate::{AccessResult, ConfigError};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Default number of concurrent requests per concurrency pool.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of resource objects held in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Default interval between content hash checks after an async write.
pub const DEFAULT_CONFIRM_POLL_INTERVAL_MS: u64 = 2_000;

/// Default time allowed for an async write to become visible.
pub const DEFAULT_CONFIRM_DEADLINE_SECS: u64 = 120;

// ============================================================================
// CREDENTIALS
// ============================================================================

/// Authentication applied to every request.
#[derive(Clone, Default)]
pub enum Credentials {
    /// No authentication header
    #[default]
    None,
    /// HTTP basic authentication
    Basic {
        username: String,
        password: SecretString,
    },
    /// `Authorization: Bearer <token>`
    Bearer(SecretString),
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: SecretString::new(password.into().into()),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Credentials::Bearer(SecretString::new(token.into().into()))
    }

    /// Password or token, for the transport only.
    pub fn secret(&self) -> Option<&str> {
        match self {
            Credentials::None => None,
            Credentials::Basic { password, .. } => Some(password.expose_secret()),
            Credentials::Bearer(token) => Some(token.expose_secret()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Credentials::None)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::None => f.write_str("None"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Credentials::Bearer(_) => f.write_str("Bearer([REDACTED])"),
        }
    }
}

// ============================================================================
// RETRY / CONFIRMATION
// ============================================================================

/// Backoff schedule for retryable request failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
    /// Randomize each wait between half and the full computed interval
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 8,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Polling parameters for write confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmConfig {
    /// Interval between content hash checks
    pub poll_interval: Duration,
    /// Hard deadline for the whole confirmation
    pub deadline: Duration,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_CONFIRM_POLL_INTERVAL_MS),
            deadline: Duration::from_secs(DEFAULT_CONFIRM_DEADLINE_SECS),
        }
    }
}

// ============================================================================
// CLIENT CONFIG
// ============================================================================

/// Connection, authentication and policy settings for one remote endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Path prefix placed before the interface segment, without slashes
    pub base_path: String,
    pub credentials: Credentials,
    /// Skip TLS certificate verification
    pub insecure_skip_verify: bool,
    /// Maximum requests in flight; zero means unlimited
    pub concurrency: usize,
    pub request_timeout: Duration,
    pub retry: RetryConfig,
    pub confirm: ConfirmConfig,
}

/// The parts of a [`ClientConfig`] that decide which connection pool is used.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub base_url: String,
    pub insecure_skip_verify: bool,
    pub concurrency: usize,
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Config for `https://host:port` with defaults everywhere else.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: "https".to_string(),
            host: host.into(),
            port,
            base_path: String::new(),
            credentials: Credentials::None,
            insecure_skip_verify: false,
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryConfig::default(),
            confirm: ConfirmConfig::default(),
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into().trim_matches('/').to_string();
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_insecure_skip_verify(mut self, insecure: bool) -> Self {
        self.insecure_skip_verify = insecure;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_confirm(mut self, confirm: ConfirmConfig) -> Self {
        self.confirm = confirm;
        self
    }

    /// Create ClientConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TESSERA_HOST`: Remote host (required)
    /// - `TESSERA_PORT`: Remote port (default: 443)
    /// - `TESSERA_SCHEME`: "https" or "http" (default: https)
    /// - `TESSERA_BASE_PATH`: Path prefix (default: empty)
    /// - `TESSERA_USERNAME` / `TESSERA_PASSWORD`: Basic credentials
    /// - `TESSERA_TOKEN`: Bearer token, takes precedence over basic credentials
    /// - `TESSERA_INSECURE`: "true" to skip certificate verification (default: false)
    /// - `TESSERA_CONCURRENCY`: Maximum requests in flight (default: 8)
    /// - `TESSERA_TIMEOUT_SECS`: Per-request timeout (default: 30)
    /// - `TESSERA_MAX_RETRIES`: Retries after the first attempt (default: 8)
    /// - `TESSERA_CONFIRM_POLL_MS`: Write confirmation poll interval (default: 2000)
    /// - `TESSERA_CONFIRM_DEADLINE_SECS`: Write confirmation deadline (default: 120)
    pub fn from_env() -> AccessResult<Self> {
        let host = std::env::var("TESSERA_HOST").map_err(|_| ConfigError::MissingRequired {
            field: "TESSERA_HOST".to_string(),
        })?;

        let port = std::env::var("TESSERA_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(443);

        let mut config = Self::new(host, port);

        if let Ok(scheme) = std::env::var("TESSERA_SCHEME") {
            config.scheme = scheme.to_lowercase();
        }

        if let Ok(base_path) = std::env::var("TESSERA_BASE_PATH") {
            config = config.with_base_path(base_path);
        }

        config.credentials = match (
            std::env::var("TESSERA_TOKEN").ok(),
            std::env::var("TESSERA_USERNAME").ok(),
        ) {
            (Some(token), _) if !token.is_empty() => Credentials::bearer(token),
            (_, Some(username)) if !username.is_empty() => Credentials::basic(
                username,
                std::env::var("TESSERA_PASSWORD").unwrap_or_default(),
            ),
            _ => Credentials::None,
        };

        config.insecure_skip_verify = std::env::var("TESSERA_INSECURE")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(false);

        config.concurrency = std::env::var("TESSERA_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONCURRENCY);

        config.request_timeout = Duration::from_secs(
            std::env::var("TESSERA_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        );

        if let Some(max_retries) = std::env::var("TESSERA_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.retry.max_retries = max_retries;
        }

        config.confirm = ConfirmConfig {
            poll_interval: Duration::from_millis(
                std::env::var("TESSERA_CONFIRM_POLL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CONFIRM_POLL_INTERVAL_MS),
            ),
            deadline: Duration::from_secs(
                std::env::var("TESSERA_CONFIRM_DEADLINE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_CONFIRM_DEADLINE_SECS),
            ),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - host is non-empty
    /// - scheme is http or https
    /// - request timeout, poll interval and deadline are positive
    /// - backoff multiplier is at least 1.0
    pub fn validate(&self) -> AccessResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "host".to_string(),
            }
            .into());
        }

        if self.scheme != "https" && self.scheme != "http" {
            return Err(ConfigError::InvalidValue {
                field: "scheme".to_string(),
                value: self.scheme.clone(),
                reason: "scheme must be http or https".to_string(),
            }
            .into());
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout".to_string(),
                value: format!("{:?}", self.request_timeout),
                reason: "request_timeout must be positive".to_string(),
            }
            .into());
        }

        if self.confirm.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "confirm.poll_interval".to_string(),
                value: format!("{:?}", self.confirm.poll_interval),
                reason: "poll_interval must be positive".to_string(),
            }
            .into());
        }

        if self.confirm.deadline.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "confirm.deadline".to_string(),
                value: format!("{:?}", self.confirm.deadline),
                reason: "deadline must be positive".to_string(),
            }
            .into());
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.backoff_multiplier".to_string(),
                value: self.retry.backoff_multiplier.to_string(),
                reason: "backoff_multiplier must be at least 1.0".to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// `scheme://host:port[/base_path]`
    pub fn base_url(&self) -> String {
        if self.base_path.is_empty() {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        } else {
            format!(
                "{}://{}:{}/{}",
                self.scheme, self.host, self.port, self.base_path
            )
        }
    }

    pub fn connection_key(&self) -> ConnectionKey {
        ConnectionKey {
            base_url: self.base_url(),
            insecure_skip_verify: self.insecure_skip_verify,
            concurrency: self.concurrency,
            request_timeout: self.request_timeout,
        }
    }
}

// ============================================================================
// LAYER SETTINGS
// ============================================================================

/// Process-wide settings of the access layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSettings {
    /// Maximum number of cached resource objects
    pub cache_capacity: usize,
    /// Log request and response bodies at trace level
    pub verbose: bool,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            verbose: false,
        }
    }
}

impl LayerSettings {
    /// Create LayerSettings from environment variables.
    ///
    /// Environment variables:
    /// - `TESSERA_CACHE_CAPACITY`: Cached object limit (default: 10000)
    /// - `TESSERA_VERBOSE`: "true" to log request/response bodies (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cache_capacity: std::env::var("TESSERA_CACHE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|c: &usize| *c > 0)
                .unwrap_or(defaults.cache_capacity),
            verbose: std::env::var("TESSERA_VERBOSE")
                .ok()
                .map(|s| s.to_lowercase() == "true" || s == "1")
                .unwrap_or(defaults.verbose),
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
