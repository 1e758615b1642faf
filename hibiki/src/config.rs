use crate::error::OptionError;
use serde::{Deserialize, Deserializer};
use std::fmt::{Debug, Formatter};
use std::time::Duration;

/// Default server, the same one `async-nats` falls back to.
pub const DEFAULT_URL: &str = "nats://127.0.0.1:4222";

/// Default time to wait for a reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How to reach the NATS server.
///
/// Can be built in code or deserialized. Durations are written in seconds:
///
/// ```rust
/// # use hibiki::ConnectConfig;
/// # use std::time::Duration;
/// let config: ConnectConfig = serde_json::from_str(r#"{
///     "url": "demo.nats.io",
///     "name": "billing",
///     "request_timeout": 2.5
/// }"#).unwrap();
/// assert_eq!(config.request_timeout, Duration::from_millis(2500));
/// ```
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Server URL. The scheme may be omitted.
    pub url: String,

    /// Client name reported to the server.
    pub name: Option<String>,

    /// Default timeout of requests without a [ReqOption::timeout](crate::ReqOption::timeout).
    /// Must not be zero.
    #[serde(deserialize_with = "positive_seconds")]
    pub request_timeout: Duration,

    /// Timeout of the initial connection.
    #[serde(deserialize_with = "seconds")]
    pub connection_timeout: Duration,

    /// Interval between pings to the server.
    #[serde(deserialize_with = "seconds")]
    pub ping_interval: Duration,

    /// Authentication token.
    pub token: Option<String>,

    /// User name, used together with `password`.
    pub user: Option<String>,

    /// Password, used together with `user`.
    pub password: Option<String>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_owned(),
            name: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connection_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(60),
            token: None,
            user: None,
            password: None,
        }
    }
}

impl Debug for ConnectConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectConfig")
            .field("url", &self.url)
            .field("name", &self.name)
            .field("request_timeout", &self.request_timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("ping_interval", &self.ping_interval)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ConnectConfig {
    /// Defaults, connecting to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Defaults, overridden by `NATS_URL`, `NATS_TOKEN`, `NATS_USER` and
    /// `NATS_PASSWORD` when they are set.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        let mut config = Self::default();
        if let Some(url) = var("NATS_URL") {
            config.url = url;
        }
        config.token = var("NATS_TOKEN");
        config.user = var("NATS_USER");
        config.password = var("NATS_PASSWORD");
        config
    }

    /// Set the client name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the default request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Authenticate with a token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Authenticate with user and password.
    pub fn with_user_and_password(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Reject settings no connection could work with.
    pub fn validate(&self) -> Result<(), OptionError> {
        if self.request_timeout.is_zero() {
            return Err(OptionError::ZeroTimeout);
        }
        Ok(())
    }

    /// Translate into `async-nats` options.
    pub fn to_connect_options(&self) -> async_nats::ConnectOptions {
        let mut options = match (&self.token, &self.user, &self.password) {
            (Some(token), _, _) => async_nats::ConnectOptions::with_token(token.clone()),
            (None, Some(user), Some(password)) => {
                async_nats::ConnectOptions::with_user_and_password(user.clone(), password.clone())
            }
            _ => async_nats::ConnectOptions::new(),
        };
        if let Some(name) = &self.name {
            options = options.name(name);
        }
        options
            .request_timeout(Some(self.request_timeout))
            .connection_timeout(self.connection_timeout)
            .ping_interval(self.ping_interval)
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

fn positive_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let duration = seconds(deserializer)?;
    if duration.is_zero() {
        return Err(serde::de::Error::custom(OptionError::ZeroTimeout));
    }
    Ok(duration)
}
