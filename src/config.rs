use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

pub const DEFAULT_TIMEZONE: &str = "Z";
pub const DEFAULT_CHARSET: &str = "utf8mb4_general_ci";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Parameters handed to the transport when opening the physical connection.
///
/// Unset fields can be filled from the `MYSQL_*` environment variables with
/// [`ConnectionParams::with_env_defaults`]; explicit values always win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timezone: String,
    pub charset: String,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            database: None,
            user: None,
            password: None,
            timezone: DEFAULT_TIMEZONE.to_string(),
            charset: DEFAULT_CHARSET.to_string(),
        }
    }
}

impl ConnectionParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    #[must_use]
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Fill unset fields from `MYSQL_HOST`, `MYSQL_PORT`, `MYSQL_DB`, `MYSQL_USER` and
    /// `MYSQL_PASS`.
    ///
    /// # Errors
    /// Returns [`DriverError::ConfigError`] if `MYSQL_PORT` is set but is not a valid port.
    pub fn with_env_defaults(self) -> Result<Self, DriverError> {
        self.with_defaults_from(|key| env::var(key).ok())
    }

    /// Same as [`ConnectionParams::with_env_defaults`] with an explicit variable source.
    ///
    /// # Errors
    /// Returns [`DriverError::ConfigError`] if the port variable is not a valid port.
    pub fn with_defaults_from<F>(mut self, lookup: F) -> Result<Self, DriverError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.host.is_none() {
            self.host = lookup("MYSQL_HOST");
        }
        if self.port.is_none()
            && let Some(raw) = lookup("MYSQL_PORT")
        {
            let port = raw.trim().parse::<u16>().map_err(|err| {
                DriverError::ConfigError(format!("MYSQL_PORT `{raw}` is not a valid port: {err}"))
            })?;
            self.port = Some(port);
        }
        if self.database.is_none() {
            self.database = lookup("MYSQL_DB");
        }
        if self.user.is_none() {
            self.user = lookup("MYSQL_USER");
        }
        if self.password.is_none() {
            self.password = lookup("MYSQL_PASS");
        }
        Ok(self)
    }
}

/// Behavioural switches of the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverOptions {
    /// Serialize batched statement execution and log every statement at `info`.
    pub debug: bool,
    /// Constant delay before each reconnect attempt.
    #[serde(with = "millis")]
    pub reconnect_delay: Duration,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            debug: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl DriverOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
