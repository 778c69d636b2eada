//! Configuration and credential resolution.
//!
//! Values come from the environment, falling back to built-in defaults. Empty
//! variables count as unset; a numeric variable that is set but does not parse
//! (or is zero where zero makes no sense) is a [`TunnelError::Config`].
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BASTION_HOST` | required | Bastion hostname or IP |
//! | `BASTION_PORT` | 22 | Bastion SSH port |
//! | `BASTION_USER` | required | Bastion username |
//! | `BASTION_PASSWORD` | unset | Password authentication |
//! | `BASTION_KEY_FILE` | unset | Private key file (OpenSSH/PEM) |
//! | `BASTION_KEY_PASSPHRASE` | unset | Passphrase for the key file |
//! | `BASTION_USE_AGENT` | true | Consult the SSH agent via `SSH_AUTH_SOCK` |
//! | `BASTION_CONNECT_TIMEOUT` | unset | Connect timeout in seconds |
//! | `BASTION_KEEPALIVE_SECS` | 30 | Keepalive interval in seconds |
//! | `BASTION_COMPRESSION` | false | Enable zlib compression |
//! | `BASTION_MAX_RETRIES` | 3 | Caller-side retry attempts |
//! | `BASTION_RETRY_DELAY_MS` | 1000 | Initial caller-side retry delay |
//! | `DB_USER` / `DB_PASSWORD` / `DB_ADDRESS` / `DB_NAME` | required | Destination database |
//! | `DB_TRANSPORT_PREFIX` | `ssh+tcp` | Prefix for generated transport names |
//!
//! Host key variables are resolved in [`crate::tunnel::host_key`].

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::error::TunnelError;

/// Default SSH port on the bastion
pub const DEFAULT_BASTION_PORT: u16 = 22;

/// Default keepalive interval in seconds
pub(crate) const DEFAULT_KEEPALIVE_SECS: u64 = 30;

/// Default maximum caller-side retry attempts
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default caller-side retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Default prefix for generated transport names
pub const DEFAULT_TRANSPORT_PREFIX: &str = "ssh+tcp";

pub(crate) const BASTION_HOST_ENV_VAR: &str = "BASTION_HOST";
pub(crate) const BASTION_PORT_ENV_VAR: &str = "BASTION_PORT";
pub(crate) const BASTION_USER_ENV_VAR: &str = "BASTION_USER";
pub(crate) const BASTION_PASSWORD_ENV_VAR: &str = "BASTION_PASSWORD";
pub(crate) const BASTION_KEY_FILE_ENV_VAR: &str = "BASTION_KEY_FILE";
pub(crate) const BASTION_KEY_PASSPHRASE_ENV_VAR: &str = "BASTION_KEY_PASSPHRASE";
pub(crate) const BASTION_USE_AGENT_ENV_VAR: &str = "BASTION_USE_AGENT";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "BASTION_CONNECT_TIMEOUT";
pub(crate) const KEEPALIVE_ENV_VAR: &str = "BASTION_KEEPALIVE_SECS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "BASTION_COMPRESSION";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "BASTION_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "BASTION_RETRY_DELAY_MS";
pub(crate) const DB_USER_ENV_VAR: &str = "DB_USER";
pub(crate) const DB_PASSWORD_ENV_VAR: &str = "DB_PASSWORD";
pub(crate) const DB_ADDRESS_ENV_VAR: &str = "DB_ADDRESS";
pub(crate) const DB_NAME_ENV_VAR: &str = "DB_NAME";
pub(crate) const TRANSPORT_PREFIX_ENV_VAR: &str = "DB_TRANSPORT_PREFIX";

const REDACTED: &str = "<redacted>";

/// Credentials for the SSH bastion.
#[derive(Clone, Default)]
pub struct BastionCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    pub use_agent: bool,
}

impl BastionCredentials {
    /// `host:port` of the bastion, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Resolve bastion credentials from the environment.
    pub fn from_env() -> Result<Self, TunnelError> {
        Ok(Self {
            host: required_env(BASTION_HOST_ENV_VAR)?,
            port: resolve_bastion_port()?,
            user: required_env(BASTION_USER_ENV_VAR)?,
            password: optional_env(BASTION_PASSWORD_ENV_VAR),
            key_file: optional_env(BASTION_KEY_FILE_ENV_VAR).map(PathBuf::from),
            key_passphrase: optional_env(BASTION_KEY_PASSPHRASE_ENV_VAR),
            use_agent: resolve_use_agent(),
        })
    }
}

impl fmt::Debug for BastionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BastionCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| REDACTED))
            .field("key_file", &self.key_file)
            .field("key_passphrase", &self.key_passphrase.as_ref().map(|_| REDACTED))
            .field("use_agent", &self.use_agent)
            .finish()
    }
}

/// Credentials for the destination database, as seen from the bastion.
#[derive(Clone, Default)]
pub struct DatabaseCredentials {
    pub user: String,
    pub password: String,
    /// `host:port` reachable from the bastion's network.
    pub address: String,
    pub name: String,
}

impl DatabaseCredentials {
    /// Resolve database credentials from the environment.
    pub fn from_env() -> Result<Self, TunnelError> {
        Ok(Self {
            user: required_env(DB_USER_ENV_VAR)?,
            password: optional_env(DB_PASSWORD_ENV_VAR).unwrap_or_default(),
            address: required_env(DB_ADDRESS_ENV_VAR)?,
            name: required_env(DB_NAME_ENV_VAR)?,
        })
    }
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("address", &self.address)
            .field("name", &self.name)
            .finish()
    }
}

/// Everything one connection attempt needs.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub bastion: BastionCredentials,
    pub database: DatabaseCredentials,
}

impl Credentials {
    /// Resolve both credential sets from the environment.
    pub fn from_env() -> Result<Self, TunnelError> {
        Ok(Self {
            bastion: BastionCredentials::from_env()?,
            database: DatabaseCredentials::from_env()?,
        })
    }
}

/// Transport-level settings for the SSH session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Deadline for TCP connect plus SSH handshake. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    pub keepalive_interval: Duration,
    pub compress: bool,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            compress: false,
        }
    }
}

impl TunnelConfig {
    /// Resolve every setting from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, TunnelError> {
        Ok(Self {
            connect_timeout: resolve_connect_timeout()?.map(Duration::from_secs),
            keepalive_interval: Duration::from_secs(resolve_keepalive_secs()?),
            compress: resolve_compression(),
        })
    }
}

/// Caller-side retry settings used by [`crate::tunnel::retry::with_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Resolve the policy from the environment.
    pub fn from_env() -> Result<Self, TunnelError> {
        Ok(Self {
            max_retries: resolve_max_retries()?,
            min_delay: Duration::from_millis(resolve_retry_delay_ms()?),
            max_delay: MAX_RETRY_DELAY,
        })
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

fn required_env(key: &str) -> Result<String, TunnelError> {
    optional_env(key).ok_or_else(|| TunnelError::Config(format!("{} is not set", key)))
}

/// Empty values count as unset.
fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Parse `key` when set. A set but malformed value is a configuration error
/// instead of a silent fallback to the default.
fn parse_env<T>(key: &str) -> Result<Option<T>, TunnelError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    optional_env(key)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|e| TunnelError::Config(format!("{}='{}' is invalid: {}", key, value, e)))
        })
        .transpose()
}

fn non_zero(key: &str, value: u64) -> Result<u64, TunnelError> {
    if value == 0 {
        return Err(TunnelError::Config(format!("{} must be greater than 0", key)));
    }
    Ok(value)
}

/// Resolve the bastion port: env var -> default
pub(crate) fn resolve_bastion_port() -> Result<u16, TunnelError> {
    Ok(parse_env(BASTION_PORT_ENV_VAR)?.unwrap_or(DEFAULT_BASTION_PORT))
}

/// Resolve agent usage: env var -> default (true)
pub(crate) fn resolve_use_agent() -> bool {
    optional_env(BASTION_USE_AGENT_ENV_VAR).is_none_or(|value| parse_flag(&value))
}

/// Resolve the connect timeout in seconds: env var -> none
pub(crate) fn resolve_connect_timeout() -> Result<Option<u64>, TunnelError> {
    parse_env(CONNECT_TIMEOUT_ENV_VAR)?
        .map(|secs| non_zero(CONNECT_TIMEOUT_ENV_VAR, secs))
        .transpose()
}

/// Resolve the keepalive interval in seconds: env var -> default
pub(crate) fn resolve_keepalive_secs() -> Result<u64, TunnelError> {
    match parse_env(KEEPALIVE_ENV_VAR)? {
        Some(secs) => non_zero(KEEPALIVE_ENV_VAR, secs),
        None => Ok(DEFAULT_KEEPALIVE_SECS),
    }
}

/// Resolve the compression setting: env var -> default (false)
pub(crate) fn resolve_compression() -> bool {
    optional_env(COMPRESSION_ENV_VAR).is_some_and(|value| parse_flag(&value))
}

/// Resolve the max retries value: env var -> default
pub(crate) fn resolve_max_retries() -> Result<u32, TunnelError> {
    Ok(parse_env(MAX_RETRIES_ENV_VAR)?.unwrap_or(DEFAULT_MAX_RETRIES))
}

/// Resolve the initial retry delay in milliseconds: env var -> default
pub(crate) fn resolve_retry_delay_ms() -> Result<u64, TunnelError> {
    Ok(parse_env(RETRY_DELAY_MS_ENV_VAR)?.unwrap_or(DEFAULT_RETRY_DELAY_MS))
}

/// Resolve the transport name prefix: env var -> default
pub fn resolve_transport_prefix() -> String {
    optional_env(TRANSPORT_PREFIX_ENV_VAR).unwrap_or_else(|| DEFAULT_TRANSPORT_PREFIX.to_string())
}
