//! Connection descriptor naming a database reached through a transport.
//!
//! Format:
//!
//! ```text
//! <user>:<password>@<transport>(<host:port>)/<database>[?key=value&key=value]
//! ```
//!
//! The address is delimited by the transport's parentheses, so the password
//! may contain `@`, `:`, `/` and `?`. The database name and parameters may not
//! contain `)`.

use std::fmt;
use std::str::FromStr;

use crate::tunnel::config::DatabaseCredentials;
use crate::tunnel::error::TunnelError;

/// Parsed form of a descriptor string.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub user: String,
    pub password: String,
    pub transport: String,
    /// `host:port` as seen from the bastion.
    pub address: String,
    pub database: String,
    pub params: Vec<(String, String)>,
}

impl ConnectionDescriptor {
    /// Describe `credentials` reached through the transport named `transport`.
    pub fn from_credentials(transport: &str, credentials: &DatabaseCredentials) -> Self {
        Self {
            user: credentials.user.clone(),
            password: credentials.password.clone(),
            transport: transport.to_string(),
            address: credentials.address.clone(),
            database: credentials.name.clone(),
            params: Vec::new(),
        }
    }

    pub fn parse(descriptor: &str) -> Result<Self, TunnelError> {
        let close = descriptor
            .rfind(')')
            .ok_or_else(|| invalid("missing '(<address>)' after the transport name"))?;

        let tail = descriptor[close + 1..]
            .strip_prefix('/')
            .ok_or_else(|| invalid("expected '/<database>' after the address"))?;
        let (database, query) = match tail.split_once('?') {
            Some((database, query)) => (database, Some(query)),
            None => (tail, None),
        };

        let head = &descriptor[..close];
        let open = head
            .rfind('(')
            .ok_or_else(|| invalid("unbalanced parentheses around the address"))?;
        let address = &head[open + 1..];
        let left = &head[..open];

        let at = left
            .rfind('@')
            .ok_or_else(|| invalid("missing '@' between credentials and transport"))?;
        let transport = &left[at + 1..];
        let userinfo = &left[..at];

        let (user, password) = userinfo.split_once(':').unwrap_or((userinfo, ""));

        if user.is_empty() {
            return Err(invalid("user is empty"));
        }
        if transport.is_empty() {
            return Err(invalid("transport name is empty"));
        }
        if address.is_empty() {
            return Err(invalid("address is empty"));
        }
        if database.is_empty() {
            return Err(invalid("database name is empty"));
        }

        let params = match query {
            Some(query) => parse_params(query)?,
            None => Vec::new(),
        };

        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            transport: transport.to_string(),
            address: address.to_string(),
            database: database.to_string(),
            params,
        })
    }

    /// Value of the first parameter named `key`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Full descriptor string, password included. Do not log this.
    pub fn to_dsn(&self) -> String {
        self.render(&self.password)
    }

    fn render(&self, password: &str) -> String {
        let mut dsn = format!(
            "{}:{}@{}({})/{}",
            self.user, password, self.transport, self.address, self.database
        );
        if !self.params.is_empty() {
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            dsn.push('?');
            dsn.push_str(&query.join("&"));
        }
        dsn
    }
}

fn parse_params(query: &str) -> Result<Vec<(String, String)>, TunnelError> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key.is_empty() {
                return Err(invalid(&format!("parameter '{}' has no name", pair)));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn invalid(reason: &str) -> TunnelError {
    TunnelError::Descriptor {
        reason: reason.to_string(),
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Renders with the password masked.
impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = if self.password.is_empty() { "" } else { "****" };
        f.write_str(&self.render(mask))
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("transport", &self.transport)
            .field("address", &self.address)
            .field("database", &self.database)
            .field("params", &self.params)
            .finish()
    }
}
