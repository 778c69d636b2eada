//! SSH-tunneled transport for reaching databases behind a bastion.
//!
//! This module is organized into the following submodules:
//!
//! - `auth`: Authentication strategies and chain assembly
//! - `host_key`: Host key trust policy
//! - `config`: Credentials and settings with environment variable support
//! - `error`: Error taxonomy and retry classification
//! - `client`: russh client configuration, address parsing and connect
//! - `session`: Authenticated bastion session
//! - `dialer`: `direct-tcpip` channel opening
//! - `channel`: Byte stream for one forwarded connection
//! - `registry`: Named transports
//! - `descriptor`: Connection descriptor strings
//! - `factory`: Database handles over registered transports
//! - `postgres`: PostgreSQL driver (feature-gated)
//! - `retry`: Caller-side retry with backoff

pub mod auth;
pub mod channel;
pub(crate) mod client;
pub mod config;
pub mod descriptor;
pub mod dialer;
pub mod error;
pub mod factory;
pub mod host_key;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod registry;
pub mod retry;
pub mod session;

pub use auth::{AuthChain, AuthChainBuilder, AuthStrategy};
pub use channel::LogicalChannel;
pub use config::{BastionCredentials, Credentials, DatabaseCredentials, RetryPolicy, TunnelConfig};
pub use descriptor::ConnectionDescriptor;
pub use dialer::{Dialer, TunnelDialer};
pub use error::TunnelError;
pub use factory::{DatabaseDriver, TunneledConnectionFactory, TunneledDatabase};
pub use host_key::HostKeyPolicy;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;
pub use registry::TransportRegistry;
pub use session::TunnelSession;
