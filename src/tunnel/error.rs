//! Error taxonomy for the SSH-tunneled transport.
//!
//! Every layer keeps its own variant so callers can decide whether to retry,
//! re-prompt for credentials or abort:
//!
//! | Variant | Layer | Retryable |
//! |---------|-------|-----------|
//! | [`TunnelError::KeyParse`] | credential loading | no |
//! | [`TunnelError::Transport`] | TCP / SSH handshake to the bastion | yes |
//! | [`TunnelError::HostKey`] | host key verification | no |
//! | [`TunnelError::Auth`] | SSH user authentication | no |
//! | [`TunnelError::Channel`] | `direct-tcpip` forwarding | depends on the refusal reason |
//! | [`TunnelError::SessionClosed`] | use after close | no |
//! | [`TunnelError::Database`] | driver handshake after the tunnel succeeded | no |
//!
//! Nothing in this crate retries on its own; [`TunnelError::is_retryable`] only
//! informs caller-side policies such as [`crate::tunnel::retry::with_retry`].

use std::io;
use std::path::PathBuf;

use russh::ChannelOpenFailure;
use thiserror::Error;

/// Boxed error returned by database drivers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while building, using or tearing down a tunnel.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The supplied private key could not be read or parsed.
    #[error("failed to load private key {path:?}: {reason}")]
    KeyParse { path: PathBuf, reason: String },

    /// An address string was not a usable `host:port`.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The bastion could not be reached or the SSH handshake did not complete.
    #[error("bastion {address} unreachable: {reason}")]
    Transport { address: String, reason: String },

    /// The bastion presented a host key the configured policy does not trust.
    #[error("host key verification failed for {address}")]
    HostKey { address: String },

    /// Every configured authentication method was rejected.
    #[error("authentication to {address} as {user} failed: {reason}")]
    Auth {
        address: String,
        user: String,
        reason: String,
    },

    /// The bastion refused or failed to open a forwarded connection.
    #[error("bastion refused forwarding to {destination}: {reason}")]
    Channel {
        destination: String,
        reason: String,
        retryable: bool,
    },

    /// The owning session was closed before or during the operation.
    #[error("tunnel session is closed")]
    SessionClosed,

    /// A transport name is already bound to a different dialer.
    #[error("transport '{name}' is already registered to a different dialer")]
    TransportConflict { name: String },

    /// A descriptor referenced a transport nobody registered.
    #[error("transport '{name}' is not registered")]
    UnknownTransport { name: String },

    /// A connection descriptor could not be parsed.
    #[error("invalid connection descriptor: {reason}")]
    Descriptor { reason: String },

    /// The destination database rejected the handshake.
    #[error("database '{database}' rejected the connection: {source}")]
    Database {
        database: String,
        #[source]
        source: BoxError,
    },

    /// Required configuration was missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TunnelError {
    /// Whether a caller-side retry has a chance of succeeding.
    ///
    /// Network-level failures to reach the bastion are transient. Channel
    /// refusals are transient only when the bastion reported a temporary
    /// condition. Credential, trust and ordering errors never are.
    pub fn is_retryable(&self) -> bool {
        match self {
            TunnelError::Transport { .. } => true,
            TunnelError::Channel { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Recover a tunnel error carried inside an `io::Error` from a
    /// [`LogicalChannel`](crate::tunnel::channel::LogicalChannel).
    pub fn from_io(err: &io::Error) -> Option<&TunnelError> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<TunnelError>())
    }

    /// `io::Error` reported by channels whose session has gone away.
    pub(crate) fn session_closed_io() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, TunnelError::SessionClosed)
    }
}

/// Map a russh error from `channel_open_direct_tcpip` onto the taxonomy.
pub(crate) fn classify_channel_error(destination: &str, err: russh::Error) -> TunnelError {
    match err {
        russh::Error::ChannelOpenFailure(failure) => {
            let retryable = matches!(
                failure,
                ChannelOpenFailure::ConnectFailed | ChannelOpenFailure::ResourceShortage
            );
            TunnelError::Channel {
                destination: destination.to_string(),
                reason: describe_open_failure(&failure).to_string(),
                retryable,
            }
        }
        russh::Error::Disconnect | russh::Error::SendError | russh::Error::RecvError => {
            TunnelError::SessionClosed
        }
        other => TunnelError::Channel {
            destination: destination.to_string(),
            reason: other.to_string(),
            retryable: false,
        },
    }
}

/// Map a russh error from the connect/handshake phase onto the taxonomy.
pub(crate) fn classify_connect_error(address: &str, err: russh::Error) -> TunnelError {
    match err {
        russh::Error::UnknownKey => TunnelError::HostKey {
            address: address.to_string(),
        },
        russh::Error::IO(io_err) => TunnelError::Transport {
            address: address.to_string(),
            reason: io_err.to_string(),
        },
        other => TunnelError::Transport {
            address: address.to_string(),
            reason: other.to_string(),
        },
    }
}

fn describe_open_failure(failure: &ChannelOpenFailure) -> &'static str {
    match failure {
        ChannelOpenFailure::AdministrativelyProhibited => "administratively prohibited",
        ChannelOpenFailure::ConnectFailed => "connect failed",
        ChannelOpenFailure::UnknownChannelType => "unknown channel type",
        ChannelOpenFailure::ResourceShortage => "resource shortage",
        #[allow(unreachable_patterns)]
        _ => "unknown reason",
    }
}
