//! SSH client plumbing shared by sessions and dialers.
//!
//! ## Connection Lifecycle
//!
//! 1. **Address Parsing**: `host:port`, defaulting to port 22 for the bastion.
//!    Forwarding destinations must always carry an explicit port.
//!
//! 2. **Client Configuration**: russh client config with keepalive and
//!    compression. Sessions are long-lived, so there is no inactivity timeout.
//!
//! 3. **Connection Establishment**: TCP connect plus SSH handshake, bounded by
//!    the optional connect timeout. Host key verification runs inside the
//!    handshake through [`BastionHandler`].

use std::sync::Arc;

use russh::client;
use tracing::debug;

use crate::tunnel::config::{DEFAULT_BASTION_PORT, TunnelConfig};
use crate::tunnel::error::{TunnelError, classify_connect_error};
use crate::tunnel::session::BastionHandler;

/// Keepalives that may go unanswered before the session is considered dead.
const KEEPALIVE_MAX: usize = 3;

/// Build russh client configuration.
///
/// - No inactivity timeout; forwarded channels may sit idle for a long time
/// - Keepalive every `keepalive_interval`, dropping the session after
///   [`KEEPALIVE_MAX`] missed replies
/// - ZLIB preferred when `compress` is set, otherwise NONE only
pub(crate) fn build_client_config(config: &TunnelConfig) -> Arc<client::Config> {
    let compression = if config.compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(config.keepalive_interval),
        keepalive_max: KEEPALIVE_MAX,
        preferred,
        ..Default::default()
    })
}

/// Split `host[:port]` into its parts.
///
/// IPv6 literals must be bracketed (`[::1]:22`); the brackets are stripped from
/// the returned host. An unbracketed host with more than one colon is rejected
/// rather than guessed at.
fn split_host_port(address: &str) -> Result<(&str, Option<u16>), TunnelError> {
    let invalid = |reason: String| TunnelError::InvalidAddress {
        address: address.to_string(),
        reason,
    };
    let parse_port = |port_str: &str| {
        port_str
            .parse::<u16>()
            .map_err(|e| invalid(format!("invalid port number: {}", e)))
    };

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated '[' in IPv6 literal".to_string()))?;
        let port = match tail {
            "" => None,
            _ => {
                let port_str = tail
                    .strip_prefix(':')
                    .ok_or_else(|| invalid(format!("unexpected '{}' after ']'", tail)))?;
                Some(parse_port(port_str)?)
            }
        };
        (host, port)
    } else {
        match address.split_once(':') {
            Some((_, rest)) if rest.contains(':') => {
                return Err(invalid(
                    "IPv6 literals must be enclosed in brackets".to_string(),
                ));
            }
            Some((host, port_str)) => (host, Some(parse_port(port_str)?)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid("missing host".to_string()));
    }
    Ok((host, port))
}

/// Parse an address into host and port, defaulting the port.
pub(crate) fn parse_address(
    address: &str,
    default_port: u16,
) -> Result<(String, u16), TunnelError> {
    let (host, port) = split_host_port(address)?;
    Ok((host.to_string(), port.unwrap_or(default_port)))
}

/// Parse the bastion address, defaulting to port 22.
pub(crate) fn parse_bastion_address(address: &str) -> Result<(String, u16), TunnelError> {
    parse_address(address, DEFAULT_BASTION_PORT)
}

/// Parse a forwarding destination. Unlike the bastion address, the port is
/// mandatory.
pub(crate) fn parse_destination(destination: &str) -> Result<(String, u16), TunnelError> {
    match split_host_port(destination)? {
        (host, Some(port)) => Ok((host.to_string(), port)),
        (_, None) => Err(TunnelError::InvalidAddress {
            address: destination.to_string(),
            reason: "missing port".to_string(),
        }),
    }
}

/// Connect to the bastion and complete the SSH handshake.
///
/// Authentication is not performed here.
pub(crate) async fn connect(
    address: &str,
    policy_handler: BastionHandler,
    config: &TunnelConfig,
) -> Result<client::Handle<BastionHandler>, TunnelError> {
    let client_config = build_client_config(config);
    let (host, port) = parse_bastion_address(address)?;

    debug!("Connecting to bastion {}:{}", host, port);
    let connect_future = client::connect(client_config, (host.as_str(), port), policy_handler);

    let result = match config.connect_timeout {
        Some(timeout) => tokio::time::timeout(timeout, connect_future)
            .await
            .map_err(|_| TunnelError::Transport {
                address: address.to_string(),
                reason: format!("connection timed out after {:?}", timeout),
            })?,
        None => connect_future.await,
    };

    result.map_err(|e| classify_connect_error(address, e))
}
