//! Authenticated SSH session to the bastion.
//!
//! # Architecture
//!
//! - [`BastionHandler`]: russh client handler that delegates host key checks
//!   to the configured [`HostKeyPolicy`].
//! - [`TunnelSession`]: owns the authenticated connection. Dialers hold only a
//!   weak reference, so dropping or closing the session invalidates them.
//!
//! # Thread Safety
//!
//! `client::Handle` is not `Clone`; it lives in an `Arc<SessionInner>` shared
//! with in-flight dials. Channel opens take `&self`, so many dials can proceed
//! concurrently over one session.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use russh::{Disconnect, client, keys};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::tunnel::auth::{AuthChain, AuthChainBuilder, AuthStrategy};
use crate::tunnel::client::{connect, parse_bastion_address};
use crate::tunnel::config::{BastionCredentials, TunnelConfig};
use crate::tunnel::dialer::TunnelDialer;
use crate::tunnel::error::TunnelError;
use crate::tunnel::host_key::HostKeyPolicy;

/// russh client handler for the bastion connection.
pub struct BastionHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl BastionHandler {
    pub(crate) fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
        }
    }
}

impl client::Handler for BastionHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // false aborts the handshake with Error::UnknownKey
        Ok(self
            .policy
            .verify(&self.host, self.port, server_public_key))
    }
}

/// State shared between a session and the dialers it hands out.
pub(crate) struct SessionInner {
    pub(crate) id: Uuid,
    pub(crate) handle: client::Handle<BastionHandler>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) closed: AtomicBool,
    pub(crate) bastion: String,
}

impl SessionInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self.shutdown.is_cancelled()
            || self.handle.is_closed()
    }
}

/// An authenticated SSH session to a bastion host.
///
/// Close it explicitly with [`close`](Self::close); dropping it also cancels
/// every dial and channel that belongs to it.
pub struct TunnelSession {
    inner: Arc<SessionInner>,
}

impl TunnelSession {
    /// Connect to `address`, verify its host key and authenticate as
    /// `username` with `auth`.
    ///
    /// An empty chain fails with [`TunnelError::Auth`] before any network
    /// activity. If every method is rejected the connection is torn down
    /// before the error is returned.
    pub async fn open(
        address: &str,
        username: &str,
        auth: &AuthChain,
        policy: HostKeyPolicy,
        config: &TunnelConfig,
    ) -> Result<Self, TunnelError> {
        if auth.is_empty() {
            return Err(TunnelError::Auth {
                address: address.to_string(),
                user: username.to_string(),
                reason: "no authentication methods configured".to_string(),
            });
        }

        let (host, port) = parse_bastion_address(address)?;
        let handler = BastionHandler::new(host, port, policy);
        let mut handle = connect(address, handler, config).await?;

        let outcome = auth.authenticate(&mut handle, username).await;
        let failure = match outcome {
            Ok(true) => None,
            Ok(false) => Some("all authentication methods rejected".to_string()),
            Err(reason) => Some(reason),
        };

        if let Some(reason) = failure {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await
            {
                debug!("Disconnect after failed authentication errored: {}", e);
            }
            warn!("Authentication to {} as {} failed: {}", address, username, reason);
            return Err(TunnelError::Auth {
                address: address.to_string(),
                user: username.to_string(),
                reason,
            });
        }

        let id = Uuid::new_v4();
        info!("Tunnel session {} established to {}@{}", id, username, address);

        Ok(Self {
            inner: Arc::new(SessionInner {
                id,
                handle,
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
                bastion: address.to_string(),
            }),
        })
    }

    /// Build the authentication chain from `credentials` and open a session.
    pub async fn open_with_credentials(
        credentials: &BastionCredentials,
        policy: HostKeyPolicy,
        config: &TunnelConfig,
    ) -> Result<Self, TunnelError> {
        let chain = AuthChainBuilder::from_credentials(credentials)
            .build()
            .await?;
        Self::open(
            &credentials.address(),
            &credentials.user,
            &chain,
            policy,
            config,
        )
        .await
    }

    /// A dialer that opens channels over this session.
    pub fn dialer(&self) -> TunnelDialer {
        TunnelDialer::new(&self.inner)
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// `host:port` of the bastion.
    pub fn bastion(&self) -> &str {
        &self.inner.bastion
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Tear the session down.
    ///
    /// In-flight dials complete with [`TunnelError::SessionClosed`] and open
    /// channels fail their next read or write. Calling this more than once is
    /// a no-op.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.shutdown.cancel();

        if let Err(e) = self
            .inner
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("Disconnect of session {} errored: {}", self.inner.id, e);
        }
        info!("Tunnel session {} to {} closed", self.inner.id, self.inner.bastion);
    }
}

impl fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelSession")
            .field("id", &self.inner.id)
            .field("bastion", &self.inner.bastion)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}
