//! Opening forwarded channels over a session.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::tunnel::channel::LogicalChannel;
use crate::tunnel::client::parse_destination;
use crate::tunnel::error::{TunnelError, classify_channel_error};
use crate::tunnel::session::SessionInner;

/// Originator reported to the bastion for every `direct-tcpip` request.
const ORIGINATOR_ADDRESS: &str = "127.0.0.1";
const ORIGINATOR_PORT: u32 = 0;

/// Something that can open a byte stream to `host:port`.
///
/// Registered under a transport name in a
/// [`TransportRegistry`](crate::tunnel::registry::TransportRegistry) and
/// consulted by database drivers whenever they need a connection.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a channel to `destination` (`host:port`).
    async fn dial(&self, destination: &str) -> Result<LogicalChannel, TunnelError>;

    /// Identity used to tell dialers apart on registration.
    fn id(&self) -> Uuid;
}

/// Dialer bound to one [`TunnelSession`](crate::tunnel::session::TunnelSession).
///
/// Cheap to clone. Holds only a weak reference to the session, so it never
/// keeps a closed or dropped session alive; dialing then fails with
/// [`TunnelError::SessionClosed`].
#[derive(Clone)]
pub struct TunnelDialer {
    session: Weak<SessionInner>,
    id: Uuid,
    shutdown: CancellationToken,
}

impl TunnelDialer {
    pub(crate) fn new(session: &Arc<SessionInner>) -> Self {
        Self {
            session: Arc::downgrade(session),
            id: session.id,
            shutdown: session.shutdown.clone(),
        }
    }

    /// Whether the owning session is gone.
    pub fn is_closed(&self) -> bool {
        match self.session.upgrade() {
            Some(session) => session.is_closed(),
            None => true,
        }
    }

    /// [`dial`](Dialer::dial) with a deadline. Expiry is reported as a
    /// retryable [`TunnelError::Channel`].
    pub async fn dial_timeout(
        &self,
        destination: &str,
        timeout: Duration,
    ) -> Result<LogicalChannel, TunnelError> {
        tokio::time::timeout(timeout, self.dial(destination))
            .await
            .map_err(|_| TunnelError::Channel {
                destination: destination.to_string(),
                reason: format!("timed out after {:?}", timeout),
                retryable: true,
            })?
    }
}

impl std::fmt::Debug for TunnelDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelDialer")
            .field("session", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Dialer for TunnelDialer {
    async fn dial(&self, destination: &str) -> Result<LogicalChannel, TunnelError> {
        let (host, port) = parse_destination(destination)?;

        let session = self
            .session
            .upgrade()
            .filter(|session| !session.is_closed())
            .ok_or(TunnelError::SessionClosed)?;

        // The open runs in its own task so that a caller giving up mid-dial
        // cannot strand a confirmed channel on the bastion.
        let (tx, rx) = oneshot::channel();
        let shutdown = self.shutdown.clone();
        let target = destination.to_string();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Err(TunnelError::SessionClosed),
                opened = session.handle.channel_open_direct_tcpip(
                    host,
                    u32::from(port),
                    ORIGINATOR_ADDRESS,
                    ORIGINATOR_PORT,
                ) => opened.map_err(|e| classify_channel_error(&target, e)),
            };
            drop(session);

            if let Err(Ok(channel)) = tx.send(result) {
                debug!("Dial to {} abandoned, closing channel", target);
                if let Err(e) = channel.close().await {
                    debug!("Closing abandoned channel to {} errored: {}", target, e);
                }
            }
        });

        match rx.await {
            Ok(Ok(channel)) => {
                debug!("Opened channel to {} via session {}", destination, self.id);
                Ok(LogicalChannel::new(
                    Box::new(channel.into_stream()),
                    &self.shutdown,
                    destination,
                ))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TunnelError::SessionClosed),
        }
    }

    fn id(&self) -> Uuid {
        self.id
    }
}
