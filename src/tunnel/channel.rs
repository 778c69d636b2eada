//! Byte stream for one forwarded connection.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::debug;

use crate::tunnel::error::TunnelError;

/// Underlying bidirectional stream of a channel.
pub type ForwardStream = Box<dyn AsyncReadWrite>;

/// `AsyncRead + AsyncWrite` usable behind a box.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncReadWrite for T {}

/// A forwarded connection to one destination, multiplexed over a session.
///
/// Reads and writes fail with an `io::Error` wrapping
/// [`TunnelError::SessionClosed`] once the owning session is closed or
/// dropped; use [`TunnelError::from_io`] to recover it. Closing the channel
/// leaves the session and its other channels untouched.
pub struct LogicalChannel {
    stream: ForwardStream,
    destination: String,
    shutdown: CancellationToken,
    session_closed: Pin<Box<WaitForCancellationFutureOwned>>,
    session_gone: bool,
    closed: bool,
}

impl LogicalChannel {
    /// Wrap `stream`, tying its lifetime to the session's `shutdown` token.
    pub fn new(
        stream: ForwardStream,
        shutdown: &CancellationToken,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            stream,
            destination: destination.into(),
            shutdown: shutdown.clone(),
            session_closed: Box::pin(shutdown.clone().cancelled_owned()),
            session_gone: false,
            closed: false,
        }
    }

    /// `host:port` this channel was opened to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the owning session has gone away.
    pub fn is_session_closed(&self) -> bool {
        self.session_gone || self.shutdown.is_cancelled()
    }

    /// Shut the channel down. Idempotent; later reads and writes fail.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if self.is_session_closed() {
            return;
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of channel to {} errored: {}", self.destination, e);
        }
    }

    fn poll_session(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.session_gone && self.session_closed.as_mut().poll(cx).is_ready() {
            self.session_gone = true;
        }
        self.session_gone
    }

    fn check_usable(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("channel to {} is closed", self.destination),
            ));
        }
        if self.poll_session(cx) {
            return Err(TunnelError::session_closed_io());
        }
        Ok(())
    }
}

impl fmt::Debug for LogicalChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalChannel")
            .field("destination", &self.destination)
            .field("closed", &self.closed)
            .field("session_gone", &self.session_gone)
            .finish()
    }
}

impl AsyncRead for LogicalChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check_usable(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for LogicalChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.check_usable(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.check_usable(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.closed || this.poll_session(cx) {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.stream).poll_shutdown(cx)
    }
}
