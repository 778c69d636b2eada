//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::tunnel::session::BastionHandler;

/// One way of proving identity to the bastion.
///
/// Implementations must be `Send + Sync` so a chain can be shared between
/// sessions that are opened from different tasks.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate on an already handshaken connection.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - The server rejected these credentials
    /// * `Err(message)` - The attempt itself failed (agent unreachable, I/O)
    async fn authenticate(
        &self,
        handle: &mut client::Handle<BastionHandler>,
        username: &str,
    ) -> Result<bool, String>;

    /// Short name used in logs and in aggregated failure reasons.
    fn name(&self) -> &'static str;
}
