//! Assemble an [`AuthChain`] from bastion credentials.
//!
//! Methods are added in a fixed order: private key, SSH agent, password. A
//! method is included only when it is usable:
//!
//! - the key when a key file is configured; a key that fails to parse is an
//!   error, not a skipped method
//! - the agent when it is enabled and `SSH_AUTH_SOCK` answers
//! - the password when one is configured and non-empty

use tracing::{debug, info};

use crate::tunnel::config::BastionCredentials;
use crate::tunnel::error::TunnelError;

use super::{AgentAuth, AuthChain, KeyAuth};

/// Builds the authentication chain for one bastion.
pub struct AuthChainBuilder<'a> {
    credentials: &'a BastionCredentials,
}

impl<'a> AuthChainBuilder<'a> {
    pub fn from_credentials(credentials: &'a BastionCredentials) -> Self {
        Self { credentials }
    }

    /// Build the chain, probing the SSH agent if agent use is enabled.
    ///
    /// An empty chain is returned as-is; opening a session with it fails with
    /// [`TunnelError::Auth`] before any network activity.
    pub async fn build(&self) -> Result<AuthChain, TunnelError> {
        let agent_reachable = if self.credentials.use_agent {
            AgentAuth::is_reachable().await
        } else {
            false
        };
        self.build_with_agent(agent_reachable)
    }

    /// Build the chain with the agent probe result supplied by the caller.
    pub fn build_with_agent(&self, agent_reachable: bool) -> Result<AuthChain, TunnelError> {
        let mut chain = AuthChain::new();

        if let Some(path) = &self.credentials.key_file {
            let key = KeyAuth::from_file(path, self.credentials.key_passphrase.as_deref())?;
            debug!("Using private key {}", key.source());
            chain = chain.with_key(key);
        }

        if self.credentials.use_agent && agent_reachable {
            chain = chain.with_agent();
        }

        if let Some(password) = &self.credentials.password
            && !password.is_empty()
        {
            chain = chain.with_password(password.clone());
        }

        info!(
            "Authentication methods for {}@{}: {:?}",
            self.credentials.user,
            self.credentials.address(),
            chain.names()
        );

        Ok(chain)
    }
}
