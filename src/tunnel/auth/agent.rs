//! SSH agent authentication.

use async_trait::async_trait;
use russh::{client, keys};
use tracing::{debug, info};

use crate::tunnel::session::BastionHandler;

use super::traits::AuthStrategy;

/// SSH agent authentication strategy.
///
/// Connects to the agent named by `SSH_AUTH_SOCK` at handshake time and
/// offers each identity it holds. The agent socket lives only for the
/// duration of one [`authenticate`](AuthStrategy::authenticate) call.
#[derive(Debug, Default)]
pub struct AgentAuth;

impl AgentAuth {
    pub fn new() -> Self {
        Self
    }

    /// Whether an agent is reachable right now. The probe connection is
    /// closed before returning.
    pub async fn is_reachable() -> bool {
        match keys::agent::client::AgentClient::connect_env().await {
            Ok(_agent) => true,
            Err(e) => {
                debug!("SSH agent not reachable: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl AuthStrategy for AgentAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<BastionHandler>,
        username: &str,
    ) -> Result<bool, String> {
        let mut agent = keys::agent::client::AgentClient::connect_env()
            .await
            .map_err(|e| format!("failed to connect to SSH agent: {}", e))?;

        let identities = agent
            .request_identities()
            .await
            .map_err(|e| format!("failed to list SSH agent identities: {}", e))?;

        if identities.is_empty() {
            return Err("no identities in SSH agent".to_string());
        }

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        for identity in identities {
            debug!("Trying SSH agent identity: {:?}", identity.comment());

            match handle
                .authenticate_publickey_with(username, identity.clone(), hash_alg, &mut agent)
                .await
            {
                Ok(result) if result.success() => {
                    info!("Authenticated with SSH agent identity");
                    return Ok(true);
                }
                Ok(_) => {
                    debug!("Agent identity not accepted, trying next");
                }
                Err(e) => {
                    debug!("Agent authentication error: {}, trying next", e);
                }
            }
        }

        Ok(false)
    }

    fn name(&self) -> &'static str {
        "agent"
    }
}
