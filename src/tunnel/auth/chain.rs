//! Ordered authentication chain.

use async_trait::async_trait;
use russh::client;
use tracing::debug;

use crate::tunnel::session::BastionHandler;

use super::traits::AuthStrategy;
use super::{AgentAuth, KeyAuth, PasswordAuth};

/// Authentication methods tried in insertion order.
///
/// The first method the server accepts ends the chain. When every method
/// fails, the error lists each method's outcome so the caller can tell a
/// rejected password from an unreachable agent.
///
/// # Example
///
/// ```ignore
/// let chain = AuthChain::new()
///     .with_key(KeyAuth::from_file("/home/ops/.ssh/id_ed25519", None)?)
///     .with_agent()
///     .with_password("secret");
/// ```
pub struct AuthChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Add an already loaded private key.
    pub fn with_key(mut self, key: KeyAuth) -> Self {
        self.strategies.push(Box::new(key));
        self
    }

    /// Add SSH agent authentication.
    pub fn with_agent(mut self) -> Self {
        self.strategies.push(Box::new(AgentAuth::new()));
        self
    }

    /// Add password authentication.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.strategies.push(Box::new(PasswordAuth::new(password)));
        self
    }

    /// Add a custom strategy.
    pub fn with_strategy(mut self, strategy: Box<dyn AuthStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Method names in the order they will be attempted.
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Default for AuthChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuthChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthChain")
            .field("methods", &self.names())
            .finish()
    }
}

#[async_trait]
impl AuthStrategy for AuthChain {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<BastionHandler>,
        username: &str,
    ) -> Result<bool, String> {
        if self.strategies.is_empty() {
            return Err("no authentication methods configured".to_string());
        }

        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            debug!("Trying authentication method: {}", strategy.name());

            match strategy.authenticate(handle, username).await {
                Ok(true) => {
                    debug!("Authentication succeeded with method: {}", strategy.name());
                    return Ok(true);
                }
                Ok(false) => {
                    debug!("Server rejected method: {}", strategy.name());
                    failures.push(format!("{}: rejected", strategy.name()));
                }
                Err(e) => {
                    debug!("Method {} errored: {}", strategy.name(), e);
                    failures.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }

        Err(failures.join("; "))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
