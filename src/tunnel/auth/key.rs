//! Private key SSH authentication.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::keys::{self, PrivateKey};
use tracing::debug;

use crate::tunnel::error::TunnelError;
use crate::tunnel::session::BastionHandler;

use super::traits::AuthStrategy;

/// Public key authentication with a key that was parsed up front.
///
/// Parsing happens when the strategy is built, so a malformed or
/// wrongly-encrypted key fails before any connection is attempted.
pub struct KeyAuth {
    key: Arc<PrivateKey>,
    source: String,
}

impl KeyAuth {
    /// Wrap an already decoded key.
    pub fn new(key: PrivateKey) -> Self {
        Self {
            key: Arc::new(key),
            source: "in-memory".to_string(),
        }
    }

    /// Load and decode a private key file, decrypting it with `passphrase`
    /// when one is given.
    pub fn from_file(
        path: impl AsRef<Path>,
        passphrase: Option<&str>,
    ) -> Result<Self, TunnelError> {
        let path = path.as_ref();
        let key = keys::load_secret_key(path, passphrase).map_err(|e| TunnelError::KeyParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Loaded {} private key from {:?}", key.algorithm(), path);

        Ok(Self {
            key: Arc::new(key),
            source: path.display().to_string(),
        })
    }

    /// Where the key came from, for logs.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for KeyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyAuth")
            .field("source", &self.source)
            .field("algorithm", &self.key.algorithm())
            .finish()
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<BastionHandler>,
        username: &str,
    ) -> Result<bool, String> {
        // RSA keys need the strongest hash both sides agree on
        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();
        debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

        let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::clone(&self.key), hash_alg);

        let result = handle
            .authenticate_publickey(username, key_with_hash)
            .await
            .map_err(|e| format!("key authentication failed: {}", e))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
