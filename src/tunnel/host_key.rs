//! Host key trust policy for the bastion.
//!
//! There is no implicit default: callers pick a [`HostKeyPolicy`] when opening a
//! session. Accepting any key is possible only through
//! [`HostKeyPolicy::InsecureAcceptAny`], which logs a warning on every
//! connection.
//!
//! # Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `BASTION_HOST_KEY_FINGERPRINT` | Pinned `SHA256:` fingerprint |
//! | `BASTION_KNOWN_HOSTS` | known_hosts file to check against |
//! | `BASTION_INSECURE_ACCEPT_ANY_HOST_KEY` | `true` to skip verification (INSECURE) |
//!
//! Resolution order is fingerprint, explicit known_hosts file, insecure flag,
//! then the user's `~/.ssh/known_hosts`.

use std::env;
use std::path::PathBuf;

use russh::keys::{self, HashAlg, PublicKey};
use tracing::{debug, warn};

pub(crate) const FINGERPRINT_ENV_VAR: &str = "BASTION_HOST_KEY_FINGERPRINT";
pub(crate) const KNOWN_HOSTS_ENV_VAR: &str = "BASTION_KNOWN_HOSTS";
pub(crate) const INSECURE_ENV_VAR: &str = "BASTION_INSECURE_ACCEPT_ANY_HOST_KEY";

/// How the bastion's host key is verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Look the key up in a known_hosts file; `None` means `~/.ssh/known_hosts`.
    KnownHosts { path: Option<PathBuf> },
    /// Require an exact SHA256 fingerprint, with or without the `SHA256:` prefix.
    Fingerprint(String),
    /// Accept whatever key the server presents. Vulnerable to MITM.
    InsecureAcceptAny,
}

impl HostKeyPolicy {
    /// Check against the user's default known_hosts file.
    pub fn known_hosts() -> Self {
        HostKeyPolicy::KnownHosts { path: None }
    }

    /// Check against a specific known_hosts file.
    pub fn known_hosts_file(path: impl Into<PathBuf>) -> Self {
        HostKeyPolicy::KnownHosts {
            path: Some(path.into()),
        }
    }

    /// Pin a single SHA256 fingerprint.
    pub fn fingerprint(fingerprint: impl Into<String>) -> Self {
        HostKeyPolicy::Fingerprint(fingerprint.into())
    }

    /// Resolve the policy from the environment.
    pub fn from_env() -> Self {
        if let Ok(fingerprint) = env::var(FINGERPRINT_ENV_VAR)
            && !fingerprint.is_empty()
        {
            return HostKeyPolicy::Fingerprint(fingerprint);
        }

        if let Ok(path) = env::var(KNOWN_HOSTS_ENV_VAR)
            && !path.is_empty()
        {
            return HostKeyPolicy::known_hosts_file(path);
        }

        if let Ok(insecure) = env::var(INSECURE_ENV_VAR)
            && (insecure.eq_ignore_ascii_case("true") || insecure == "1")
        {
            return HostKeyPolicy::InsecureAcceptAny;
        }

        HostKeyPolicy::known_hosts()
    }

    /// Decide whether `key`, presented by `host:port`, is trusted.
    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> bool {
        match self {
            HostKeyPolicy::InsecureAcceptAny => {
                warn!(
                    "Accepting host key {} for {}:{} WITHOUT verification (insecure)",
                    key.fingerprint(HashAlg::Sha256),
                    host,
                    port
                );
                true
            }
            HostKeyPolicy::Fingerprint(expected) => {
                let actual = key.fingerprint(HashAlg::Sha256).to_string();
                let matched = normalize_fingerprint(expected) == normalize_fingerprint(&actual);
                if !matched {
                    warn!(
                        "Host key mismatch for {}:{}: expected {}, received {}",
                        host, port, expected, actual
                    );
                }
                matched
            }
            HostKeyPolicy::KnownHosts { path } => {
                let result = match path {
                    Some(path) => keys::check_known_hosts_path(host, port, key, path),
                    None => keys::check_known_hosts(host, port, key),
                };
                match result {
                    Ok(true) => {
                        debug!("Host key for {}:{} found in known_hosts", host, port);
                        true
                    }
                    Ok(false) => {
                        warn!("Host {}:{} is not in known_hosts", host, port);
                        false
                    }
                    Err(e) => {
                        warn!("Host key verification for {}:{} failed: {}", host, port, e);
                        false
                    }
                }
            }
        }
    }
}

/// Strip the algorithm prefix and base64 padding so user-supplied pins compare
/// equal to what `ssh-keygen -l` prints.
fn normalize_fingerprint(fingerprint: &str) -> &str {
    let trimmed = fingerprint.trim();
    let without_prefix = trimmed.strip_prefix("SHA256:").unwrap_or(trimmed);
    without_prefix.trim_end_matches('=')
}
