#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use bastion_tunnel::tunnel::config::resolve_transport_prefix;
use bastion_tunnel::tunnel::postgres::{PostgresDriver, ping};
use bastion_tunnel::tunnel::retry::with_retry;
use bastion_tunnel::tunnel::{
    AuthChainBuilder, Credentials, DatabaseCredentials, Dialer, HostKeyPolicy, RetryPolicy,
    TransportRegistry, TunnelConfig, TunnelSession, TunneledConnectionFactory,
};
use dotenv::dotenv;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    tracing_subscriber::fmt().with_env_filter(env_filter()).init();

    let credentials = Credentials::from_env()?;
    let tunnel_config = TunnelConfig::from_env()?;
    let policy = HostKeyPolicy::from_env();
    let retry_policy = RetryPolicy::from_env()?;

    let bastion = &credentials.bastion;
    let address = bastion.address();
    let chain = AuthChainBuilder::from_credentials(bastion).build().await?;

    let session = with_retry("bastion connect", &retry_policy, || {
        TunnelSession::open(&address, &bastion.user, &chain, policy.clone(), &tunnel_config)
    })
    .await?;

    let result = round_trip(&session, &credentials.database).await;
    session.close().await;
    result
}

/// `RUST_LOG` when set, replacing the default entirely; `info` otherwise.
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Open the database through the session and run one query.
async fn round_trip(
    session: &TunnelSession,
    database: &DatabaseCredentials,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(TransportRegistry::new());
    let factory = TunneledConnectionFactory::new(registry, PostgresDriver::new())
        .with_transport_prefix(resolve_transport_prefix());

    let dialer: Arc<dyn Dialer> = Arc::new(session.dialer());
    let handle = factory.connect_through(dialer, database).await?;
    let client = handle.connection().await?;

    let value = ping(client).await?;
    info!(
        "Round trip to {} through bastion {} returned {}",
        handle.descriptor(),
        session.bastion(),
        value
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_replaces_default_filter() {
        // SAFETY: No other test in this binary reads or writes the environment
        unsafe { std::env::set_var("RUST_LOG", "debug") };
        let overridden = env_filter().to_string();
        // SAFETY: As above
        unsafe { std::env::remove_var("RUST_LOG") };
        let default = env_filter().to_string();

        assert_eq!(overridden, "debug");
        assert_eq!(default, DEFAULT_LOG_FILTER);
    }
}
