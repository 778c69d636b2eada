//! PostgreSQL over the tunnel, backed by `tokio-postgres`.

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

use crate::tunnel::channel::LogicalChannel;
use crate::tunnel::descriptor::ConnectionDescriptor;
use crate::tunnel::error::BoxError;
use crate::tunnel::factory::DatabaseDriver;

/// Descriptor parameters passed through to the server.
const APPLICATION_NAME_PARAM: &str = "application_name";
const OPTIONS_PARAM: &str = "options";

/// Drives a PostgreSQL startup handshake over a [`LogicalChannel`].
///
/// The tunnel already encrypts the hop to the bastion, so the session itself
/// runs without TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

fn pg_config(descriptor: &ConnectionDescriptor) -> tokio_postgres::Config {
    let mut config = tokio_postgres::Config::new();
    config.user(&descriptor.user).dbname(&descriptor.database);
    if !descriptor.password.is_empty() {
        config.password(&descriptor.password);
    }
    if let Some(name) = descriptor.param(APPLICATION_NAME_PARAM) {
        config.application_name(name);
    }
    if let Some(options) = descriptor.param(OPTIONS_PARAM) {
        config.options(options);
    }
    config
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    type Connection = Client;

    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn handshake(
        &self,
        channel: LogicalChannel,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Client, BoxError> {
        let destination = channel.destination().to_string();
        let (client, connection) = pg_config(descriptor).connect_raw(channel, NoTls).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection to {} failed: {}", destination, e);
            } else {
                debug!("PostgreSQL connection to {} finished", destination);
            }
        });

        Ok(client)
    }
}

/// Round-trip `SELECT 1` to prove the tunnel carries queries.
pub async fn ping(client: &Client) -> Result<i32, tokio_postgres::Error> {
    let row = client.query_one("SELECT 1", &[]).await?;
    row.try_get(0)
}
