//! Database handles addressed through a registered transport.
//!
//! [`TunneledConnectionFactory`] ties three things together: the
//! [`TransportRegistry`] that maps transport names to dialers, a
//! [`DatabaseDriver`] that speaks the database's wire protocol over a
//! [`LogicalChannel`], and the destination credentials. Opening a handle is
//! lazy; the first [`TunneledDatabase::connection`] call dials and then runs
//! the driver handshake.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::tunnel::channel::LogicalChannel;
use crate::tunnel::config::{DEFAULT_TRANSPORT_PREFIX, DatabaseCredentials};
use crate::tunnel::descriptor::ConnectionDescriptor;
use crate::tunnel::dialer::Dialer;
use crate::tunnel::error::{BoxError, TunnelError};
use crate::tunnel::registry::TransportRegistry;

/// A database client that can complete its handshake over a tunnel channel.
#[async_trait]
pub trait DatabaseDriver: Send + Sync + 'static {
    /// Live connection handed back to the caller.
    type Connection: Send + Sync;

    fn name(&self) -> &'static str;

    /// Run the protocol handshake over `channel` using `descriptor`'s
    /// credentials and database name.
    async fn handshake(
        &self,
        channel: LogicalChannel,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Self::Connection, BoxError>;
}

/// Opens database handles over registered transports.
pub struct TunneledConnectionFactory<D: DatabaseDriver> {
    registry: Arc<TransportRegistry>,
    driver: Arc<D>,
    transport_prefix: String,
}

impl<D: DatabaseDriver> TunneledConnectionFactory<D> {
    pub fn new(registry: Arc<TransportRegistry>, driver: D) -> Self {
        Self {
            registry,
            driver: Arc::new(driver),
            transport_prefix: DEFAULT_TRANSPORT_PREFIX.to_string(),
        }
    }

    /// Prefix for names generated by [`connect_through`](Self::connect_through).
    pub fn with_transport_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.transport_prefix = prefix.into();
        self
    }

    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    /// Register `dialer` as transport `name`. See
    /// [`TransportRegistry::register`] for the idempotency rules.
    pub fn register(&self, name: &str, dialer: Arc<dyn Dialer>) -> Result<(), TunnelError> {
        self.registry.register(name, dialer)
    }

    /// Describe a database reached through `transport`. Does not dial.
    pub fn open(
        &self,
        transport: &str,
        credentials: &DatabaseCredentials,
    ) -> Result<TunneledDatabase<D>, TunnelError> {
        self.open_parsed(ConnectionDescriptor::from_credentials(transport, credentials))
    }

    /// Same as [`open`](Self::open), from a descriptor string.
    pub fn open_descriptor(&self, descriptor: &str) -> Result<TunneledDatabase<D>, TunnelError> {
        self.open_parsed(ConnectionDescriptor::parse(descriptor)?)
    }

    /// Register `dialer` under a fresh unique name, open the database and
    /// complete the handshake.
    ///
    /// The returned handle owns the generated name: it is unregistered when
    /// the handle is dropped, and immediately if connecting fails.
    pub async fn connect_through(
        &self,
        dialer: Arc<dyn Dialer>,
        credentials: &DatabaseCredentials,
    ) -> Result<TunneledDatabase<D>, TunnelError> {
        let name = TransportRegistry::unique_name(&self.transport_prefix);
        self.register(&name, dialer)?;
        let binding = TransportBinding {
            registry: Arc::clone(&self.registry),
            name,
        };

        let mut database = self.open(&binding.name, credentials)?;
        database.binding = Some(binding);
        database.connection().await?;
        Ok(database)
    }

    fn open_parsed(
        &self,
        descriptor: ConnectionDescriptor,
    ) -> Result<TunneledDatabase<D>, TunnelError> {
        let dialer = self.registry.resolve(&descriptor.transport)?;
        debug!("Opened handle for {} ({})", descriptor, self.driver.name());

        Ok(TunneledDatabase {
            descriptor,
            dialer,
            driver: Arc::clone(&self.driver),
            connection: OnceCell::new(),
            binding: None,
        })
    }
}

/// A transport name generated for one handle, removed from the registry on drop.
struct TransportBinding {
    registry: Arc<TransportRegistry>,
    name: String,
}

impl Drop for TransportBinding {
    fn drop(&mut self) {
        self.registry.unregister(&self.name);
    }
}

/// A database reachable through a tunnel, connected on first use.
pub struct TunneledDatabase<D: DatabaseDriver> {
    descriptor: ConnectionDescriptor,
    dialer: Arc<dyn Dialer>,
    driver: Arc<D>,
    connection: OnceCell<D::Connection>,
    binding: Option<TransportBinding>,
}

impl<D: DatabaseDriver> TunneledDatabase<D> {
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    /// The live connection, establishing it on first call.
    ///
    /// Tunnel failures come back as their own variants and the driver is not
    /// invoked. A driver rejection is [`TunnelError::Database`]. A failed
    /// attempt leaves the handle unconnected so a later call tries again.
    pub async fn connection(&self) -> Result<&D::Connection, TunnelError> {
        self.connection.get_or_try_init(|| self.establish()).await
    }

    /// Consume the handle, returning the connection if one was established.
    pub fn into_connection(self) -> Option<D::Connection> {
        self.connection.into_inner()
    }

    async fn establish(&self) -> Result<D::Connection, TunnelError> {
        let channel = self.dialer.dial(&self.descriptor.address).await?;

        let connection = self
            .driver
            .handshake(channel, &self.descriptor)
            .await
            .map_err(|source| TunnelError::Database {
                database: self.descriptor.database.clone(),
                source,
            })?;

        info!(
            "Connected to {} via transport '{}'",
            self.descriptor.database, self.descriptor.transport
        );
        Ok(connection)
    }
}
