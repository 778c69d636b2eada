//! In-process bastion and destination services for integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bastion_tunnel::tunnel::error::BoxError;
use bastion_tunnel::tunnel::{ConnectionDescriptor, DatabaseDriver, LogicalChannel};
use russh::keys::ssh_key::LineEnding;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, HashAlg, PrivateKey, PublicKey};
use russh::server::{self, Auth, Msg, Session};
use russh::Channel;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub const BASTION_USER: &str = "ops";
pub const BASTION_PASSWORD: &str = "bastion-secret";

/// Destination host the fake bastion accepts but never answers for.
pub const BLACKHOLE_HOST: &str = "blackhole.invalid";

pub const DB_USER: &str = "app";
pub const DB_PASSWORD: &str = "db-secret";
pub const DB_NAME: &str = "orders";

#[derive(Clone)]
struct AcceptedCredentials {
    user: String,
    password: Option<String>,
    authorized_key: Option<PublicKey>,
}

/// An SSH server on a loopback address that allows `direct-tcpip` forwarding.
pub struct TestBastion {
    pub address: String,
    pub fingerprint: String,
    task: JoinHandle<()>,
}

impl TestBastion {
    /// Accepts `BASTION_USER` / `BASTION_PASSWORD`.
    pub async fn with_password() -> Self {
        Self::start(AcceptedCredentials {
            user: BASTION_USER.to_string(),
            password: Some(BASTION_PASSWORD.to_string()),
            authorized_key: None,
        })
        .await
    }

    /// Password bastion on `[::1]`, or `None` when the host has no IPv6 loopback.
    pub async fn with_password_on_ipv6() -> Option<Self> {
        Self::start_on(
            AcceptedCredentials {
                user: BASTION_USER.to_string(),
                password: Some(BASTION_PASSWORD.to_string()),
                authorized_key: None,
            },
            "[::1]:0",
        )
        .await
        .ok()
    }

    /// Accepts `BASTION_USER` holding the private half of `key`.
    pub async fn with_authorized_key(key: PublicKey) -> Self {
        Self::start(AcceptedCredentials {
            user: BASTION_USER.to_string(),
            password: None,
            authorized_key: Some(key),
        })
        .await
    }

    async fn start(accepted: AcceptedCredentials) -> Self {
        Self::start_on(accepted, "127.0.0.1:0").await.unwrap()
    }

    async fn start_on(accepted: AcceptedCredentials, bind: &str) -> io::Result<Self> {
        let host_key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
        let fingerprint = host_key
            .public_key()
            .fingerprint(HashAlg::Sha256)
            .to_string();

        let config = Arc::new(server::Config {
            keys: vec![host_key],
            auth_rejection_time: Duration::from_millis(10),
            auth_rejection_time_initial: Some(Duration::from_millis(0)),
            inactivity_timeout: None,
            ..Default::default()
        });

        let listener = TcpListener::bind(bind).await?;
        let address = listener.local_addr()?.to_string();

        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let config = Arc::clone(&config);
                let handler = FakeBastionHandler {
                    accepted: accepted.clone(),
                };
                tokio::spawn(async move {
                    if let Ok(session) = server::run_stream(config, socket, handler).await {
                        let _ = session.await;
                    }
                });
            }
        });

        Ok(Self {
            address,
            fingerprint,
            task,
        })
    }
}

impl Drop for TestBastion {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct FakeBastionHandler {
    accepted: AcceptedCredentials,
}

impl server::Handler for FakeBastionHandler {
    type Error = russh::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let ok = user == self.accepted.user
            && self.accepted.password.as_deref() == Some(password);
        Ok(if ok { Auth::Accept } else { Auth::reject() })
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        let ok = user == self.accepted.user
            && self
                .accepted
                .authorized_key
                .as_ref()
                .is_some_and(|authorized| authorized.key_data() == key.key_data());
        Ok(if ok { Auth::Accept } else { Auth::reject() })
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        _originator_address: &str,
        _originator_port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if host_to_connect == BLACKHOLE_HOST {
            // Simulate a destination that never answers the SYN
            tokio::time::sleep(Duration::from_secs(30)).await;
            return Ok(false);
        }

        let target = format!("{}:{}", host_to_connect, port_to_connect);
        let Ok(mut upstream) = TcpStream::connect(&target).await else {
            return Ok(false);
        };

        tokio::spawn(async move {
            let mut stream = channel.into_stream();
            let _ = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
        });
        Ok(true)
    }
}

/// TCP echo server; returns its `host:port`.
pub async fn start_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    address
}

/// `host:port` on 127.0.0.1 with nothing listening.
pub async fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

/// Line-based stand-in for a database server.
///
/// The client opens with `AUTH <user> <password> <db>` and gets `OK` or
/// `ERR <reason>`; afterwards `SELECT 1` answers `1`.
pub async fn start_line_db_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_line_db(socket));
        }
    });
    address
}

async fn serve_line_db(socket: TcpStream) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    let expected = format!("AUTH {} {} {}", DB_USER, DB_PASSWORD, DB_NAME);
    match lines.next_line().await {
        Ok(Some(line)) if line == expected => {
            if writer.write_all(b"OK\n").await.is_err() {
                return;
            }
        }
        Ok(Some(_)) => {
            let _ = writer.write_all(b"ERR access denied\n").await;
            return;
        }
        _ => return,
    }

    while let Ok(Some(line)) = lines.next_line().await {
        let reply: &[u8] = match line.trim() {
            "SELECT 1" => b"1\n",
            _ => b"ERR unsupported\n",
        };
        if writer.write_all(reply).await.is_err() {
            return;
        }
    }
}

/// Driver for [`start_line_db_server`].
#[derive(Default)]
pub struct LineDbDriver {
    pub handshakes: Arc<AtomicUsize>,
}

pub struct LineDbConnection {
    stream: Mutex<BufReader<LogicalChannel>>,
}

impl LineDbConnection {
    pub async fn query(&self, sql: &str) -> io::Result<String> {
        let mut stream = self.stream.lock().await;
        stream.get_mut().write_all(format!("{}\n", sql).as_bytes()).await?;
        let mut line = String::new();
        stream.read_line(&mut line).await?;
        Ok(line.trim_end().to_string())
    }
}

#[async_trait]
impl DatabaseDriver for LineDbDriver {
    type Connection = LineDbConnection;

    fn name(&self) -> &'static str {
        "line-db"
    }

    async fn handshake(
        &self,
        channel: LogicalChannel,
        descriptor: &ConnectionDescriptor,
    ) -> Result<LineDbConnection, BoxError> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);

        let mut stream = BufReader::new(channel);
        let hello = format!(
            "AUTH {} {} {}\n",
            descriptor.user, descriptor.password, descriptor.database
        );
        stream.get_mut().write_all(hello.as_bytes()).await?;

        let mut reply = String::new();
        stream.read_line(&mut reply).await?;
        let reply = reply.trim_end();
        if reply != "OK" {
            return Err(format!("server said: {}", reply).into());
        }

        Ok(LineDbConnection {
            stream: Mutex::new(stream),
        })
    }
}

/// Fresh Ed25519 client key written to a temp file in OpenSSH format.
pub fn client_key_file() -> (tempfile::NamedTempFile, PublicKey) {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    let pem = key.to_openssh(LineEnding::LF).unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, pem.as_bytes()).unwrap();
    (file, key.public_key().clone())
}

/// Read everything the peer sends until EOF.
pub async fn read_all(channel: &mut LogicalChannel) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    channel.read_to_end(&mut buf).await?;
    Ok(buf)
}
