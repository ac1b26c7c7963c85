//! Stats protocol server
//!
//! Listens on any mix of TCP addresses and unix sockets. Every accepted
//! connection gets its own task, a greeting, and then a strict
//! read-line / dispatch / write loop.

use std::collections::HashSet;
use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol::{Dispatcher, Session, Stream};
use crate::types::Permission;
use crate::{GREETING_NAME, PROTOCOL_VERSION};

/// Longest request line accepted, newline included.
pub const MAX_LINE_LENGTH: usize = 4096;

/// Pause after a failed `accept` so a persistent error can't spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl Listener {
    async fn accept(&self) -> std::io::Result<(Box<dyn Stream>, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), "unix socket".to_string()))
            }
        }
    }
}

// ============================================================================
// Client registry
// ============================================================================

/// Live connections, bounded by `max_clients`.
#[derive(Debug)]
pub struct Registry {
    clients: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
    max: usize,
}

impl Registry {
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            clients: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
            max,
        }
    }

    /// Register a new connection, or `None` when the server is full.
    pub fn admit(self: &Arc<Self>) -> Option<ClientHandle> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if clients.len() >= self.max {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        clients.insert(id);
        Some(ClientHandle {
            id,
            registry: Arc::clone(self),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry slot held by one connection; released on drop.
#[derive(Debug)]
pub struct ClientHandle {
    id: u64,
    registry: Arc<Registry>,
}

impl ClientHandle {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.registry
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

// ============================================================================
// Server
// ============================================================================

struct Shared {
    dispatcher: Dispatcher,
    registry: Arc<Registry>,
    default_permission: Permission,
}

/// Bound listeners plus everything a connection task needs.
pub struct Server {
    listeners: Vec<Listener>,
    socket_paths: Vec<PathBuf>,
    shared: Arc<Shared>,
}

impl Server {
    /// Bind every configured entry.
    ///
    /// An entry that fails to bind is logged and skipped. Binding nothing
    /// at all is an error.
    pub async fn bind(config: &ServerConfig, dispatcher: Dispatcher) -> Result<Self> {
        let mut listeners = Vec::new();
        let mut socket_paths = Vec::new();

        for entry in &config.bind {
            match bind_entry(entry, config.port).await {
                Ok(bound) => {
                    for listener in bound {
                        #[cfg(unix)]
                        if let Listener::Unix(_) = listener {
                            socket_paths.push(PathBuf::from(entry));
                        }
                        listeners.push(listener);
                    }
                }
                Err(e) => warn!("Failed to bind {}: {}", entry, e),
            }
        }

        if listeners.is_empty() {
            return Err(Error::config("no listen address could be bound"));
        }

        Ok(Self {
            listeners,
            socket_paths,
            shared: Arc::new(Shared {
                dispatcher,
                registry: Arc::new(Registry::new(config.max_clients)),
                default_permission: config.default_permissions,
            }),
        })
    }

    /// Local addresses of the TCP listeners.
    #[must_use]
    pub fn tcp_addrs(&self) -> Vec<SocketAddr> {
        self.listeners
            .iter()
            .filter_map(|l| match l {
                Listener::Tcp(tcp) => tcp.local_addr().ok(),
                #[cfg(unix)]
                Listener::Unix(_) => None,
            })
            .collect()
    }

    /// Connection registry, for inspection.
    #[must_use]
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.shared.registry)
    }

    /// Accept connections until `shutdown` resolves, then remove socket
    /// files.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        let loops = self
            .listeners
            .into_iter()
            .map(|listener| accept_loop(listener, Arc::clone(&self.shared)));

        tokio::select! {
            _ = futures::future::join_all(loops) => {}
            () = shutdown => info!("Server shutting down"),
        }

        for path in &self.socket_paths {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove socket {}: {}", path.display(), e);
            }
        }
    }
}

async fn bind_entry(entry: &str, port: u16) -> Result<Vec<Listener>> {
    if entry.starts_with('/') {
        return bind_unix(entry);
    }

    if entry == "any" {
        // A dual-stack socket covers IPv4 too; fall back when IPv6 is off.
        let listener = match TcpListener::bind((Ipv6Addr::UNSPECIFIED, port)).await {
            Ok(listener) => listener,
            Err(e) => {
                debug!("IPv6 bind failed ({}), trying IPv4", e);
                TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?
            }
        };
        info!("Listening on {}", listener.local_addr()?);
        return Ok(vec![Listener::Tcp(listener)]);
    }

    let mut listeners = Vec::new();
    for addr in tokio::net::lookup_host((entry, port)).await? {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!("Listening on {}", addr);
                listeners.push(Listener::Tcp(listener));
            }
            Err(e) => warn!("Failed to bind {}: {}", addr, e),
        }
    }
    if listeners.is_empty() {
        return Err(Error::config(format!("{entry} resolved to no bindable address")));
    }
    Ok(listeners)
}

#[cfg(unix)]
fn bind_unix(path: &str) -> Result<Vec<Listener>> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed stale socket {}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let listener = tokio::net::UnixListener::bind(path)?;
    info!("Listening on {}", path);
    Ok(vec![Listener::Unix(listener)])
}

#[cfg(not(unix))]
fn bind_unix(path: &str) -> Result<Vec<Listener>> {
    Err(Error::config(format!(
        "{path}: unix sockets are not supported on this platform"
    )))
}

async fn accept_loop(listener: Listener, shared: Arc<Shared>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let Some(client) = shared.registry.admit() else {
            warn!("Maximum connections reached, rejecting {}", peer);
            continue;
        };
        debug!("[{}] Accepted connection from {}", client.id(), peer);

        let dispatcher = shared.dispatcher.clone();
        let permission = shared.default_permission;
        tokio::spawn(async move {
            let id = client.id();
            match serve_client(stream, &client, &dispatcher, permission).await {
                Ok(()) => debug!("[{}] Connection closed", id),
                Err(e) => debug!("[{}] Connection dropped: {}", id, e),
            }
        });
    }
}

async fn serve_client(
    stream: Box<dyn Stream>,
    client: &ClientHandle,
    dispatcher: &Dispatcher,
    permission: Permission,
) -> Result<()> {
    let id = client.id();
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut session = Session { permission };

    writer
        .write_all(format!("OK {GREETING_NAME} {PROTOCOL_VERSION}\n").as_bytes())
        .await?;
    writer.flush().await?;

    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        let n = (&mut reader)
            .take(MAX_LINE_LENGTH as u64)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Ok(());
        }
        if buf.last() != Some(&b'\n') {
            if n == MAX_LINE_LENGTH {
                warn!("[{}] Request line too long, closing", id);
            }
            return Ok(());
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        debug!("[{}]< {}", id, line);

        let reply = dispatcher.dispatch(&mut session, line).await.encode();
        for out in reply.lines() {
            debug!("[{}]> {}", id, out);
        }
        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StatsClient;
    use crate::db::Database;
    use crate::song::Song;
    use std::collections::HashMap;
    use tokio::net::TcpStream;

    mod registry {
        use super::*;

        #[test]
        fn test_admit_respects_max() {
            let registry = Arc::new(Registry::new(2));
            let a = registry.admit().unwrap();
            let b = registry.admit().unwrap();
            assert_ne!(a.id(), b.id());
            assert!(registry.admit().is_none());

            drop(a);
            assert_eq!(registry.len(), 1);
            assert!(registry.admit().is_some());
        }
    }

    async fn start(max_clients: usize) -> (SocketAddr, Database) {
        let db = Database::open_in_memory().unwrap();
        let song = Song {
            artist: Some("X".to_string()),
            title: Some("Y".to_string()),
            ..Song::new("a.mp3")
        };
        db.process(&song, false).await.unwrap();

        let config = ServerConfig {
            bind: vec!["127.0.0.1".to_string()],
            port: 0,
            max_clients,
            default_permissions: Permission::SELECT,
            passwords: HashMap::from([("s3cret".to_string(), Permission::ALL)]),
        };
        let dispatcher = Dispatcher::new(db.clone(), config.passwords.clone());
        let server = Server::bind(&config, dispatcher).await.unwrap();
        let addr = server.tcp_addrs()[0];
        tokio::spawn(server.run(std::future::pending()));
        (addr, db)
    }

    async fn read_greeting(stream: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        stream.read_line(&mut line).await.unwrap();
        line
    }

    #[tokio::test]
    async fn test_greeting_and_framing() {
        let (addr, _) = start(4).await;
        let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());
        assert_eq!(read_greeting(&mut stream).await, "OK MPDCRON 0.1\n");

        stream.write_all(b"list \"uri = 'a.mp3'\"\n").await.unwrap();
        let mut response = String::new();
        while !response.ends_with("OK\n") {
            stream.read_line(&mut response).await.unwrap();
        }
        assert_eq!(response, "id: 1\nfile: a.mp3\nOK\n");
    }

    #[tokio::test]
    async fn test_permission_and_password() {
        let (addr, db) = start(4).await;
        let mut client = StatsClient::connect(&addr.ip().to_string(), addr.port())
            .await
            .unwrap();

        let err = client.command("love", &["uri = 'a.mp3'"]).await.unwrap_err();
        assert!(matches!(err, Error::Server { code: 4, .. }), "{err}");

        let err = client.password("wrong").await.unwrap_err();
        assert!(matches!(err, Error::Server { code: 3, .. }), "{err}");

        client.password("s3cret").await.unwrap();
        let pairs = client.command("love", &["uri = 'a.mp3'"]).await.unwrap();
        assert_eq!(pairs, vec![("changes".to_string(), "1".to_string())]);

        let info = db
            .list_info(Permission::SELECT, crate::types::EntityKind::Song, "1")
            .await
            .unwrap();
        assert_eq!(info[0].love, 1);
    }

    #[tokio::test]
    async fn test_overlong_line_closes_connection() {
        let (addr, _) = start(4).await;
        let mut stream = BufReader::new(TcpStream::connect(addr).await.unwrap());
        read_greeting(&mut stream).await;

        let line = format!("list {}\n", "x".repeat(MAX_LINE_LENGTH));
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        assert!(rest.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_socket_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sock");
        std::fs::write(&path, b"stale").unwrap();
        let socket = path.display().to_string();

        let db = Database::open_in_memory().unwrap();
        let config = ServerConfig {
            bind: vec![socket.clone()],
            port: 0,
            max_clients: 4,
            default_permissions: Permission::SELECT,
            passwords: HashMap::new(),
        };
        let server = Server::bind(&config, Dispatcher::new(db, HashMap::new()))
            .await
            .unwrap();
        assert!(server.tcp_addrs().is_empty());

        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let running = tokio::spawn(server.run(async {
            let _ = stopped.await;
        }));

        let mut client = StatsClient::connect(&socket, 0).await.unwrap();
        assert_eq!(client.version(), "0.1");
        assert!(client.command("list", &["1"]).await.unwrap().is_empty());
        drop(client);

        stop.send(()).unwrap();
        running.await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_max_clients() {
        let (addr, _) = start(1).await;
        let mut first = BufReader::new(TcpStream::connect(addr).await.unwrap());
        read_greeting(&mut first).await;

        let mut second = BufReader::new(TcpStream::connect(addr).await.unwrap());
        assert_eq!(read_greeting(&mut second).await, "");

        drop(first);
        // The slot frees up once the first connection task notices EOF.
        let mut greeting = String::new();
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut third = BufReader::new(TcpStream::connect(addr).await.unwrap());
            greeting = read_greeting(&mut third).await;
            if !greeting.is_empty() {
                break;
            }
        }
        assert_eq!(greeting, "OK MPDCRON 0.1\n");
    }
}
