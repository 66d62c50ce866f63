//! Network-facing ingestion for the audit log.
//!
//! Two transports feed the same store: a token-authenticated TCP listener
//! for writers in isolated network namespaces, and a write-only Unix socket
//! for local writers. Messages are newline-delimited JSON objects of the
//! form `{"type": <tag>, "data": <any>}`; the store's append lock
//! linearizes whatever interleaving the connections produce, so writers
//! never choose sequence numbers.
//!
//! Only the TCP auth phase carries a read deadline. Once a writer has
//! authenticated it is trusted, and its connection lives until it hangs up
//! or the collector shuts down.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ring::constant_time::verify_slices_are_equal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UnixListener};
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use witness_store::{AuditStore, EntryKind};

/// Minimum accepted auth token length in bytes.
pub const MIN_TOKEN_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("auth token too short: {0} bytes, need at least {MIN_TOKEN_LEN}")]
    WeakToken(usize),
    #[error("listener I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Collector tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Deadline for the TCP auth read, in seconds.
    pub auth_timeout_secs: u64,
    /// Upper bound on a single message line; longer lines are dropped.
    pub max_line_bytes: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: 5,
            max_line_bytes: 1 << 20,
        }
    }
}

/// Ingestion endpoint feeding one [`AuditStore`].
pub struct Collector {
    store: AuditStore,
    config: CollectorConfig,
    shutdown: watch::Sender<bool>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Collector {
    pub fn new(store: AuditStore) -> Self {
        Self::with_config(store, CollectorConfig::default())
    }

    pub fn with_config(store: AuditStore, config: CollectorConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            config,
            shutdown,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Start the token-authenticated TCP transport on an ephemeral port and
    /// return the port. Tokens shorter than [`MIN_TOKEN_LEN`] are rejected
    /// before the socket is even bound.
    pub async fn start_tcp(&self, auth_token: impl Into<Vec<u8>>) -> Result<u16, CollectorError> {
        let token: Vec<u8> = auth_token.into();
        if token.len() < MIN_TOKEN_LEN {
            return Err(CollectorError::WeakToken(token.len()));
        }
        let token: Arc<[u8]> = Arc::from(token);

        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let port = listener.local_addr()?.port();

        let store = self.store.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(accept_tcp(listener, token, store, config, shutdown));
        self.listeners.lock().await.push(handle);

        info!("collector listening on tcp port {port}");
        Ok(port)
    }

    /// Start the Unix-socket transport at `path`. The socket file is
    /// created write-only (mode 0222): writers can send but not read, and
    /// verification runs as a different principal. A stale socket file from
    /// a previous run is removed first.
    pub async fn start_unix(&self, path: impl AsRef<Path>) -> Result<(), CollectorError> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o222))?;
        }

        let store = self.store.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(accept_unix(listener, store, config, shutdown));
        self.listeners.lock().await.push(handle);

        info!("collector listening on unix socket {}", path.display());
        Ok(())
    }

    /// Close the listeners and wait for every in-flight handler to drain.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut listeners = self.listeners.lock().await;
        for handle in listeners.drain(..) {
            if let Err(e) = handle.await {
                warn!("listener task failed during shutdown: {e}");
            }
        }
        info!("collector stopped");
    }
}

async fn accept_tcp(
    listener: TcpListener,
    token: Arc<[u8]>,
    store: AuditStore,
    config: CollectorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted tcp connection from {peer}");
                    handlers.spawn(handle_tcp(
                        stream,
                        token.clone(),
                        store.clone(),
                        config.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!("tcp accept failed: {e}"),
            },
            _ = shutdown.changed() => break,
        }
    }
    drop(listener);
    while handlers.join_next().await.is_some() {}
}

async fn accept_unix(
    listener: UnixListener,
    store: AuditStore,
    config: CollectorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut handlers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("accepted unix connection");
                    let shutdown = shutdown.clone();
                    let store = store.clone();
                    let config = config.clone();
                    handlers.spawn(async move {
                        read_messages(stream, store, config, shutdown, "unix").await;
                    });
                }
                Err(e) => warn!("unix accept failed: {e}"),
            },
            _ = shutdown.changed() => break,
        }
    }
    drop(listener);
    while handlers.join_next().await.is_some() {}
}

async fn handle_tcp(
    mut stream: TcpStream,
    token: Arc<[u8]>,
    store: AuditStore,
    config: CollectorConfig,
    shutdown: watch::Receiver<bool>,
) {
    // Auth phase: exactly the token length, under a deadline so an idle
    // connection cannot hold the handler open. Failures close the
    // connection without a response.
    let mut presented = vec![0u8; token.len()];
    let deadline = Duration::from_secs(config.auth_timeout_secs);
    match timeout(deadline, stream.read_exact(&mut presented)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            debug!("closing connection before auth completed: {e}");
            return;
        }
        Err(_) => {
            debug!("closing connection: auth deadline expired");
            return;
        }
    }
    if verify_slices_are_equal(&presented, &token).is_err() {
        debug!("closing connection: auth token mismatch");
        return;
    }

    // The deadline applies to auth only; authenticated writers are trusted.
    read_messages(stream, store, config, shutdown, "tcp").await;
}

async fn read_messages<S>(
    stream: S,
    store: AuditStore,
    config: CollectorConfig,
    mut shutdown: watch::Receiver<bool>,
    transport: &str,
) where
    S: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            // Drain buffered lines before honoring shutdown so a writer that
            // already hung up loses nothing.
            biased;
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.is_empty() {
                        continue;
                    }
                    if line.len() > config.max_line_bytes {
                        warn!("dropping oversized {transport} message ({} bytes)", line.len());
                        continue;
                    }
                    ingest_line(&store, &line).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{transport} read failed, closing connection: {e}");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IngestMessage {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

async fn ingest_line(store: &AuditStore, line: &str) {
    let message: IngestMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!("dropping malformed message: {e}");
            return;
        }
    };

    let kind = EntryKind::from_wire(&message.kind);
    let data = message.data.unwrap_or(serde_json::Value::Null);
    if let Err(e) = store.append(kind, &data).await {
        warn!("append of {kind} message failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    async fn test_store() -> (tempfile::TempDir, AuditStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(dir.path().join("logs.db")).await.unwrap();
        (dir, store)
    }

    async fn wait_for_count(store: &AuditStore, expected: u64) {
        for _ in 0..200 {
            if store.count().await.unwrap() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!(
            "store never reached {expected} entries, has {}",
            store.count().await.unwrap()
        );
    }

    const TOKEN: &[u8] = b"0123456789abcdef0123456789abcdef01234567"; // 40 bytes

    #[tokio::test]
    async fn test_weak_token_is_rejected() {
        let (_dir, store) = test_store().await;
        let collector = Collector::new(store);
        let result = collector.start_tcp(&b"short"[..]).await;
        assert!(matches!(result, Err(CollectorError::WeakToken(5))));
    }

    #[tokio::test]
    async fn test_concurrent_authenticated_writers() {
        let (_dir, store) = test_store().await;
        let collector = Collector::new(store.clone());
        let port = collector.start_tcp(TOKEN).await.unwrap();

        let mut writers = Vec::new();
        for writer in 0..5 {
            writers.push(tokio::spawn(async move {
                let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
                stream.write_all(TOKEN).await.unwrap();
                for i in 0..20 {
                    let line = format!(
                        "{}\n",
                        serde_json::json!({
                            "type": "console",
                            "data": {"line": format!("writer {writer} message {i}")}
                        })
                    );
                    stream.write_all(line.as_bytes()).await.unwrap();
                }
                stream.shutdown().await.unwrap();
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        wait_for_count(&store, 100).await;
        collector.stop().await;

        assert_eq!(store.count().await.unwrap(), 100);
        let result = store.verify_chain().await.unwrap();
        assert!(result.valid);
        assert_eq!(result.entry_count, 100);
    }

    #[tokio::test]
    async fn test_unauthorized_writer_stores_nothing() {
        let (_dir, store) = test_store().await;
        let collector = Collector::new(store.clone());
        let port = collector.start_tcp(TOKEN).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        // No token: the message bytes themselves are consumed as a failed
        // auth attempt.
        stream
            .write_all(b"{\"type\":\"console\",\"data\":{\"line\":\"sneaky\"}}\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        collector.stop().await;
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unix_socket_ingestion() {
        let (_dir, store) = test_store().await;
        let socket_dir = tempfile::tempdir().unwrap();
        let socket_path = socket_dir.path().join("witness.sock");

        let collector = Collector::new(store.clone());
        collector.start_unix(&socket_path).await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&socket_path)
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o222);
        }

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        stream
            .write_all(b"{\"type\":\"secret\",\"data\":{\"name\":\"API_KEY\",\"backend\":\"env\"}}\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        wait_for_count(&store, 1).await;
        collector.stop().await;

        let entry = store.get(1).await.unwrap();
        assert_eq!(entry.kind, EntryKind::Secret);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let (_dir, store) = test_store().await;
        let collector = Collector::new(store.clone());
        let port = collector.start_tcp(TOKEN).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(TOKEN).await.unwrap();
        stream.write_all(b"this is not json\n").await.unwrap();
        stream
            .write_all(b"{\"type\":\"console\",\"data\":{\"line\":\"still alive\"}}\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        wait_for_count(&store, 1).await;
        collector.stop().await;

        let entry = store.get(1).await.unwrap();
        assert_eq!(entry.kind, EntryKind::Console);
    }

    #[tokio::test]
    async fn test_unknown_type_becomes_console() {
        let (_dir, store) = test_store().await;
        let collector = Collector::new(store.clone());
        let port = collector.start_tcp(TOKEN).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(TOKEN).await.unwrap();
        stream
            .write_all(b"{\"type\":\"telemetry\",\"data\":{\"q\":1}}\n")
            .await
            .unwrap();
        stream.write_all(b"{\"data\":{\"q\":2}}\n").await.unwrap();
        stream.shutdown().await.unwrap();

        wait_for_count(&store, 2).await;
        collector.stop().await;

        assert_eq!(store.get(1).await.unwrap().kind, EntryKind::Console);
        assert_eq!(store.get(2).await.unwrap().kind, EntryKind::Console);
    }
}
