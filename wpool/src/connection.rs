//! Connection: framed command stream over a local socket
//!
//! Wraps a Unix stream with the frame codec, an outgoing queue with
//! suspend/resume semantics and a single-slot inbound buffer. Listener mode
//! generates a unique endpoint under the runtime directory; accepted child
//! connections are owned by the caller.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::commands::ErrorKind;
use crate::error::{PoolError, Result};
use crate::frame::{FrameDecoder, WireTask, encode};

/// Directory for worker endpoints; mirrors the daemon socket convention
pub fn endpoint_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("wpool")
}

/// One end of a framed command stream
#[derive(Debug)]
pub struct Connection {
    stream: UnixStream,
    decoder: FrameDecoder,
    pending: Option<WireTask>,
    outgoing: VecDeque<(u16, Vec<u8>)>,
    suspended: bool,
    disconnected: bool,
    disconnect_reported: bool,
}

impl Connection {
    fn from_stream(stream: UnixStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            pending: None,
            outgoing: VecDeque::new(),
            suspended: false,
            disconnected: false,
            disconnect_reported: false,
        }
    }

    /// Connect to a listening endpoint
    pub async fn connect_to(endpoint: &Path) -> Result<Self> {
        debug!(?endpoint, "Connection::connect_to");
        let stream = UnixStream::connect(endpoint).await.map_err(|e| {
            PoolError::job(
                ErrorKind::CannotConnect,
                format!("cannot connect to {}: {e}", endpoint.display()),
            )
        })?;
        Ok(Self::from_stream(stream))
    }

    /// Create a listener on a freshly generated unique endpoint
    pub fn listen_for_remote() -> Result<ConnectionListener> {
        let dir = endpoint_dir();
        std::fs::create_dir_all(&dir)?;
        let endpoint = dir.join(format!("{}.sock", Uuid::new_v4().simple()));
        Self::listen_at(&endpoint)
    }

    /// Create a listener at a specific endpoint (for testing)
    pub fn listen_at(endpoint: &Path) -> Result<ConnectionListener> {
        if endpoint.exists() {
            std::fs::remove_file(endpoint)?;
        }
        let listener = UnixListener::bind(endpoint)?;
        debug!(?endpoint, "Connection: listening");
        Ok(ConnectionListener {
            listener,
            endpoint: endpoint.to_path_buf(),
        })
    }

    pub fn is_connected(&self) -> bool {
        !self.disconnected
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// One-shot disconnect notification: true exactly once after the peer
    /// goes away
    pub fn take_disconnect_event(&mut self) -> bool {
        if self.disconnected && !self.disconnect_reported {
            self.disconnect_reported = true;
            true
        } else {
            false
        }
    }

    /// Queue a frame; flushes immediately unless suspended
    pub async fn send(&mut self, cmd: u16, payload: &[u8]) -> Result<()> {
        if self.disconnected {
            return Err(PoolError::job(ErrorKind::CannotConnect, "connection is closed"));
        }

        self.outgoing.push_back((cmd, payload.to_vec()));
        if !self.suspended {
            self.flush_outgoing().await?;
        }
        Ok(())
    }

    async fn flush_outgoing(&mut self) -> Result<()> {
        while let Some((cmd, payload)) = self.outgoing.pop_front() {
            let bytes = encode(cmd, &payload);
            if let Err(e) = self.stream.write_all(&bytes).await {
                warn!(error = %e, "Connection: write failed");
                self.disconnected = true;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Stop flushing; frames queue up until [`resume`](Self::resume)
    pub fn suspend(&mut self) {
        debug!("Connection::suspend");
        self.suspended = true;
    }

    /// Flush everything queued while suspended, preserving order
    pub async fn resume(&mut self) -> Result<()> {
        debug!(queued = self.outgoing.len(), "Connection::resume");
        self.suspended = false;
        self.flush_outgoing().await
    }

    /// Whether a fully assembled inbound task is waiting
    pub fn has_task(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the buffered inbound task, if any
    pub fn read_command(&mut self) -> Option<WireTask> {
        if let Some(task) = self.pending.take() {
            return Some(task);
        }
        self.decoder.next_frame().ok().flatten()
    }

    /// Wait until an inbound task is fully assembled, up to `timeout`
    pub async fn wait_for_incoming(&mut self, timeout: Duration) -> bool {
        if self.pending.is_some() {
            return true;
        }
        match tokio::time::timeout(timeout, self.fill_pending()).await {
            Ok(Ok(got)) => got,
            Ok(Err(_)) | Err(_) => false,
        }
    }

    /// Block until the next inbound task arrives
    pub async fn next_command(&mut self) -> Result<WireTask> {
        if let Some(task) = self.read_command() {
            return Ok(task);
        }
        if self.fill_pending().await? {
            Ok(self.pending.take().expect("fill_pending buffered a task"))
        } else {
            Err(PoolError::Disconnected)
        }
    }

    async fn fill_pending(&mut self) -> Result<bool> {
        loop {
            match self.decoder.next_frame() {
                Ok(Some(task)) => {
                    self.pending = Some(task);
                    return Ok(true);
                }
                Ok(None) => {}
                Err(e) => {
                    // Malformed frame: drop the connection
                    warn!(error = %e, "Connection: protocol error");
                    self.disconnected = true;
                    return Err(e);
                }
            }

            let mut chunk = [0u8; 8192];
            match self.stream.read(&mut chunk).await {
                Ok(0) => {
                    self.disconnected = true;
                    return Ok(false);
                }
                Ok(n) => self.decoder.push(&chunk[..n]),
                Err(e) => {
                    self.disconnected = true;
                    return Err(e.into());
                }
            }
        }
    }

    /// Shut down the stream; subsequent sends fail
    pub async fn close(&mut self) {
        self.disconnected = true;
        let _ = self.stream.shutdown().await;
    }
}

/// Listening endpoint producing child [`Connection`]s
pub struct ConnectionListener {
    listener: UnixListener,
    endpoint: PathBuf,
}

impl ConnectionListener {
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Accept the next inbound connection
    pub async fn accept_next(&self) -> Result<Connection> {
        let (stream, _) = self.listener.accept().await?;
        debug!(endpoint = ?self.endpoint, "Connection: accepted peer");
        Ok(Connection::from_stream(stream))
    }
}

impl Drop for ConnectionListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn pair(tmp: &TempDir) -> (Connection, Connection) {
        let endpoint = tmp.path().join("test.sock");
        let listener = Connection::listen_at(&endpoint).unwrap();
        let (client, server) = tokio::join!(Connection::connect_to(&endpoint), listener.accept_next());
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn test_send_and_receive_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let (mut client, mut server) = pair(&tmp).await;

        client.send(102, b"hello").await.unwrap();

        assert!(server.wait_for_incoming(Duration::from_secs(1)).await);
        let task = server.read_command().unwrap();
        assert_eq!(task.cmd, 102);
        assert_eq!(task.payload, b"hello");
    }

    #[tokio::test]
    async fn test_suspended_frames_flush_in_order_on_resume() {
        let tmp = TempDir::new().unwrap();
        let (mut client, mut server) = pair(&tmp).await;

        client.suspend();
        client.send(1, b"first").await.unwrap();
        client.send(2, b"second").await.unwrap();
        client.send(3, b"third").await.unwrap();

        // Nothing arrives while suspended
        assert!(!server.wait_for_incoming(Duration::from_millis(100)).await);

        client.resume().await.unwrap();
        for (expected_cmd, expected_payload) in [(1u16, b"first".as_slice()), (2, b"second"), (3, b"third")] {
            let task = server.next_command().await.unwrap();
            assert_eq!(task.cmd, expected_cmd);
            assert_eq!(task.payload, expected_payload);
        }
    }

    #[tokio::test]
    async fn test_wait_for_incoming_times_out() {
        let tmp = TempDir::new().unwrap();
        let (_client, mut server) = pair(&tmp).await;
        assert!(!server.wait_for_incoming(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_pending_task_is_single_buffered() {
        let tmp = TempDir::new().unwrap();
        let (mut client, mut server) = pair(&tmp).await;

        client.send(10, b"a").await.unwrap();
        client.send(11, b"b").await.unwrap();

        assert!(server.wait_for_incoming(Duration::from_secs(1)).await);
        assert!(server.has_task());
        let first = server.read_command().unwrap();
        assert_eq!(first.cmd, 10);

        // The second frame is still retrievable afterwards
        let second = server.next_command().await.unwrap();
        assert_eq!(second.cmd, 11);
    }

    #[tokio::test]
    async fn test_disconnect_is_one_shot_and_sends_fail() {
        let tmp = TempDir::new().unwrap();
        let (mut client, mut server) = pair(&tmp).await;

        client.close().await;
        drop(client);

        // Server notices EOF
        assert!(!server.wait_for_incoming(Duration::from_secs(1)).await);
        assert!(!server.is_connected());
        assert!(server.take_disconnect_event());
        assert!(!server.take_disconnect_event(), "disconnect event is one-shot");

        let err = server.send(1, b"x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CannotConnect);
    }

    #[tokio::test]
    async fn test_listener_generates_unique_endpoints() {
        // Endpoints are uuid-named; two listeners never collide
        let a = Connection::listen_for_remote().unwrap();
        let b = Connection::listen_for_remote().unwrap();
        assert_ne!(a.endpoint(), b.endpoint());
        assert!(a.endpoint().starts_with(endpoint_dir()));
    }

    #[tokio::test]
    async fn test_large_payload_crosses_read_chunks() {
        let tmp = TempDir::new().unwrap();
        let (mut client, mut server) = pair(&tmp).await;

        let payload: Vec<u8> = (0..100_000).map(|i| (i % 255) as u8).collect();
        client.send(500, &payload).await.unwrap();

        let task = server.next_command().await.unwrap();
        assert_eq!(task.cmd, 500);
        assert_eq!(task.payload, payload);
    }
}
