//! TCP transport implementation
//!
//! [`TcpTransport`] owns one TCP connection at a time. Inbound bytes are
//! read by a background task, reassembled into wrapper frames, and
//! delivered in wire order as [`TransportEvent`]s on the channel returned
//! by [`TcpTransport::new`]. Errors before the connection is established
//! fail [`TcpTransport::connect`]; errors afterwards are only reported as
//! events.

use crate::framer::FrameAssembler;
use bytes::Bytes;
use dlms_core::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use socket2::{SockRef, TcpKeepalive};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 4096;

fn default_connect_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

fn default_keep_alive() -> bool {
    true
}

fn default_event_capacity() -> usize {
    64
}

/// TCP transport layer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpSettings {
    pub address: SocketAddr,
    /// Limit on establishing the connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Option<Duration>,
    /// Reported as a [`TransportEvent::Error`] when no data arrives for this
    /// long; the connection stays open
    #[serde(default)]
    pub idle_timeout: Option<Duration>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,
    /// Idle time before the first keep-alive probe; system default if unset
    #[serde(default)]
    pub keep_alive_initial_delay: Option<Duration>,
    /// Capacity of the event channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            connect_timeout: default_connect_timeout(),
            idle_timeout: None,
            keep_alive: default_keep_alive(),
            keep_alive_initial_delay: None,
            event_capacity: default_event_capacity(),
        }
    }

    /// Create TCP settings with connect timeout
    pub fn with_timeout(address: SocketAddr, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..Self::new(address)
        }
    }

    /// Create TCP settings from an address string such as `"10.0.0.5:4059"`
    pub fn from_address(address: &str) -> DlmsResult<Self> {
        let address: SocketAddr = address
            .parse()
            .map_err(|e| DlmsError::validation("address", format!("invalid TCP address: {}", e)))?;
        Ok(Self::new(address))
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Notification raised by a [`TcpTransport`]
///
/// `Frame` and `Error` wait for room in the channel, so a slow consumer
/// slows the reader down. `Connected` and `Disconnected` never wait: they
/// are dropped with a warning when the channel is full, and
/// [`TcpTransport::state`] stays authoritative.
#[derive(Debug)]
pub enum TransportEvent {
    Connected,
    /// One complete wrapper frame, length prefix included
    Frame(Bytes),
    /// A socket error or idle timeout after the connection was established
    Error(DlmsError),
    Disconnected,
}

#[derive(Debug)]
struct Connection {
    id: u64,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    reader: JoinHandle<()>,
    /// Dropped on release, which fails any send still in flight
    closed: watch::Sender<()>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

/// State shared between the transport handle and its reader task
#[derive(Debug)]
struct Shared {
    state: RwLock<ConnectionState>,
    connection: Mutex<Option<Connection>>,
    events: mpsc::Sender<TransportEvent>,
    next_id: AtomicU64,
}

impl Shared {
    async fn emit(&self, event: TransportEvent) {
        // Nobody listening is not an error for the transport
        let _ = self.events.send(event).await;
    }

    /// Raise a lifecycle event without waiting for the consumer
    fn notify(&self, event: TransportEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                log::warn!("Event channel full, dropping {:?}", event);
            }
        }
    }

    /// Release the connection and raise `Disconnected`
    ///
    /// With `Some(id)` only that connection is released, so a reader task
    /// finishing late cannot tear down a newer connection. The caller that
    /// actually takes the connection is the one that raises the event.
    async fn release(&self, id: Option<u64>) {
        let taken = {
            let mut slot = self.connection.lock().await;
            let current = slot
                .as_ref()
                .is_some_and(|connection| id.is_none_or(|id| connection.id == id));
            if current { slot.take() } else { None }
        };
        let Some(Connection {
            writer,
            reader,
            closed,
            peer_addr,
            ..
        }) = taken
        else {
            return;
        };

        if id.is_none() {
            reader.abort();
        }
        drop(closed);
        // A cancelled send may still hold the writer; the socket closes
        // when its handle is dropped
        if let Ok(mut writer) = writer.try_lock() {
            let _ = writer.shutdown().await;
        }
        *self.state.write().await = ConnectionState::Disconnected;

        log::info!("Disconnected from {}", peer_addr);
        self.notify(TransportEvent::Disconnected);
    }
}

/// TCP transport layer implementation
#[derive(Debug)]
pub struct TcpTransport {
    settings: TcpSettings,
    shared: Arc<Shared>,
}

impl TcpTransport {
    /// Create a new TCP transport layer and the receiver for its events
    pub fn new(settings: TcpSettings) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, receiver) = mpsc::channel(settings.event_capacity.max(1));
        let transport = Self {
            settings,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Idle),
                connection: Mutex::new(None),
                events,
                next_id: AtomicU64::new(0),
            }),
        };
        (transport, receiver)
    }

    /// Create TCP transport from address string
    pub fn from_address(address: &str) -> DlmsResult<(Self, mpsc::Receiver<TransportEvent>)> {
        Ok(Self::new(TcpSettings::from_address(address)?))
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }

    pub async fn state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.connection.lock().await.as_ref().map(|c| c.local_addr)
    }

    pub async fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.connection.lock().await.as_ref().map(|c| c.peer_addr)
    }

    /// Open the connection
    ///
    /// # Errors
    /// - Transport error if a connect is in progress or already succeeded
    /// - [`DlmsError::Timeout`] if `connect_timeout` expires first
    /// - [`DlmsError::Connection`] for the socket error that stopped the attempt
    pub async fn connect(&self) -> DlmsResult<()> {
        {
            let mut state = self.shared.state.write().await;
            if matches!(*state, ConnectionState::Connecting | ConnectionState::Connected) {
                return Err(DlmsError::Transport(format!(
                    "cannot connect to {}: already {}",
                    self.settings.address, *state
                )));
            }
            *state = ConnectionState::Connecting;
        }

        let result = self.open().await;
        if let Err(e) = &result {
            log::debug!("Connect to {} failed: {}", self.settings.address, e);
            *self.shared.state.write().await = ConnectionState::Disconnected;
        }
        result
    }

    async fn open(&self) -> DlmsResult<()> {
        let address = self.settings.address;
        log::debug!("Connecting to {}", address);

        let stream = match self.settings.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(address))
                .await
                .map_err(|_| {
                    DlmsError::Timeout(format!("connect to {} timed out after {:?}", address, timeout))
                })??,
            None => TcpStream::connect(address).await?,
        };

        stream.set_nodelay(true)?;
        if self.settings.keep_alive {
            let mut keepalive = TcpKeepalive::new();
            if let Some(delay) = self.settings.keep_alive_initial_delay {
                keepalive = keepalive.with_time(delay);
            }
            SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        }

        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        self.shared.notify(TransportEvent::Connected);

        // Hold the slot while spawning so the reader cannot release a
        // connection that is not installed yet
        let mut slot = self.shared.connection.lock().await;
        let reader = tokio::spawn(read_loop(
            reader,
            self.settings.idle_timeout,
            self.shared.clone(),
            id,
        ));
        *slot = Some(Connection {
            id,
            writer: Arc::new(Mutex::new(writer)),
            reader,
            closed: watch::channel(()).0,
            local_addr,
            peer_addr,
        });
        *self.shared.state.write().await = ConnectionState::Connected;
        drop(slot);

        log::info!("Connected to {} from {}", peer_addr, local_addr);
        Ok(())
    }

    /// Write `data` to the peer
    ///
    /// Concurrent sends are written one after another. A send still waiting
    /// on the socket when the connection is released fails instead of
    /// holding up the release.
    ///
    /// # Errors
    /// - Transport error "not connected" unless the state is `Connected`
    /// - Transport error if the connection is released mid-write
    /// - [`DlmsError::Connection`] if the write fails
    pub async fn send(&self, data: &[u8]) -> DlmsResult<()> {
        if !self.is_connected().await {
            return Err(not_connected());
        }
        let (writer, mut closed, peer_addr) = {
            let slot = self.shared.connection.lock().await;
            let connection = slot.as_ref().ok_or_else(not_connected)?;
            (
                connection.writer.clone(),
                connection.closed.subscribe(),
                connection.peer_addr,
            )
        };

        let write = async {
            let mut writer = writer.lock().await;
            writer.write_all(data).await?;
            writer.flush().await
        };
        tokio::select! {
            result = write => result?,
            _ = closed.changed() => {
                return Err(DlmsError::Transport(format!(
                    "connection to {} closed during send",
                    peer_addr
                )));
            }
        }
        log::debug!("Sent {} bytes to {}", data.len(), peer_addr);
        Ok(())
    }

    /// Close the connection
    ///
    /// Does nothing if there is no open connection.
    pub async fn disconnect(&self) -> DlmsResult<()> {
        self.shared.release(None).await;
        Ok(())
    }
}

fn not_connected() -> DlmsError {
    DlmsError::Transport("not connected".to_string())
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    idle_timeout: Option<Duration>,
    shared: Arc<Shared>,
    id: u64,
) {
    let mut assembler = FrameAssembler::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = match idle_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    log::warn!("No data received for {:?}", timeout);
                    shared
                        .emit(TransportEvent::Error(DlmsError::Timeout(format!(
                            "no data received for {:?}",
                            timeout
                        ))))
                        .await;
                    continue;
                }
            },
            None => reader.read(&mut buf).await,
        };

        match read {
            Ok(0) => {
                log::debug!("Peer closed the connection");
                break;
            }
            Ok(n) => {
                log::trace!("Received {} bytes", n);
                for frame in assembler.push(&buf[..n]) {
                    log::debug!("Received frame of {} bytes", frame.len());
                    shared.emit(TransportEvent::Frame(frame)).await;
                }
            }
            Err(e) => {
                log::warn!("Read failed: {}", e);
                shared.emit(TransportEvent::Error(e.into())).await;
                break;
            }
        }
    }

    if assembler.buffered_len() > 0 {
        log::debug!("Discarding {} bytes of an incomplete frame", assembler.buffered_len());
    }
    shared.release(Some(id)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        (listener, address)
    }

    #[tokio::test]
    async fn test_tcp_settings() {
        let addr: SocketAddr = "127.0.0.1:4059".parse().unwrap();
        let settings = TcpSettings::new(addr);
        assert_eq!(settings.address, addr);
        assert_eq!(settings.connect_timeout, Some(Duration::from_secs(30)));
        assert!(settings.keep_alive);

        let settings = TcpSettings::with_timeout(addr, Duration::from_secs(2));
        assert_eq!(settings.connect_timeout, Some(Duration::from_secs(2)));

        assert!(TcpSettings::from_address("not an address").unwrap_err().is_validation());
    }

    #[test]
    fn test_settings_from_json_with_defaults() {
        let settings: TcpSettings =
            serde_json::from_str(r#"{ "address": "192.168.1.20:4059" }"#).unwrap();
        assert_eq!(settings, TcpSettings::from_address("192.168.1.20:4059").unwrap());

        let json = serde_json::to_string(&settings).unwrap();
        let back: TcpSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let (transport, _events) = TcpTransport::from_address("127.0.0.1:4059").unwrap();
        assert_eq!(transport.state().await, ConnectionState::Idle);

        let err = transport.send(&[0x00, 0x01, 0xFF]).await.unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let (transport, _events) = TcpTransport::from_address("127.0.0.1:4059").unwrap();
        transport.disconnect().await.unwrap();
        assert_eq!(transport.state().await, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_and_receive_frames() {
        let (listener, address) = listener().await;
        let (transport, mut events) = TcpTransport::new(TcpSettings::new(address));

        transport.connect().await.unwrap();
        assert!(transport.is_connected().await);
        assert_eq!(transport.peer_addr().await, Some(address));
        assert!(transport.local_addr().await.is_some());
        assert!(matches!(next_event(&mut events).await, TransportEvent::Connected));

        let (mut peer, _) = listener.accept().await.unwrap();
        peer.write_all(&[0x00, 0x03, b'a', b'b', b'c', 0x00, 0x02, b'x']).await.unwrap();
        peer.flush().await.unwrap();

        match next_event(&mut events).await {
            TransportEvent::Frame(frame) => assert_eq!(&frame[..], &[0x00, 0x03, b'a', b'b', b'c']),
            other => panic!("unexpected event {:?}", other),
        }

        peer.write_all(b"y").await.unwrap();
        match next_event(&mut events).await {
            TransportEvent::Frame(frame) => assert_eq!(FrameAssembler::payload(&frame), b"xy"),
            other => panic!("unexpected event {:?}", other),
        }

        transport.send(&[0x00, 0x02, 0x10, 0x20]).await.unwrap();
        let mut received = [0u8; 4];
        peer.read_exact(&mut received).await.unwrap();
        assert_eq!(received, [0x00, 0x02, 0x10, 0x20]);
    }

    #[tokio::test]
    async fn test_double_connect_rejected() {
        let (_listener, address) = listener().await;
        let (transport, _events) = TcpTransport::new(TcpSettings::new(address));

        transport.connect().await.unwrap();
        let err = transport.connect().await.unwrap_err();
        assert!(err.is_transport());
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (_listener, address) = listener().await;
        let (transport, mut events) = TcpTransport::new(TcpSettings::new(address));

        transport.connect().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TransportEvent::Connected));

        transport.disconnect().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TransportEvent::Disconnected));
        assert_eq!(transport.state().await, ConnectionState::Disconnected);
        assert!(transport.peer_addr().await.is_none());

        transport.disconnect().await.unwrap();
        assert!(events.try_recv().is_err());
        assert!(transport.send(&[0x00]).await.unwrap_err().is_transport());
    }

    #[tokio::test]
    async fn test_peer_close_raises_disconnected() {
        let (listener, address) = listener().await;
        let (transport, mut events) = TcpTransport::new(TcpSettings::new(address));

        transport.connect().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TransportEvent::Connected));

        let (peer, _) = listener.accept().await.unwrap();
        drop(peer);

        assert!(matches!(next_event(&mut events).await, TransportEvent::Disconnected));
        assert_eq!(transport.state().await, ConnectionState::Disconnected);

        // A new connection can be made after the old one closed
        transport.connect().await.unwrap();
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, address) = listener().await;
        drop(listener);

        let (transport, mut events) = TcpTransport::new(TcpSettings::new(address));
        let err = transport.connect().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(transport.state().await, ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Nothing is accepted from a zero backlog, so once the queue holds
        // one connection further handshakes get no answer
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(0).unwrap();
        let address = listener.local_addr().unwrap();

        let mut queued = Vec::new();
        for _ in 0..4 {
            let attempt = TcpStream::connect(address);
            if let Ok(Ok(stream)) = tokio::time::timeout(Duration::from_millis(100), attempt).await {
                queued.push(stream);
            }
        }

        let settings = TcpSettings::with_timeout(address, Duration::from_millis(200));
        let (transport, mut events) = TcpTransport::new(settings);
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, DlmsError::Timeout(_)), "unexpected error {:?}", err);
        assert!(err.is_transport());
        assert_eq!(transport.state().await, ConnectionState::Disconnected);
        assert!(events.try_recv().is_err());
        drop(listener);
    }

    #[tokio::test]
    async fn test_full_event_channel_does_not_block_lifecycle() {
        let (_listener, address) = listener().await;
        let settings = TcpSettings {
            event_capacity: 1,
            ..TcpSettings::new(address)
        };
        let (transport, mut events) = TcpTransport::new(settings);

        // Connected takes the only slot and is never drained
        transport.connect().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), transport.disconnect())
            .await
            .expect("disconnect blocked on the event channel")
            .unwrap();
        assert_eq!(transport.state().await, ConnectionState::Disconnected);

        tokio::time::timeout(Duration::from_secs(2), transport.connect())
            .await
            .expect("connect blocked on the event channel")
            .unwrap();
        assert!(transport.is_connected().await);

        assert!(matches!(events.try_recv(), Ok(TransportEvent::Connected)));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_during_stalled_send() {
        let (listener, address) = listener().await;
        let (transport, mut events) = TcpTransport::new(TcpSettings::new(address));
        let transport = Arc::new(transport);

        transport.connect().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TransportEvent::Connected));
        // The peer never reads, so a large write fills both socket buffers
        let (_peer, _) = listener.accept().await.unwrap();

        let sender = transport.clone();
        let send = tokio::spawn(async move { sender.send(&vec![0u8; 64 * 1024 * 1024]).await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!send.is_finished());

        let peer_addr = tokio::time::timeout(Duration::from_secs(2), transport.peer_addr())
            .await
            .expect("peer_addr blocked behind send");
        assert_eq!(peer_addr, Some(address));

        tokio::time::timeout(Duration::from_secs(2), transport.disconnect())
            .await
            .expect("disconnect blocked behind send")
            .unwrap();
        assert_eq!(transport.state().await, ConnectionState::Disconnected);
        assert!(matches!(next_event(&mut events).await, TransportEvent::Disconnected));

        let err = tokio::time::timeout(Duration::from_secs(2), send)
            .await
            .expect("send not cancelled")
            .unwrap()
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_idle_timeout_keeps_connection() {
        let (listener, address) = listener().await;
        let settings = TcpSettings {
            idle_timeout: Some(Duration::from_millis(50)),
            ..TcpSettings::new(address)
        };
        let (transport, mut events) = TcpTransport::new(settings);

        transport.connect().await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        assert!(matches!(next_event(&mut events).await, TransportEvent::Connected));

        match next_event(&mut events).await {
            TransportEvent::Error(DlmsError::Timeout(_)) => {}
            other => panic!("unexpected event {:?}", other),
        }
        assert!(transport.is_connected().await);

        peer.write_all(&[0x00, 0x01, 0x42]).await.unwrap();
        loop {
            match next_event(&mut events).await {
                TransportEvent::Frame(frame) => {
                    assert_eq!(FrameAssembler::payload(&frame), &[0x42]);
                    break;
                }
                TransportEvent::Error(DlmsError::Timeout(_)) => continue,
                other => panic!("unexpected event {:?}", other),
            }
        }
    }
}
