//! TCP transport.
//!
//! [`TcpTransport`] listens for node connections. A node opens a connection
//! by writing its id as a 2-byte big-endian hello, after which both sides
//! exchange frames as defined in [`crate::codec`]. Inbound frames from one
//! connection are handed to the receiver in arrival order; each connection
//! runs in its own task so different nodes are served concurrently.
//!
//! Connection changes are published as [`PeerEvent`]s, so the daemon can
//! derive cluster membership from live connections.
//!
//! [`TcpPeer`] is the node side of a connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reef_types::NodeId;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::codec::{decode_payload, read_payload, write_frame};
use crate::error::NetError;
use crate::message::Message;
use crate::{MessageReceiver, ReceiverSlot, Transport};

/// A live connection's outbound queue, tagged so a reconnecting node does
/// not get unregistered by its previous connection's teardown.
struct PeerConn {
    conn_id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

/// A node connection opened or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    /// The node completed its hello.
    Connected(NodeId),
    /// The node's live connection closed.
    Disconnected(NodeId),
}

struct Shared {
    peers: Mutex<HashMap<NodeId, PeerConn>>,
    receiver: ReceiverSlot,
    next_id: AtomicU64,
    next_conn: AtomicU64,
    events: broadcast::Sender<PeerEvent>,
}

/// TCP server side of the node protocol.
pub struct TcpTransport {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
}

impl TcpTransport {
    /// Bind a listener on `addr` and start accepting node connections.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Arc<Self>, NetError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events, _) = broadcast::channel(256);
        let shared = Arc::new(Shared {
            peers: Mutex::new(HashMap::new()),
            receiver: ReceiverSlot::default(),
            next_id: AtomicU64::new(1),
            next_conn: AtomicU64::new(1),
            events,
        });

        tokio::spawn(accept_loop(listener, shared.clone(), shutdown_rx));
        info!(%local_addr, "listening for nodes");

        Ok(Arc::new(Self {
            local_addr,
            shared,
            shutdown_tx,
        }))
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribe to connection changes.
    pub fn subscribe_peers(&self) -> broadcast::Receiver<PeerEvent> {
        self.shared.events.subscribe()
    }

    /// Nodes with a live connection.
    pub async fn connected_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.shared.peers.lock().await.keys().copied().collect();
        nodes.sort();
        nodes
    }

    /// Stop accepting connections and close every open one.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.shared.peers.lock().await.clear();
        info!("transport shut down");
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&self, mut message: Message) -> Result<(), NetError> {
        if *self.shutdown_tx.borrow() {
            return Err(NetError::Closed);
        }
        if message.id == 0 {
            message.id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        }
        let node = message.node;
        let peers = self.shared.peers.lock().await;
        let peer = peers.get(&node).ok_or(NetError::NodeNotFound(node))?;
        peer.tx
            .send(message)
            .map_err(|_| NetError::NodeNotFound(node))
    }

    fn set_receiver(&self, receiver: Arc<dyn MessageReceiver>) {
        self.shared.receiver.set(receiver);
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let _ = stream.set_nodelay(true);
                    tokio::spawn(serve_connection(stream, remote, shared.clone(), shutdown_rx.clone()));
                }
                Err(e) => warn!(%e, "accept failed"),
            },
            _ = shutdown_rx.changed() => break,
        }
    }
    debug!("accept loop stopped");
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let node = match reader.read_i16().await {
        Ok(raw) => NodeId::new(raw),
        Err(e) => {
            debug!(%remote, %e, "connection closed before hello");
            return;
        }
    };

    let conn_id = shared.next_conn.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = mpsc::unbounded_channel();
    shared
        .peers
        .lock()
        .await
        .insert(node, PeerConn { conn_id, tx });
    info!(%node, %remote, "node connected");
    let _ = shared.events.send(PeerEvent::Connected(node));

    let writer = tokio::spawn(write_loop(write_half, rx, node));

    loop {
        tokio::select! {
            read = read_payload(&mut reader) => match read {
                Ok(Some(payload)) => dispatch(&shared, node, &payload).await,
                Ok(None) => break,
                Err(e) => {
                    debug!(%node, %e, "connection read failed");
                    break;
                }
            },
            _ = shutdown_rx.changed() => break,
        }
    }

    let current = {
        let mut peers = shared.peers.lock().await;
        let current = peers.get(&node).is_some_and(|p| p.conn_id == conn_id);
        if current {
            peers.remove(&node);
        }
        current
    };
    writer.abort();
    info!(%node, %remote, "node disconnected");
    // A replaced connection's teardown must not report the node as gone.
    if current {
        let _ = shared.events.send(PeerEvent::Disconnected(node));
    }
}

async fn dispatch(shared: &Shared, node: NodeId, payload: &[u8]) {
    let mut message = match decode_payload(payload) {
        Ok(m) => m,
        Err(e) => {
            debug!(%node, %e, "ignoring undecodable frame");
            return;
        }
    };
    // The connection identity is authoritative for the sender.
    message.node = node;
    if message.id == 0 {
        message.id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    }

    match shared.receiver.get() {
        Some(receiver) => receiver.receive(message).await,
        None => debug!(%node, "no receiver registered, dropping message"),
    }
}

async fn write_loop(
    write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Message>,
    node: NodeId,
) {
    let mut writer = BufWriter::new(write_half);
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &message).await {
            debug!(%node, %e, "connection write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Node side of a TCP connection to the authority.
pub struct TcpPeer {
    node: NodeId,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl TcpPeer {
    /// Connect to the authority at `addr` as `node`.
    pub async fn connect(addr: impl ToSocketAddrs, node: NodeId) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        let mut writer = BufWriter::new(write_half);
        writer.write_i16(node.get()).await?;
        writer.flush().await?;
        Ok(Self {
            node,
            reader: BufReader::new(read_half),
            writer,
        })
    }

    /// This peer's node id.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Send a message to the authority.
    pub async fn send(&mut self, message: &Message) -> Result<(), NetError> {
        write_frame(&mut self.writer, message).await
    }

    /// Receive the next message from the authority, or `None` once the
    /// connection is closed.
    pub async fn recv(&mut self) -> Result<Option<Message>, NetError> {
        match read_payload(&mut self.reader).await? {
            Some(payload) => Ok(Some(decode_payload(&payload)?)),
            None => Ok(None),
        }
    }
}
