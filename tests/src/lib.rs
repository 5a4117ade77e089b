//! Shared test harness for reef integration tests.
//!
//! Provides [`Authority`], a primary authority listening on a loopback TCP
//! port, and [`Client`], a simulated grid node talking to it over the real
//! wire protocol.

use std::sync::Arc;
use std::time::Duration;

use reef_cluster::{ClusterState, watch_membership};
use reef_home::{CountingMonitor, HomeConfig, HomeNode};
use reef_net::{Message, MessageBody, TcpPeer, TcpTransport};
use reef_store::{LineStore, MemoryStore};
use reef_types::{LineId, NodeId, Owner};
use tokio::task::JoinHandle;

/// How long a client waits for an expected reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a client listens before concluding no reply is coming.
pub const SILENCE: Duration = Duration::from_millis(200);

/// A reserved line id.
pub const ROOT: LineId = LineId::new(0x10);

/// An authority serving nodes over loopback TCP.
pub struct Authority {
    pub home: Arc<HomeNode>,
    pub transport: Arc<TcpTransport>,
    pub cluster: Arc<ClusterState>,
    pub store: Arc<dyn LineStore>,
    pub monitor: Arc<CountingMonitor>,
    watcher: JoinHandle<()>,
}

impl Authority {
    /// A primary authority over an empty memory store.
    pub async fn start() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), HomeConfig::default(), true).await
    }

    /// An authority over `store`.
    pub async fn with_store(store: Arc<dyn LineStore>, config: HomeConfig, primary: bool) -> Self {
        let transport = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let cluster = ClusterState::new(primary);
        let monitor = Arc::new(CountingMonitor::new());
        let home = HomeNode::new(
            config,
            store.clone(),
            transport.clone(),
            cluster.clone(),
            monitor.clone(),
        );
        home.start(primary).unwrap();
        home.attach();
        let watcher = watch_membership(&cluster, home.clone());

        Self {
            home,
            transport,
            cluster,
            store,
            monitor,
            watcher,
        }
    }

    /// Connect node `id` and register it as a cluster member.
    pub async fn connect(&self, id: i16) -> Client {
        let node = NodeId::new(id);
        let peer = TcpPeer::connect(self.transport.local_addr(), node)
            .await
            .unwrap();
        self.cluster.add_member(node).await.unwrap();
        Client { peer }
    }

    /// Remove node `id` from the cluster and wait until the authority has
    /// reclaimed its lines.
    pub async fn remove_node(&self, id: i16) {
        let node = NodeId::new(id);
        self.cluster.remove_member(node).await.unwrap();
        for _ in 0..200 {
            if self.lines_owned_by(node).is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lines of node {node} were never reclaimed");
    }

    /// Lines the store records as owned by `node`.
    pub fn lines_owned_by(&self, node: NodeId) -> Vec<LineId> {
        self.store
            .dump()
            .unwrap()
            .into_iter()
            .filter(|(_, e)| e.owner == Owner::Node(node))
            .map(|(line, _)| line)
            .collect()
    }

    pub fn owner_of(&self, line: LineId) -> Owner {
        self.store
            .read(line)
            .unwrap()
            .map_or(Owner::Unowned, |e| e.owner)
    }

    /// Stop listening and close the store.
    pub async fn stop(self) {
        self.transport.shutdown().await;
        self.watcher.abort();
        self.home.shutdown().unwrap();
    }
}

/// A simulated grid node connected over TCP.
pub struct Client {
    peer: TcpPeer,
}

impl Client {
    pub fn node(&self) -> NodeId {
        self.peer.node()
    }

    /// Send a message to the authority.
    pub async fn send(&mut self, body: MessageBody) {
        self.peer
            .send(&Message::to(NodeId::AUTHORITY, body))
            .await
            .unwrap();
    }

    /// Wait for the next message from the authority.
    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(REPLY_TIMEOUT, self.peer.recv())
            .await
            .unwrap_or_else(|_| panic!("node {} got no reply", self.node()))
            .unwrap()
            .unwrap_or_else(|| panic!("connection of node {} closed", self.node()))
    }

    /// Send a message and wait for the reply.
    pub async fn request(&mut self, body: MessageBody) -> Message {
        self.send(body).await;
        self.recv().await
    }

    /// Assert that nothing arrives for a while.
    pub async fn assert_silent(&mut self) {
        if let Ok(got) = tokio::time::timeout(SILENCE, self.peer.recv()).await {
            panic!("node {} got unexpected {got:?}", self.node());
        }
    }
}

pub fn putx(line: LineId, version: u64, data: Option<Vec<u8>>) -> MessageBody {
    MessageBody::Putx {
        line,
        owners: Vec::new(),
        version,
        data,
    }
}
