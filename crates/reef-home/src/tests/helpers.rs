//! Shared test utilities for reef-home tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reef_cluster::ClusterState;
use reef_net::{LocalTransport, Message, MessageBody};
use reef_store::{LineStore, MemoryStore};
use reef_types::{LineEntry, LineId, NodeId, Owner};
use tokio::sync::mpsc;

use crate::{CountingMonitor, HomeConfig, HomeError, HomeNode};

/// A reserved line: created on first request.
pub const ROOT: LineId = LineId::new(0x10);

/// An ordinary line: must exist before it can be requested.
pub const ORDINARY: LineId = LineId::new(0x1_0000);

pub fn owner(node: i16) -> Owner {
    Owner::Node(NodeId::new(node))
}

pub fn putx(line: LineId, version: u64, data: Option<Vec<u8>>) -> MessageBody {
    MessageBody::Putx {
        line,
        owners: Vec::new(),
        version,
        data,
    }
}

pub fn redirect(line: LineId, to: i16) -> MessageBody {
    MessageBody::ChngdOwnr {
        line,
        new_owner: NodeId::new(to),
        broadcast: true,
    }
}

/// A simulated cluster node: its id plus the mailbox the authority's
/// messages arrive in.
pub struct TestNode {
    pub id: NodeId,
    mailbox: mpsc::UnboundedReceiver<Message>,
}

impl TestNode {
    /// The next message for this node. Panics if there is none.
    pub fn recv(&mut self) -> Message {
        self.mailbox
            .try_recv()
            .unwrap_or_else(|e| panic!("node {} expected a message: {e}", self.id))
    }

    /// Every queued message.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = self.mailbox.try_recv() {
            out.push(m);
        }
        out
    }

    pub fn assert_silent(&mut self) {
        let pending = self.drain();
        assert!(pending.is_empty(), "node {} got unexpected {pending:?}", self.id);
    }
}

/// An authority wired to an in-process transport and a memory store.
pub struct Harness {
    pub home: Arc<HomeNode>,
    pub transport: Arc<LocalTransport>,
    /// The memory store underneath, even when the authority sees a wrapper.
    pub memory: Arc<MemoryStore>,
    pub cluster: Arc<ClusterState>,
    pub monitor: Arc<CountingMonitor>,
    next_id: AtomicU64,
}

impl Harness {
    /// A started primary authority over an empty memory store.
    pub fn new() -> Self {
        let h = Self::unstarted();
        h.home.start(true).unwrap();
        h
    }

    /// An authority that has not been started.
    pub fn unstarted() -> Self {
        let memory = Arc::new(MemoryStore::new());
        Self::build(memory.clone(), memory, HomeConfig::default())
    }

    /// A started authority over `store`, which wraps `memory`.
    pub fn with_store(
        memory: Arc<MemoryStore>,
        store: Arc<dyn LineStore>,
        config: HomeConfig,
    ) -> Self {
        let h = Self::build(memory, store, config);
        h.home.start(true).unwrap();
        h
    }

    fn build(memory: Arc<MemoryStore>, store: Arc<dyn LineStore>, config: HomeConfig) -> Self {
        let transport = LocalTransport::new();
        let cluster = ClusterState::new(false);
        let monitor = Arc::new(CountingMonitor::new());
        let home = HomeNode::new(
            config,
            store,
            transport.clone(),
            cluster.clone(),
            monitor.clone(),
        );
        home.attach();
        Self {
            home,
            transport,
            memory,
            cluster,
            monitor,
            next_id: AtomicU64::new(1000),
        }
    }

    /// Connect node `id` to the transport.
    pub fn connect(&self, id: i16) -> TestNode {
        let id = NodeId::new(id);
        TestNode {
            id,
            mailbox: self.transport.connect(id),
        }
    }

    /// Hand a message from `from` straight to the authority.
    pub async fn request(&self, from: &TestNode, body: MessageBody) -> Result<(), HomeError> {
        let message = Message {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            ..Message::to(from.id, body)
        };
        self.home.receive(message).await
    }

    /// Store a line directly, bypassing the protocol.
    pub fn seed(&self, line: LineId, owner: Owner, version: u64, data: &[u8]) {
        self.memory
            .write(line, LineEntry::new(owner, version, data.to_vec()), None)
            .unwrap();
    }

    pub fn entry(&self, line: LineId) -> Option<LineEntry> {
        self.memory.read(line).unwrap()
    }

    pub fn owner_of(&self, line: LineId) -> Owner {
        self.entry(line).map_or(Owner::Unowned, |e| e.owner)
    }

    pub fn dump(&self) -> Vec<(LineId, LineEntry)> {
        self.memory.dump().unwrap()
    }
}
