//! In-process transport.
//!
//! [`LocalTransport`] gives every simulated node a mailbox and hands
//! inbound messages straight to the registered receiver. Used by tests and
//! by embedders that run nodes in the same process as the authority.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use reef_types::NodeId;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::NetError;
use crate::message::Message;
use crate::{MessageReceiver, ReceiverSlot, Transport};

/// Transport connecting the authority to nodes living in the same process.
#[derive(Default)]
pub struct LocalTransport {
    mailboxes: Mutex<HashMap<NodeId, mpsc::UnboundedSender<Message>>>,
    receiver: ReceiverSlot,
    next_id: AtomicU64,
}

impl LocalTransport {
    /// Create a transport with no connected nodes.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        })
    }

    /// Connect `node`, returning the mailbox its messages arrive in.
    ///
    /// Reconnecting replaces the previous mailbox.
    pub fn connect(&self, node: NodeId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.mailboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(node, tx);
        rx
    }

    /// Disconnect `node`; later sends to it fail with
    /// [`NetError::NodeNotFound`].
    pub fn disconnect(&self, node: NodeId) {
        self.mailboxes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&node);
    }

    /// Deliver an inbound message from `message.node` and wait until the
    /// receiver has handled it.
    ///
    /// Returns the id assigned to the message.
    pub async fn deliver(&self, mut message: Message) -> Result<u64, NetError> {
        let receiver = self.receiver.get().ok_or(NetError::Closed)?;
        if message.id == 0 {
            message.id = self.next_id();
        }
        let id = message.id;
        receiver.receive(message).await;
        Ok(id)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn send(&self, mut message: Message) -> Result<(), NetError> {
        if message.id == 0 {
            message.id = self.next_id();
        }
        let node = message.node;
        let mailboxes = self.mailboxes.lock().unwrap_or_else(|e| e.into_inner());
        let tx = mailboxes.get(&node).ok_or(NetError::NodeNotFound(node))?;
        tx.send(message).map_err(|_| NetError::NodeNotFound(node))?;
        debug!(%node, "delivered to local mailbox");
        Ok(())
    }

    fn set_receiver(&self, receiver: Arc<dyn MessageReceiver>) {
        self.receiver.set(receiver);
    }
}
