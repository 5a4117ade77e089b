//! Coherence protocol messages and transports.
//!
//! This crate implements reef's network layer:
//!
//! - [`Message`] / [`MessageBody`]: the wire protocol (postcard-serialized).
//! - [`codec`]: length-prefixed framing.
//! - [`Transport`] / [`MessageReceiver`]: the seam the authority talks
//!   through.
//! - [`TcpTransport`]: a TCP server carrying frames to and from nodes, and
//!   [`TcpPeer`], the node side of such a connection.
//! - [`LocalTransport`]: an in-process transport for tests and embedding.

pub mod codec;
mod error;
mod local;
mod message;
mod tcp;

use std::sync::Arc;

pub use error::NetError;
pub use local::LocalTransport;
pub use message::{Message, MessageBody};
pub use tcp::{PeerEvent, TcpPeer, TcpTransport};

/// The single sink for inbound messages.
///
/// A transport hands every decoded inbound message to its receiver and
/// awaits the returned future before reading the next message from the same
/// peer.
#[async_trait::async_trait]
pub trait MessageReceiver: Send + Sync {
    /// Handle one inbound message to completion.
    async fn receive(&self, message: Message);
}

/// Trait abstracting how the authority exchanges messages with nodes.
///
/// This allows substituting an in-process transport in tests (avoiding the
/// need for real sockets).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to `message.node`.
    ///
    /// Fails with [`NetError::NodeNotFound`] if the node is not reachable.
    async fn send(&self, message: Message) -> Result<(), NetError>;

    /// Register the receiver for inbound messages, replacing any previous one.
    fn set_receiver(&self, receiver: Arc<dyn MessageReceiver>);
}

/// Holder for the registered receiver, shared by the transports.
#[derive(Default)]
pub(crate) struct ReceiverSlot(std::sync::RwLock<Option<Arc<dyn MessageReceiver>>>);

impl ReceiverSlot {
    pub(crate) fn set(&self, receiver: Arc<dyn MessageReceiver>) {
        let mut slot = self.0.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(receiver);
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn MessageReceiver>> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
