//! Protocol messages exchanged between cluster nodes and the authority.
//!
//! All messages are serialized with postcard; see [`crate::codec`].

use std::fmt;

use reef_types::{BackupEntry, LineId, NodeId, Owner};
use serde::{Deserialize, Serialize};

/// A protocol message together with its routing header.
///
/// `node` is the sender on inbound messages and the destination on
/// outbound ones. Messages are immutable once built: handlers derive
/// replies with [`Message::reply`] instead of editing the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Transport-assigned id; `0` until the message is sent.
    pub id: u64,
    /// Id of the request this message answers.
    pub in_reply_to: Option<u64>,
    /// Peer node (sender inbound, destination outbound).
    pub node: NodeId,
    /// Message kind and payload.
    pub body: MessageBody,
}

impl Message {
    /// Build a new (non-reply) message addressed to `node`.
    pub fn to(node: NodeId, body: MessageBody) -> Self {
        Self {
            id: 0,
            in_reply_to: None,
            node,
            body,
        }
    }

    /// Build a reply to this message, addressed back to its sender.
    pub fn reply(&self, body: MessageBody) -> Self {
        Self {
            id: 0,
            in_reply_to: Some(self.id),
            node: self.node,
            body,
        }
    }

    /// The line this message concerns, if any.
    pub fn line(&self) -> Option<LineId> {
        self.body.line()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.body.kind())?;
        if let Some(line) = self.line() {
            write!(f, " line={line}")?;
        }
        write!(f, " node={} id={}", self.node, self.id)?;
        if let Some(r) = self.in_reply_to {
            write!(f, " re={r}")?;
        }
        Ok(())
    }
}

/// The closed set of message kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Request ownership of a line (shared).
    Get {
        /// Requested line.
        line: LineId,
    },

    /// Request ownership of a line (exclusive).
    GetX {
        /// Requested line.
        line: LineId,
    },

    /// Request from a node that cannot itself hold the line exclusively.
    Invoke {
        /// Requested line.
        line: LineId,
    },

    /// Inbound: the sender claims a line it obtained from `owner`.
    /// Outbound: the authority's current owner of the line, sent instead of
    /// an acknowledgement when the claim is stale.
    Inv {
        /// Line being invalidated.
        line: LineId,
        /// Previous owner (inbound) or current owner (outbound).
        owner: Owner,
    },

    /// Request deletion of a line.
    Del {
        /// Line to delete.
        line: LineId,
    },

    /// A user payload piggy-backed on a get; echoed back on success.
    Msg {
        /// Requested line.
        line: LineId,
        /// Opaque payload.
        data: Vec<u8>,
    },

    /// A batch of line contents to persist transactionally.
    BackupPacket {
        /// Lines to write.
        backups: Vec<BackupEntry>,
    },

    /// Ownership granted, with the line's contents.
    Putx {
        /// Granted line.
        line: LineId,
        /// Other nodes holding a copy (always empty from the authority).
        owners: Vec<NodeId>,
        /// Line version.
        version: u64,
        /// Line contents.
        data: Option<Vec<u8>>,
    },

    /// The line is owned by another node; ask it instead.
    ChngdOwnr {
        /// Line in question.
        line: LineId,
        /// The node that currently owns it.
        new_owner: NodeId,
        /// Whether the redirect is authoritative for every node that sees it.
        broadcast: bool,
    },

    /// The line does not exist.
    NotFound {
        /// Line in question.
        line: LineId,
    },

    /// An invalidate or delete was applied.
    InvAck {
        /// Line in question.
        line: LineId,
    },

    /// A backup batch was committed.
    BackupPacketAck,
}

impl MessageBody {
    /// The line this body concerns, if any.
    pub fn line(&self) -> Option<LineId> {
        match self {
            MessageBody::Get { line }
            | MessageBody::GetX { line }
            | MessageBody::Invoke { line }
            | MessageBody::Inv { line, .. }
            | MessageBody::Del { line }
            | MessageBody::Msg { line, .. }
            | MessageBody::Putx { line, .. }
            | MessageBody::ChngdOwnr { line, .. }
            | MessageBody::NotFound { line }
            | MessageBody::InvAck { line } => Some(*line),
            MessageBody::BackupPacket { .. } | MessageBody::BackupPacketAck => None,
        }
    }

    /// Short wire name of the kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Get { .. } => "GET",
            MessageBody::GetX { .. } => "GETX",
            MessageBody::Invoke { .. } => "INVOKE",
            MessageBody::Inv { .. } => "INV",
            MessageBody::Del { .. } => "DEL",
            MessageBody::Msg { .. } => "MSG",
            MessageBody::BackupPacket { .. } => "BACKUP_PACKET",
            MessageBody::Putx { .. } => "PUTX",
            MessageBody::ChngdOwnr { .. } => "CHNGD_OWNR",
            MessageBody::NotFound { .. } => "NOT_FOUND",
            MessageBody::InvAck { .. } => "INVACK",
            MessageBody::BackupPacketAck => "BACKUP_PACKETACK",
        }
    }
}
