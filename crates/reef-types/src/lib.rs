//! Shared types and identifiers for reef.
//!
//! This crate defines the core types used across the reef workspace:
//! identifiers ([`LineId`], [`NodeId`]), the ownership sentinel model
//! ([`Owner`]), the persisted line record ([`LineEntry`]), backup payloads
//! ([`BackupEntry`]) and cluster membership events ([`ClusterEvent`]).

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Highest line id in the reserved range.
///
/// Reserved lines are well-known roots that are created lazily on first
/// request instead of having to exist beforehand.
pub const MAX_RESERVED_LINE: u64 = 0xFFFF;

/// Identifier of a line, the unit of coherence.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LineId(u64);

impl LineId {
    /// Create a line id from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Return the raw 64-bit value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this id lies in the reserved (lazily created) range.
    pub const fn is_reserved(self) -> bool {
        self.0 <= MAX_RESERVED_LINE
    }

    /// Big-endian key bytes, so that lexicographic order matches numeric order.
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode a key produced by [`LineId::to_key`].
    pub fn from_key(key: &[u8]) -> Option<Self> {
        let arr: [u8; 8] = key.try_into().ok()?;
        Some(Self(u64::from_be_bytes(arr)))
    }
}

impl From<u64> for LineId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LineId({self})")
    }
}

/// Identifier of a cluster node.
///
/// Node `0` is the authority itself; cluster members use positive ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct NodeId(i16);

impl NodeId {
    /// The authority (home) node.
    pub const AUTHORITY: NodeId = NodeId(0);

    /// Create a node id from its raw value.
    pub const fn new(raw: i16) -> Self {
        Self(raw)
    }

    /// Return the raw 16-bit value.
    pub const fn get(self) -> i16 {
        self.0
    }
}

impl From<i16> for NodeId {
    fn from(raw: i16) -> Self {
        Self(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

/// Who currently holds a line, as recorded by the authority.
///
/// Stored on disk and on the wire as a signed 16-bit value: `-1` for
/// [`Owner::Unowned`], `0` for [`Owner::Authority`] and the node id for
/// [`Owner::Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i16", into = "i16")]
pub enum Owner {
    /// The line does not exist (or is a reserved line not yet created).
    Unowned,
    /// The line exists and no cluster node holds it.
    Authority,
    /// The line is held exclusively by a cluster node.
    Node(NodeId),
}

impl Owner {
    /// Raw value of [`Owner::Unowned`].
    pub const UNOWNED_RAW: i16 = -1;

    /// Decode a raw owner value. Negative values all decode as unowned.
    pub const fn from_raw(raw: i16) -> Self {
        match raw {
            0 => Owner::Authority,
            n if n > 0 => Owner::Node(NodeId(n)),
            _ => Owner::Unowned,
        }
    }

    /// Encode as the raw signed 16-bit value.
    pub const fn to_raw(self) -> i16 {
        match self {
            Owner::Unowned => Self::UNOWNED_RAW,
            Owner::Authority => 0,
            Owner::Node(n) => n.0,
        }
    }

    /// The owner value recorded when `node` takes a line.
    ///
    /// The authority's own id maps back to [`Owner::Authority`].
    pub const fn of(node: NodeId) -> Self {
        Self::from_raw(node.0)
    }

    /// Return the holding node, if a cluster node holds the line.
    pub const fn node(self) -> Option<NodeId> {
        match self {
            Owner::Node(n) => Some(n),
            _ => None,
        }
    }
}

impl From<i16> for Owner {
    fn from(raw: i16) -> Self {
        Owner::from_raw(raw)
    }
}

impl From<Owner> for i16 {
    fn from(owner: Owner) -> Self {
        owner.to_raw()
    }
}

impl From<NodeId> for Owner {
    fn from(node: NodeId) -> Self {
        Owner::of(node)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Unowned => f.write_str("unowned"),
            Owner::Authority => f.write_str("authority"),
            Owner::Node(n) => write!(f, "node {n}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Line records
// ---------------------------------------------------------------------------

/// The persisted state of an existing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEntry {
    /// Current holder of the line.
    pub owner: Owner,
    /// Strictly increasing on every ownership-transferring write.
    pub version: u64,
    /// Opaque line contents.
    pub data: Vec<u8>,
}

impl LineEntry {
    /// Create an entry.
    pub fn new(owner: Owner, version: u64, data: Vec<u8>) -> Self {
        Self {
            owner,
            version,
            data,
        }
    }
}

/// One line carried in a backup batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// The line being backed up.
    pub line: LineId,
    /// Version of the contents below.
    pub version: u64,
    /// Line contents; `None` is persisted as an empty payload.
    pub data: Option<Vec<u8>>,
}

// ---------------------------------------------------------------------------
// Cluster events
// ---------------------------------------------------------------------------

/// Membership changes published by the cluster service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// A node joined the cluster.
    NodeAdded(NodeId),
    /// A node left the cluster or was declared dead.
    NodeRemoved(NodeId),
    /// A node was promoted or switched roles.
    NodeSwitched(NodeId),
}
