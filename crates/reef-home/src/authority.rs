//! [`HomeNode`]: the coherence authority.
//!
//! Every handler is an optimistic loop over the store's per-line
//! compare-and-swap; nothing here takes a lock. Replies are sent before the
//! handler returns, and a failed send to a departed node is not an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reef_cluster::{ClusterState, NodeChangeListener};
use reef_net::{Message, MessageBody, MessageReceiver, NetError, Transport};
use reef_store::{LineStore, StoreError, TxnGuard};
use reef_types::{BackupEntry, LineEntry, LineId, NodeId, Owner};
use tracing::{Level, debug, error, info, warn};

use crate::config::HomeConfig;
use crate::error::HomeError;
use crate::monitor::AuthorityMonitor;

/// The authority node of a reef grid.
pub struct HomeNode {
    config: HomeConfig,
    store: Arc<dyn LineStore>,
    transport: Arc<dyn Transport>,
    cluster: Arc<ClusterState>,
    monitor: Arc<dyn AuthorityMonitor>,
    ready: AtomicBool,
}

impl HomeNode {
    /// Create an authority. It rejects messages until [`HomeNode::start`].
    pub fn new(
        config: HomeConfig,
        store: Arc<dyn LineStore>,
        transport: Arc<dyn Transport>,
        cluster: Arc<ClusterState>,
        monitor: Arc<dyn AuthorityMonitor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            transport,
            cluster,
            monitor,
            ready: AtomicBool::new(false),
        })
    }

    /// Register this authority as the transport's message sink.
    pub fn attach(self: &Arc<Self>) {
        self.transport.set_receiver(self.clone());
    }

    pub fn store(&self) -> &Arc<dyn LineStore> {
        &self.store
    }

    pub fn cluster(&self) -> &Arc<ClusterState> {
        &self.cluster
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start serving.
    ///
    /// As primary, the line id allocator is seeded past every stored line
    /// first, so ids allocated after a failover never collide with existing
    /// lines. A backup authority only marks itself ready.
    pub fn start(&self, primary: bool) -> Result<(), HomeError> {
        if primary {
            if tracing::enabled!(Level::DEBUG) {
                debug!("performing store dump");
                for (line, entry) in self.store.dump()? {
                    debug!(
                        %line,
                        owner = %entry.owner,
                        version = entry.version,
                        bytes = entry.data.len(),
                        "stored line"
                    );
                }
            }
            self.seed_allocator()?;
        }
        self.ready.store(true, Ordering::SeqCst);
        info!(primary, "authority ready");
        Ok(())
    }

    /// Take over as primary after having run as a backup.
    pub fn switch_to_primary(&self) -> Result<(), HomeError> {
        self.seed_allocator()?;
        info!("authority switched to primary");
        Ok(())
    }

    fn seed_allocator(&self) -> Result<(), HomeError> {
        let next = self
            .store
            .max_id()?
            .map_or(0, |max| max.get().saturating_add(1));
        let allocator = self.cluster.allocator();
        allocator.set_counter(next);
        self.cluster.set_primary(true);
        debug!(next = %allocator.peek(), "seeded line id allocator");
        Ok(())
    }

    /// Close the store. Call once during orderly teardown.
    pub fn shutdown(&self) -> Result<(), HomeError> {
        self.ready.store(false, Ordering::SeqCst);
        self.store.close()?;
        info!("authority shut down");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Message handling
    // ------------------------------------------------------------------

    /// Handle one inbound message to completion, replies included.
    ///
    /// Kinds the authority only ever sends are ignored. An error means the
    /// message got no reply and nothing it staged was committed.
    pub async fn receive(&self, message: Message) -> Result<(), HomeError> {
        debug!(%message, "received");
        if !self.is_ready() {
            return Err(HomeError::NotReady);
        }
        if message.node.get() <= NodeId::AUTHORITY.get() {
            debug!(%message, "ignoring message from a non-member node id");
            return Ok(());
        }

        match &message.body {
            MessageBody::Get { line } | MessageBody::GetX { line } | MessageBody::Invoke { line } => {
                self.handle_get(&message, *line).await?;
            }
            MessageBody::Inv { line, owner } => self.handle_inv(&message, *line, *owner).await?,
            MessageBody::Del { line } => self.handle_del(&message, *line).await?,
            MessageBody::Msg { line, data } => {
                if self.handle_get(&message, *line).await? {
                    let echo = MessageBody::Msg {
                        line: *line,
                        data: data.clone(),
                    };
                    self.send(Message::to(message.node, echo)).await;
                }
            }
            MessageBody::BackupPacket { backups } => self.handle_backup(&message, backups).await?,
            MessageBody::Putx { .. }
            | MessageBody::ChngdOwnr { .. }
            | MessageBody::NotFound { .. }
            | MessageBody::InvAck { .. }
            | MessageBody::BackupPacketAck => {}
        }
        Ok(())
    }

    /// Try to hand `line` to the requester.
    ///
    /// Returns `true` if ownership was transferred (a PUTX was sent) and
    /// `false` if the requester was told the line is missing or held
    /// elsewhere.
    async fn handle_get(&self, request: &Message, line: LineId) -> Result<bool, HomeError> {
        let requester = Owner::of(request.node);
        let mut lost = 0u32;

        loop {
            if line.is_reserved()
                && self.store.cas_owner(line, Owner::Unowned, requester)? == requester
            {
                let Some((version, data)) = self.create_reserved(line, requester)? else {
                    debug!(%line, node = %request.node, "reserved line changed hands during create, retrying");
                    continue;
                };
                debug!(%line, node = %request.node, "reserved line now owned by node");
                self.monitor.add_owner_write();
                self.monitor.add_object_served();
                self.send(request.reply(MessageBody::Putx {
                    line,
                    owners: Vec::new(),
                    version,
                    data,
                }))
                .await;
                return Ok(true);
            }

            let current = self.store.cas_owner(line, Owner::Authority, requester)?;
            if current == requester {
                let (version, data) = self
                    .store
                    .read(line)?
                    .map_or((0, Vec::new()), |e| (e.version, e.data));
                debug!(%line, node = %request.node, "line transferred from authority");
                self.monitor.add_owner_write();
                self.monitor.add_object_served();
                self.send(request.reply(MessageBody::Putx {
                    line,
                    owners: Vec::new(),
                    version,
                    data: Some(data),
                }))
                .await;
                return Ok(true);
            }

            match current {
                Owner::Unowned if !line.is_reserved() => {
                    self.send(request.reply(MessageBody::NotFound { line })).await;
                    return Ok(false);
                }
                Owner::Node(owner) => {
                    self.send(request.reply(MessageBody::ChngdOwnr {
                        line,
                        new_owner: owner,
                        broadcast: true,
                    }))
                    .await;
                    self.monitor.add_owner_served();
                    return Ok(false);
                }
                _ => debug!(%line, owner = %current, "lost ownership race, retrying"),
            }

            lost += 1;
            if self.config.cas_retry_limit.is_some_and(|limit| lost >= limit) {
                warn!(%line, node = %request.node, attempts = lost, "giving up on contended line");
                return Err(HomeError::ContentionExhausted {
                    line,
                    attempts: lost,
                });
            }
            tokio::task::yield_now().await;
        }
    }

    /// Finish taking a reserved line for `requester` after its CAS away
    /// from unowned succeeded.
    ///
    /// A CAS that finds the requester already holding the line reports the
    /// same owner as one that creates it; only a freshly created record
    /// (version 0) is initialized, so an existing line is served as stored.
    /// Returns `None` if the requester no longer holds the line, e.g. it was
    /// removed and another node took the line in between.
    fn create_reserved(
        &self,
        line: LineId,
        requester: Owner,
    ) -> Result<Option<(u64, Option<Vec<u8>>)>, HomeError> {
        if self.store.initialize(line, requester)? {
            return Ok(Some((1, None)));
        }
        match self.store.read(line)? {
            Some(entry) if entry.owner == requester => Ok(Some((entry.version, Some(entry.data)))),
            _ => Ok(None),
        }
    }

    /// A node claims `line`, which it obtained directly from `previous`.
    async fn handle_inv(
        &self,
        request: &Message,
        line: LineId,
        previous: Owner,
    ) -> Result<(), HomeError> {
        let claimant = Owner::of(request.node);
        let current = self.store.cas_owner(line, previous, claimant)?;
        if current == claimant {
            debug!(%line, node = %request.node, "INV accepted, node now owns line");
            self.monitor.add_owner_write();
            self.send(request.reply(MessageBody::InvAck { line })).await;
        } else {
            debug!(
                %line,
                node = %request.node,
                %previous,
                %current,
                "INV with stale previous owner, replying with current owner"
            );
            self.monitor.add_owner_served();
            self.send(request.reply(MessageBody::Inv {
                line,
                owner: current,
            }))
            .await;
        }
        Ok(())
    }

    async fn handle_del(&self, request: &Message, line: LineId) -> Result<(), HomeError> {
        debug!(%line, node = %request.node, "deleting line");
        if let Err(e) = self.delete_line(line) {
            error!(%line, %e, "delete failed, transaction aborted");
            return Err(e.into());
        }
        self.send(request.reply(MessageBody::InvAck { line })).await;
        Ok(())
    }

    fn delete_line(&self, line: LineId) -> Result<(), StoreError> {
        let mut guard = TxnGuard::begin(self.store.as_ref())?;
        self.store.delete(line, guard.txn())?;
        guard.commit()
    }

    async fn handle_backup(
        &self,
        request: &Message,
        backups: &[BackupEntry],
    ) -> Result<(), HomeError> {
        if let Err(e) = self.persist_backup(request.node, backups) {
            error!(node = %request.node, entries = backups.len(), %e, "backup failed, transaction aborted");
            return Err(e.into());
        }
        self.send(request.reply(MessageBody::BackupPacketAck)).await;
        Ok(())
    }

    /// Write every entry of a backup batch as owned by `node`, all or
    /// nothing.
    ///
    /// An entry older than the stored line fails the commit, so a stale
    /// batch is rejected whole.
    fn persist_backup(&self, node: NodeId, backups: &[BackupEntry]) -> Result<(), StoreError> {
        let owner = Owner::of(node);
        let mut guard = TxnGuard::begin(self.store.as_ref())?;
        self.monitor.add_transaction(backups.len());
        for backup in backups {
            debug!(
                line = %backup.line,
                version = backup.version,
                bytes = ?backup.data.as_ref().map(Vec::len),
                "backing up line"
            );
            let entry = LineEntry::new(
                owner,
                backup.version,
                backup.data.clone().unwrap_or_default(),
            );
            self.store.write(backup.line, entry, Some(guard.txn()))?;
        }
        guard.commit()
    }

    /// Send a message, swallowing delivery failures.
    async fn send(&self, message: Message) {
        debug!(%message, "sending");
        match self.transport.send(message).await {
            Ok(()) => {}
            Err(NetError::NodeNotFound(node)) => debug!(%node, "node unreachable, dropping message"),
            Err(e) => debug!(%e, "send failed, dropping message"),
        }
    }
}

#[async_trait::async_trait]
impl MessageReceiver for HomeNode {
    async fn receive(&self, message: Message) {
        let node = message.node;
        let kind = message.body.kind();
        if let Err(e) = HomeNode::receive(self, message).await {
            error!(%node, kind, %e, "message handling failed");
        }
    }
}

impl NodeChangeListener for HomeNode {
    fn node_added(&self, _node: NodeId) {}

    fn node_removed(&self, node: NodeId) {
        info!(%node, "node removed, authority now owns its lines");
        match self.store.remove_owner(node) {
            Ok(reassigned) => debug!(%node, reassigned, "lines reclaimed"),
            Err(e) => error!(%node, %e, "failed to reclaim lines of removed node"),
        }
    }

    fn node_switched(&self, _node: NodeId) {}
}

impl std::fmt::Debug for HomeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeNode")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
