//! Integration test: node removal and failure paths.

use std::sync::Arc;

use reef_home::{HomeConfig, HomeError};
use reef_net::{Message, MessageBody};
use reef_store::{FaultyStore, LineStore, MemoryStore};
use reef_types::{BackupEntry, LineId, NodeId, Owner};

use reef_integration_tests::{Authority, ROOT, putx};

/// GET by node 5, redirect for node 7, node 5 leaves, node 7 gets the line.
#[tokio::test]
async fn test_removed_owner_releases_line() {
    let a = Authority::start().await;
    let mut n5 = a.connect(5).await;
    let mut n7 = a.connect(7).await;

    assert_eq!(
        n5.request(MessageBody::Get { line: ROOT }).await.body,
        putx(ROOT, 1, None)
    );
    assert_eq!(
        n7.request(MessageBody::Get { line: ROOT }).await.body,
        MessageBody::ChngdOwnr {
            line: ROOT,
            new_owner: NodeId::new(5),
            broadcast: true,
        }
    );

    a.remove_node(5).await;
    assert_eq!(a.owner_of(ROOT), Owner::Authority);

    let reply = n7.request(MessageBody::Get { line: ROOT }).await;
    assert_eq!(reply.body, putx(ROOT, 1, Some(Vec::new())));
    assert_eq!(reply.node, NodeId::new(7));
    assert_eq!(a.owner_of(ROOT), Owner::Node(NodeId::new(7)));
    a.stop().await;
}

#[tokio::test]
async fn test_removal_only_touches_departed_node() {
    let a = Authority::start().await;
    let mut n1 = a.connect(1).await;
    let mut n2 = a.connect(2).await;

    for i in 0..5u64 {
        n1.request(MessageBody::Get { line: LineId::new(0x100 + i) }).await;
        n2.request(MessageBody::Get { line: LineId::new(0x200 + i) }).await;
    }
    a.remove_node(1).await;

    assert!(a.lines_owned_by(NodeId::new(1)).is_empty());
    assert_eq!(a.lines_owned_by(NodeId::new(2)).len(), 5);
    for i in 0..5u64 {
        assert_eq!(a.owner_of(LineId::new(0x100 + i)), Owner::Authority);
    }
    a.stop().await;
}

/// A failed backup gets no acknowledgement and leaves nothing behind; the
/// connection keeps working.
#[tokio::test]
async fn test_failed_backup_is_silent_and_atomic() {
    let memory = Arc::new(MemoryStore::new());
    let faulty = Arc::new(FaultyStore::new(memory.clone()).fail_txn_write_at(2));
    let a = Authority::with_store(faulty.clone(), HomeConfig::default(), true).await;
    let mut n9 = a.connect(9).await;

    let backups: Vec<BackupEntry> = (0..4u64)
        .map(|i| BackupEntry {
            line: LineId::new(0x9_0000 + i),
            version: 1,
            data: Some(vec![i as u8]),
        })
        .collect();
    n9.send(MessageBody::BackupPacket { backups: backups.clone() }).await;
    n9.assert_silent().await;
    assert!(memory.dump().unwrap().is_empty());
    assert_eq!(memory.open_transactions(), 0);

    // The armed write has fired; the retry goes through.
    let reply = n9.request(MessageBody::BackupPacket { backups }).await;
    assert_eq!(reply.body, MessageBody::BackupPacketAck);
    assert_eq!(memory.dump().unwrap().len(), 4);
    a.stop().await;
}

#[tokio::test]
async fn test_failed_delete_keeps_line() {
    let memory = Arc::new(MemoryStore::new());
    let faulty = Arc::new(FaultyStore::new(memory.clone()).fail_delete(true));
    let a = Authority::with_store(faulty.clone(), HomeConfig::default(), true).await;
    let mut n3 = a.connect(3).await;

    n3.request(MessageBody::Get { line: ROOT }).await;
    n3.send(MessageBody::Del { line: ROOT }).await;
    n3.assert_silent().await;
    assert_eq!(a.owner_of(ROOT), Owner::Node(NodeId::new(3)));

    faulty.set_fail_delete(false);
    let reply = n3.request(MessageBody::Del { line: ROOT }).await;
    assert_eq!(reply.body, MessageBody::InvAck { line: ROOT });
    a.stop().await;
}

#[tokio::test]
async fn test_contention_limit_drops_request() {
    let memory = Arc::new(MemoryStore::new());
    let faulty = Arc::new(FaultyStore::new(memory.clone()).cas_loss_percent(100));
    let config = HomeConfig {
        cas_retry_limit: Some(5),
    };
    let a = Authority::with_store(faulty, config, true).await;
    let mut n3 = a.connect(3).await;

    n3.send(MessageBody::Get { line: ROOT }).await;
    n3.assert_silent().await;

    let err = a
        .home
        .receive(Message::to(NodeId::new(3), MessageBody::Get { line: ROOT }))
        .await
        .unwrap_err();
    assert!(matches!(err, HomeError::ContentionExhausted { attempts: 5, .. }));
    a.stop().await;
}
