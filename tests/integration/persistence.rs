//! Integration test: a Fjall-backed authority across restarts.

use std::sync::Arc;

use reef_home::HomeConfig;
use reef_net::MessageBody;
use reef_store::FjallStore;
use reef_types::{BackupEntry, LineId, MAX_RESERVED_LINE, NodeId, Owner};

use reef_integration_tests::{Authority, ROOT, putx};

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let line = LineId::new(0x4_0000);

    {
        let store = Arc::new(FjallStore::open(dir.path()).unwrap());
        let a = Authority::with_store(store, HomeConfig::default(), true).await;
        let mut n5 = a.connect(5).await;
        n5.request(MessageBody::Get { line: ROOT }).await;
        let reply = n5
            .request(MessageBody::BackupPacket {
                backups: vec![BackupEntry {
                    line,
                    version: 3,
                    data: Some(b"durable".to_vec()),
                }],
            })
            .await;
        assert_eq!(reply.body, MessageBody::BackupPacketAck);
        a.stop().await;
    }

    let store = Arc::new(FjallStore::open(dir.path()).unwrap());
    let a = Authority::with_store(store, HomeConfig::default(), true).await;
    assert_eq!(a.owner_of(ROOT), Owner::Node(NodeId::new(5)));
    assert_eq!(a.cluster.allocator().peek(), LineId::new(0x4_0001));

    // Node 5 is gone for good; its lines come back to the authority.
    let mut n7 = a.connect(7).await;
    a.cluster.add_member(NodeId::new(5)).await.unwrap();
    a.remove_node(5).await;

    let reply = n7.request(MessageBody::GetX { line }).await;
    assert_eq!(reply.body, putx(line, 3, Some(b"durable".to_vec())));
    a.stop().await;
}

#[tokio::test]
async fn test_backup_authority_seeds_on_switch() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Arc::new(FjallStore::open(dir.path()).unwrap());
        let a = Authority::with_store(store, HomeConfig::default(), true).await;
        let mut n2 = a.connect(2).await;
        n2.request(MessageBody::BackupPacket {
            backups: vec![BackupEntry {
                line: LineId::new(0x8_0000),
                version: 1,
                data: None,
            }],
        })
        .await;
        a.stop().await;
    }

    let store = Arc::new(FjallStore::open(dir.path()).unwrap());
    let a = Authority::with_store(store, HomeConfig::default(), false).await;
    assert!(a.home.is_ready());
    assert!(!a.cluster.is_primary());
    assert_eq!(a.cluster.allocator().peek().get(), MAX_RESERVED_LINE + 1);

    a.home.switch_to_primary().unwrap();
    assert!(a.cluster.is_primary());
    assert_eq!(a.cluster.allocator().allocate(), Some(LineId::new(0x8_0001)));
    a.stop().await;
}
