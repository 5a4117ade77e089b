//! Integration test: ownership requests over TCP.

use reef_net::MessageBody;
use reef_types::{BackupEntry, LineId, NodeId, Owner};

use reef_integration_tests::{Authority, ROOT, putx};

/// Node 5 creates a reserved line, node 7 is redirected to it.
#[tokio::test]
async fn test_create_then_redirect() {
    let a = Authority::start().await;
    let mut n5 = a.connect(5).await;
    let mut n7 = a.connect(7).await;

    let reply = n5.request(MessageBody::Get { line: ROOT }).await;
    assert_eq!(reply.body, putx(ROOT, 1, None));
    assert_eq!(reply.node, NodeId::new(5));

    let reply = n7.request(MessageBody::Get { line: ROOT }).await;
    assert_eq!(
        reply.body,
        MessageBody::ChngdOwnr {
            line: ROOT,
            new_owner: NodeId::new(5),
            broadcast: true,
        }
    );
    assert_eq!(reply.node, NodeId::new(7));

    a.stop().await;
}

#[tokio::test]
async fn test_unknown_ordinary_line_is_not_found() {
    let a = Authority::start().await;
    let mut n3 = a.connect(3).await;
    let line = LineId::new(0xABCD_0000);

    let reply = n3.request(MessageBody::GetX { line }).await;

    assert_eq!(reply.body, MessageBody::NotFound { line });
    assert_eq!(a.owner_of(line), Owner::Unowned);
    a.stop().await;
}

/// Many nodes race for the same reserved line over separate connections.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_nodes_get_single_grant() {
    let a = Authority::start().await;
    let mut clients = Vec::new();
    for id in 1..=10 {
        clients.push(a.connect(id).await);
    }

    let line = LineId::new(0x42);
    let tasks: Vec<_> = clients
        .into_iter()
        .map(|mut c| tokio::spawn(async move { c.request(MessageBody::Get { line }).await }))
        .collect();

    let mut grants = Vec::new();
    let mut redirects = Vec::new();
    for task in tasks {
        let reply = task.await.unwrap();
        match reply.body {
            MessageBody::Putx { version, .. } => {
                assert_eq!(version, 1);
                grants.push(reply.node);
            }
            MessageBody::ChngdOwnr { new_owner, .. } => redirects.push(new_owner),
            other => panic!("unexpected reply {other:?}"),
        }
    }

    assert_eq!(grants.len(), 1);
    assert_eq!(redirects.len(), 9);
    assert!(redirects.iter().all(|&n| n == grants[0]));
    assert_eq!(a.owner_of(line), Owner::Node(grants[0]));
    a.stop().await;
}

#[tokio::test]
async fn test_msg_payload_arrives_after_grant() {
    let a = Authority::start().await;
    let mut n2 = a.connect(2).await;

    n2.send(MessageBody::Msg {
        line: ROOT,
        data: b"ping".to_vec(),
    })
    .await;

    let grant = n2.recv().await;
    assert_eq!(grant.body, putx(ROOT, 1, None));
    let echo = n2.recv().await;
    assert_eq!(
        echo.body,
        MessageBody::Msg {
            line: ROOT,
            data: b"ping".to_vec(),
        }
    );
    assert_eq!(echo.in_reply_to, None);
    a.stop().await;
}

/// Node 4 took the line from node 5 directly and tells the authority.
#[tokio::test]
async fn test_invalidate_handover() {
    let a = Authority::start().await;
    let mut n5 = a.connect(5).await;
    let mut n4 = a.connect(4).await;
    let mut n6 = a.connect(6).await;

    n5.request(MessageBody::Get { line: ROOT }).await;

    let reply = n4
        .request(MessageBody::Inv {
            line: ROOT,
            owner: Owner::Node(NodeId::new(5)),
        })
        .await;
    assert_eq!(reply.body, MessageBody::InvAck { line: ROOT });
    assert_eq!(a.owner_of(ROOT), Owner::Node(NodeId::new(4)));

    // Node 6 still believes node 5 handed it the line.
    let reply = n6
        .request(MessageBody::Inv {
            line: ROOT,
            owner: Owner::Node(NodeId::new(5)),
        })
        .await;
    assert_eq!(
        reply.body,
        MessageBody::Inv {
            line: ROOT,
            owner: Owner::Node(NodeId::new(4)),
        }
    );
    a.stop().await;
}

#[tokio::test]
async fn test_backup_then_delete() {
    let a = Authority::start().await;
    let mut n8 = a.connect(8).await;
    let line = LineId::new(0x7_0000);

    let reply = n8
        .request(MessageBody::BackupPacket {
            backups: vec![BackupEntry {
                line,
                version: 12,
                data: Some(vec![1, 2, 3, 4]),
            }],
        })
        .await;
    assert_eq!(reply.body, MessageBody::BackupPacketAck);
    assert_eq!(a.owner_of(line), Owner::Node(NodeId::new(8)));

    let reply = n8.request(MessageBody::Del { line }).await;
    assert_eq!(reply.body, MessageBody::InvAck { line });
    assert_eq!(a.owner_of(line), Owner::Unowned);

    let snapshot = a.monitor.snapshot();
    assert_eq!(snapshot.transactions, 1);
    assert_eq!(snapshot.transaction_entries, 1);
    a.stop().await;
}
