mod common;

use std::time::Duration;

use common::{cluster, key, path, req};
use strongbox_core::audit::AuditOutcome;
use strongbox_core::types::{ContainerSettings, Tags};
use strongbox_core::{ErrorKind, StoreError};
use strongbox_engine::DeleteMode;
use strongbox_replication::NodeHealth;
use strongbox_replication::probe::probe_once;

#[tokio::test]
async fn mutations_reach_every_replica() {
    let c = cluster(3, 3, Duration::from_secs(1)).await;
    let admin = req("admin");
    let primary = c.primary();

    let created = primary
        .containers
        .write(&admin, &path("c1"), Tags::new())
        .await
        .unwrap();
    assert!(!created.is_degraded());
    let written = primary
        .objects
        .write(&admin, &path("c1"), &key("k1"), b"hello", Tags::new())
        .await
        .unwrap();
    assert_eq!(written.replication.as_ref().unwrap().acknowledged, 2);

    for id in [2, 3] {
        let replica = c.node(id);
        let read = replica
            .objects
            .read(&admin, &path("c1"), &key("k1"))
            .await
            .unwrap();
        assert_eq!(read.data, b"hello");
        assert_eq!(read.record.etag, written.value.etag);
        // Replicas choose their own storage locations.
        assert_ne!(read.record.storage_key, written.value.storage_key);
        // Replica intake is not audited; only the read above is.
        assert_eq!(replica.all_audit().await.len(), 1);
    }

    primary
        .objects
        .write_range(&admin, &path("c1"), &key("k1"), 5, b" world")
        .await
        .unwrap();
    primary
        .containers
        .rename(&admin, &path("c1"), &path("c2"))
        .await
        .unwrap();

    for id in [2, 3] {
        let replica = c.node(id);
        assert!(!replica.containers.exists(&admin, &path("c1")).await.unwrap());
        let read = replica
            .objects
            .read(&admin, &path("c2"), &key("k1"))
            .await
            .unwrap();
        assert_eq!(read.data, b"hello world");
        assert_eq!(replica.storage.len(), 1);
    }

    primary
        .containers
        .delete(&admin, &path("c2"), DeleteMode::Cascade)
        .await
        .unwrap();
    for id in [2, 3] {
        let replica = c.node(id);
        assert!(!replica.containers.exists(&admin, &path("c2")).await.unwrap());
        assert!(replica.storage.is_empty());
    }
}

#[tokio::test]
async fn missing_replica_degrades_but_commits() {
    let c = cluster(3, 3, Duration::from_millis(200)).await;
    let admin = req("admin");
    let primary = c.primary();
    c.transport.set_offline(3, true);

    let created = primary
        .containers
        .write(&admin, &path("c1"), Tags::new())
        .await
        .unwrap();
    assert!(created.is_degraded());
    let warning = created.warning().unwrap();
    assert_eq!(warning.code, ErrorKind::ReplicationDegraded.code());

    // Committed locally and on the reachable replica.
    assert!(primary.containers.exists(&admin, &path("c1")).await.unwrap());
    assert!(c.node(2).containers.exists(&admin, &path("c1")).await.unwrap());

    let trail = primary.audit_for("c1").await;
    match &trail[0].entry.outcome {
        AuditOutcome::Success { degraded } => {
            assert!(degraded.as_deref().unwrap().contains("1 of 2"));
        }
        other => panic!("expected a degraded success, got {other:?}"),
    }

    let topology = primary.ctx.replication.topology();
    assert_eq!(topology.health(3), NodeHealth::Degraded);
    primary
        .containers
        .write(&admin, &path("c2"), Tags::new())
        .await
        .unwrap();
    assert_eq!(topology.health(3), NodeHealth::Unreachable);

    // Unreachable nodes are skipped without waiting for a timeout.
    let skipped = primary
        .containers
        .write(&admin, &path("c3"), Tags::new())
        .await
        .unwrap();
    let outcome = skipped.replication.unwrap();
    assert_eq!(outcome.skipped, vec![3]);
    assert!(outcome.failed.is_empty());

    c.transport.set_offline(3, false);
    probe_once(topology, c.transport.as_ref(), Duration::from_millis(200)).await;
    assert_eq!(topology.health(3), NodeHealth::Healthy);

    let healed = primary
        .containers
        .write(&admin, &path("c4"), Tags::new())
        .await
        .unwrap();
    assert!(!healed.is_degraded());
    assert!(c.node(3).containers.exists(&admin, &path("c4")).await.unwrap());
}

#[tokio::test]
async fn container_override_relaxes_replication() {
    let c = cluster(3, 3, Duration::from_millis(200)).await;
    let admin = req("admin");
    let primary = c.primary();
    primary
        .containers
        .write(&admin, &path("scratch"), Tags::new())
        .await
        .unwrap();
    primary
        .containers
        .configure(
            &admin,
            &path("scratch"),
            ContainerSettings {
                enabled: true,
                replication_factor: Some(1),
            },
        )
        .await
        .unwrap();

    c.transport.set_offline(2, true);
    c.transport.set_offline(3, true);
    let written = primary
        .objects
        .write(&admin, &path("scratch"), &key("tmp"), b"x", Tags::new())
        .await
        .unwrap();
    let outcome = written.replication.as_ref().unwrap();
    assert_eq!(outcome.required, 0);
    assert!(!written.is_degraded());
}

#[tokio::test]
async fn replica_rejects_mutation_it_cannot_apply() {
    let c = cluster(2, 2, Duration::from_secs(1)).await;
    let admin = req("admin");
    let primary = c.primary();
    primary
        .containers
        .write(&admin, &path("c1"), Tags::new())
        .await
        .unwrap();

    // The replica loses the container behind the primary's back.
    c.node(2)
        .containers
        .delete(&admin, &path("c1"), DeleteMode::Reject)
        .await
        .unwrap();

    let written = primary
        .objects
        .write(&admin, &path("c1"), &key("k1"), b"x", Tags::new())
        .await
        .unwrap();
    assert!(written.is_degraded());
    assert_eq!(written.replication.unwrap().failed, vec![2]);
    let err = c
        .node(2)
        .objects
        .read(&admin, &path("c1"), &key("k1"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn slow_replica_never_keeps_an_overwritten_payload() {
    let c = cluster(3, 2, Duration::from_secs(5)).await;
    let admin = req("admin");
    let primary = c.primary();
    primary
        .containers
        .write(&admin, &path("c1"), Tags::new())
        .await
        .unwrap();

    // v1 reaches node 3 only after v2 has been applied there.
    c.transport.set_delay(3, Duration::from_millis(300));
    primary
        .objects
        .write(&admin, &path("c1"), &key("k1"), b"v1", Tags::new())
        .await
        .unwrap();
    c.transport.set_delay(3, Duration::ZERO);
    primary
        .objects
        .write(&admin, &path("c1"), &key("k1"), b"v2", Tags::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    for id in [1, 2, 3] {
        let read = c
            .node(id)
            .objects
            .read(&admin, &path("c1"), &key("k1"))
            .await
            .unwrap();
        assert_eq!(read.data, b"v2", "node {id} diverged from the primary");
    }

    // The refused late delivery counts against node 3.
    let topology = primary.ctx.replication.topology();
    assert_eq!(topology.health(3), NodeHealth::Degraded);
}
