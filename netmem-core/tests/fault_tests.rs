mod common;

use common::{call, key_on_other_shard, open_store, open_store_with};
use netmem_core::{NetMemError, NetworkAttributes, Status, StoreConfig, channel_listener};
use std::time::Duration;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_slow_key_does_not_block_other_shards() {
    let t = open_store();
    t.faults.slow_down("slow", Duration::from_millis(800));

    let (slow_listener, slow_rx) = channel_listener();
    t.store.store_network_attributes(
        "slow",
        NetworkAttributes::default().with_mtu(1500),
        Some(slow_listener),
    );

    let other = key_on_other_shard(&t.store, "slow");
    let fast = tokio::time::timeout(Duration::from_millis(400), async {
        assert_ok!(
            call(|l| t.store.store_network_attributes(
                other.clone(),
                NetworkAttributes::default().with_mtu(1400),
                Some(l)
            ))
            .await
        );
        call(|l| t.store.retrieve_network_attributes(other.clone(), Some(l))).await
    })
    .await
    .expect("store for an unrelated key waited on the slow key");
    assert_eq!(assert_ok!(fast).mtu.value(), Some(&1400));

    assert_ok!(slow_rx.await.unwrap());
}

#[tokio::test]
async fn test_storage_timeout_reports_io_failure() {
    let t = open_store_with(|config| StoreConfig {
        io_timeout_ms: 200,
        ..config
    });
    assert_ok!(
        call(|l| t.store.store_network_attributes(
            "wifi-a",
            NetworkAttributes::default().with_mtu(1500),
            Some(l)
        ))
        .await
    );

    let lock = rusqlite::Connection::open(&t.db_path).unwrap();
    lock.execute_batch("BEGIN EXCLUSIVE").unwrap();

    let result = call(|l| {
        t.store.store_network_attributes(
            "wifi-a",
            NetworkAttributes::default().with_dns_addresses(vec!["8.8.8.8".parse().unwrap()]),
            Some(l),
        )
    })
    .await;
    let error = result.unwrap_err();
    assert!(matches!(error, NetMemError::Timeout(_)));
    assert_eq!(error.status(), Status::IoFailure);

    lock.execute_batch("ROLLBACK").unwrap();

    // The timed out write never lands, before or after later requests.
    let stored = assert_ok!(call(|l| t.store.retrieve_network_attributes("wifi-a", Some(l))).await);
    assert!(stored.dns_addresses.is_absent());

    let delete = call(|l| t.store.delete("wifi-a", true, Some(l))).await;
    assert_eq!(delete.status, Status::Success);
    assert_eq!(delete.affected, 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let result = call(|l| t.store.retrieve_network_attributes("wifi-a", Some(l))).await;
    assert!(matches!(result, Err(NetMemError::NotFound(_))));
}

#[tokio::test]
async fn test_slow_call_is_not_overtaken_on_its_shard() {
    let t = open_store_with(|config| StoreConfig {
        io_timeout_ms: 50,
        ..config
    });
    t.faults.slow_down("wifi-a", Duration::from_millis(300));

    let (store_listener, store_rx) = channel_listener();
    t.store.store_network_attributes(
        "wifi-a",
        NetworkAttributes::default().with_mtu(1500),
        Some(store_listener),
    );
    let (delete_listener, delete_rx) = channel_listener();
    t.store.delete("wifi-a", true, Some(delete_listener));

    assert_ok!(store_rx.await.unwrap());
    let delete = delete_rx.await.unwrap();
    assert_eq!(delete.status, Status::Success);
    assert_eq!(delete.affected, 1);

    let result = call(|l| t.store.retrieve_network_attributes("wifi-a", Some(l))).await;
    assert!(matches!(result, Err(NetMemError::NotFound(_))));
}

#[tokio::test]
async fn test_storage_failure_reports_io_failure() {
    let t = open_store();
    t.faults.fail("broken");

    let result = call(|l| t.store.retrieve_network_attributes("broken", Some(l))).await;
    assert_eq!(result.unwrap_err().status(), Status::IoFailure);

    let delete = call(|l| t.store.delete("broken", true, Some(l))).await;
    assert_eq!(delete.status, Status::IoFailure);
    assert_eq!(delete.affected, 0);
}

#[tokio::test]
async fn test_partial_cluster_failure() {
    let t = open_store();
    let keys = ["ap-1", "ap-2", "ap-3", "ap-4", "ap-5"];
    for key in keys {
        assert_ok!(
            call(|l| t.store.store_network_attributes(
                key,
                NetworkAttributes::default().with_group_hint("office"),
                Some(l)
            ))
            .await
        );
    }

    t.faults.fail("ap-2");
    let failing_shard = t.store.shard_of("ap-2");
    let healthy = keys
        .iter()
        .filter(|key| t.store.shard_of(key) != failing_shard)
        .count() as u32;

    let first = call(|l| t.store.delete_cluster("office", false, Some(l))).await;
    assert_eq!(first.status, Status::IoFailure);
    assert_eq!(first.affected, healthy);

    // Re-issuing once storage recovers only picks up what was left.
    t.faults.heal("ap-2");
    let second = call(|l| t.store.delete_cluster("office", false, Some(l))).await;
    assert_eq!(second.status, Status::Success);
    assert_eq!(second.affected, 1);

    for key in keys {
        let result = call(|l| t.store.retrieve_network_attributes(key, Some(l))).await;
        assert!(matches!(result, Err(NetMemError::NotFound(_))));
    }
}

#[tokio::test]
async fn test_sweep_skips_failing_keys() {
    let t = open_store();
    for key in ["old-1", "old-2"] {
        assert_ok!(
            call(|l| t.store.store_network_attributes(
                key,
                NetworkAttributes::default().with_expiry(common::START + 10),
                Some(l)
            ))
            .await
        );
    }

    t.clock.advance(1_000);
    t.faults.fail("old-1");

    let report = assert_ok!(call(|l| t.store.sweep(Some(l))).await);
    assert_eq!(report.attributes_purged, 1);
    assert_eq!(report.failures, 1);

    t.faults.heal("old-1");
    let report = assert_ok!(call(|l| t.store.sweep(Some(l))).await);
    assert_eq!(report.attributes_purged, 1);
    assert_eq!(report.failures, 0);
}
