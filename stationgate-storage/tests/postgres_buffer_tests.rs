#![cfg(feature = "db-tests")]
//! PostgreSQL buffer integration tests.
//!
//! Require a reachable database configured through `STATIONGATE_DB_*` and
//! `DB_TESTS=1`; otherwise every test returns early.

use stationgate_core::{BufferError, GatewayError, PendingMessage};
use stationgate_storage::{MessageBuffer, PgBufferConfig, PgMessageBuffer};
use std::time::{SystemTime, UNIX_EPOCH};

async fn test_buffer() -> Option<PgMessageBuffer> {
    if std::env::var("DB_TESTS").ok().as_deref() != Some("1") {
        return None;
    }
    PgMessageBuffer::connect(&PgBufferConfig::from_env()).await.ok()
}

/// Station name no other test run will reuse.
fn unique_station(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{}", prefix, nanos)
}

#[tokio::test]
async fn test_add_then_get_returns_message() {
    let Some(buffer) = test_buffer().await else {
        return;
    };
    let station = unique_station("orders");

    let added = buffer
        .add_message(PendingMessage::new(&station, "billing", "alice", b"one".to_vec(), 10))
        .await
        .expect("add_message");

    let listed = buffer
        .get_messages(&station, "billing", 1)
        .await
        .expect("get_messages");
    assert_eq!(listed, vec![added.clone()]);

    buffer.remove_message(&added).await.expect("remove_message");
    let missing = buffer.get_message_by_id(&station, "billing", added.id).await;
    assert!(matches!(
        missing,
        Err(GatewayError::Buffer(BufferError::NotFound { .. }))
    ));
}

#[tokio::test]
async fn test_insertion_order_and_limit() {
    let Some(buffer) = test_buffer().await else {
        return;
    };
    let station = unique_station("orders");

    for payload in ["a", "b", "c"] {
        buffer
            .add_message(PendingMessage::new(
                &station,
                "billing",
                "alice",
                payload.as_bytes().to_vec(),
                0,
            ))
            .await
            .expect("add_message");
    }

    let listed = buffer
        .get_messages(&station, "billing", 2)
        .await
        .expect("get_messages");
    let payloads: Vec<String> = listed.iter().map(|m| m.data_lossy()).collect();
    assert_eq!(payloads, vec!["a", "b"]);
    assert!(listed[0].id < listed[1].id);
}

#[tokio::test]
async fn test_remove_twice_is_not_found() {
    let Some(buffer) = test_buffer().await else {
        return;
    };
    let station = unique_station("orders");

    let added = buffer
        .add_message(PendingMessage::new(&station, "billing", "alice", b"x".to_vec(), 0))
        .await
        .expect("add_message");
    buffer.remove_message(&added).await.expect("first remove");
    assert!(buffer.remove_message(&added).await.is_err());
}

#[tokio::test]
async fn test_purge_older_than_removes_only_old_rows() {
    let Some(buffer) = test_buffer().await else {
        return;
    };
    let station = unique_station("retention");

    buffer
        .add_message(PendingMessage::new(&station, "c", "alice", b"old".to_vec(), 1))
        .await
        .expect("add old");
    let fresh = buffer
        .add_message(PendingMessage::new(&station, "c", "alice", b"new".to_vec(), i64::MAX))
        .await
        .expect("add fresh");

    let purged = buffer.purge_older_than(2).await.expect("purge");
    assert!(purged >= 1);

    let listed = buffer
        .get_messages(&station, "c", 10)
        .await
        .expect("get_messages");
    assert_eq!(listed, vec![fresh]);
}
