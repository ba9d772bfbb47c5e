//! Transaction, pool and trigger behaviour of the in-memory stores.

use gridsync_core::{
    types::{ChangeNotice, Operation, Record, RecordId},
    BatchId, MemoryRelational, RelationalStore, RelationalTx, StoreError,
};
use rstest::rstest;

fn ann() -> Record {
    Record::new(3, "Ann", Some(30), "NYC")
}

// ---------------------------------------------------------------------------
// 1. Commit / rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn commit_applies_staged_writes() {
    let store = MemoryRelational::new();
    let mut tx = store.begin(None).await.expect("begin");
    tx.insert(&ann()).await.expect("insert");
    assert!(
        store.find(RecordId(3)).await.unwrap().is_none(),
        "uncommitted writes are invisible outside the transaction"
    );
    assert_eq!(tx.find(RecordId(3)).await.unwrap(), Some(ann()));
    tx.commit().await.expect("commit");

    assert_eq!(store.snapshot(), vec![ann()]);
}

#[tokio::test]
async fn rollback_discards_writes() {
    let store = MemoryRelational::new().with_records([ann()]);
    let mut tx = store.begin(None).await.expect("begin");
    tx.delete(RecordId(3)).await.expect("delete");
    tx.insert(&Record::new(4, "Bo", None, "LA")).await.expect("insert");
    tx.rollback().await.expect("rollback");

    assert_eq!(store.snapshot(), vec![ann()]);
}

#[tokio::test]
async fn update_of_missing_record_reports_none() {
    let store = MemoryRelational::new();
    let mut tx = store.begin(None).await.expect("begin");
    let updated = tx.update(&ann()).await.expect("update");
    assert!(updated.is_none());
    tx.commit().await.expect("commit");
    assert!(store.snapshot().is_empty());
}

#[tokio::test]
async fn duplicate_insert_is_rejected() {
    let store = MemoryRelational::new().with_records([ann()]);
    let mut tx = store.begin(None).await.expect("begin");
    let err = tx.insert(&ann()).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(RecordId(3))), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Connection pool
// ---------------------------------------------------------------------------

#[rstest]
#[case("commit")]
#[case("rollback")]
#[case("drop")]
#[tokio::test]
async fn connection_released_on_every_exit_path(#[case] exit: &str) {
    let store = MemoryRelational::with_options("user_change", 2);
    let tx = store.begin(None).await.expect("begin");
    assert_eq!(store.available_connections(), 1, "[{exit}] checked out");

    match exit {
        "commit" => tx.commit().await.expect("commit"),
        "rollback" => tx.rollback().await.expect("rollback"),
        _ => drop(tx),
    }
    assert_eq!(store.available_connections(), 2, "[{exit}] released");
}

#[tokio::test(start_paused = true)]
async fn exhausted_pool_times_out() {
    let store = MemoryRelational::with_options("user_change", 1);
    let _held = store.begin(None).await.expect("begin");
    let err = store.begin(None).await.err().expect("second begin must fail");
    assert!(matches!(err, StoreError::PoolExhausted), "got: {err}");
}

// ---------------------------------------------------------------------------
// 3. Change trigger
// ---------------------------------------------------------------------------

#[tokio::test]
async fn commit_notifies_each_mutation_with_origin() {
    let store = MemoryRelational::new().with_records([Record::new(1, "Old", None, "SF")]);
    let mut notifications = store.listen("user_change").await.expect("listen");
    let batch = BatchId::new();

    let mut tx = store.begin(Some(batch)).await.expect("begin");
    tx.insert(&ann()).await.unwrap();
    tx.delete(RecordId(1)).await.unwrap();
    tx.commit().await.unwrap();

    let first: ChangeNotice =
        serde_json::from_str(&notifications.recv().await.unwrap().payload).unwrap();
    assert_eq!(first.operation, Some(Operation::Insert));
    assert_eq!(first.id, Some(RecordId(3)));
    assert_eq!(first.origin, Some(batch));

    let second: ChangeNotice =
        serde_json::from_str(&notifications.recv().await.unwrap().payload).unwrap();
    assert_eq!(second.operation, Some(Operation::Delete));
    assert_eq!(second.name.as_deref(), Some("Old"));
}

#[tokio::test]
async fn rollback_notifies_nothing() {
    let store = MemoryRelational::new();
    let mut notifications = store.listen("user_change").await.expect("listen");

    let mut tx = store.begin(None).await.expect("begin");
    tx.insert(&ann()).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(notifications.try_recv().is_err());
}

#[tokio::test]
async fn other_channels_are_not_notified() {
    let store = MemoryRelational::new();
    let mut other = store.listen("order_change").await.expect("listen");
    store.notify_raw("{}");
    assert!(other.try_recv().is_err());
}
