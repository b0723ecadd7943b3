use chrono::{Duration, Utc};
use mooring_storage::{LocalStore, MemoryLocalStore, SqliteLocalStore, StorageError};
use mooring_types::{ActionKind, ActionPatch, PendingAction, Record, RecordId};
use pretty_assertions::assert_eq;
use serde_json::json;

fn record(id: &str, name: &str) -> Record {
    Record::from_value(json!({"id": id, "name": name})).unwrap()
}

fn stores() -> Vec<(&'static str, Box<dyn LocalStore>)> {
    vec![
        ("memory", Box::new(MemoryLocalStore::new())),
        ("sqlite", Box::new(SqliteLocalStore::open_in_memory().unwrap())),
    ]
}

// ── Cached records ───────────────────────────────────────────────

#[tokio::test]
async fn cache_get_missing_is_none() {
    for (name, store) in stores() {
        let got = store.get_cached("employees", &RecordId::new("nope")).await.unwrap();
        assert!(got.is_none(), "{name}");
        assert!(store.list_cached("employees").await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn cache_set_then_get() {
    for (name, store) in stores() {
        store.set_cached("employees", &record("1", "Ada"), None).await.unwrap();
        let got = store
            .get_cached("employees", &RecordId::new("1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.record, record("1", "Ada"), "{name}");
        assert_eq!(got.collection, "employees", "{name}");
        assert!(got.expires_at.is_none(), "{name}");
    }
}

#[tokio::test]
async fn cache_snapshot_is_superseded_not_merged() {
    for (name, store) in stores() {
        let first = Record::from_value(json!({"id": "1", "name": "Ada", "team": "core"})).unwrap();
        store.set_cached("employees", &first, None).await.unwrap();
        store.set_cached("employees", &record("1", "Grace"), None).await.unwrap();

        let got = store
            .get_cached("employees", &RecordId::new("1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.record, record("1", "Grace"), "{name}");
        assert_eq!(store.list_cached("employees").await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn cache_list_keeps_first_write_order_and_isolates_collections() {
    for (name, store) in stores() {
        store.set_cached("employees", &record("b", "B"), None).await.unwrap();
        store.set_cached("employees", &record("a", "A"), None).await.unwrap();
        store.set_cached("employees", &record("b", "B2"), None).await.unwrap();
        store.set_cached("teams", &record("t", "T"), None).await.unwrap();

        let ids: Vec<String> = store
            .list_cached("employees")
            .await
            .unwrap()
            .iter()
            .map(|c| c.id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()], "{name}");
    }
}

#[tokio::test]
async fn cache_requires_record_id() {
    for (name, store) in stores() {
        let no_id = Record::from_value(json!({"name": "anon"})).unwrap();
        let err = store.set_cached("employees", &no_id, None).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingRecordId { .. }), "{name}");
    }
}

#[tokio::test]
async fn cache_delete_is_idempotent() {
    for (name, store) in stores() {
        store.set_cached("employees", &record("1", "Ada"), None).await.unwrap();
        store.delete_cached("employees", &RecordId::new("1")).await.unwrap();
        store.delete_cached("employees", &RecordId::new("1")).await.unwrap();
        assert!(store.list_cached("employees").await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn purge_expired_only_keeps_fresh_entries() {
    for (name, store) in stores() {
        let past = Utc::now() - Duration::seconds(5);
        let future = Utc::now() + Duration::hours(1);
        store.set_cached("employees", &record("old", "x"), Some(past)).await.unwrap();
        store.set_cached("employees", &record("new", "y"), Some(future)).await.unwrap();
        store.set_cached("employees", &record("forever", "z"), None).await.unwrap();

        let removed = store.purge_cached(Some("employees"), true).await.unwrap();
        assert_eq!(removed, 1, "{name}");
        assert_eq!(store.list_cached("employees").await.unwrap().len(), 2, "{name}");

        let removed = store.purge_cached(None, false).await.unwrap();
        assert_eq!(removed, 2, "{name}");
    }
}

// ── Pending actions ──────────────────────────────────────────────

#[tokio::test]
async fn append_assigns_increasing_seq() {
    for (name, store) in stores() {
        let a = store
            .append_pending_action(PendingAction::new(ActionKind::Create, "c", record("1", "a")))
            .await
            .unwrap();
        let b = store
            .append_pending_action(PendingAction::new(ActionKind::Update, "c", record("1", "b")))
            .await
            .unwrap();
        assert!(b.seq > a.seq, "{name}");
    }
}

#[tokio::test]
async fn list_orders_by_enqueue_time_then_seq() {
    for (name, store) in stores() {
        let now = Utc::now();
        let mut late = PendingAction::new(ActionKind::Delete, "c", record("1", "x"));
        late.enqueued_at = now;
        let mut early = PendingAction::new(ActionKind::Create, "c", record("1", "x"));
        early.enqueued_at = now - Duration::seconds(1);
        let mut tie = PendingAction::new(ActionKind::Update, "c", record("1", "x"));
        tie.enqueued_at = now;

        store.append_pending_action(late.clone()).await.unwrap();
        store.append_pending_action(early.clone()).await.unwrap();
        store.append_pending_action(tie.clone()).await.unwrap();

        let ids: Vec<_> = store
            .list_pending_actions(false)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![early.id, late.id, tie.id], "{name}");
    }
}

#[tokio::test]
async fn update_moves_action_between_synced_lists() {
    for (name, store) in stores() {
        let action = store
            .append_pending_action(PendingAction::new(ActionKind::Create, "c", record("1", "a")))
            .await
            .unwrap();

        let updated = store
            .update_pending_action(&action.id, &ActionPatch::default().retry_count(2).last_error("503"))
            .await
            .unwrap();
        assert_eq!(updated.retry_count, 2, "{name}");
        assert_eq!(updated.last_error.as_deref(), Some("503"), "{name}");

        store
            .update_pending_action(&action.id, &ActionPatch::synced())
            .await
            .unwrap();
        assert!(store.list_pending_actions(false).await.unwrap().is_empty(), "{name}");
        let synced = store.list_pending_actions(true).await.unwrap();
        assert_eq!(synced.len(), 1, "{name}");
        assert_eq!(synced[0].retry_count, 2, "{name}");
    }
}

#[tokio::test]
async fn update_unknown_action_is_not_found() {
    for (name, store) in stores() {
        let missing = PendingAction::new(ActionKind::Delete, "c", record("1", "a"));
        let err = store
            .update_pending_action(&missing.id, &ActionPatch::synced())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)), "{name}");
    }
}

#[tokio::test]
async fn delete_synced_keeps_dead_letters_and_pending() {
    for (name, store) in stores() {
        let delivered = store
            .append_pending_action(PendingAction::new(ActionKind::Create, "c", record("1", "a")))
            .await
            .unwrap();
        let dead = store
            .append_pending_action(PendingAction::new(ActionKind::Create, "c", record("2", "b")))
            .await
            .unwrap();
        let pending = store
            .append_pending_action(PendingAction::new(ActionKind::Create, "c", record("3", "c")))
            .await
            .unwrap();

        store.update_pending_action(&delivered.id, &ActionPatch::synced()).await.unwrap();
        store
            .update_pending_action(&dead.id, &ActionPatch::default().abandoned())
            .await
            .unwrap();

        assert_eq!(store.delete_synced_actions().await.unwrap(), 1, "{name}");
        assert!(store.get_pending_action(&delivered.id).await.unwrap().is_none(), "{name}");
        assert!(store.get_pending_action(&dead.id).await.unwrap().is_some(), "{name}");
        assert!(store.get_pending_action(&pending.id).await.unwrap().is_some(), "{name}");
    }
}

// ── Backend specifics ────────────────────────────────────────────

#[tokio::test]
async fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("mooring.db");

    let action = {
        let store = SqliteLocalStore::open(&path).unwrap();
        store.set_cached("employees", &record("1", "Ada"), None).await.unwrap();
        store
            .append_pending_action(PendingAction::new(ActionKind::Update, "employees", record("1", "Ada")))
            .await
            .unwrap()
    };

    let reopened = SqliteLocalStore::open(&path).unwrap();
    let cached = reopened
        .get_cached("employees", &RecordId::new("1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.record, record("1", "Ada"));

    let pending = reopened.list_pending_actions(false).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, action.id);
    assert_eq!(pending[0].kind, ActionKind::Update);
    assert_eq!(pending[0].payload, record("1", "Ada"));
    assert_eq!(
        pending[0].enqueued_at.timestamp_micros(),
        action.enqueued_at.timestamp_micros()
    );
}

#[tokio::test]
async fn memory_store_write_failures_propagate() {
    let store = MemoryLocalStore::new();
    store.set_fail_writes(true);

    let err = store
        .append_pending_action(PendingAction::new(ActionKind::Create, "c", record("1", "a")))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));

    // Reads still succeed.
    assert!(store.list_pending_actions(false).await.unwrap().is_empty());

    store.set_fail_writes(false);
    assert!(store.set_cached("c", &record("1", "a"), None).await.is_ok());
}

#[tokio::test]
async fn memory_store_clones_share_state() {
    let store = MemoryLocalStore::new();
    let clone = store.clone();
    store.set_cached("c", &record("1", "a"), None).await.unwrap();
    assert!(clone.get_cached("c", &RecordId::new("1")).await.unwrap().is_some());
}
