use rusqlite::Connection;
use seamark_core::db::open_db_in_memory;
use seamark_core::{
    classify, AtonNode, BulkSynchronizer, ChangeKind, FailurePolicy, HierarchyService, MessageTag,
    MessageTagType, NodeKey, SqliteRecordStore, SqliteTreeRepository, SyncConfig, SyncError,
    SyncReport, Transmitter, TreeError, TreeKind, TreeNode,
};

fn key(value: &str) -> NodeKey {
    NodeKey::parse(value).unwrap()
}

fn aton(uid: &str, lat: f64) -> AtonNode {
    AtonNode::new(uid, lat, 12.6).with_tag("seamark:type", "light_minor")
}

fn synchronizer(batch_size: usize, failure_policy: FailurePolicy) -> BulkSynchronizer {
    BulkSynchronizer::new(SyncConfig {
        batch_size,
        failure_policy,
    })
}

fn poison_records(conn: &Connection) {
    conn.execute_batch(
        "CREATE TRIGGER reject_poison BEFORE INSERT ON sync_records
         WHEN NEW.natural_key = 'poison'
         BEGIN SELECT RAISE(ABORT, 'poison'); END;",
    )
    .unwrap();
}

#[test]
fn new_identical_and_timestamp_only_records() {
    let conn = open_db_in_memory().unwrap();
    let mut store = SqliteRecordStore::<AtonNode>::try_new(&conn).unwrap();
    store.save(aton("aton-2", 55.1)).unwrap();
    store.save(aton("aton-3", 55.2)).unwrap();
    store.flush_pending().unwrap();

    let persisted_3 = store.get("aton-3").unwrap().unwrap();
    let mut candidate_3 = aton("aton-3", 55.2);
    candidate_3.meta.updated_at = persisted_3.meta.updated_at + 60_000;
    let candidates = vec![aton("aton-1", 55.0), aton("aton-2", 55.1), candidate_3];

    let kinds: Vec<ChangeKind> = candidates
        .iter()
        .map(|candidate| {
            let persisted = store.get(&candidate.aton_uid).unwrap();
            classify(candidate, persisted.as_ref())
        })
        .collect();
    assert_eq!(
        kinds,
        vec![ChangeKind::New, ChangeKind::Unchanged, ChangeKind::Unchanged]
    );

    let report = BulkSynchronizer::default()
        .synchronize(&mut store, candidates)
        .unwrap();
    assert_eq!(
        (report.created, report.updated, report.unchanged),
        (1, 0, 2)
    );
    assert_eq!(store.get("aton-3").unwrap().unwrap().meta.version, 0);
}

#[test]
fn second_identical_pass_reports_everything_unchanged() {
    let conn = open_db_in_memory().unwrap();
    let mut store = SqliteRecordStore::<AtonNode>::try_new(&conn).unwrap();
    store.save(aton("aton-1", 1.0)).unwrap();
    store.flush_pending().unwrap();

    let batch: Vec<AtonNode> = (0..7).map(|i| aton(&format!("aton-{i}"), 2.0)).collect();
    let sync = synchronizer(3, FailurePolicy::Abort);

    let first = sync.synchronize(&mut store, batch.clone()).unwrap();
    assert_eq!((first.created, first.updated), (6, 1));

    let second = sync.synchronize(&mut store, batch).unwrap();
    assert_eq!(
        second,
        SyncReport {
            created: 0,
            updated: 0,
            unchanged: 7,
            failed: 0,
            flushes: 3,
        }
    );
}

#[test]
fn changed_record_keeps_identity_and_bumps_version() {
    let conn = open_db_in_memory().unwrap();
    let mut store = SqliteRecordStore::<Transmitter>::try_new(&conn).unwrap();
    store
        .save(Transmitter::new("Skagen", true).covering(key("dk")))
        .unwrap();
    store.flush_pending().unwrap();
    let before = store.get("Skagen").unwrap().unwrap();

    let candidate = Transmitter::new("Skagen", true)
        .covering(key("dk"))
        .covering(key("se"));
    let report = BulkSynchronizer::default()
        .synchronize(&mut store, [candidate])
        .unwrap();

    let after = store.get("Skagen").unwrap().unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(after.areas.len(), 2);
    assert_eq!(after.meta.created_at, before.meta.created_at);
    assert_eq!(after.meta.version, before.meta.version + 1);
}

#[test]
fn absence_from_batch_is_not_deletion() {
    let conn = open_db_in_memory().unwrap();
    let mut store = SqliteRecordStore::<MessageTag>::try_new(&conn).unwrap();
    let sync = BulkSynchronizer::default();
    let tag = |id: &str| MessageTag::new(id, id.to_uppercase(), MessageTagType::Public);

    sync.synchronize(&mut store, [tag("nw"), tag("nm")]).unwrap();
    sync.synchronize(&mut store, [tag("nw")]).unwrap();

    assert_eq!(store.list_all().unwrap().len(), 2);
}

#[test]
fn abort_policy_keeps_earlier_chunks() {
    let conn = open_db_in_memory().unwrap();
    poison_records(&conn);
    let mut store = SqliteRecordStore::<AtonNode>::try_new(&conn).unwrap();
    let batch = vec![
        aton("a", 1.0),
        aton("b", 1.0),
        aton("c", 1.0),
        aton("poison", 1.0),
        aton("e", 1.0),
    ];

    let err = synchronizer(2, FailurePolicy::Abort)
        .synchronize(&mut store, batch)
        .unwrap_err();

    match &err {
        SyncError::StoreFailure {
            committed,
            processed,
            ..
        } => {
            assert_eq!(committed.created, 2);
            assert_eq!(*processed, 4);
        }
        other => panic!("unexpected error: {other}"),
    }
    let stored: Vec<String> = store
        .list_all()
        .unwrap()
        .into_iter()
        .map(|record| record.aton_uid)
        .collect();
    assert_eq!(stored, vec!["a", "b"]);
    assert_eq!(store.pending_len(), 0);
}

#[test]
fn skip_policy_drops_failed_chunk_and_continues() {
    let conn = open_db_in_memory().unwrap();
    poison_records(&conn);
    let mut store = SqliteRecordStore::<AtonNode>::try_new(&conn).unwrap();
    let batch = vec![
        aton("a", 1.0),
        aton("b", 1.0),
        aton("c", 1.0),
        aton("poison", 1.0),
        aton("e", 1.0),
    ];

    let report = synchronizer(2, FailurePolicy::SkipFailedChunk)
        .synchronize(&mut store, batch)
        .unwrap();

    assert_eq!((report.created, report.failed, report.flushes), (3, 2, 2));
    let stored: Vec<String> = store
        .list_all()
        .unwrap()
        .into_iter()
        .map(|record| record.aton_uid)
        .collect();
    assert_eq!(stored, vec!["a", "b", "e"]);
}

fn area_service(conn: &Connection) -> HierarchyService<SqliteTreeRepository<'_>> {
    HierarchyService::load(SqliteTreeRepository::try_new(conn, TreeKind::Area).unwrap()).unwrap()
}

fn area(json: &str) -> TreeNode {
    serde_json::from_str(json).unwrap()
}

#[test]
fn tree_nodes_sync_through_hierarchy_service() {
    let conn = open_db_in_memory().unwrap();
    let mut service = area_service(&conn);
    let batch = vec![
        area(r#"{"key":"dk","descs":{"en":{"name":"Denmark"}}}"#),
        area(r#"{"key":"kattegat","parent":"dk","sort_order":1.0}"#),
        area(r#"{"key":"anholt","parent":"kattegat"}"#),
        area(r#"{"key":"se","descs":{"en":{"name":"Sweden"}}}"#),
    ];

    let first = synchronizer(2, FailurePolicy::Abort)
        .synchronize(&mut service, batch.clone())
        .unwrap();
    assert_eq!(first.created, 4);
    assert_eq!(
        service.get(&key("anholt")).unwrap().lineage(),
        "/dk/kattegat/anholt/"
    );

    let second = BulkSynchronizer::default()
        .synchronize(&mut service, batch)
        .unwrap();
    assert_eq!((second.created, second.updated, second.unchanged), (0, 0, 4));

    let moved = vec![area(r#"{"key":"kattegat","parent":"se","sort_order":1.0}"#)];
    let third = BulkSynchronizer::default()
        .synchronize(&mut service, moved)
        .unwrap();
    assert_eq!(third.updated, 1);

    let reloaded = area_service(&conn);
    assert_eq!(
        reloaded.get(&key("anholt")).unwrap().lineage(),
        "/se/kattegat/anholt/"
    );
    assert!(reloaded.check_consistency().is_empty());
}

#[test]
fn tree_sync_applies_activation_cascade() {
    let conn = open_db_in_memory().unwrap();
    let mut service = area_service(&conn);
    let sync = BulkSynchronizer::default();
    sync.synchronize(
        &mut service,
        vec![
            area(r#"{"key":"dk"}"#),
            area(r#"{"key":"kattegat","parent":"dk"}"#),
        ],
    )
    .unwrap();

    let report = sync
        .synchronize(&mut service, vec![area(r#"{"key":"dk","active":false}"#)])
        .unwrap();

    assert_eq!(report.updated, 1);
    assert!(!service.get(&key("kattegat")).unwrap().active);
    assert!(!area_service(&conn).get(&key("kattegat")).unwrap().active);
}

#[test]
fn tree_candidate_without_flag_inherits_inactive_parent() {
    let conn = open_db_in_memory().unwrap();
    let mut service = area_service(&conn);
    let batch = vec![
        area(r#"{"key":"p","active":false}"#),
        area(r#"{"key":"c","parent":"p"}"#),
    ];
    let sync = BulkSynchronizer::default();

    let first = sync.synchronize(&mut service, batch.clone()).unwrap();
    assert_eq!((first.created, first.updated), (2, 0));
    assert!(!service.get(&key("p")).unwrap().active);
    assert!(!service.get(&key("c")).unwrap().active);

    let second = sync.synchronize(&mut service, batch).unwrap();
    assert_eq!((second.created, second.updated, second.unchanged), (0, 0, 2));

    let reloaded = area_service(&conn);
    assert!(!reloaded.get(&key("p")).unwrap().active);
    assert!(!reloaded.get(&key("c")).unwrap().active);
    assert!(reloaded.check_consistency().is_empty());
}

#[test]
fn tree_candidate_without_flag_under_active_parent_is_active() {
    let conn = open_db_in_memory().unwrap();
    let mut service = area_service(&conn);
    let batch = vec![
        area(r#"{"key":"dk"}"#),
        area(r#"{"key":"kattegat","parent":"dk"}"#),
    ];

    BulkSynchronizer::default()
        .synchronize(&mut service, batch)
        .unwrap();

    assert!(service.get(&key("dk")).unwrap().active);
    assert!(service.get(&key("kattegat")).unwrap().active);
}

#[test]
fn deactivating_move_leaves_new_ancestors_inactive() {
    let conn = open_db_in_memory().unwrap();
    let mut service = area_service(&conn);
    let sync = BulkSynchronizer::default();
    sync.synchronize(
        &mut service,
        vec![
            area(r#"{"key":"root","active":false}"#),
            area(r#"{"key":"p","parent":"root","active":false}"#),
            area(r#"{"key":"x","active":true}"#),
            area(r#"{"key":"y","parent":"x","active":true}"#),
        ],
    )
    .unwrap();

    let batch = vec![area(r#"{"key":"x","parent":"p","active":false}"#)];
    let report = sync.synchronize(&mut service, batch.clone()).unwrap();
    assert_eq!(report.updated, 1);

    let reloaded = area_service(&conn);
    for node in ["root", "p", "x", "y"] {
        assert!(!reloaded.get(&key(node)).unwrap().active, "{node} active");
    }
    assert_eq!(reloaded.get(&key("y")).unwrap().lineage(), "/root/p/x/y/");
    assert!(reloaded.check_consistency().is_empty());

    let again = sync.synchronize(&mut service, batch).unwrap();
    assert_eq!((again.updated, again.unchanged), (0, 1));
}

#[test]
fn activating_move_activates_new_ancestors() {
    let conn = open_db_in_memory().unwrap();
    let mut service = area_service(&conn);
    let sync = BulkSynchronizer::default();
    sync.synchronize(
        &mut service,
        vec![
            area(r#"{"key":"p","active":false}"#),
            area(r#"{"key":"x","active":false}"#),
        ],
    )
    .unwrap();

    sync.synchronize(
        &mut service,
        vec![area(r#"{"key":"x","parent":"p","active":true}"#)],
    )
    .unwrap();

    let reloaded = area_service(&conn);
    assert!(reloaded.get(&key("p")).unwrap().active);
    assert!(reloaded.get(&key("x")).unwrap().active);
    assert!(reloaded.check_consistency().is_empty());
}

#[test]
fn tree_candidate_with_unknown_parent_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let mut service = area_service(&conn);
    let batch = vec![
        area(r#"{"key":"dk"}"#),
        area(r#"{"key":"orphan","parent":"nowhere"}"#),
    ];

    let err = BulkSynchronizer::default()
        .synchronize(&mut service, batch)
        .unwrap_err();

    match err {
        SyncError::Rejected {
            index, key, source, ..
        } => {
            assert_eq!(index, 1);
            assert_eq!(key, "orphan");
            assert!(matches!(source, TreeError::ParentNotFound(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(service.get(&key("dk")).is_none());
}

#[test]
fn tree_candidate_without_key_stops_the_pass() {
    let conn = open_db_in_memory().unwrap();
    let mut service = area_service(&conn);

    let err = BulkSynchronizer::default()
        .synchronize(&mut service, vec![area(r#"{"parent":null}"#)])
        .unwrap_err();

    assert!(matches!(err, SyncError::MissingKey { index: 0, .. }));
}
