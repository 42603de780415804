use rusqlite::Connection;
use seamark_core::db::open_db_in_memory;
use seamark_core::{
    HierarchyService, NewNode, NodeKey, SqliteRecordStore, SqliteTreeRepository, SubtreeMatcher,
    Transmitter, TransmitterService, TransmitterServiceError, TreeKind, TreeSnapshot,
};

fn key(value: &str) -> NodeKey {
    NodeKey::parse(value).unwrap()
}

/// Areas `1 -> 1a -> 1b`, `12`, and `2`; four transmitters.
fn seed(conn: &Connection) -> TreeSnapshot {
    let repo = SqliteTreeRepository::try_new(conn, TreeKind::Area).unwrap();
    let mut areas = HierarchyService::load(repo).unwrap();
    areas.insert_node(NewNode::keyed(key("1"))).unwrap();
    areas
        .insert_node(NewNode::keyed(key("1a")).under(key("1")))
        .unwrap();
    areas
        .insert_node(NewNode::keyed(key("1b")).under(key("1a")))
        .unwrap();
    areas.insert_node(NewNode::keyed(key("12"))).unwrap();
    areas.insert_node(NewNode::keyed(key("2"))).unwrap();

    let mut store = SqliteRecordStore::<Transmitter>::try_new(conn).unwrap();
    for transmitter in [
        Transmitter::new("skagen", true).covering(key("1b")),
        Transmitter::new("Rønne", true).covering(key("12")),
        Transmitter::new("Baltic", false).covering(key("1a")),
        Transmitter::new("Anholt", true)
            .covering(key("2"))
            .covering(key("1")),
        Transmitter::new("Nowhere", true),
    ] {
        store.save(transmitter).unwrap();
    }
    store.flush_pending().unwrap();
    areas.snapshot()
}

fn names(transmitters: &[Transmitter]) -> Vec<&str> {
    transmitters
        .iter()
        .map(|transmitter| transmitter.name.as_str())
        .collect()
}

#[test]
fn selects_transmitters_inside_area_subtree() {
    let conn = open_db_in_memory().unwrap();
    let snapshot = seed(&conn);
    let service = TransmitterService::new(SqliteRecordStore::try_new(&conn).unwrap());

    let active = service.find_by_areas(&snapshot, &[key("1")], true).unwrap();
    assert_eq!(names(&active), vec!["Anholt", "skagen"]);

    let all = service.find_by_areas(&snapshot, &[key("1")], false).unwrap();
    assert_eq!(names(&all), vec!["Anholt", "Baltic", "skagen"]);
}

#[test]
fn sibling_with_shared_key_prefix_is_not_matched() {
    let conn = open_db_in_memory().unwrap();
    let snapshot = seed(&conn);
    let service = TransmitterService::new(SqliteRecordStore::try_new(&conn).unwrap());

    let selected = service.find_by_areas(&snapshot, &[key("1")], true).unwrap();
    assert!(!names(&selected).contains(&"Rønne"));
}

#[test]
fn empty_area_list_is_unrestricted() {
    let conn = open_db_in_memory().unwrap();
    let snapshot = seed(&conn);
    let service = TransmitterService::new(SqliteRecordStore::try_new(&conn).unwrap());

    let selected = service.find_by_areas(&snapshot, &[], true).unwrap();
    assert_eq!(
        names(&selected),
        vec!["Anholt", "Nowhere", "Rønne", "skagen"]
    );
}

#[test]
fn narrow_area_does_not_select_ancestor_coverage() {
    let conn = open_db_in_memory().unwrap();
    let snapshot = seed(&conn);
    let service = TransmitterService::new(SqliteRecordStore::try_new(&conn).unwrap());

    let selected = service.find_by_areas(&snapshot, &[key("1b")], true).unwrap();
    assert_eq!(names(&selected), vec!["skagen"]);
}

#[test]
fn promulgation_flags_every_active_transmitter() {
    let conn = open_db_in_memory().unwrap();
    let snapshot = seed(&conn);
    let service = TransmitterService::new(SqliteRecordStore::try_new(&conn).unwrap());

    let entries = service
        .promulgation_selection(&snapshot, &[key("12")])
        .unwrap();
    let flags: Vec<(&str, bool)> = entries
        .iter()
        .map(|entry| (entry.transmitter.name.as_str(), entry.selected))
        .collect();
    assert_eq!(
        flags,
        vec![
            ("Anholt", false),
            ("Nowhere", false),
            ("Rønne", true),
            ("skagen", false),
        ]
    );
}

#[test]
fn message_without_areas_selects_no_transmitter() {
    let conn = open_db_in_memory().unwrap();
    let snapshot = seed(&conn);
    let service = TransmitterService::new(SqliteRecordStore::try_new(&conn).unwrap());

    let entries = service.promulgation_selection(&snapshot, &[]).unwrap();

    assert_eq!(entries.len(), 4);
    assert!(entries.iter().all(|entry| !entry.selected));
}

#[test]
fn unknown_area_is_an_error() {
    let conn = open_db_in_memory().unwrap();
    let snapshot = seed(&conn);
    let service = TransmitterService::new(SqliteRecordStore::try_new(&conn).unwrap());

    let err = service
        .find_by_areas(&snapshot, &[key("atlantis")], true)
        .unwrap_err();
    assert!(matches!(err, TransmitterServiceError::AreaNotFound(_)));
}

#[test]
fn category_snapshot_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    seed(&conn);
    let categories =
        TreeSnapshot::load(&SqliteTreeRepository::try_new(&conn, TreeKind::Category).unwrap())
            .unwrap();
    let service = TransmitterService::new(SqliteRecordStore::try_new(&conn).unwrap());

    let err = service.find_by_areas(&categories, &[], true).unwrap_err();
    assert!(matches!(
        err,
        TransmitterServiceError::NotAreaTree(TreeKind::Category)
    ));
}

#[test]
fn matcher_selects_members_in_input_order() {
    let conn = open_db_in_memory().unwrap();
    let snapshot = seed(&conn);
    let members = vec![
        Transmitter::new("z", true).covering(key("1b")),
        Transmitter::new("a", true).covering(key("2")),
        Transmitter::new("m", true).covering(key("1a")),
    ];
    let region = snapshot.node(&key("1a")).unwrap();

    let selected = SubtreeMatcher::new(&snapshot).select(&members, &[region]);
    let selected: Vec<&str> = selected.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(selected, vec!["z", "m"]);
}
