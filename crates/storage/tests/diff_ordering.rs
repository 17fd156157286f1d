use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use kb_core::{
    AttributeName, AttributeValue, BranchId, Coordinate, ItemEvent, ObjectId, RevisionId, TypeName,
};
use kb_storage::{
    AttributeDescriptor, ColumnType, KnowledgeStore, StoreError, TypeDescriptor,
};

fn temp_storage_dir(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic enough for tests")
        .as_nanos();
    path.push(format!(
        "kb-diff-order-{label}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&path).expect("temp storage dir must be creatable");
    path
}

fn ty(name: &str) -> TypeName {
    TypeName::try_new(name).expect("type name should be valid")
}

fn attr(name: &str) -> AttributeName {
    AttributeName::try_new(name).expect("attribute name should be valid")
}

fn oid(name: &str) -> ObjectId {
    ObjectId::try_new(name).expect("object id should be valid")
}

fn labelled_type(name: &str) -> TypeDescriptor {
    TypeDescriptor::new(ty(name), false)
        .with_attribute(AttributeDescriptor::scalar(attr("label"), ColumnType::Varchar))
}

fn text(value: &str) -> BTreeMap<AttributeName, AttributeValue> {
    let mut values = BTreeMap::new();
    values.insert(attr("label"), AttributeValue::Text(value.to_string()));
    values
}

fn collect_events(store: &KnowledgeStore, source: Coordinate, dest: Coordinate) -> Vec<ItemEvent> {
    let mut reader = store
        .diff_reader(source, dest)
        .expect("diff reader should open");
    let mut events = Vec::new();
    while let Some(event) = reader.next().expect("diff stream should not fail") {
        events.push(event);
    }
    events
}

#[test]
fn events_are_grouped_by_type_and_ordered_by_identifier() {
    let dir = temp_storage_dir("grouping");
    let mut store = KnowledgeStore::open(&dir).expect("fresh storage should open");
    store
        .register_type(labelled_type("alpha"))
        .expect("alpha type should register");
    store
        .register_type(labelled_type("beta"))
        .expect("beta type should register");

    // Insertion order deliberately scrambled.
    let rev = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("beta"), oid("b1"), text("b1"))
        .create(ty("alpha"), oid("a2"), text("a2"))
        .create(ty("alpha"), oid("a10"), text("a10"))
        .commit()
        .expect("commit should succeed");

    let events = collect_events(
        &store,
        Coordinate::trunk(RevisionId::INITIAL),
        Coordinate::trunk(rev),
    );
    let keys: Vec<(String, String)> = events
        .iter()
        .map(|event| {
            let object = event.object();
            (
                object.type_name.as_str().to_string(),
                object.id.as_str().to_string(),
            )
        })
        .collect();
    // Identifier order is byte-wise, so "a10" sorts before "a2".
    assert_eq!(
        keys,
        vec![
            ("alpha".to_string(), "a10".to_string()),
            ("alpha".to_string(), "a2".to_string()),
            ("beta".to_string(), "b1".to_string()),
        ]
    );
}

#[test]
fn event_kinds_interleave_in_identifier_order() {
    let dir = temp_storage_dir("interleave");
    let mut store = KnowledgeStore::open(&dir).expect("fresh storage should open");
    store
        .register_type(labelled_type("item"))
        .expect("item type should register");

    let r1 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("item"), oid("m1"), text("one"))
        .create(ty("item"), oid("m2"), text("two"))
        .commit()
        .expect("seed commit should succeed");

    let mut changed = BTreeMap::new();
    changed.insert(attr("label"), Some(AttributeValue::Text("two-b".to_string())));
    let r2 = store
        .begin_commit(BranchId::TRUNK)
        .delete(ty("item"), oid("m1"))
        .update(ty("item"), oid("m2"), changed)
        .create(ty("item"), oid("m3"), text("three"))
        .commit()
        .expect("mixed commit should succeed");

    let events = collect_events(&store, Coordinate::trunk(r1), Coordinate::trunk(r2));
    let kinds: Vec<(&str, String)> = events
        .iter()
        .map(|event| (event.kind_name(), event.object().id.as_str().to_string()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("deletion", "m1".to_string()),
            ("update", "m2".to_string()),
            ("creation", "m3".to_string()),
        ]
    );
}

#[test]
fn equal_coordinates_produce_an_empty_stream() {
    let dir = temp_storage_dir("identity");
    let mut store = KnowledgeStore::open(&dir).expect("fresh storage should open");
    store
        .register_type(labelled_type("item"))
        .expect("item type should register");
    let rev = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("item"), oid("m1"), text("one"))
        .commit()
        .expect("commit should succeed");

    let events = collect_events(&store, Coordinate::trunk(rev), Coordinate::trunk(rev));
    assert!(events.is_empty());
}

#[test]
fn untouched_types_are_not_visited() {
    let dir = temp_storage_dir("untouched");
    let mut store = KnowledgeStore::open(&dir).expect("fresh storage should open");
    store
        .register_type(labelled_type("hot"))
        .expect("hot type should register");
    store
        .register_type(labelled_type("cold"))
        .expect("cold type should register");

    let r1 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("cold"), oid("c1"), text("cold"))
        .commit()
        .expect("seed commit should succeed");
    let r2 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("hot"), oid("h1"), text("hot"))
        .commit()
        .expect("second commit should succeed");

    let events = collect_events(&store, Coordinate::trunk(r1), Coordinate::trunk(r2));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].object().type_name.as_str(), "hot");
}

#[test]
fn branch_less_types_reject_off_trunk_coordinates() {
    let dir = temp_storage_dir("branch-reject");
    let mut store = KnowledgeStore::open(&dir).expect("fresh storage should open");
    store
        .register_type(labelled_type("item"))
        .expect("item type should register");
    let rev = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("item"), oid("m1"), text("one"))
        .commit()
        .expect("commit should succeed");

    let branch = BranchId::try_new(1).expect("branch id should be valid");
    let err = store
        .diff_reader(Coordinate::new(branch, rev), Coordinate::trunk(rev))
        .expect_err("off-trunk coordinate must be rejected");
    assert!(matches!(
        err,
        StoreError::BranchesNotSupported { type_name } if type_name == "item"
    ));
}

#[test]
fn close_is_idempotent_and_ends_the_stream() {
    let dir = temp_storage_dir("close");
    let mut store = KnowledgeStore::open(&dir).expect("fresh storage should open");
    store
        .register_type(labelled_type("item"))
        .expect("item type should register");
    let rev = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("item"), oid("m1"), text("one"))
        .commit()
        .expect("commit should succeed");

    let mut reader = store
        .diff_reader(Coordinate::trunk(RevisionId::INITIAL), Coordinate::trunk(rev))
        .expect("diff reader should open");
    reader.close();
    reader.close();
    assert!(
        reader.next().expect("closed reader must not fail").is_none(),
        "a closed reader yields no further events"
    );
}

#[test]
fn commits_are_blocked_while_a_reader_is_open_by_construction() {
    // diff_reader borrows the store shared; begin_commit needs it mutably.
    // The borrow checker enforces the exclusion, so all this test can do is
    // document the sequencing that compiles.
    let dir = temp_storage_dir("exclusion");
    let mut store = KnowledgeStore::open(&dir).expect("fresh storage should open");
    store
        .register_type(labelled_type("item"))
        .expect("item type should register");
    let r1 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("item"), oid("m1"), text("one"))
        .commit()
        .expect("commit should succeed");

    let events = collect_events(
        &store,
        Coordinate::trunk(RevisionId::INITIAL),
        Coordinate::trunk(r1),
    );
    assert_eq!(events.len(), 1);

    let r2 = store
        .begin_commit(BranchId::TRUNK)
        .delete(ty("item"), oid("m1"))
        .commit()
        .expect("commit after reading should succeed");
    assert!(r2 > r1);
}
