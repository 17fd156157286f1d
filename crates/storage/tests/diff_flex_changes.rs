use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use kb_core::{
    AttributeName, AttributeValue, BranchId, Coordinate, ItemEvent, ObjectId, RevisionId, TypeName,
};
use kb_storage::{AttributeDescriptor, ColumnType, KnowledgeStore, TypeDescriptor};

fn temp_storage_dir(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic enough for tests")
        .as_nanos();
    path.push(format!(
        "kb-diff-flex-{label}-{}-{nanos}",
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

fn open_doc_store(label: &str) -> KnowledgeStore {
    let dir = temp_storage_dir(label);
    let mut store = KnowledgeStore::open(&dir).expect("fresh storage should open");
    store
        .register_type(
            TypeDescriptor::new(ty("doc"), false)
                .with_attribute(AttributeDescriptor::scalar(attr("title"), ColumnType::Varchar)),
        )
        .expect("doc type should register");
    store
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
fn setting_a_flex_value_yields_an_update() {
    let mut store = open_doc_store("set");
    let r1 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("doc"), oid("x1"), BTreeMap::new())
        .commit()
        .expect("create commit should succeed");
    let r2 = store
        .begin_commit(BranchId::TRUNK)
        .set_flex(
            ty("doc"),
            oid("x1"),
            attr("note"),
            Some(AttributeValue::Text("remember".to_string())),
        )
        .commit()
        .expect("flex commit should succeed");

    let events = collect_events(&store, Coordinate::trunk(r1), Coordinate::trunk(r2));
    assert_eq!(events.len(), 1);
    let ItemEvent::Update(change) = &events[0] else {
        panic!("expected an update, got {}", events[0].kind_name());
    };
    let delta = change.values.get(&attr("note")).expect("note delta");
    assert_eq!(delta.old, None);
    assert_eq!(
        delta.new,
        Some(AttributeValue::Text("remember".to_string()))
    );
}

#[test]
fn removing_a_flex_value_yields_an_update_with_null_new() {
    let mut store = open_doc_store("remove");
    let r1 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("doc"), oid("x1"), BTreeMap::new())
        .set_flex(
            ty("doc"),
            oid("x1"),
            attr("note"),
            Some(AttributeValue::Long(42)),
        )
        .commit()
        .expect("create commit should succeed");
    let r2 = store
        .begin_commit(BranchId::TRUNK)
        .set_flex(ty("doc"), oid("x1"), attr("note"), None)
        .commit()
        .expect("flex removal commit should succeed");

    let events = collect_events(&store, Coordinate::trunk(r1), Coordinate::trunk(r2));
    assert_eq!(events.len(), 1);
    let ItemEvent::Update(change) = &events[0] else {
        panic!("expected an update, got {}", events[0].kind_name());
    };
    let delta = change.values.get(&attr("note")).expect("note delta");
    assert_eq!(delta.old, Some(AttributeValue::Long(42)));
    assert_eq!(delta.new, None);
}

#[test]
fn creation_includes_initial_flex_values() {
    let mut store = open_doc_store("initial");
    let mut values = BTreeMap::new();
    values.insert(attr("title"), AttributeValue::Text("t".to_string()));
    let rev = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("doc"), oid("x1"), values)
        .set_flex(
            ty("doc"),
            oid("x1"),
            attr("weight"),
            Some(AttributeValue::Double(0.5)),
        )
        .commit()
        .expect("combined commit should succeed");

    let events = collect_events(
        &store,
        Coordinate::trunk(RevisionId::INITIAL),
        Coordinate::trunk(rev),
    );
    assert_eq!(events.len(), 1);
    let ItemEvent::Creation(change) = &events[0] else {
        panic!("expected a creation, got {}", events[0].kind_name());
    };
    assert_eq!(change.values.len(), 2);
    let weight = change.values.get(&attr("weight")).expect("weight delta");
    assert_eq!(weight.old, None);
    assert_eq!(weight.new, Some(AttributeValue::Double(0.5)));
}

#[test]
fn deletion_absorbs_flex_old_values() {
    let mut store = open_doc_store("absorb");
    let mut values = BTreeMap::new();
    values.insert(attr("title"), AttributeValue::Text("t".to_string()));
    let r1 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("doc"), oid("x1"), values)
        .set_flex(
            ty("doc"),
            oid("x1"),
            attr("payload"),
            Some(AttributeValue::Blob(vec![1, 2, 3])),
        )
        .commit()
        .expect("create commit should succeed");
    let r2 = store
        .begin_commit(BranchId::TRUNK)
        .delete(ty("doc"), oid("x1"))
        .commit()
        .expect("delete commit should succeed");

    let events = collect_events(&store, Coordinate::trunk(r1), Coordinate::trunk(r2));
    assert_eq!(events.len(), 1);
    let ItemEvent::Deletion(change) = &events[0] else {
        panic!("expected a deletion, got {}", events[0].kind_name());
    };
    let title = change.values.get(&attr("title")).expect("title delta");
    assert_eq!(title.old, Some(AttributeValue::Text("t".to_string())));
    let payload = change.values.get(&attr("payload")).expect("payload delta");
    assert_eq!(payload.old, Some(AttributeValue::Blob(vec![1, 2, 3])));
    assert_eq!(payload.new, None);
}

#[test]
fn rewriting_the_same_blob_produces_no_event() {
    let mut store = open_doc_store("blob-noop");
    let blob = vec![0u8; 2048];
    let r1 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("doc"), oid("x1"), BTreeMap::new())
        .set_flex(
            ty("doc"),
            oid("x1"),
            attr("payload"),
            Some(AttributeValue::Blob(blob.clone())),
        )
        .commit()
        .expect("create commit should succeed");
    let r2 = store
        .begin_commit(BranchId::TRUNK)
        .set_flex(
            ty("doc"),
            oid("x1"),
            attr("payload"),
            Some(AttributeValue::Blob(blob)),
        )
        .commit()
        .expect("rewrite commit should succeed");

    let events = collect_events(&store, Coordinate::trunk(r1), Coordinate::trunk(r2));
    assert!(
        events.is_empty(),
        "equal blob payloads must be consolidated away"
    );
}

#[test]
fn flex_change_merges_with_row_change_of_the_same_object() {
    let mut store = open_doc_store("merge");
    let mut values = BTreeMap::new();
    values.insert(attr("title"), AttributeValue::Text("v1".to_string()));
    let r1 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("doc"), oid("x1"), values)
        .commit()
        .expect("create commit should succeed");

    let mut changes = BTreeMap::new();
    changes.insert(attr("title"), Some(AttributeValue::Text("v2".to_string())));
    let r2 = store
        .begin_commit(BranchId::TRUNK)
        .update(ty("doc"), oid("x1"), changes)
        .set_flex(
            ty("doc"),
            oid("x1"),
            attr("note"),
            Some(AttributeValue::Long(5)),
        )
        .commit()
        .expect("combined commit should succeed");

    let events = collect_events(&store, Coordinate::trunk(r1), Coordinate::trunk(r2));
    assert_eq!(events.len(), 1, "row and flex change must merge");
    let ItemEvent::Update(change) = &events[0] else {
        panic!("expected an update, got {}", events[0].kind_name());
    };
    assert!(change.values.contains_key(&attr("title")));
    assert!(change.values.contains_key(&attr("note")));
}

#[test]
fn clob_flex_values_survive_the_roundtrip() {
    let mut store = open_doc_store("clob");
    let text = "a".repeat(4096);
    let r1 = store
        .begin_commit(BranchId::TRUNK)
        .create(ty("doc"), oid("x1"), BTreeMap::new())
        .commit()
        .expect("create commit should succeed");
    let r2 = store
        .begin_commit(BranchId::TRUNK)
        .set_flex(
            ty("doc"),
            oid("x1"),
            attr("body"),
            Some(AttributeValue::Clob(text.clone())),
        )
        .commit()
        .expect("flex commit should succeed");

    let events = collect_events(&store, Coordinate::trunk(r1), Coordinate::trunk(r2));
    assert_eq!(events.len(), 1);
    let delta = events[0].values().get(&attr("body")).expect("body delta");
    assert_eq!(delta.new, Some(AttributeValue::Clob(text)));
}
