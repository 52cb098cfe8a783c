mod common;

use std::collections::HashMap;

use common::{story, trashable, Story, TrashableStory};
use revdb::{Error, HistoryQueryable, Revisable, SaveMode, Store, Trashable};

/// Writes a mixed history: several bundles, branches, in-place edits, reverts
/// and trash toggles.
fn write_history(store: &mut Store) {
    for i in 0..5 {
        let mut s = story(&format!("story {i}"), "body");
        let first = s.save(store, SaveMode::NewRevision).unwrap();
        for j in 0..i {
            s.title = format!("story {i} rev {j}");
            s.revise(store).unwrap();
        }
        s.body = "fixed in place".into();
        s.save(store, SaveMode::InPlace).unwrap();
        if i % 2 == 0 {
            s.revert_to(store, revdb::RevisionRef::Id(first)).unwrap();
        }
    }

    for i in 0..4 {
        let mut t = trashable(&format!("trashable {i}"));
        t.save(store, SaveMode::NewRevision).unwrap();
        t.revise(store).unwrap();
        if i % 2 == 1 {
            t.trash(store).unwrap();
            t.revise(store).unwrap();
        }
    }
}

#[test]
fn invariants_hold_on_disk() {
    let (_dir, path) = common::create_temp_db_file("invariants.db");
    let mut store = common::file_store(&path);
    write_history(&mut store);
    drop(store);

    let conn = common::open_read_only(&path);

    for table in ["story", "trashable_story"] {
        // Every revision row has a bundle id.
        let missing: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE bundle_id IS NULL OR length(bundle_id) <> 32"),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(missing, 0, "{table}: revisions without a bundle id");

        // No bundle is partially trashed.
        let split: i64 = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM (SELECT bundle_id FROM {table}
                     GROUP BY bundle_id HAVING COUNT(DISTINCT is_trash) > 1)"
                ),
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(split, 0, "{table}: partially trashed bundles");
    }

    // The latest projection is exactly the per-bundle maximum.
    let store = common::file_store(&path);
    let mut max_by_bundle: HashMap<String, i64> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT bundle_id, MAX(revision_id) FROM story GROUP BY bundle_id")
        .unwrap();
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
        .unwrap();
    for row in rows {
        let (bundle, max) = row.unwrap();
        max_by_bundle.insert(bundle, max);
    }

    let latest = store.manager::<Story>().unwrap().latest_only().fetch().unwrap();
    assert_eq!(latest.len(), max_by_bundle.len());
    assert_eq!(latest.len(), 5);
    for s in &latest {
        let bundle = s.bundle_id().unwrap().as_str().to_string();
        assert_eq!(Some(s.revision_id().unwrap().as_raw()), max_by_bundle.get(&bundle).copied());
        assert!(s.check_if_latest(&store).unwrap());
    }

    let trashables = store.manager::<TrashableStory>().unwrap();
    assert_eq!(trashables.live().count().unwrap(), 2);
    assert_eq!(trashables.trash().count().unwrap(), 2);
}

#[test]
fn reopened_store_sees_the_same_history() {
    let (_dir, path) = common::create_temp_db_file("reopen.db");

    let bundle = {
        let mut store = common::file_store(&path);
        let mut s = story("before restart", "body");
        s.save(&mut store, SaveMode::NewRevision).unwrap();
        s.title = "still before restart".into();
        s.revise(&mut store).unwrap();
        s.bundle_id().cloned().unwrap()
    };

    let mut store = common::file_store(&path);
    let stories = store.manager::<Story>().unwrap();
    let mut latest = stories.latest_of(&bundle).unwrap();
    assert_eq!(latest.title, "still before restart");
    assert_eq!(latest.revisions(&store).unwrap().len(), 2);

    // Comparators keep increasing across restarts.
    let before = latest.revision_id().unwrap();
    latest.title = "after restart".into();
    let after = latest.revise(&mut store).unwrap();
    assert!(after > before);
}

#[test]
fn deleted_comparators_are_never_reused() {
    let (_dir, path) = common::create_temp_db_file("reuse.db");
    let mut store = common::file_store(&path);

    let mut s = story("a", "body");
    s.save(&mut store, SaveMode::NewRevision).unwrap();
    let r2 = s.revise(&mut store).unwrap();
    s.delete_revision(&mut store).unwrap();

    let mut latest = s.latest_revision(&store).unwrap();
    let r3 = latest.revise(&mut store).unwrap();
    assert!(r3 > r2);
}

#[test]
fn unregistered_type_is_a_configuration_error() {
    let (_dir, path) = common::create_temp_db_file("unregistered.db");
    let mut store = Store::open(&path).unwrap();

    assert!(matches!(
        store.manager::<Story>(),
        Err(Error::Configuration { .. })
    ));
    assert!(matches!(
        story("a", "body").save(&mut store, SaveMode::NewRevision),
        Err(Error::Configuration { .. })
    ));
}
