//! Object lifecycle through a context
//!
//! Save/delete ordering with events and validation, stale instances,
//! renames, media and relationships resolved across types.

use flexdb_core::{Error, Identifier, Map, Record, Result, ValidationErrors, Value};
use flexdb_engine::{
    DirectoryConfig, FlexConfig, FlexContext, LegacyObject, ObjectEvent, RelationshipConfig, StorageKind,
    AFTER_DELETE, AFTER_SAVE, BEFORE_DELETE, BEFORE_SAVE, CONFIG_FILE_NAME, RENAMED,
};
use flexdb_storage::StreamLocator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn context(dir: &TempDir) -> FlexContext {
    FlexContext::new(StreamLocator::new().with_stream("user", dir.path()))
}

fn fields(pairs: &[(&str, Value)]) -> Map {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

// === Save / delete ===

#[test]
fn before_save_listeners_change_what_is_written() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let users = ctx.register("users", DirectoryConfig::new("user://users")).unwrap();

    ctx.events().subscribe(BEFORE_SAVE, |event: &mut ObjectEvent| {
        let name = event.data.get("name").and_then(Value::as_str).unwrap_or_default().to_lowercase();
        event.data.insert("slug", name);
        Ok(())
    });
    let saved = Arc::new(AtomicUsize::new(0));
    let counter = saved.clone();
    ctx.events().subscribe(AFTER_SAVE, move |_event: &mut ObjectEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let alice = users.update("alice", fields(&[("name", Value::from("Alice"))])).unwrap();
    assert_eq!(alice.get("slug").unwrap(), Some(&Value::from("alice")));
    let stored = users.storage().read("alice").unwrap();
    assert_eq!(stored.get("slug"), Some(&Value::from("alice")));
    assert_eq!(saved.load(Ordering::SeqCst), 1);
}

#[test]
fn validation_failure_writes_nothing() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let users = ctx.register("users", DirectoryConfig::new("user://users")).unwrap();
    users.update("alice", fields(&[("email", Value::from("a@example.com"))])).unwrap();
    users.set_blueprint(|record: Record| -> Result<Record> {
        match record.get("email").and_then(Value::as_str) {
            Some(email) if email.contains('@') => Ok(record),
            _ => Err(ValidationErrors::new().with("email", "must be an address").into()),
        }
    });
    let before = users.collection().cache_checksum().unwrap();

    let mut alice = users.object("alice").unwrap().unwrap();
    alice.set("email", "nope").unwrap();
    match alice.save() {
        Err(Error::Validation(errors)) => {
            assert_eq!(errors.for_field("email").count(), 1);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(alice.is_dirty());

    let stored = users.storage().read("alice").unwrap();
    assert_eq!(stored.get("email"), Some(&Value::from("a@example.com")));
    assert_eq!(users.collection().cache_checksum().unwrap(), before);

    let mut bob = users.create_object_with_key("bob", Record::new()).unwrap();
    assert!(bob.save().is_err());
    assert!(!users.storage().exists("bob"));
    assert!(!users.collection().contains("bob"));
}

#[test]
fn deleted_objects_are_stale() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let users = ctx.register("users", DirectoryConfig::new("user://users")).unwrap();
    users.update("carol", fields(&[("name", Value::from("Carol"))])).unwrap();

    let removed = users.remove("CAROL").unwrap().unwrap();
    assert!(removed.is_deleted());
    assert!(matches!(removed.get("name"), Err(Error::StaleObject(id)) if id == Identifier::new("users", "carol")));
    assert!(users.remove("carol").unwrap().is_none());
    assert!(!users.storage().exists("carol"));
    assert!(users.collection().is_empty());
}

#[test]
fn before_delete_listener_can_veto() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let users = ctx.register("users", DirectoryConfig::new("user://users")).unwrap();
    users.update("root", Map::new()).unwrap();
    ctx.events().subscribe(BEFORE_DELETE, |event: &mut ObjectEvent| {
        if event.identifier.id() == "root" {
            Err(Error::InvalidOperation("root cannot be deleted".into()))
        } else {
            Ok(())
        }
    });

    let mut root = users.object("root").unwrap().unwrap();
    assert!(root.delete().is_err());
    assert!(!root.is_deleted());
    assert!(users.storage().exists("root"));
    assert!(users.collection().contains("root"));
}

fn failing_listener(ctx: &FlexContext, event: &str) {
    ctx.events().subscribe(event, |_event: &mut ObjectEvent| {
        Err(Error::InvalidOperation("listener unavailable".into()))
    });
}

#[test]
fn failing_after_save_listener_keeps_the_committed_save() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let users = ctx.register("users", DirectoryConfig::new("user://users")).unwrap();
    failing_listener(&ctx, AFTER_SAVE);

    let mut anon = users.create_object(Record::new().with("name", "anon"));
    anon.save().unwrap();
    let key = anon.key().cloned().unwrap();
    assert!(!anon.is_dirty());
    assert!(anon.exists());

    anon.set("name", "still anon").unwrap();
    anon.save().unwrap();
    assert_eq!(anon.key(), Some(&key));
    assert_eq!(users.storage().list_keys().unwrap().count(), 1);
    assert_eq!(users.len(), 1);
    let stored = users.storage().read(key.as_str()).unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("still anon")));
}

#[test]
fn failing_after_delete_listener_still_leaves_the_object_stale() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let users = ctx.register("users", DirectoryConfig::new("user://users")).unwrap();
    users.update("carol", fields(&[("name", Value::from("Carol"))])).unwrap();
    failing_listener(&ctx, AFTER_DELETE);

    let mut carol = users.object("carol").unwrap().unwrap();
    carol.delete().unwrap();
    assert!(carol.is_deleted());
    assert!(matches!(carol.set("name", "Carol II"), Err(Error::StaleObject(_))));
    assert!(matches!(carol.save(), Err(Error::StaleObject(_))));
    assert!(!users.storage().exists("carol"));
    assert!(!users.collection().contains("carol"));
}

#[test]
fn failing_renamed_listener_keeps_the_new_key() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let users = ctx.register("users", DirectoryConfig::new("user://users")).unwrap();
    let mut dave = users.update("dave", Map::new()).unwrap();
    failing_listener(&ctx, RENAMED);

    dave.rename("david").unwrap();
    assert_eq!(dave.key().map(|k| k.as_str()), Some("david"));

    dave.set("nick", "d").unwrap();
    dave.save().unwrap();
    assert!(users.storage().exists("david"));
    assert!(!users.storage().exists("dave"));
    let keys: Vec<_> = users.collection().keys().into_iter().map(|k| k.into_string()).collect();
    assert_eq!(keys, vec!["david"]);
}

// === Rename ===

#[test]
fn rename_keeps_media_and_reports_conflicts() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let users = ctx.register("users", DirectoryConfig::new("user://users")).unwrap();
    let renamed = Arc::new(AtomicUsize::new(0));
    let counter = renamed.clone();
    ctx.events().subscribe(RENAMED, move |event: &mut ObjectEvent| {
        assert_eq!(event.attributes.get("from"), Some(&Value::from("dave")));
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let mut dave = users.update("dave", Map::new()).unwrap();
    users.update("erin", Map::new()).unwrap();
    dave.media().unwrap().add("avatar.png", b"png").unwrap();

    assert!(matches!(dave.rename("Erin"), Err(Error::Conflict { .. })));
    dave.rename("david").unwrap();
    assert_eq!(dave.id(), Identifier::new("users", "david"));
    assert_eq!(renamed.load(Ordering::SeqCst), 1);

    let files = dave.media().unwrap().files().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].identifier, Identifier::new("media", "users/david/avatar.png"));
    assert!(users.object("dave").unwrap().is_none());
}

#[test]
fn file_records_use_the_shared_media_root() {
    let dir = tempdir().unwrap();
    let ctx = context(&dir);
    let pages = ctx
        .register(
            "pages",
            DirectoryConfig::new("user://pages")
                .with_storage(StorageKind::File)
                .with_media_root("user://media/pages"),
        )
        .unwrap();
    let home = pages.update("home", Map::new()).unwrap();
    assert!(pages.storage().media_path("home").is_none());

    let media = home.media().unwrap();
    assert!(media.is_shared());
    assert_eq!(media.path(), dir.path().join("media").join("pages"));
}

// === Relationships ===

fn social(dir: &TempDir) -> FlexContext {
    let ctx = context(dir);
    ctx.register("groups", DirectoryConfig::new("user://groups")).unwrap();
    ctx.register(
        "users",
        DirectoryConfig::new("user://users")
            .with_relationship("groups", RelationshipConfig::new("groups"))
            .with_relationship("manager", RelationshipConfig::new("users").with_bounds(0, Some(1))),
    )
    .unwrap();
    ctx
}

#[test]
fn relationships_resolve_through_the_context() {
    let dir = tempdir().unwrap();
    let ctx = social(&dir);
    let groups = ctx.directory("groups").unwrap();
    let users = ctx.directory("users").unwrap();
    groups.update("admins", fields(&[("title", Value::from("Admins"))])).unwrap();
    groups.update("editors", fields(&[("title", Value::from("Editors"))])).unwrap();
    users.update("boss", Map::new()).unwrap();

    let mut alice = users.create_object_with_key("alice", Record::new()).unwrap();
    alice
        .set_relationship(
            "groups",
            &[
                Identifier::new("groups", "editors"),
                Identifier::new("groups", "gone"),
                Identifier::new("groups", "admins"),
            ],
        )
        .unwrap()
        .set_relationship("manager", &[Identifier::new("users", "boss")])
        .unwrap();
    alice.check_relationships().unwrap();
    alice.save().unwrap();

    let stored = users.storage().read("alice").unwrap();
    assert_eq!(stored.get("manager"), Some(&Value::from("users:boss")));

    let mut alice = ctx.object(&Identifier::new("users", "alice")).unwrap().unwrap();
    let member_of = alice.related_many("groups").unwrap();
    let keys: Vec<_> = member_of.keys().into_iter().map(|k| k.into_string()).collect();
    assert_eq!(keys, vec!["editors", "admins"]);

    let manager = alice.related("manager").unwrap().unwrap();
    assert_eq!(manager.id(), Identifier::new("users", "boss"));

    alice.set("manager", Value::Null).unwrap();
    assert!(alice.related("manager").unwrap().is_none());
}

#[test]
fn relationship_memo_survives_until_the_field_is_set() {
    let dir = tempdir().unwrap();
    let ctx = social(&dir);
    let groups = ctx.directory("groups").unwrap();
    let users = ctx.directory("users").unwrap();
    groups.update("admins", Map::new()).unwrap();

    let mut alice = users
        .update("alice", fields(&[("groups", Value::Array(vec![Value::from("admins")]))]))
        .unwrap();
    assert_eq!(alice.related_many("groups").unwrap().len(), 1);

    // Resolved once per instance until the field is set
    groups.update("staff", Map::new()).unwrap();
    let first = alice.related_many("groups").unwrap();
    assert_eq!(first.len(), 1);

    alice
        .set_relationship("groups", &[Identifier::new("groups", "admins"), Identifier::new("groups", "staff")])
        .unwrap();
    assert_eq!(alice.related_many("groups").unwrap().len(), 2);
}

#[test]
fn resolver_ignores_dropped_context() {
    let dir = tempdir().unwrap();
    let ctx = social(&dir);
    let users = ctx.directory("users").unwrap();
    let resolver = users.resolver();
    drop(ctx);

    assert!(matches!(
        resolver.resolve(&Identifier::new("groups", "admins")),
        Err(Error::UnknownType(_))
    ));
}

// === Config-driven context ===

#[test]
fn context_from_flex_toml() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        r#"
[streams]
user = "site/user"

[directories.pages]
storage = "file"
path = "user://pages"
format = "toml"
index_fields = ["published"]

[directories.accounts]
path = "user://accounts"
prefixed = true
relocate = { access = "security" }
access_field = "security.access"
"#,
    )
    .unwrap();

    let ctx = FlexContext::open(dir.path()).unwrap();
    assert_eq!(ctx.types(), vec!["accounts", "pages"]);

    let pages = ctx.directory("pages").unwrap();
    pages.update("home", fields(&[("published", Value::Bool(true))])).unwrap();
    pages.update("draft", fields(&[("published", Value::Bool(false))])).unwrap();
    assert!(dir.path().join("site/user/pages/home.toml").is_file());
    let published = pages
        .collection()
        .filter(&flexdb_engine::Predicate::field_eq("published", true))
        .unwrap();
    assert_eq!(published.len(), 1);

    let mut admin = Map::new();
    admin.insert("login".into(), Value::Bool(true));
    let accounts = ctx.directory("accounts").unwrap();
    let alice = accounts
        .update("alice", fields(&[("access", Value::Object(fields(&[("admin", Value::Object(admin))])))]))
        .unwrap();
    assert!(dir.path().join("site/user/accounts/al/alice/item.json").is_file());
    assert!(alice.get("access").unwrap().is_none());
    assert_eq!(alice.authorize("login", Some("admin")), Some(true));
    assert!(LegacyObject::new(alice).authorise("login", Some("admin")));

    ctx.flush_all().unwrap();
    let reopened = FlexContext::from_config(
        &FlexConfig::from_file(&dir.path().join(CONFIG_FILE_NAME)).unwrap(),
        dir.path(),
    )
    .unwrap();
    assert_eq!(reopened.collection("pages").unwrap().len(), 2);
}
