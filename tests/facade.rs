//! Facade smoke test: the whole stack through `flexdb::*` alone

use flexdb::{
    Direction, DirectoryConfig, FlexConfig, FlexContext, Formatter, Map, StorageKind, Value, CONFIG_FILE_NAME,
};
use tempfile::tempdir;

#[test]
fn config_round_trip_through_the_facade() {
    let dir = tempdir().unwrap();
    let config = FlexConfig::default()
        .with_stream("user", "data")
        .with_directory(
            "notes",
            DirectoryConfig::new("user://notes")
                .with_storage(StorageKind::File)
                .with_format(Formatter::Toml)
                .with_index_fields(["rank"]),
        );
    config.write_to_file(&dir.path().join(CONFIG_FILE_NAME)).unwrap();

    let ctx = FlexContext::open(dir.path()).unwrap();
    let notes = ctx.directory("notes").unwrap();
    for (key, rank) in [("b", 2), ("a", 3), ("c", 1)] {
        let mut data = Map::new();
        data.insert("rank".into(), Value::from(rank));
        notes.update(key, data).unwrap();
    }
    assert!(dir.path().join("data/notes/a.toml").is_file());

    let ranked = notes.collection().order_by("rank", Direction::Desc).unwrap();
    let keys: Vec<_> = ranked.keys().into_iter().map(|k| k.into_string()).collect();
    assert_eq!(keys, vec!["a", "b", "c"]);

    let on_disk: serde_json::Value =
        serde_json::to_value(FlexConfig::from_file(&dir.path().join(CONFIG_FILE_NAME)).unwrap()).unwrap();
    assert_eq!(on_disk["directories"]["notes"]["path"], "user://notes");
}
