use camino::Utf8PathBuf;
use serde_json::{Value, json};
use tempfile::TempDir;

use synbridge::store::Store;

fn temp_store(dir: &TempDir) -> Store {
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    Store::new_with_paths(root.join("work"), root.join("cache"))
}

#[test]
fn default_layout() {
    let store = Store::new().unwrap();
    assert!(store.work_root().ends_with(".synbridge"));
    assert!(store.cache_root().ends_with(".cache/synbridge"));
    assert!(store.drs_dir().starts_with(store.work_root()));
}

#[test]
fn json_written_atomically() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let path = store.work_root().join("reports").join("batch.json");

    Store::write_json_atomic(&path, &json!({ "outcomes": [] })).unwrap();

    let text = Store::read_text(&path).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value, json!({ "outcomes": [] }));
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn remove_dir_tolerates_missing_path() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(&dir);
    let run_dir = store.sra_run_dir(&"SRR1".parse().unwrap());

    Store::remove_dir(&run_dir).unwrap();
    Store::write_bytes_atomic(&run_dir.join("x.sra"), b"sra").unwrap();
    Store::remove_dir(&run_dir).unwrap();
    assert!(!run_dir.exists());
}
