use std::fs;

use formfill_engine::{ensure_state_dir, AtomicFileWriter, PersistError};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn missing_store_root_is_not_created() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("store");

    let err = ensure_state_dir(&missing).unwrap_err();

    assert!(matches!(err, PersistError::StateDir(_)));
    assert!(!missing.exists());
}

#[test]
fn a_file_is_not_a_store_root() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("notes.txt");
    fs::write(&file, "x").unwrap();

    assert!(matches!(
        ensure_state_dir(&file),
        Err(PersistError::StateDir(_))
    ));
}

#[test]
fn atomic_write_replaces_the_previous_content() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    let first = writer.write(".formfill_state.ron", "(jobs: [])").unwrap();
    let second = writer.write(".formfill_state.ron", "(jobs: [1])").unwrap();

    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "(jobs: [1])");
    let leftovers = fs::read_dir(temp.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[test]
fn reading_a_missing_file_is_none() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().to_path_buf());

    assert_eq!(writer.read("absent.ron").unwrap(), None);
    writer.write("present.ron", "()").unwrap();
    assert_eq!(writer.read("present.ron").unwrap().as_deref(), Some("()"));
}

#[test]
fn nothing_is_written_into_a_missing_directory() {
    let temp = TempDir::new().unwrap();
    let writer = AtomicFileWriter::new(temp.path().join("gone"));

    assert!(writer.write("state.ron", "()").is_err());
    assert!(!temp.path().join("gone").exists());
}
