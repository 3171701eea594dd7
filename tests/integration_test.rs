use coldvault::{Archive, BackupConfig, StdinConfirm};
use std::fs::{self, File};
use std::io::Write;
use tempfile::tempdir;

fn make_config(dir: &std::path::Path) -> BackupConfig {
    let src_dir = dir.join("src");
    fs::create_dir_all(&src_dir).unwrap();
    let key_path = dir.join("key");
    fs::write(&key_path, fernet::Fernet::generate_key()).unwrap();
    BackupConfig {
        table_dir: dir.join("table"),
        file_dir: dir.join("blobs"),
        key_path,
        restore_dir: dir.join("restore"),
        backup_roots: vec![src_dir],
        hard_remove: false,
    }
}

struct RejectAll;
impl coldvault::Confirm for RejectAll {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

#[test]
fn backup_restore_resurrection_round_trip() {
    let dir = tempdir().unwrap();
    let config = make_config(dir.path());
    let root = config.backup_roots[0].clone();
    let restore_dir = config.restore_dir.clone();

    File::create(root.join("notes.txt"))
        .unwrap()
        .write_all(b"hello\n")
        .unwrap();

    let mut archive = Archive::open(config).unwrap();
    archive.backup(true).unwrap();
    assert_eq!(archive.info().n_active, 1);

    // Deleting the source retires the entry to history.
    fs::remove_file(root.join("notes.txt")).unwrap();
    archive.backup(true).unwrap();
    assert_eq!(archive.info().n_active, 0);
    assert_eq!(archive.info().n_history, 1);

    // Recreating identical content resurrects the entry into active.
    File::create(root.join("notes.txt"))
        .unwrap()
        .write_all(b"hello\n")
        .unwrap();
    archive.backup(true).unwrap();
    assert_eq!(archive.info().n_active, 1);
    assert_eq!(archive.info().n_history, 0);

    archive.restore().unwrap();
    let restored = fs::read_to_string(
        restore_dir.join(root.join("notes.txt").to_string_lossy().trim_start_matches('/')),
    )
    .unwrap();
    assert_eq!(restored, "hello\n");
}

#[test]
fn backup_is_idempotent_on_unchanged_tree() {
    let dir = tempdir().unwrap();
    let config = make_config(dir.path());
    let root = config.backup_roots[0].clone();
    File::create(root.join("a.txt"))
        .unwrap()
        .write_all(b"stable content\n")
        .unwrap();

    let mut archive = Archive::open(config).unwrap();
    let first = archive.backup(true).unwrap();
    assert_eq!(first.n_new, 1);

    let second = archive.backup(true).unwrap();
    assert_eq!(second.n_new, 0);
    assert_eq!(second.n_removed, 0);
    assert_eq!(second.n_path_change, 0);
}

#[test]
fn cleanup_soft_declines_without_confirmation() {
    let dir = tempdir().unwrap();
    let config = make_config(dir.path());
    let root = config.backup_roots[0].clone();
    File::create(root.join("a.txt"))
        .unwrap()
        .write_all(b"x\n")
        .unwrap();
    let mut archive = Archive::open(config).unwrap();
    archive.backup(true).unwrap();
    fs::remove_file(root.join("a.txt")).unwrap();
    archive.backup(true).unwrap();

    let stats = archive.cleanup_soft(&RejectAll).unwrap();
    assert_eq!(stats.entries_pruned, 0);
    assert_eq!(archive.info().n_history, 1);
    let _ = StdinConfirm;
}
