#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn write_bundle(path: &Path, manifest: &serde_json::Value, db_bytes: &[u8]) {
    let f = File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(f);
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("start manifest");
    zip.write_all(manifest.to_string().as_bytes())
        .expect("write manifest");
    zip.start_file("db/attendance.sqlite3", opts)
        .expect("start db entry");
    zip.write_all(db_bytes).expect("write db entry");
    zip.finish().expect("finish bundle");
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("attendance-backup-src");
    let workspace2 = temp_dir("attendance-backup-dst");
    let out_dir = temp_dir("attendance-backup-out");

    let bytes = b"sqlite-test-payload";
    std::fs::write(workspace.join("attendance.sqlite3"), bytes).expect("write source db");

    let bundle_path = out_dir.join("nested").join("workspace.backup.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256, backup::sha256_hex(bytes));

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(
        manifest.get("format").and_then(|v| v.as_str()),
        Some(backup::BUNDLE_FORMAT_V1)
    );
    assert_eq!(
        manifest.get("dbSha256").and_then(|v| v.as_str()),
        Some(export.db_sha256.as_str())
    );
    archive
        .by_name("db/attendance.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);

    let restored = std::fs::read(workspace2.join("attendance.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);
    assert!(!workspace2.join("attendance.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn export_without_database_fails() {
    let workspace = temp_dir("attendance-backup-empty");
    let out = workspace.join("never.zip");
    let e = backup::export_workspace_bundle(&workspace, &out).expect_err("missing db");
    assert!(e.to_string().contains("workspace database not found"));
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn checksum_mismatch_leaves_existing_database_untouched() {
    let out_dir = temp_dir("attendance-backup-tampered");
    let workspace = temp_dir("attendance-backup-tampered-dst");
    let original = b"current-database";
    std::fs::write(workspace.join("attendance.sqlite3"), original).expect("seed db");

    let bundle = out_dir.join("tampered.zip");
    write_bundle(
        &bundle,
        &serde_json::json!({
            "format": backup::BUNDLE_FORMAT_V1,
            "version": 1,
            "dbSha256": backup::sha256_hex(b"what the manifest promised")
        }),
        b"what the archive actually holds",
    );

    let e = backup::import_workspace_bundle(&bundle, &workspace).expect_err("checksum mismatch");
    assert!(e.to_string().contains("checksum mismatch"), "{}", e);
    let kept = std::fs::read(workspace.join("attendance.sqlite3")).expect("read db");
    assert_eq!(kept, original);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_bundle_format_is_rejected() {
    let out_dir = temp_dir("attendance-backup-foreign");
    let workspace = temp_dir("attendance-backup-foreign-dst");

    let bundle = out_dir.join("foreign.zip");
    write_bundle(
        &bundle,
        &serde_json::json!({ "format": "someone-elses-backup-v9" }),
        b"payload",
    );
    let e = backup::import_workspace_bundle(&bundle, &workspace).expect_err("foreign format");
    assert!(e.to_string().contains("unsupported bundle format"), "{}", e);
    assert!(!workspace.join("attendance.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn raw_sqlite_import_is_supported() {
    let out_dir = temp_dir("attendance-backup-raw");
    let workspace = temp_dir("attendance-backup-raw-dst");

    let raw_file = out_dir.join("copy.sqlite3");
    let bytes = b"raw-sqlite-copy";
    std::fs::write(&raw_file, bytes).expect("write raw sqlite file");

    let import = backup::import_workspace_bundle(&raw_file, &workspace).expect("import raw sqlite");
    assert_eq!(import.bundle_format_detected, "raw-sqlite3");

    let restored = std::fs::read(workspace.join("attendance.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
