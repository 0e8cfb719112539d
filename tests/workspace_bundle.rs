#[path = "../src/backup.rs"]
mod backup;
mod test_support;

use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[test]
fn export_bundle_contains_manifest_and_checksummed_db() {
    let workspace = temp_dir("bundle-export");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "doc",
        "documents.create",
        json!({ "grade": 6, "volume": 1, "totalPages": 10 }),
    );

    let out_path = workspace.join("export.zip");
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "exp",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": out_path.to_string_lossy() }),
    );
    assert_eq!(
        result["bundleFormat"].as_str(),
        Some(backup::BUNDLE_FORMAT_V1)
    );
    assert_eq!(result["entryCount"].as_u64(), Some(3));
    let reported_sha = result["dbSha256"].as_str().expect("dbSha256").to_string();

    let file = std::fs::File::open(&out_path).expect("open exported bundle");
    let mut archive = zip::ZipArchive::new(file).expect("read zip");

    let mut manifest_text = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest_text)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text).expect("manifest json");
    assert_eq!(
        manifest["format"].as_str(),
        Some(backup::BUNDLE_FORMAT_V1)
    );
    assert_eq!(manifest["dbSha256"].as_str(), Some(reported_sha.as_str()));

    let mut db_bytes = Vec::new();
    archive
        .by_name("db/curriculum.sqlite3")
        .expect("db entry")
        .read_to_end(&mut db_bytes)
        .expect("read db entry");
    assert_eq!(hex_sha256(&db_bytes), reported_sha);

    let _ = child.kill();
}

#[test]
fn export_import_round_trip_preserves_documents_and_lessons() {
    let source = temp_dir("bundle-source");
    let restored = temp_dir("bundle-restored");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let doc = request_ok(
        &mut stdin,
        &mut reader,
        "doc",
        "documents.create",
        json!({ "grade": 8, "volume": 2, "totalPages": 50 }),
    );
    let document_id = doc["documentId"].as_str().expect("documentId").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "pages",
        "documents.importPages",
        json!({
            "documentId": document_id,
            "pages": [
                { "pageNumber": 5, "textPreview": "LESSON 1 Understand Rigid Transformations SESSION 1", "lessonIndicators": [] }
            ]
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "extract",
        "lessons.extract",
        json!({ "documentId": document_id }),
    );

    let out_path = source.join("bundle.zip");
    request_ok(
        &mut stdin,
        &mut reader,
        "exp",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": out_path.to_string_lossy() }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "imp",
        "backup.importWorkspaceBundle",
        json!({
            "inPath": out_path.to_string_lossy(),
            "workspacePath": restored.to_string_lossy()
        }),
    );
    assert_eq!(
        result["bundleFormatDetected"].as_str(),
        Some(backup::BUNDLE_FORMAT_V1)
    );

    // The import switched the live workspace to the restored copy.
    let listed = request_ok(&mut stdin, &mut reader, "list", "documents.list", json!({}));
    let docs = listed["documents"].as_array().expect("documents array");
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["documentId"].as_str(), Some(document_id.as_str()));

    let lessons = request_ok(
        &mut stdin,
        &mut reader,
        "lessons",
        "lessons.list",
        json!({ "documentId": document_id }),
    );
    let rows = lessons["lessons"].as_array().expect("lessons array");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0]["title"].as_str(),
        Some("Understand Rigid Transformations")
    );

    let _ = child.kill();
}

#[test]
fn legacy_bare_sqlite_file_is_accepted() {
    let source = temp_dir("bundle-legacy-src");
    let restored = temp_dir("bundle-legacy-dst");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "doc",
        "documents.create",
        json!({ "grade": 7, "volume": 1, "totalPages": 10 }),
    );

    // Older backups were a straight copy of the database file.
    let legacy = source.join("old-backup.sqlite3");
    std::fs::copy(source.join("curriculum.sqlite3"), &legacy).expect("copy legacy backup");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "imp",
        "backup.importWorkspaceBundle",
        json!({
            "inPath": legacy.to_string_lossy(),
            "workspacePath": restored.to_string_lossy()
        }),
    );
    assert_eq!(result["bundleFormatDetected"].as_str(), Some("legacy-sqlite3"));

    let listed = request_ok(&mut stdin, &mut reader, "list", "documents.list", json!({}));
    assert_eq!(
        listed["documents"].as_array().expect("documents").len(),
        1
    );

    let _ = child.kill();
}

#[test]
fn import_rejects_checksum_mismatch_and_missing_file() {
    let workspace = temp_dir("bundle-bad");

    // Hand-build a bundle whose manifest lies about the payload hash.
    let bad_path = workspace.join("tampered.zip");
    {
        let file = std::fs::File::create(&bad_path).expect("create bad bundle");
        let mut writer = zip::ZipWriter::new(file);
        let opts = zip::write::FileOptions::default();
        writer.start_file("manifest.json", opts).expect("manifest");
        writer
            .write_all(
                json!({
                    "format": backup::BUNDLE_FORMAT_V1,
                    "version": 1,
                    "dbSha256": "deadbeef"
                })
                .to_string()
                .as_bytes(),
            )
            .expect("write manifest");
        writer
            .start_file("db/curriculum.sqlite3", opts)
            .expect("db entry");
        writer.write_all(b"not the promised bytes").expect("write db");
        writer.finish().expect("finish zip");
    }
    let err = backup::import_workspace_bundle(&bad_path, &workspace.join("restore"))
        .expect_err("mismatched checksum must fail");
    assert!(err.to_string().contains("checksum mismatch"), "{}", err);

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "imp",
        "backup.importWorkspaceBundle",
        json!({
            "inPath": workspace.join("missing.zip").to_string_lossy(),
            "workspacePath": workspace.to_string_lossy()
        }),
    );
    assert_eq!(code, "not_found");

    let _ = child.kill();
}
