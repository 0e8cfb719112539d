mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

// One pass over every handler family; catches routing regressions
// without retesting the per-family behavior.
#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("curriculum-router-smoke");
    let bundle_out = workspace.join("smoke-bundle.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["version"].is_string());

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "documents.create",
        json!({ "grade": 7, "volume": 1, "totalPages": 12 }),
    );
    let document_id = created["documentId"].as_str().expect("documentId").to_string();

    request_ok(&mut stdin, &mut reader, "4", "documents.list", json!({}));
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "documents.open",
        json!({ "documentId": document_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "documents.importPages",
        json!({
            "documentId": document_id,
            "pages": [
                { "pageNumber": 2, "textPreview": "LESSON 1 Ratios SESSION 1", "lessonIndicators": [] }
            ]
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "lessons.extract",
        json!({ "documentId": document_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "lessons.list",
        json!({ "documentId": document_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "lessons.search",
        json!({ "query": "Ratios" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "pacing.generate",
        json!({ "gradeRange": [7], "totalDays": 30 }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "vision.analyze",
        json!({ "documentId": document_id, "lessonNumber": 1 }),
    );
    request_ok(&mut stdin, &mut reader, "12", "vision.stats", json!({}));
    request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "setup.get",
        json!({ "section": "pacing" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "setup.update",
        json!({ "section": "extraction", "patch": { "daysPerSession": 2 } }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "documents.delete",
        json!({ "documentId": document_id }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "18",
        "curriculum.unknownMethod",
        json!({}),
    );
    assert_eq!(code, "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
