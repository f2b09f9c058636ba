use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_progressd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn progressd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("progress-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());

    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "progress.get",
        json!({ "studentId": "s1" }),
    );
    assert_eq!(error_code(&early), "no_workspace");

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "config.update",
        json!({ "config": { "attendance": { "presentXp": 40 }, "rules": [] } }),
    );
    let cfg = request_ok(&mut stdin, &mut reader, "5", "config.get", json!({}));
    assert_eq!(cfg["config"]["attendance"]["presentXp"], 40);
    assert_eq!(cfg["config"]["attendance"]["lateXp"], 5);

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.register",
        json!({ "studentId": "s1", "displayName": "Ada" }),
    );
    let students = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(1));

    for (i, date) in ["2026-03-02", "2026-03-03", "2026-03-04"].iter().enumerate() {
        let applied = request_ok(
            &mut stdin,
            &mut reader,
            &format!("8-{}", i),
            "progress.applyEvent",
            json!({
                "studentId": "s1",
                "event": { "type": "attendanceMarked", "status": "present", "date": date }
            }),
        );
        assert_eq!(applied["duplicate"], false);
    }
    let dup = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "progress.applyEvent",
        json!({
            "studentId": "s1",
            "event": { "type": "attendanceMarked", "status": "present", "date": "2026-03-04" }
        }),
    );
    assert_eq!(dup["duplicate"], true);

    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "progress.get",
        json!({ "studentId": "s1" }),
    );
    assert_eq!(progress["progress"]["totalXp"], 120);
    assert_eq!(progress["progress"]["level"], 2);
    assert_eq!(progress["progress"]["attendanceStreak"], 3);

    let invalid = request(
        &mut stdin,
        &mut reader,
        "11",
        "progress.applyEvent",
        json!({
            "studentId": "s1",
            "event": { "type": "assignmentGraded", "score": 12, "maxScore": 10, "date": "2026-03-04" }
        }),
    );
    assert_eq!(error_code(&invalid), "invalid_event");

    let unknown = request(
        &mut stdin,
        &mut reader,
        "12",
        "progress.applyEvent",
        json!({
            "studentId": "ghost",
            "event": { "type": "manualReward", "amount": 5 }
        }),
    );
    assert_eq!(error_code(&unknown), "unknown_student");

    let badge = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "badges.create",
        json!({ "name": "Helper", "xpReward": 10 }),
    );
    let badge_id = badge["badgeId"].as_str().expect("badge id").to_string();
    let grant = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "badges.grant",
        json!({ "studentId": "s1", "badgeId": badge_id, "grantedBy": "staff-1" }),
    );
    assert_eq!(grant["newlyAwarded"], true);
    let in_use = request(
        &mut stdin,
        &mut reader,
        "15",
        "badges.delete",
        json!({ "badgeId": badge_id }),
    );
    assert_eq!(error_code(&in_use), "badge_in_use");
    assert_eq!(in_use["error"]["details"]["usageCount"], 1);
    request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "badges.update",
        json!({ "badgeId": badge_id, "patch": { "isActive": false } }),
    );
    let badges = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "badges.list",
        json!({ "includeInactive": false }),
    );
    assert_eq!(badges["badges"].as_array().map(|a| a.len()), Some(0));

    let achievements = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "achievements.list",
        json!({ "studentId": "s1" }),
    );
    let achievement_id = achievements["achievements"][0]["id"]
        .as_str()
        .expect("achievement id")
        .to_string();
    let revoked = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "achievements.revoke",
        json!({ "studentId": "s1", "achievementId": achievement_id }),
    );
    assert_eq!(revoked["xpReversed"], 10);

    let adjusted = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "progress.adjustXp",
        json!({ "studentId": "s1", "delta": -20, "note": "correction" }),
    );
    assert_eq!(adjusted["progress"]["totalXp"], 100);

    let ledger = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "progress.ledger",
        json!({ "studentId": "s1" }),
    );
    assert_eq!(ledger["entries"].as_array().map(|a| a.len()), Some(6));
    let digest = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "progress.digest",
        json!({ "studentId": "s1" }),
    );
    assert_eq!(digest["digest"]["totalXp"], 100);
    let reconcile = request_ok(&mut stdin, &mut reader, "23", "progress.reconcile", json!({}));
    assert_eq!(reconcile["reports"][0]["diverged"], false);
    request_ok(
        &mut stdin,
        &mut reader,
        "24",
        "progress.evaluate",
        json!({ "studentId": "s1" }),
    );

    let levels = request_ok(&mut stdin, &mut reader, "25", "levels.get", json!({}));
    assert_eq!(levels["levels"].as_array().map(|a| a.len()), Some(5));
    let bad_levels = request(
        &mut stdin,
        &mut reader,
        "26",
        "levels.replace",
        json!({ "levels": [{ "level": 1, "name": "Only", "xpRequired": 5 }] }),
    );
    assert_eq!(error_code(&bad_levels), "config_invalid");
    request_ok(
        &mut stdin,
        &mut reader,
        "27",
        "levels.replace",
        json!({ "levels": [
            { "level": 1, "name": "Bronze", "xpRequired": 0 },
            { "level": 2, "name": "Silver", "xpRequired": 50 },
            { "level": 3, "name": "Gold", "xpRequired": 90 }
        ] }),
    );
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "28",
        "progress.get",
        json!({ "studentId": "s1" }),
    );
    assert_eq!(progress["progress"]["levelName"], "Gold");

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "29",
        "backup.exportWorkspaceBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    assert_eq!(export["entryCount"], 2);
    let import = request_ok(
        &mut stdin,
        &mut reader,
        "30",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );
    assert_eq!(import["dbSha256"], export["dbSha256"]);
    let progress = request_ok(
        &mut stdin,
        &mut reader,
        "31",
        "progress.get",
        json!({ "studentId": "s1" }),
    );
    assert_eq!(progress["progress"]["totalXp"], 100);

    let unknown_method = request(&mut stdin, &mut reader, "32", "grades.compute", json!({}));
    assert_eq!(error_code(&unknown_method), "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
