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
    let exe = env!("CARGO_BIN_EXE_rollcalld");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rollcalld");
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value.pointer("/error/code").and_then(|v| v.as_str())
}

#[test]
fn attendance_and_schedule_setup_roundtrip_and_validation() {
    let workspace = temp_dir("rollcall-setup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let initial = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(
        initial.pointer("/attendance/reasons"),
        Some(&json!(["Sick", "Personal", "Travel", "Late Transport"]))
    );
    assert_eq!(
        initial.pointer("/attendance/demoFallback").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        initial.pointer("/attendance/overlayRecorded").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        initial.pointer("/schedule/timeSlots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(4)
    );

    let reasons = request_ok(&mut stdin, &mut reader, "3", "attendance.reasons", json!({}));
    assert_eq!(reasons["reasons"].as_array().map(|a| a.len()), Some(4));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({
            "section": "attendance",
            "patch": { "reasons": [" Medical ", "Family", "Medical"], "overlayRecorded": false }
        }),
    );
    assert_eq!(updated["value"]["reasons"], json!(["Medical", "Family"]));
    let reasons = request_ok(&mut stdin, &mut reader, "5", "attendance.reasons", json!({}));
    assert_eq!(reasons["reasons"], json!(["Medical", "Family"]));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "schedule", "patch": { "timeSlots": ["Period 1", "Period 2"] } }),
    );
    let flow = request_ok(&mut stdin, &mut reader, "7", "flow.start", json!({ "date": "2026-09-14" }));
    assert_eq!(flow["timeSlots"], json!(["Period 1", "Period 2"]));

    for (id, section, patch) in [
        ("8", "attendance", json!({ "reasons": ["x".repeat(41)] })),
        ("9", "attendance", json!({ "reasons": [""] })),
        ("10", "attendance", json!({ "demoFallback": "yes" })),
        ("11", "attendance", json!({ "colour": "red" })),
        ("12", "schedule", json!({ "timeSlots": "08:00" })),
        ("13", "grading", json!({})),
    ] {
        let resp = request(
            &mut stdin,
            &mut reader,
            id,
            "setup.update",
            json!({ "section": section, "patch": patch }),
        );
        assert_eq!(error_code(&resp), Some("bad_params"), "{}", resp);
    }

    // Rejected patches leave stored values alone.
    let after = request_ok(&mut stdin, &mut reader, "14", "setup.get", json!({}));
    assert_eq!(after.pointer("/attendance/reasons"), Some(&json!(["Medical", "Family"])));
    assert_eq!(
        after.pointer("/attendance/overlayRecorded").and_then(|v| v.as_bool()),
        Some(false)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
