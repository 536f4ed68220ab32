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
    let exe = env!("CARGO_BIN_EXE_pasesd");
    let mut child = Command::new(exe)
        .env_remove("PASES_WORKSPACE")
        .env_remove("PASES_DISCIPLINE")
        .env("PASES_REGISTER_COOLDOWN_MS", "0")
        .env("PASES_LOOKUP_COOLDOWN_MS", "0")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn pasesd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn send(
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
    let value = send(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = send(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded",
        method
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

const PAYLOAD: &str = "RUN: 12345678-K\nNombre: Ana María Soto Pérez\nGrado: 1° Medio\nCurso: A";

#[test]
fn tally_counts_logs_and_joins_justifications() {
    let workspace = temp_dir("pases-tally");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "discipline": "tally" }),
    );
    assert_eq!(selected["discipline"], json!("tally"));

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scan.register",
        json!({ "payload": PAYLOAD, "type": "tardy", "comment": "bus" }),
    );
    let reg = &first["registration"];
    assert_eq!(reg["outcome"]["discipline"], json!("tally"));
    assert_eq!(reg["outcome"]["total"], json!(1));
    assert_eq!(reg["outcome"]["created"], json!(true));
    assert_eq!(reg["student"]["run"], json!("12345678-K"));
    assert_eq!(reg["needsContactInfo"], json!(false));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scan.register",
        json!({ "payload": PAYLOAD, "type": "Atrasos" }),
    );
    assert_eq!(second["registration"]["outcome"]["total"], json!(2));
    assert_eq!(second["registration"]["outcome"]["created"], json!(false));

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scan.summary",
        json!({ "payload": PAYLOAD }),
    );
    let kinds = summary["kinds"].as_array().expect("kinds");
    assert_eq!(kinds.len(), 1);
    assert_eq!(kinds[0]["type"], json!("tardy"));
    assert_eq!(kinds[0]["total"], json!(2));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scan.history",
        json!({ "payload": PAYLOAD }),
    );
    assert_eq!(history["run"], json!("12345678-k"));
    assert_eq!(history["empty"], json!(false));
    let records = history["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r["justified"] == json!(false)));
    assert!(records.iter().any(|r| r["comment"] == json!("bus")));
    assert!(records.iter().all(|r| r["type"] == json!("tardy") && r.get("kind").is_none()));

    // Justify each by composite key; the run is matched case-insensitively.
    // Two scans within the same minute share a key, so the second attempt may
    // already be covered.
    for (i, record) in records.iter().enumerate() {
        let resp = send(
            &mut stdin,
            &mut reader,
            &format!("j{}", i),
            "attendance.justify",
            json!({
                "run": "12345678-K",
                "date": record["date"],
                "time": record["time"],
                "type": record["type"],
                "guardianName": "Jane Doe",
            }),
        );
        if resp["ok"] == json!(true) {
            assert_eq!(resp["result"]["justification"]["guardianName"], json!("Jane Doe"));
        } else {
            assert_eq!(resp["error"]["code"], json!("already_justified"));
        }
    }

    let pending = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scan.pending",
        json!({ "payload": PAYLOAD }),
    );
    assert_eq!(pending["records"], json!([]));
    assert_eq!(pending["allJustified"], json!(true));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "scan.history",
        json!({ "payload": PAYLOAD }),
    );
    for record in history["records"].as_array().expect("records") {
        assert_eq!(record["justified"], json!(true));
        assert_eq!(record["guardianName"], json!("Jane Doe"));
    }

    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.justify",
        json!({
            "run": "12345678-k",
            "date": records[0]["date"],
            "time": records[0]["time"],
            "type": "tardy",
            "guardianName": "John Doe",
        }),
    );
    assert_eq!(code, "already_justified");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn tally_rejects_bad_scans_without_writing() {
    let workspace = temp_dir("pases-tally-bad");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "discipline": "tally" }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "scan.register",
        json!({ "payload": "\nNombre: Sin Run\nGrado: 1\nCurso: B", "type": "absence" }),
    );
    assert_eq!(code, "invalid_identity");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "scan.register",
        json!({ "payload": PAYLOAD, "type": "late" }),
    );
    assert_eq!(code, "bad_params");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.justify",
        json!({
            "run": "12345678-k",
            "date": "2024-03-01",
            "time": "08:05",
            "type": "tardy",
            "guardianName": "Jane Doe",
        }),
    );
    assert_eq!(code, "record_not_found");

    let stats = request_ok(&mut stdin, &mut reader, "5", "records.stats", json!({}));
    assert_eq!(stats["totals"]["total"], json!(0));

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scan.history",
        json!({ "payload": PAYLOAD }),
    );
    assert_eq!(history["empty"], json!(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
