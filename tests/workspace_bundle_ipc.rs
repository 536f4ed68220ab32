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

const PAYLOAD: &str = "RUN: 5555555-5\nNombre: Elena Castro\nGrado: 6° Básico\nCurso: D";

#[test]
fn bundle_roundtrip_restores_records_and_discipline() {
    let workspace = temp_dir("pases-bundle-src");
    let restored = temp_dir("pases-bundle-dst");
    let bundle = temp_dir("pases-bundle-out").join("backup.pases.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "discipline": "tally" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scan.register",
        json!({ "payload": PAYLOAD, "type": "absence" }),
    );
    let export = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.exportBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(export["bundleFormat"], json!("pases-workspace-v1"));
    assert_eq!(export["entryCount"], json!(3));
    assert_eq!(export["dbSha256"].as_str().map(str::len), Some(64));

    let import = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.importBundle",
        json!({ "inPath": bundle.to_string_lossy(), "workspacePath": restored.to_string_lossy() }),
    );
    assert_eq!(import["bundleFormatDetected"], json!("pases-workspace-v1"));
    assert_eq!(import["discipline"], json!("tally"));

    let health = request_ok(&mut stdin, &mut reader, "5", "health", json!({}));
    assert_eq!(
        health["workspacePath"],
        json!(restored.to_string_lossy())
    );
    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "scan.summary",
        json!({ "payload": PAYLOAD }),
    );
    assert_eq!(summary["kinds"][0]["type"], json!("absence"));
    assert_eq!(summary["kinds"][0]["total"], json!(1));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "workspace.importBundle",
        json!({ "inPath": restored.join("missing.zip").to_string_lossy() }),
    );
    assert_eq!(code, "bundle_failed");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(restored);
    if let Some(dir) = bundle.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[test]
fn export_requires_workspace() {
    let out = temp_dir("pases-bundle-nows").join("x.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.exportBundle",
        json!({ "outPath": out.to_string_lossy() }),
    );
    assert_eq!(code, "no_workspace");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": out.to_string_lossy(), "discipline": "ledger" }),
    );
    assert_eq!(code, "bad_params");
    drop(stdin);
    let _ = child.wait();
}
