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

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_libraryd");
    let mut child = Command::new(exe)
        .env_remove("LIBRARYD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn libraryd");
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

fn view(result: &serde_json::Value) -> &str {
    result
        .get("render")
        .and_then(|r| r.get("view"))
        .and_then(|v| v.as_str())
        .expect("render view")
}

fn model(result: &serde_json::Value) -> &serde_json::Value {
    result
        .get("render")
        .and_then(|r| r.get("model"))
        .expect("render model")
}

#[test]
fn router_dispatch_covers_all_controller_families() {
    let workspace = temp_dir("libraryd-router-smoke");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health.get("version").and_then(|v| v.as_str()).is_some());
    assert!(health.get("workspacePath").map(|v| v.is_null()).unwrap_or(false));

    // Before a workspace is selected, catalog methods refuse.
    let resp = request(&mut stdin, &mut reader, "2", "authors.list", json!({}));
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("no_workspace")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let index = request_ok(&mut stdin, &mut reader, "4", "catalog.index", json!({}));
    assert_eq!(view(&index), "index");
    let m = model(&index);
    assert_eq!(m.get("title").and_then(|v| v.as_str()), Some("Local Library Home"));
    assert_eq!(m.get("book_count").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(m.get("author_count").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(m.get("genre_count").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(m.get("book_instance_count").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        m.get("book_instance_available_count").and_then(|v| v.as_i64()),
        Some(0)
    );

    let lists = [
        ("authors.list", "author_list", "author_list"),
        ("books.list", "book_list", "book_list"),
        ("genres.list", "genre_list", "genre_list"),
        ("bookinstances.list", "bookinstance_list", "bookinstance_list"),
    ];
    for (i, (method, expected_view, key)) in lists.iter().enumerate() {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            &format!("list-{}", i),
            method,
            json!({}),
        );
        assert_eq!(view(&result), *expected_view);
        let rows = model(&result).get(*key).and_then(|v| v.as_array()).cloned();
        assert_eq!(rows.map(|r| r.len()), Some(0), "{} should be empty", method);
    }

    let forms = [
        ("authors.createForm", "author_form", "Create Author"),
        ("books.createForm", "book_form", "Create Book"),
        ("genres.createForm", "genre_form", "Create Genre"),
        ("bookinstances.createForm", "bookinstance_form", "Create BookInstance"),
    ];
    for (i, (method, expected_view, title)) in forms.iter().enumerate() {
        let result = request_ok(
            &mut stdin,
            &mut reader,
            &format!("form-{}", i),
            method,
            json!({}),
        );
        assert_eq!(view(&result), *expected_view);
        assert_eq!(
            model(&result).get("title").and_then(|v| v.as_str()),
            Some(*title)
        );
    }

    let resp = request(&mut stdin, &mut reader, "99", "books.burn", json!({}));
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_implemented")
    );
}
