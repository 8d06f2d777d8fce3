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

fn model(result: &serde_json::Value) -> &serde_json::Value {
    result
        .get("render")
        .and_then(|r| r.get("model"))
        .expect("render model")
}

fn redirect_to(result: &serde_json::Value) -> &str {
    result
        .get("redirect")
        .and_then(|v| v.as_str())
        .expect("redirect")
}

fn genre_names(detail: &serde_json::Value) -> Vec<String> {
    model(detail)
        .get("book")
        .and_then(|b| b.get("genres"))
        .and_then(|v| v.as_array())
        .expect("book genres")
        .iter()
        .filter_map(|g| g.get("name").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .collect()
}

/// author 1, genres 1..=3.
fn seed_references(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    let _ = request_ok(
        stdin,
        reader,
        "ref-author",
        "authors.create",
        json!({ "first_name": "Patrick", "family_name": "Rothfuss" }),
    );
    for (i, name) in ["Fantasy", "Science Fiction", "Horror"].iter().enumerate() {
        let _ = request_ok(
            stdin,
            reader,
            &format!("ref-genre-{}", i),
            "genres.create",
            json!({ "name": name }),
        );
    }
}

#[test]
fn book_create_with_empty_title_changes_nothing() {
    let workspace = temp_dir("libraryd-book-empty-title");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_references(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "books.create",
        json!({
            "title": "",
            "author": "1",
            "summary": "A summary",
            "isbn": "12345",
            "genre": "1",
        }),
    );
    let m = model(&result);
    assert_eq!(m.get("title").and_then(|v| v.as_str()), Some("Create Book"));

    let messages: Vec<&str> = m
        .get("errors")
        .and_then(|v| v.as_array())
        .expect("errors")
        .iter()
        .filter_map(|e| e.get("message").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(messages, vec!["Title must not be empty."]);

    // The rest of the submission is echoed back.
    let echoed = m.get("book").expect("echoed book");
    assert_eq!(echoed.get("summary").and_then(|v| v.as_str()), Some("A summary"));
    assert_eq!(echoed.get("isbn").and_then(|v| v.as_str()), Some("12345"));

    // The prior genre selection is still checked.
    let genres = m.get("genres").and_then(|v| v.as_array()).expect("genres");
    let checked: Vec<&str> = genres
        .iter()
        .filter(|g| g.get("checked").and_then(|v| v.as_bool()) == Some(true))
        .filter_map(|g| g.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(checked, vec!["Fantasy"]);

    // Books table untouched.
    let list = request_ok(&mut stdin, &mut reader, "3", "books.list", json!({}));
    assert_eq!(
        model(&list)
            .get("book_list")
            .and_then(|v| v.as_array())
            .map(|v| v.len()),
        Some(0)
    );
}

#[test]
fn scalar_genre_selection_equals_single_element_sequence() {
    let workspace = temp_dir("libraryd-book-scalar-genre");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_references(&mut stdin, &mut reader);

    let scalar = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "books.create",
        json!({
            "title": "Scalar Book",
            "author": "1",
            "summary": "s",
            "isbn": "i1",
            "genre": "1",
        }),
    );
    assert_eq!(redirect_to(&scalar), "/catalog/book/1");

    let sequence = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "books.create",
        json!({
            "title": "Sequence Book",
            "author": "1",
            "summary": "s",
            "isbn": "i2",
            "genre": ["1"],
        }),
    );
    assert_eq!(redirect_to(&sequence), "/catalog/book/2");

    for (i, id) in [1, 2].iter().enumerate() {
        let detail = request_ok(
            &mut stdin,
            &mut reader,
            &format!("detail-{}", i),
            "books.detail",
            json!({ "id": id }),
        );
        assert_eq!(genre_names(&detail), vec!["Fantasy".to_string()]);
    }

    // Omitted selection means no links at all.
    let bare = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "books.create",
        json!({
            "title": "Bare Book",
            "author": "1",
            "summary": "s",
            "isbn": "i3",
        }),
    );
    assert_eq!(redirect_to(&bare), "/catalog/book/3");
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "books.detail",
        json!({ "id": 3 }),
    );
    assert!(genre_names(&detail).is_empty());
}

#[test]
fn book_update_replaces_genre_links_wholesale() {
    let workspace = temp_dir("libraryd-book-genre-replace");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_references(&mut stdin, &mut reader);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "books.create",
        json!({
            "title": "Linked Book",
            "author": "1",
            "summary": "s",
            "isbn": "i1",
            "genre": ["1", "2"],
        }),
    );
    assert_eq!(redirect_to(&created), "/catalog/book/1");

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "books.detail",
        json!({ "id": 1 }),
    );
    assert_eq!(
        genre_names(&detail),
        vec!["Fantasy".to_string(), "Science Fiction".to_string()]
    );

    // The update form pre-marks the current set.
    let form = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "books.updateForm",
        json!({ "id": 1 }),
    );
    let checked: Vec<&str> = model(&form)
        .get("genres")
        .and_then(|v| v.as_array())
        .expect("genres")
        .iter()
        .filter(|g| g.get("checked").and_then(|v| v.as_bool()) == Some(true))
        .filter_map(|g| g.get("name").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(checked, vec!["Fantasy", "Science Fiction"]);

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "books.update",
        json!({
            "id": 1,
            "title": "Linked Book",
            "author": "1",
            "summary": "s",
            "isbn": "i1",
            "genre": "3",
        }),
    );
    assert_eq!(redirect_to(&updated), "/catalog/book/1");

    // Previously linked genres not in the new set are unlinked.
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "books.detail",
        json!({ "id": 1 }),
    );
    assert_eq!(genre_names(&detail), vec!["Horror".to_string()]);
}

#[test]
fn book_detail_carries_author_and_not_found_is_404() {
    let workspace = temp_dir("libraryd-book-detail");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_references(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "books.create",
        json!({
            "title": "The Name of the Wind",
            "author": "1",
            "summary": "s",
            "isbn": "9781473211896",
            "genre": "1",
        }),
    );

    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "books.detail",
        json!({ "id": 1 }),
    );
    let m = model(&detail);
    assert_eq!(
        m.get("title").and_then(|v| v.as_str()),
        Some("The Name of the Wind")
    );
    let author = m.get("book").and_then(|b| b.get("author")).expect("author");
    assert_eq!(
        author.get("name").and_then(|v| v.as_str()),
        Some("Rothfuss, Patrick")
    );
    assert_eq!(
        author.get("url").and_then(|v| v.as_str()),
        Some("/catalog/author/1")
    );

    let resp = request(&mut stdin, &mut reader, "4", "books.detail", json!({ "id": 99 }));
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    let error = resp.get("error").expect("error");
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));
    assert_eq!(
        error.get("message").and_then(|v| v.as_str()),
        Some("Book not found")
    );
    assert_eq!(
        error
            .get("details")
            .and_then(|d| d.get("status"))
            .and_then(|v| v.as_i64()),
        Some(404)
    );
}
