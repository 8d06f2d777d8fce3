use crate::derived;
use crate::ipc::error::{err, not_found, redirect, render};
use crate::ipc::types::{AppState, Request};
use crate::validate::{self, FieldError};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct BookRow {
    id: i64,
    title: String,
    summary: String,
    isbn: String,
    author_id: Option<i64>,
}

fn row_to_book(row: &rusqlite::Row) -> rusqlite::Result<BookRow> {
    Ok(BookRow {
        id: row.get(0)?,
        title: row.get(1)?,
        summary: row.get(2)?,
        isbn: row.get(3)?,
        author_id: row.get(4)?,
    })
}

fn fetch_book(conn: &Connection, id: i64) -> rusqlite::Result<Option<BookRow>> {
    conn.query_row(
        "SELECT id, title, summary, isbn, author_id FROM books WHERE id = ?",
        [id],
        row_to_book,
    )
    .optional()
}

fn fetch_book_author(conn: &Connection, book: &BookRow) -> rusqlite::Result<serde_json::Value> {
    let Some(author_id) = book.author_id else {
        return Ok(serde_json::Value::Null);
    };
    let author = conn
        .query_row(
            "SELECT id, first_name, family_name FROM authors WHERE id = ?",
            [author_id],
            |row| {
                let id: i64 = row.get(0)?;
                let first_name: String = row.get(1)?;
                let family_name: String = row.get(2)?;
                Ok(json!({
                    "id": id,
                    "name": derived::author_full_name(&first_name, &family_name),
                    "url": derived::author_url(id),
                }))
            },
        )
        .optional()?;
    Ok(author.unwrap_or(serde_json::Value::Null))
}

fn fetch_book_genres(conn: &Connection, book_id: i64) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.name
         FROM genres g
         JOIN book_genres bg ON bg.genre_id = g.id
         WHERE bg.book_id = ?
         ORDER BY g.name",
    )?;
    let rows = stmt.query_map([book_id], |row| {
        let id: i64 = row.get(0)?;
        let name: String = row.get(1)?;
        Ok(json!({ "id": id, "name": name, "url": derived::genre_url(id) }))
    })?;
    rows.collect()
}

fn fetch_book_genre_ids(conn: &Connection, book_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT genre_id FROM book_genres WHERE book_id = ?")?;
    let rows = stmt.query_map([book_id], |row| row.get(0))?;
    rows.collect()
}

fn fetch_book_instances(conn: &Connection, book_id: i64) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, imprint, status, due_back FROM book_instances WHERE book_id = ?",
    )?;
    let rows = stmt.query_map([book_id], |row| {
        let id: i64 = row.get(0)?;
        let imprint: String = row.get(1)?;
        let status: String = row.get(2)?;
        let due_back = derived::parse_date(row.get(3)?);
        Ok(json!({
            "id": id,
            "imprint": imprint,
            "status": status,
            "due_back_formatted": derived::format_date_med(due_back),
            "url": derived::bookinstance_url(id),
        }))
    })?;
    rows.collect()
}

/// Select-input options for the book form.
fn fetch_author_options(conn: &Connection) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, first_name, family_name FROM authors ORDER BY family_name",
    )?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        let first_name: String = row.get(1)?;
        let family_name: String = row.get(2)?;
        Ok(json!({
            "id": id,
            "name": derived::author_full_name(&first_name, &family_name),
        }))
    })?;
    rows.collect()
}

/// Checkbox options, with previously selected genres re-marked.
fn fetch_genre_options(
    conn: &Connection,
    checked: &[i64],
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare("SELECT id, name FROM genres ORDER BY name")?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        let name: String = row.get(1)?;
        Ok(json!({
            "id": id,
            "name": name,
            "checked": checked.contains(&id),
        }))
    })?;
    rows.collect()
}

struct BookForm {
    title: String,
    summary: String,
    isbn: String,
    author: String,
    genres: Vec<String>,
}

fn validate_book_form(params: &serde_json::Value) -> (BookForm, Vec<FieldError>) {
    let mut errors = Vec::new();
    let title = validate::param_str(params, "title");
    let author = validate::param_str(params, "author");
    let summary = validate::param_str(params, "summary");
    let isbn = validate::param_str(params, "isbn");
    // Scalar, sequence or absent; always validated as a sequence.
    let genres = validate::param_seq(params, "genre");

    validate::check_min_len(&mut errors, "title", &title, 1, "Title must not be empty.");
    validate::check_min_len(&mut errors, "author", &author, 1, "Author must not be empty.");
    validate::check_min_len(&mut errors, "summary", &summary, 1, "Summary must not be empty.");
    validate::check_min_len(&mut errors, "isbn", &isbn, 1, "ISBN must not be empty.");
    for value in &genres {
        validate::check_min_len(&mut errors, "genre", value, 1, "Genre must be specified.");
    }

    (
        BookForm {
            title: validate::escape(&title),
            summary: validate::escape(&summary),
            isbn: validate::escape(&isbn),
            author: validate::escape(&author),
            genres: genres.iter().map(|g| validate::escape(g)).collect(),
        },
        errors,
    )
}

fn selected_genre_ids(form: &BookForm) -> Vec<i64> {
    form.genres.iter().filter_map(|g| g.parse().ok()).collect()
}

fn form_echo_json(form: &BookForm) -> serde_json::Value {
    json!({
        "title": form.title,
        "summary": form.summary,
        "isbn": form.isbn,
        "author_id": form.author,
    })
}

/// Form re-render after a validation failure, prior selections kept.
fn render_book_form(
    conn: &Connection,
    req: &Request,
    title: &str,
    form: &BookForm,
    errors: Vec<FieldError>,
) -> serde_json::Value {
    let authors = match fetch_author_options(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let genres = match fetch_genre_options(conn, &selected_genre_ids(form)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    render(
        &req.id,
        "book_form",
        json!({
            "title": title,
            "authors": authors,
            "genres": genres,
            "book": form_echo_json(form),
            "selected_genres": form.genres,
            "errors": errors,
        }),
    )
}

fn handle_catalog_index(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let counts: rusqlite::Result<(i64, i64, i64, i64, i64)> = (|| {
        let books = conn.query_row("SELECT COUNT(*) FROM books", [], |r| r.get(0))?;
        let instances = conn.query_row("SELECT COUNT(*) FROM book_instances", [], |r| r.get(0))?;
        let available = conn.query_row(
            "SELECT COUNT(*) FROM book_instances WHERE status = 'Available'",
            [],
            |r| r.get(0),
        )?;
        let authors = conn.query_row("SELECT COUNT(*) FROM authors", [], |r| r.get(0))?;
        let genres = conn.query_row("SELECT COUNT(*) FROM genres", [], |r| r.get(0))?;
        Ok((books, instances, available, authors, genres))
    })();

    match counts {
        Ok((books, instances, available, authors, genres)) => render(
            &req.id,
            "index",
            json!({
                "title": "Local Library Home",
                "book_count": books,
                "book_instance_count": instances,
                "book_instance_available_count": available,
                "author_count": authors,
                "genre_count": genres,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_books_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT b.id, b.title, a.first_name, a.family_name
         FROM books b
         LEFT JOIN authors a ON a.id = b.author_id
         ORDER BY b.title",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let title: String = row.get(1)?;
            let first_name: Option<String> = row.get(2)?;
            let family_name: Option<String> = row.get(3)?;
            let author = derived::author_full_name(
                first_name.as_deref().unwrap_or(""),
                family_name.as_deref().unwrap_or(""),
            );
            Ok(json!({
                "id": id,
                "title": title,
                "author": author,
                "url": derived::book_url(id),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(books) => render(
            &req.id,
            "book_list",
            json!({ "title": "Book List", "book_list": books }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_books_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let book = match fetch_book(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(book) = book else {
        return not_found(&req.id, "Book not found");
    };

    let detail: rusqlite::Result<(serde_json::Value, Vec<serde_json::Value>, Vec<serde_json::Value>)> =
        (|| {
            let author = fetch_book_author(conn, &book)?;
            let genres = fetch_book_genres(conn, id)?;
            let instances = fetch_book_instances(conn, id)?;
            Ok((author, genres, instances))
        })();

    match detail {
        Ok((author, genres, instances)) => render(
            &req.id,
            "book_detail",
            json!({
                "title": book.title,
                "book": {
                    "id": book.id,
                    "title": book.title,
                    "summary": book.summary,
                    "isbn": book.isbn,
                    "author": author,
                    "genres": genres,
                    "url": derived::book_url(book.id),
                },
                "book_instances": instances,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_books_create_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let lists: rusqlite::Result<(Vec<serde_json::Value>, Vec<serde_json::Value>)> = (|| {
        let authors = fetch_author_options(conn)?;
        let genres = fetch_genre_options(conn, &[])?;
        Ok((authors, genres))
    })();

    match lists {
        Ok((authors, genres)) => render(
            &req.id,
            "book_form",
            json!({
                "title": "Create Book",
                "authors": authors,
                "genres": genres,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_books_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (form, errors) = validate_book_form(&req.params);
    if !errors.is_empty() {
        return render_book_form(conn, req, "Create Book", &form, errors);
    }

    let Ok(author_id) = form.author.parse::<i64>() else {
        return err(&req.id, "bad_params", "invalid author id", None);
    };
    let genre_ids = match form.genres.iter().map(|g| g.parse()).collect::<Result<Vec<i64>, _>>() {
        Ok(v) => v,
        Err(_) => return err(&req.id, "bad_params", "invalid genre id", None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "INSERT INTO books(title, summary, isbn, author_id) VALUES(?, ?, ?, ?)",
        (&form.title, &form.summary, &form.isbn, author_id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "books" })),
        );
    }
    let book_id = tx.last_insert_rowid();

    for genre_id in &genre_ids {
        if let Err(e) = tx.execute(
            "INSERT OR IGNORE INTO book_genres(book_id, genre_id) VALUES(?, ?)",
            (book_id, genre_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "book_genres" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    redirect(&req.id, &derived::book_url(book_id))
}

fn handle_books_update_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let book = match fetch_book(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(book) = book else {
        return not_found(&req.id, "Book not found");
    };

    let lists: rusqlite::Result<(Vec<serde_json::Value>, Vec<serde_json::Value>)> = (|| {
        let authors = fetch_author_options(conn)?;
        let linked = fetch_book_genre_ids(conn, id)?;
        let genres = fetch_genre_options(conn, &linked)?;
        Ok((authors, genres))
    })();

    match lists {
        Ok((authors, genres)) => render(
            &req.id,
            "book_form",
            json!({
                "title": "Update Book",
                "authors": authors,
                "genres": genres,
                "book": {
                    "id": book.id,
                    "title": book.title,
                    "summary": book.summary,
                    "isbn": book.isbn,
                    "author_id": book.author_id,
                },
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_books_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let (form, errors) = validate_book_form(&req.params);
    if !errors.is_empty() {
        return render_book_form(conn, req, "Update Book", &form, errors);
    }

    let existing = match fetch_book(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_none() {
        return not_found(&req.id, "Book not found");
    }

    let Ok(author_id) = form.author.parse::<i64>() else {
        return err(&req.id, "bad_params", "invalid author id", None);
    };
    let genre_ids = match form.genres.iter().map(|g| g.parse()).collect::<Result<Vec<i64>, _>>() {
        Ok(v) => v,
        Err(_) => return err(&req.id, "bad_params", "invalid genre id", None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "UPDATE books SET title = ?, summary = ?, isbn = ?, author_id = ? WHERE id = ?",
        (&form.title, &form.summary, &form.isbn, author_id, id),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "books" })),
        );
    }

    // Replace the genre link set wholesale, not merge.
    if let Err(e) = tx.execute("DELETE FROM book_genres WHERE book_id = ?", [id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "book_genres" })),
        );
    }
    for genre_id in &genre_ids {
        if let Err(e) = tx.execute(
            "INSERT OR IGNORE INTO book_genres(book_id, genre_id) VALUES(?, ?)",
            (id, genre_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "book_genres" })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    redirect(&req.id, &derived::book_url(id))
}

fn handle_books_delete_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let book = match fetch_book(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(book) = book else {
        return redirect(&req.id, "/catalog/books");
    };

    let instances = match fetch_book_instances(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    render(
        &req.id,
        "book_delete",
        json!({
            "title": "Delete Book",
            "book": {
                "id": book.id,
                "title": book.title,
                "url": derived::book_url(book.id),
            },
            "book_instances": instances,
        }),
    )
}

fn handle_books_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let book = match fetch_book(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(book) = book else {
        return redirect(&req.id, "/catalog/books");
    };

    // Copies may have appeared between the confirm page and now.
    let instances = match fetch_book_instances(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !instances.is_empty() {
        return render(
            &req.id,
            "book_delete",
            json!({
                "title": "Delete Book",
                "book": {
                    "id": book.id,
                    "title": book.title,
                    "url": derived::book_url(book.id),
                },
                "book_instances": instances,
            }),
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Genre links go with the book; they are links, not dependents.
    if let Err(e) = tx.execute("DELETE FROM book_genres WHERE book_id = ?", [id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "book_genres" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM books WHERE id = ?", [id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "books" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    redirect(&req.id, "/catalog/books")
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.index" => Some(handle_catalog_index(state, req)),
        "books.list" => Some(handle_books_list(state, req)),
        "books.detail" => Some(handle_books_detail(state, req)),
        "books.createForm" => Some(handle_books_create_form(state, req)),
        "books.create" => Some(handle_books_create(state, req)),
        "books.updateForm" => Some(handle_books_update_form(state, req)),
        "books.update" => Some(handle_books_update(state, req)),
        "books.deleteForm" => Some(handle_books_delete_form(state, req)),
        "books.delete" => Some(handle_books_delete(state, req)),
        _ => None,
    }
}
