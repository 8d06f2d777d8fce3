use crate::derived;
use crate::ipc::error::{err, not_found, redirect, render};
use crate::ipc::types::{AppState, Request};
use crate::validate::{self, FieldError};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct GenreRow {
    id: i64,
    name: String,
}

fn genre_json(g: &GenreRow) -> serde_json::Value {
    json!({
        "id": g.id,
        "name": g.name,
        "url": derived::genre_url(g.id),
    })
}

fn fetch_genre(conn: &Connection, id: i64) -> rusqlite::Result<Option<GenreRow>> {
    conn.query_row("SELECT id, name FROM genres WHERE id = ?", [id], |row| {
        Ok(GenreRow {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })
    .optional()
}

/// Case-insensitive duplicate-name lookup used by create and update.
fn find_genre_by_name(conn: &Connection, name: &str) -> rusqlite::Result<Option<GenreRow>> {
    conn.query_row(
        "SELECT id, name FROM genres WHERE name = ? COLLATE NOCASE",
        [name],
        |row| {
            Ok(GenreRow {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        },
    )
    .optional()
}

fn fetch_books_in_genre(
    conn: &Connection,
    genre_id: i64,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT b.id, b.title, b.summary
         FROM books b
         JOIN book_genres bg ON bg.book_id = b.id
         WHERE bg.genre_id = ?
         ORDER BY b.title",
    )?;
    let rows = stmt.query_map([genre_id], |row| {
        let id: i64 = row.get(0)?;
        let title: String = row.get(1)?;
        let summary: String = row.get(2)?;
        Ok(json!({
            "id": id,
            "title": title,
            "summary": summary,
            "url": derived::book_url(id),
        }))
    })?;
    rows.collect()
}

fn validate_genre_form(params: &serde_json::Value) -> (String, Vec<FieldError>) {
    let mut errors = Vec::new();
    let name = validate::param_str(params, "name");

    validate::check_min_len(
        &mut errors,
        "name",
        &name,
        3,
        "Genre name must contain at least 3 characters.",
    );
    validate::check_max_len(
        &mut errors,
        "name",
        &name,
        100,
        "Genre name must contain at most 100 characters.",
    );

    (validate::escape(&name), errors)
}

fn handle_genres_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare("SELECT id, name FROM genres ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            Ok(GenreRow {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(genres) => render(
            &req.id,
            "genre_list",
            json!({
                "title": "Genre List",
                "genre_list": genres.iter().map(genre_json).collect::<Vec<_>>(),
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_genres_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let genre = match fetch_genre(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(genre) = genre else {
        return not_found(&req.id, "Genre not found");
    };

    let books = match fetch_books_in_genre(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    render(
        &req.id,
        "genre_detail",
        json!({
            "title": "Genre Detail",
            "genre": genre_json(&genre),
            "genre_books": books,
        }),
    )
}

fn handle_genres_create_form(_state: &mut AppState, req: &Request) -> serde_json::Value {
    render(&req.id, "genre_form", json!({ "title": "Create Genre" }))
}

fn handle_genres_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (name, errors) = validate_genre_form(&req.params);
    if !errors.is_empty() {
        return render(
            &req.id,
            "genre_form",
            json!({
                "title": "Create Genre",
                "genre": { "name": name },
                "errors": errors,
            }),
        );
    }

    // A genre differing only in case points at the existing row instead.
    match find_genre_by_name(conn, &name) {
        Ok(Some(existing)) => return redirect(&req.id, &derived::genre_url(existing.id)),
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute("INSERT INTO genres(name) VALUES(?)", [&name]) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "genres" })),
        );
    }

    redirect(&req.id, &derived::genre_url(conn.last_insert_rowid()))
}

fn handle_genres_update_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let genre = match fetch_genre(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(genre) = genre else {
        return not_found(&req.id, "Genre not found");
    };

    render(
        &req.id,
        "genre_form",
        json!({
            "title": "Update Genre",
            "genre": genre_json(&genre),
        }),
    )
}

fn handle_genres_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let (name, errors) = validate_genre_form(&req.params);
    if !errors.is_empty() {
        return render(
            &req.id,
            "genre_form",
            json!({
                "title": "Update Genre",
                "genre": { "name": name },
                "errors": errors,
            }),
        );
    }

    let existing = match fetch_genre(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_none() {
        return not_found(&req.id, "Genre not found");
    }

    match find_genre_by_name(conn, &name) {
        Ok(Some(dup)) => return redirect(&req.id, &derived::genre_url(dup.id)),
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err(e) = conn.execute("UPDATE genres SET name = ? WHERE id = ?", (&name, id)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "genres" })),
        );
    }

    redirect(&req.id, &derived::genre_url(id))
}

fn handle_genres_delete_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let genre = match fetch_genre(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(genre) = genre else {
        return redirect(&req.id, "/catalog/genres");
    };

    let books = match fetch_books_in_genre(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    render(
        &req.id,
        "genre_delete",
        json!({
            "title": "Delete Genre",
            "genre": genre_json(&genre),
            "genre_books": books,
        }),
    )
}

fn handle_genres_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let genre = match fetch_genre(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(genre) = genre else {
        return redirect(&req.id, "/catalog/genres");
    };

    // Books may have been linked between the confirm page and now.
    let books = match fetch_books_in_genre(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !books.is_empty() {
        return render(
            &req.id,
            "genre_delete",
            json!({
                "title": "Delete Genre",
                "genre": genre_json(&genre),
                "genre_books": books,
            }),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM genres WHERE id = ?", [id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "genres" })),
        );
    }

    redirect(&req.id, "/catalog/genres")
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "genres.list" => Some(handle_genres_list(state, req)),
        "genres.detail" => Some(handle_genres_detail(state, req)),
        "genres.createForm" => Some(handle_genres_create_form(state, req)),
        "genres.create" => Some(handle_genres_create(state, req)),
        "genres.updateForm" => Some(handle_genres_update_form(state, req)),
        "genres.update" => Some(handle_genres_update(state, req)),
        "genres.deleteForm" => Some(handle_genres_delete_form(state, req)),
        "genres.delete" => Some(handle_genres_delete(state, req)),
        _ => None,
    }
}
