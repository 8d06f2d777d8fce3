use crate::derived;
use crate::ipc::error::{err, not_found, redirect, render};
use crate::ipc::types::{AppState, Request};
use crate::validate::{self, FieldError};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct AuthorRow {
    id: i64,
    first_name: String,
    family_name: String,
    date_of_birth: Option<NaiveDate>,
    date_of_death: Option<NaiveDate>,
}

fn row_to_author(row: &rusqlite::Row) -> rusqlite::Result<AuthorRow> {
    Ok(AuthorRow {
        id: row.get(0)?,
        first_name: row.get(1)?,
        family_name: row.get(2)?,
        date_of_birth: derived::parse_date(row.get(3)?),
        date_of_death: derived::parse_date(row.get(4)?),
    })
}

fn author_json(a: &AuthorRow) -> serde_json::Value {
    json!({
        "id": a.id,
        "first_name": a.first_name,
        "family_name": a.family_name,
        "full_name": derived::author_full_name(&a.first_name, &a.family_name),
        "date_of_birth_formatted": derived::format_date_med(a.date_of_birth),
        "date_of_birth_yyyy_mm_dd": derived::format_date_iso(a.date_of_birth),
        "date_of_death_formatted": derived::format_date_med(a.date_of_death),
        "date_of_death_yyyy_mm_dd": derived::format_date_iso(a.date_of_death),
        "lifespan": derived::lifespan(a.date_of_birth, a.date_of_death),
        "url": derived::author_url(a.id),
    })
}

fn fetch_author(conn: &Connection, id: i64) -> rusqlite::Result<Option<AuthorRow>> {
    conn.query_row(
        "SELECT id, first_name, family_name, date_of_birth, date_of_death
         FROM authors WHERE id = ?",
        [id],
        row_to_author,
    )
    .optional()
}

fn fetch_books_by_author(
    conn: &Connection,
    author_id: i64,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, summary FROM books WHERE author_id = ? ORDER BY title",
    )?;
    let rows = stmt.query_map([author_id], |row| {
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

struct AuthorForm {
    first_name: String,
    family_name: String,
    date_of_birth: Option<NaiveDate>,
    date_of_death: Option<NaiveDate>,
    date_of_birth_raw: String,
    date_of_death_raw: String,
}

fn validate_author_form(params: &serde_json::Value) -> (AuthorForm, Vec<FieldError>) {
    let mut errors = Vec::new();
    let first_name = validate::param_str(params, "first_name");
    let family_name = validate::param_str(params, "family_name");
    let birth_raw = validate::param_str(params, "date_of_birth");
    let death_raw = validate::param_str(params, "date_of_death");

    validate::check_min_len(
        &mut errors,
        "first_name",
        &first_name,
        1,
        "First name must be specified.",
    );
    validate::check_alphanumeric(
        &mut errors,
        "first_name",
        &first_name,
        "First name has non-alphanumeric characters.",
    );
    validate::check_min_len(
        &mut errors,
        "family_name",
        &family_name,
        1,
        "Family name must be specified.",
    );
    validate::check_alphanumeric(
        &mut errors,
        "family_name",
        &family_name,
        "Family name has non-alphanumeric characters.",
    );
    let date_of_birth =
        validate::optional_iso_date(&mut errors, "date_of_birth", &birth_raw, "Invalid date of birth.");
    let date_of_death =
        validate::optional_iso_date(&mut errors, "date_of_death", &death_raw, "Invalid date of death.");

    (
        AuthorForm {
            first_name: validate::escape(&first_name),
            family_name: validate::escape(&family_name),
            date_of_birth,
            date_of_death,
            date_of_birth_raw: birth_raw,
            date_of_death_raw: death_raw,
        },
        errors,
    )
}

/// Unsaved author echoed back into the form after a validation failure.
fn form_echo_json(form: &AuthorForm) -> serde_json::Value {
    json!({
        "first_name": form.first_name,
        "family_name": form.family_name,
        "full_name": derived::author_full_name(&form.first_name, &form.family_name),
        "date_of_birth_yyyy_mm_dd": form.date_of_birth_raw,
        "date_of_death_yyyy_mm_dd": form.date_of_death_raw,
    })
}

fn handle_authors_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, first_name, family_name, date_of_birth, date_of_death
         FROM authors ORDER BY family_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], row_to_author)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(authors) => render(
            &req.id,
            "author_list",
            json!({
                "title": "Author List",
                "author_list": authors.iter().map(author_json).collect::<Vec<_>>(),
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_authors_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let author = match fetch_author(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(author) = author else {
        log::debug!("author id not found on detail: {id}");
        return not_found(&req.id, "Author not found");
    };

    let books = match fetch_books_by_author(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    render(
        &req.id,
        "author_detail",
        json!({
            "title": "Author Detail",
            "author": author_json(&author),
            "author_books": books,
        }),
    )
}

fn handle_authors_create_form(_state: &mut AppState, req: &Request) -> serde_json::Value {
    render(&req.id, "author_form", json!({ "title": "Create Author" }))
}

fn handle_authors_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (form, errors) = validate_author_form(&req.params);
    if !errors.is_empty() {
        return render(
            &req.id,
            "author_form",
            json!({
                "title": "Create Author",
                "author": form_echo_json(&form),
                "errors": errors,
            }),
        );
    }

    let birth = form.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string());
    let death = form.date_of_death.map(|d| d.format("%Y-%m-%d").to_string());
    if let Err(e) = conn.execute(
        "INSERT INTO authors(first_name, family_name, date_of_birth, date_of_death)
         VALUES(?, ?, ?, ?)",
        (&form.first_name, &form.family_name, &birth, &death),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "authors" })),
        );
    }

    redirect(&req.id, &derived::author_url(conn.last_insert_rowid()))
}

fn handle_authors_update_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let author = match fetch_author(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(author) = author else {
        log::debug!("author id not found on get update: {id}");
        return not_found(&req.id, "Author not found");
    };

    render(
        &req.id,
        "author_form",
        json!({
            "title": "Update Author",
            "author": author_json(&author),
        }),
    )
}

fn handle_authors_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let (form, errors) = validate_author_form(&req.params);
    if !errors.is_empty() {
        return render(
            &req.id,
            "author_form",
            json!({
                "title": "Update Author",
                "author": form_echo_json(&form),
                "errors": errors,
            }),
        );
    }

    let existing = match fetch_author(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_none() {
        return not_found(&req.id, "Author not found");
    }

    let birth = form.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string());
    let death = form.date_of_death.map(|d| d.format("%Y-%m-%d").to_string());
    if let Err(e) = conn.execute(
        "UPDATE authors
         SET first_name = ?, family_name = ?, date_of_birth = ?, date_of_death = ?
         WHERE id = ?",
        (&form.first_name, &form.family_name, &birth, &death, id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "authors" })),
        );
    }

    redirect(&req.id, &derived::author_url(id))
}

fn handle_authors_delete_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let author = match fetch_author(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Nothing to delete; send the caller back to the list.
    let Some(author) = author else {
        return redirect(&req.id, "/catalog/authors");
    };

    let books = match fetch_books_by_author(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    render(
        &req.id,
        "author_delete",
        json!({
            "title": "Delete Author",
            "author": author_json(&author),
            "author_books": books,
        }),
    )
}

fn handle_authors_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    // Re-check dependents at delete time, not just on the confirm page.
    let author = match fetch_author(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(author) = author else {
        return redirect(&req.id, "/catalog/authors");
    };

    let books = match fetch_books_by_author(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !books.is_empty() {
        return render(
            &req.id,
            "author_delete",
            json!({
                "title": "Delete Author",
                "author": author_json(&author),
                "author_books": books,
            }),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM authors WHERE id = ?", [id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "authors" })),
        );
    }

    redirect(&req.id, "/catalog/authors")
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "authors.list" => Some(handle_authors_list(state, req)),
        "authors.detail" => Some(handle_authors_detail(state, req)),
        "authors.createForm" => Some(handle_authors_create_form(state, req)),
        "authors.create" => Some(handle_authors_create(state, req)),
        "authors.updateForm" => Some(handle_authors_update_form(state, req)),
        "authors.update" => Some(handle_authors_update(state, req)),
        "authors.deleteForm" => Some(handle_authors_delete_form(state, req)),
        "authors.delete" => Some(handle_authors_delete(state, req)),
        _ => None,
    }
}
