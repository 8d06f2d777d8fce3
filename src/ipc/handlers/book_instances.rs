use crate::derived;
use crate::ipc::error::{err, not_found, redirect, render};
use crate::ipc::types::{AppState, Request};
use crate::validate::{self, FieldError};
use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct InstanceRow {
    id: i64,
    imprint: String,
    status: String,
    due_back: Option<NaiveDate>,
    book_id: Option<i64>,
}

fn row_to_instance(row: &rusqlite::Row) -> rusqlite::Result<InstanceRow> {
    Ok(InstanceRow {
        id: row.get(0)?,
        imprint: row.get(1)?,
        status: row.get(2)?,
        due_back: derived::parse_date(row.get(3)?),
        book_id: row.get(4)?,
    })
}

fn instance_json(i: &InstanceRow) -> serde_json::Value {
    json!({
        "id": i.id,
        "imprint": i.imprint,
        "status": i.status,
        "due_back_formatted": derived::format_date_med(i.due_back),
        "due_back_yyyy_mm_dd": derived::format_date_iso(i.due_back),
        "url": derived::bookinstance_url(i.id),
    })
}

fn fetch_instance(conn: &Connection, id: i64) -> rusqlite::Result<Option<InstanceRow>> {
    conn.query_row(
        "SELECT id, imprint, status, due_back, book_id FROM book_instances WHERE id = ?",
        [id],
        row_to_instance,
    )
    .optional()
}

fn fetch_instance_book(conn: &Connection, i: &InstanceRow) -> rusqlite::Result<serde_json::Value> {
    let Some(book_id) = i.book_id else {
        return Ok(serde_json::Value::Null);
    };
    let book = conn
        .query_row("SELECT id, title FROM books WHERE id = ?", [book_id], |row| {
            let id: i64 = row.get(0)?;
            let title: String = row.get(1)?;
            Ok(json!({ "id": id, "title": title, "url": derived::book_url(id) }))
        })
        .optional()?;
    Ok(book.unwrap_or(serde_json::Value::Null))
}

/// Select-input options for the copy form, alphabetical by title.
fn fetch_book_options(conn: &Connection) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare("SELECT id, title FROM books ORDER BY title")?;
    let rows = stmt.query_map([], |row| {
        let id: i64 = row.get(0)?;
        let title: String = row.get(1)?;
        Ok(json!({ "id": id, "title": title }))
    })?;
    rows.collect()
}

struct InstanceForm {
    book: String,
    imprint: String,
    status: String,
    due_back: Option<NaiveDate>,
    due_back_raw: String,
}

fn validate_instance_form(params: &serde_json::Value) -> (InstanceForm, Vec<FieldError>) {
    let mut errors = Vec::new();
    let book = validate::param_str(params, "book");
    let imprint = validate::param_str(params, "imprint");
    let status = validate::param_str(params, "status");
    let due_back_raw = validate::param_str(params, "due_back");

    validate::check_min_len(&mut errors, "book", &book, 1, "Book must be specified");
    validate::check_min_len(&mut errors, "imprint", &imprint, 1, "Imprint must be specified");
    let due_back = validate::optional_iso_date(&mut errors, "due_back", &due_back_raw, "Invalid date");

    (
        InstanceForm {
            book: validate::escape(&book),
            imprint: validate::escape(&imprint),
            status: validate::escape(&status),
            due_back,
            due_back_raw,
        },
        errors,
    )
}

fn form_echo_json(form: &InstanceForm) -> serde_json::Value {
    json!({
        "book_id": form.book,
        "imprint": form.imprint,
        "status": form.status,
        "due_back_yyyy_mm_dd": match form.due_back {
            Some(d) => derived::format_date_iso(Some(d)),
            None => form.due_back_raw.clone(),
        },
    })
}

fn render_instance_form(
    conn: &Connection,
    req: &Request,
    title: &str,
    form: &InstanceForm,
    errors: Vec<FieldError>,
) -> serde_json::Value {
    let books = match fetch_book_options(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    render(
        &req.id,
        "bookinstance_form",
        json!({
            "title": title,
            "book_list": books,
            "bookinstance_data": form_echo_json(form),
            "errors": errors,
        }),
    )
}

fn handle_instances_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT bi.id, bi.imprint, bi.status, bi.due_back, bi.book_id, b.title
         FROM book_instances bi
         LEFT JOIN books b ON b.id = bi.book_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let instance = row_to_instance(row)?;
            let book_title: Option<String> = row.get(5)?;
            let mut value = instance_json(&instance);
            value["book"] = match (instance.book_id, book_title) {
                (Some(id), Some(title)) => {
                    json!({ "id": id, "title": title, "url": derived::book_url(id) })
                }
                _ => serde_json::Value::Null,
            };
            Ok(value)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(instances) => render(
            &req.id,
            "bookinstance_list",
            json!({
                "title": "Book Instance List",
                "bookinstance_list": instances,
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_instances_detail(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let instance = match fetch_instance(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(instance) = instance else {
        return not_found(&req.id, "Book copy not found");
    };

    let book = match fetch_instance_book(conn, &instance) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut value = instance_json(&instance);
    value["book"] = book;
    render(
        &req.id,
        "bookinstance_detail",
        json!({
            "title": "Book Instance Detail",
            "bookinstance": value,
        }),
    )
}

fn handle_instances_create_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let books = match fetch_book_options(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    render(
        &req.id,
        "bookinstance_form",
        json!({
            "title": "Create BookInstance",
            "book_list": books,
        }),
    )
}

fn handle_instances_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let (form, errors) = validate_instance_form(&req.params);
    if !errors.is_empty() {
        return render_instance_form(conn, req, "Create BookInstance", &form, errors);
    }

    let Ok(book_id) = form.book.parse::<i64>() else {
        return err(&req.id, "bad_params", "invalid book id", None);
    };
    let status = if form.status.is_empty() {
        "Maintenance".to_string()
    } else {
        form.status
    };
    let due_back = form
        .due_back
        .unwrap_or_else(|| Local::now().date_naive())
        .format("%Y-%m-%d")
        .to_string();

    if let Err(e) = conn.execute(
        "INSERT INTO book_instances(imprint, status, due_back, book_id) VALUES(?, ?, ?, ?)",
        (&form.imprint, &status, &due_back, book_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "book_instances" })),
        );
    }

    redirect(&req.id, &derived::bookinstance_url(conn.last_insert_rowid()))
}

fn handle_instances_update_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let instance = match fetch_instance(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(instance) = instance else {
        return not_found(&req.id, "Book copy not found");
    };

    let books = match fetch_book_options(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut value = instance_json(&instance);
    value["book_id"] = json!(instance.book_id);
    render(
        &req.id,
        "bookinstance_form",
        json!({
            "title": "Update BookInstance",
            "bookinstance_data": value,
            "book_list": books,
        }),
    )
}

fn handle_instances_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let (form, errors) = validate_instance_form(&req.params);
    if !errors.is_empty() {
        return render_instance_form(conn, req, "Update BookInstance", &form, errors);
    }

    let existing = match fetch_instance(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_none() {
        return not_found(&req.id, "Book copy not found");
    }

    let Ok(book_id) = form.book.parse::<i64>() else {
        return err(&req.id, "bad_params", "invalid book id", None);
    };
    let status = if form.status.is_empty() {
        "Maintenance".to_string()
    } else {
        form.status
    };
    let due_back = form
        .due_back
        .unwrap_or_else(|| Local::now().date_naive())
        .format("%Y-%m-%d")
        .to_string();

    if let Err(e) = conn.execute(
        "UPDATE book_instances SET imprint = ?, status = ?, due_back = ?, book_id = ? WHERE id = ?",
        (&form.imprint, &status, &due_back, book_id, id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "book_instances" })),
        );
    }

    redirect(&req.id, &derived::bookinstance_url(id))
}

fn handle_instances_delete_form(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let instance = match fetch_instance(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(instance) = instance else {
        return redirect(&req.id, "/catalog/bookinstances");
    };

    let book = match fetch_instance_book(conn, &instance) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut value = instance_json(&instance);
    value["book"] = book;
    render(
        &req.id,
        "bookinstance_delete",
        json!({
            "title": "Delete BookInstance",
            "bookinstance": value,
        }),
    )
}

fn handle_instances_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(id) = validate::param_id(&req.params, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let instance = match fetch_instance(conn, id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if instance.is_none() {
        return redirect(&req.id, "/catalog/bookinstances");
    }

    // Copies have no dependents; deletion is unconditional.
    if let Err(e) = conn.execute("DELETE FROM book_instances WHERE id = ?", [id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "book_instances" })),
        );
    }

    redirect(&req.id, "/catalog/bookinstances")
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bookinstances.list" => Some(handle_instances_list(state, req)),
        "bookinstances.detail" => Some(handle_instances_detail(state, req)),
        "bookinstances.createForm" => Some(handle_instances_create_form(state, req)),
        "bookinstances.create" => Some(handle_instances_create(state, req)),
        "bookinstances.updateForm" => Some(handle_instances_update_form(state, req)),
        "bookinstances.update" => Some(handle_instances_update(state, req)),
        "bookinstances.deleteForm" => Some(handle_instances_delete_form(state, req)),
        "bookinstances.delete" => Some(handle_instances_delete(state, req)),
        _ => None,
    }
}
