use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// A page render: the named view plus its model. Every model carries a
/// "title" alongside the entity payload.
pub fn render(id: &str, view: &str, model: serde_json::Value) -> serde_json::Value {
    ok(id, json!({ "render": { "view": view, "model": model } }))
}

pub fn redirect(id: &str, location: &str) -> serde_json::Value {
    ok(id, json!({ "redirect": location }))
}

/// Missing-row error, tagged for the surrounding error page.
pub fn not_found(id: &str, message: impl Into<String>) -> serde_json::Value {
    err(id, "not_found", message, Some(json!({ "status": 404 })))
}
