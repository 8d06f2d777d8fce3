use chrono::NaiveDate;
use serde::Serialize;

/// One failed field rule. Handlers collect these in rule order and hand
/// them to the form view untouched.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

pub fn field_error(field: &'static str, message: &str) -> FieldError {
    FieldError {
        field,
        message: message.to_string(),
    }
}

/// HTML-escape a submitted value before it is stored or echoed back.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            '\\' => out.push_str("&#x5C;"),
            '`' => out.push_str("&#96;"),
            _ => out.push(c),
        }
    }
    out
}

/// Trimmed string param; absent fields read as "".
pub fn param_str(params: &serde_json::Value, key: &str) -> String {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

/// Row ids arrive as path-segment strings or JSON numbers.
pub fn param_id(params: &serde_json::Value, key: &str) -> Option<i64> {
    match params.get(key) {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Multi-select fields may arrive as a scalar, a sequence, or not at all.
pub fn param_seq(params: &serde_json::Value, key: &str) -> Vec<String> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| match v.as_str() {
                Some(s) => s.trim().to_string(),
                None => v.to_string(),
            })
            .collect(),
        Some(serde_json::Value::String(s)) => vec![s.trim().to_string()],
        Some(other) => vec![other.to_string()],
    }
}

pub fn check_min_len(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    value: &str,
    min: usize,
    message: &str,
) {
    if value.chars().count() < min {
        errors.push(field_error(field, message));
    }
}

pub fn check_max_len(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    value: &str,
    max: usize,
    message: &str,
) {
    if value.chars().count() > max {
        errors.push(field_error(field, message));
    }
}

pub fn check_alphanumeric(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    value: &str,
    message: &str,
) {
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) || value.is_empty() {
        errors.push(field_error(field, message));
    }
}

/// "Optional when falsy": an empty value is absent, not invalid.
pub fn optional_iso_date(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    value: &str,
    message: &str,
) -> Option<NaiveDate> {
    if value.is_empty() {
        return None;
    }
    match NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            errors.push(field_error(field, message));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escape_covers_markup_characters() {
        assert_eq!(escape("Tom & Jerry"), "Tom &amp; Jerry");
        assert_eq!(escape("<b>\"x\"</b>"), "&lt;b&gt;&quot;x&quot;&lt;&#x2F;b&gt;");
        assert_eq!(escape("O'Brien"), "O&#x27;Brien");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn param_seq_normalizes_scalar_and_missing() {
        let p = json!({ "genre": "3" });
        assert_eq!(param_seq(&p, "genre"), vec!["3".to_string()]);

        let p = json!({ "genre": ["1", "2"] });
        assert_eq!(param_seq(&p, "genre"), vec!["1".to_string(), "2".to_string()]);

        let p = json!({});
        assert!(param_seq(&p, "genre").is_empty());

        let p = json!({ "genre": null });
        assert!(param_seq(&p, "genre").is_empty());
    }

    #[test]
    fn optional_date_treats_empty_as_absent() {
        let mut errors = Vec::new();
        assert_eq!(optional_iso_date(&mut errors, "due_back", "", "Invalid date"), None);
        assert!(errors.is_empty());

        let parsed = optional_iso_date(&mut errors, "due_back", "2024-03-15", "Invalid date");
        assert_eq!(
            parsed,
            Some(chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap())
        );
        assert!(errors.is_empty());

        assert_eq!(
            optional_iso_date(&mut errors, "due_back", "15/03/2024", "Invalid date"),
            None
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "due_back");
        assert_eq!(errors[0].message, "Invalid date");
    }

    #[test]
    fn length_and_alnum_rules() {
        let mut errors = Vec::new();
        check_min_len(&mut errors, "name", "ab", 3, "too short");
        check_max_len(&mut errors, "name", "abcd", 3, "too long");
        check_alphanumeric(&mut errors, "name", "a b", "not alnum");
        check_alphanumeric(&mut errors, "name", "", "not alnum");
        assert_eq!(errors.len(), 4);

        let mut errors = Vec::new();
        check_min_len(&mut errors, "name", "abc", 3, "too short");
        check_alphanumeric(&mut errors, "name", "Jane9", "not alnum");
        assert!(errors.is_empty());
    }
}
