use chrono::NaiveDate;

/// "Family, First" as shown on author pages. Empty when either part is
/// missing, matching the stored-row contract (both columns are NOT NULL
/// but unsaved form echoes may carry blanks).
pub fn author_full_name(first_name: &str, family_name: &str) -> String {
    if first_name.is_empty() || family_name.is_empty() {
        return String::new();
    }
    format!("{}, {}", family_name, first_name)
}

/// "(*Jun 6, 1973, †Apr 6, 1992)" — either side may be absent; the whole
/// string is empty when both are.
pub fn lifespan(date_of_birth: Option<NaiveDate>, date_of_death: Option<NaiveDate>) -> String {
    if date_of_birth.is_none() && date_of_death.is_none() {
        return String::new();
    }
    let mut out = String::from("(");
    if let Some(d) = date_of_birth {
        out.push('*');
        out.push_str(&format_date_med(Some(d)));
    }
    if let Some(d) = date_of_death {
        out.push_str(", †");
        out.push_str(&format_date_med(Some(d)));
    }
    out.push(')');
    out
}

/// Medium date style, e.g. "Jun 6, 1973". Empty string for no date.
pub fn format_date_med(date: Option<NaiveDate>) -> String {
    match date {
        Some(d) => d.format("%b %-d, %Y").to_string(),
        None => String::new(),
    }
}

/// "yyyy-mm-dd", the value form inputs round-trip. Empty string for no date.
pub fn format_date_iso(date: Option<NaiveDate>) -> String {
    match date {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => String::new(),
    }
}

/// Stored date columns are "yyyy-mm-dd" TEXT; anything else reads as absent.
pub fn parse_date(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

pub fn author_url(id: i64) -> String {
    format!("/catalog/author/{}", id)
}

pub fn book_url(id: i64) -> String {
    format!("/catalog/book/{}", id)
}

pub fn genre_url(id: i64) -> String {
    format!("/catalog/genre/{}", id)
}

pub fn bookinstance_url(id: i64) -> String {
    format!("/catalog/bookinstance/{}", id)
}
