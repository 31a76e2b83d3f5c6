use once_cell::sync::Lazy;
use regex::Regex;

/// Longest cell still considered a column name.
pub const MAX_HEADER_LEN: usize = 64;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}_][\p{L}\p{N}_ .\-/()#]*$").expect("valid identifier regex"));

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(\d[\d,]*(\.\d+)?|\.\d+)([eE][+-]?\d+)?%?$").expect("valid number regex")
});

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,4}[-/.]\d{1,2}[-/.]\d{1,4}([ T]\d{1,2}:\d{2}(:\d{2}(\.\d+)?)?\s*(Z|[+-]\d{2}:?\d{2})?)?$")
        .expect("valid date regex")
});

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(https?|ftp)://\S+$|^www\.\S+$").expect("valid url regex"));

/// Column names accepted even when they fail the identifier pattern.
const COMMON_HEADERS: &[&str] = &[
    "e-mail",
    "e-mail address",
    "zip/postal code",
    "amount ($)",
    "price ($)",
    "cost ($)",
    "% complete",
    "#",
    "no.",
    "s/n",
    "y/n",
    "first name",
    "last name",
    "phone #",
    "account #",
    "order #",
];

fn is_header_cell(cell: &str) -> bool {
    let cell = cell.trim();
    if cell.chars().count() > MAX_HEADER_LEN {
        return false;
    }
    let has_letter = cell.chars().any(char::is_alphabetic);
    let lower = cell.to_lowercase();
    if COMMON_HEADERS.contains(&lower.as_str()) {
        return true;
    }
    if !has_letter {
        return false;
    }
    if NUMBER.is_match(cell) || DATE.is_match(cell) || EMAIL.is_match(cell) || URL.is_match(cell) {
        return false;
    }
    IDENTIFIER.is_match(cell)
}

/// Whether `record` is a header row.
///
/// All-or-nothing: every non-empty cell must look like a column name. A record
/// with no non-empty cells is not a header.
pub fn looks_like_header(record: &[String]) -> bool {
    let mut cells = record.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).peekable();
    cells.peek().is_some() && cells.all(is_header_cell)
}
