//! Grouping-key extraction from entry file names.
//!
//! `2026-01-01__2026-01-02_app_registration_report.csv` groups under
//! `app_registration_report`: the base name is split on `_`, ISO date parts
//! are dropped, and the remaining parts are joined back from the first
//! meaningful one.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::sanitize::{base_name, is_path_safe, sanitize_component};

/// Stem used when nothing meaningful survives extraction.
pub const UNKNOWN_STEM: &str = "unknown";

static DATE_PART: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap());

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilenameComponents {
    pub base_name: String,
    pub extension: Option<String>,
    pub date_parts: Vec<String>,
    pub non_date_parts: Vec<String>,
    pub stem_name: String,
}

pub fn is_date_part(part: &str) -> bool {
    DATE_PART.is_match(part)
}

/// Split a file name into its date and non-date parts and derive the stem.
///
/// Total over every input: the stem is always non-empty and path-safe, and
/// extracting the stem of a stem returns it unchanged.
pub fn parse_filename(name: &str) -> FilenameComponents {
    let file_name = sanitize_component(base_name(name));

    let (base, extension) = match file_name.rfind('.') {
        Some(i) => (&file_name[..i], Some(file_name[i + 1..].to_string())),
        None => (file_name.as_str(), None),
    };
    // Inner dots would become a new extension boundary on re-extraction.
    let base = base.trim().replace('.', "_");

    let mut date_parts = Vec::new();
    let mut non_date_parts = Vec::new();
    for part in base.split('_') {
        // Classify the trimmed form; a padded date would otherwise survive into the stem.
        let part = sanitize_component(part);
        if is_date_part(&part) {
            date_parts.push(part);
        } else {
            non_date_parts.push(part);
        }
    }

    let stem_name = non_date_parts
        .iter()
        .position(|p| !p.is_empty() && p != "_")
        .map(|start| non_date_parts[start..].join("_").trim().to_string())
        .filter(|stem| is_path_safe(stem))
        .unwrap_or_else(|| UNKNOWN_STEM.to_string());

    FilenameComponents {
        base_name: base,
        extension: extension.filter(|e| !e.is_empty()),
        date_parts,
        non_date_parts,
        stem_name,
    }
}

pub fn extract_stem(name: &str) -> String {
    parse_filename(name).stem_name
}
