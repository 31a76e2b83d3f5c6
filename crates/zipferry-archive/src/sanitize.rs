//! Name sanitization for entry file names that become object-key segments.

/// Characters rejected by common filesystems and object-key conventions.
const RESERVED: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

/// Longest segment emitted, in bytes.
pub const MAX_SEGMENT_LEN: usize = 200;

/// Fallback segment for names that sanitize to nothing.
pub const UNNAMED: &str = "unnamed";

/// Strip any directory prefix, accepting both separators.
pub fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Sanitize one path component.
///
/// Control characters are dropped, reserved characters and separators become
/// `_`, and runs of dots collapse to one so `..` can never survive.
pub fn sanitize_component(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    let mut prev_dot = false;
    for c in component.chars() {
        if c.is_control() {
            continue;
        }
        if c == '.' {
            if prev_dot {
                continue;
            }
            prev_dot = true;
            out.push('.');
            continue;
        }
        prev_dot = false;
        if RESERVED.contains(&c) {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    truncate_at_boundary(out.trim().to_string(), MAX_SEGMENT_LEN)
}

/// Whether `segment` can be used verbatim as one object-key segment.
pub fn is_path_safe(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.chars().all(|c| c == '.')
        && !segment.contains("..")
        && !segment.chars().any(|c| c.is_control() || RESERVED.contains(&c))
}

/// Sanitize an entry name into the file-name segment of an output key.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized = sanitize_component(base_name(name));
    if is_path_safe(&sanitized) {
        sanitized
    } else {
        UNNAMED.to_string()
    }
}

fn truncate_at_boundary(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("a/b/c.csv"), "c.csv");
        assert_eq!(base_name("a\\b\\c.csv"), "c.csv");
        assert_eq!(base_name("c.csv"), "c.csv");
        assert_eq!(base_name("dir/"), "");
    }

    #[test]
    fn control_characters_dropped() {
        assert_eq!(sanitize_component("re\u{0}po\u{7}rt\n.csv"), "report.csv");
    }

    #[test]
    fn reserved_characters_replaced() {
        assert_eq!(sanitize_component("a<b>c:d|e?f*g\"h"), "a_b_c_d_e_f_g_h");
    }

    #[test]
    fn traversal_collapsed() {
        assert_eq!(sanitize_component(".."), ".");
        assert_eq!(sanitize_component("report..csv"), "report.csv");
        assert!(!sanitize_component("....secret").contains(".."));
    }

    #[test]
    fn path_safety() {
        assert!(is_path_safe("badge"));
        assert!(is_path_safe("report.csv"));
        assert!(!is_path_safe(""));
        assert!(!is_path_safe("..."));
        assert!(!is_path_safe("a/b"));
        assert!(!is_path_safe("a\u{1}b"));
    }

    #[test]
    fn sanitize_filename_falls_back() {
        assert_eq!(sanitize_filename("dir/report.csv"), "report.csv");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(".."), UNNAMED);
        assert_eq!(sanitize_filename("dir/"), UNNAMED);
    }

    #[test]
    fn long_names_truncated_on_char_boundary() {
        let name = "é".repeat(150);
        let out = sanitize_component(&name);
        assert!(out.len() <= MAX_SEGMENT_LEN);
        assert!(out.chars().all(|c| c == 'é'));
    }
}
