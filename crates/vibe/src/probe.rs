//! String probes
//!
//! Whether a value is a component factory, an element or a string is decided
//! by the `Component`, `Target` and `Content` enums; what remains here are
//! the predicates that look inside strings.

use std::sync::LazyLock;

use regex::Regex;

static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d+$").expect("valid regex"));
static NON_PRINTABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\x20-\x7E]+").expect("valid regex"));
static NOT_STRICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[^a-z0-9\-#]+").expect("valid regex"));

/// Optional minus sign followed by digits only
pub fn is_number(value: &str) -> bool {
    INTEGER.is_match(value)
}

/// True when the string contains at least one element
pub fn is_html(value: &str) -> bool {
    dom::markup::is_html(value)
}

/// Strip non-printable ASCII. Strict mode keeps only `[a-z0-9-#]`, which is
/// safe to splice into ids and selectors.
pub fn filter_string(value: &str, strict: bool) -> String {
    let mut out = NON_PRINTABLE.replace_all(value, "").into_owned();
    if strict {
        out = NOT_STRICT.replace_all(&out, "").into_owned();
    }
    out.trim().to_string()
}

/// `"12.6px"` → `13`
pub fn rpx(value: &str) -> Option<i64> {
    value
        .replace("px", "")
        .trim()
        .parse::<f64>()
        .ok()
        .map(|v| v.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_number() {
        assert!(is_number("42"));
        assert!(is_number("-7"));
        assert!(!is_number("4.2"));
        assert!(!is_number("12px"));
        assert!(!is_number(""));
    }

    #[test]
    fn test_filter_string() {
        assert_eq!(filter_string("  héllo\tworld ", false), "hlloworld");
        assert_eq!(filter_string("My Id #1!", true), "MyId#1");
    }

    #[test]
    fn test_rpx() {
        assert_eq!(rpx("12.6px"), Some(13));
        assert_eq!(rpx("-3px"), Some(-3));
        assert_eq!(rpx("auto"), None);
    }
}
