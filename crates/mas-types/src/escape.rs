//! Reversible escaping of keys and names into single path components.
//!
//! Only `%`, `/` and `\` are rewritten (`%25`, `%2F`, `%5C`), so the escaped
//! form is readable and never contains a path separator.

use crate::error::TypeError;

/// Escape `raw` so it can be used as one path component.
pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            '\\' => out.push_str("%5C"),
            other => out.push(other),
        }
    }
    out
}

/// Reverse [`escape_component`].
pub fn unescape_component(escaped: &str) -> Result<String, TypeError> {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let seq = rest
            .get(pos..pos + 3)
            .ok_or_else(|| TypeError::InvalidEscape(escaped.to_string()))?;
        match seq {
            "%25" => out.push('%'),
            "%2F" => out.push('/'),
            "%5C" => out.push('\\'),
            _ => return Err(TypeError::InvalidEscape(escaped.to_string())),
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn separators_are_escaped() {
        assert_eq!(
            escape_component("Lorg/eclipse/swt/Button"),
            "Lorg%2Feclipse%2Fswt%2FButton"
        );
        assert_eq!(escape_component("50%"), "50%25");
        assert_eq!(escape_component("a\\b"), "a%5Cb");
    }

    #[test]
    fn plain_text_unchanged() {
        assert_eq!(escape_component("Foo#bar"), "Foo#bar");
    }

    #[test]
    fn bad_sequences_rejected() {
        assert!(unescape_component("%").is_err());
        assert!(unescape_component("%2").is_err());
        assert!(unescape_component("%41").is_err());
    }

    proptest! {
        #[test]
        fn escape_is_reversible(raw in ".*") {
            let escaped = escape_component(&raw);
            prop_assert!(!escaped.contains('/'));
            prop_assert!(!escaped.contains('\\'));
            prop_assert_eq!(unescape_component(&escaped).unwrap(), raw);
        }
    }
}
