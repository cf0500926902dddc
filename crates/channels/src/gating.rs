//! User and channel allowlists.
//!
//! Patterns match case-insensitively; `*` stands for any run of characters.

/// An empty list admits everyone.
pub fn is_allowed(name: &str, allowlist: &[String]) -> bool {
    allowlist.is_empty() || matches_any(name, allowlist)
}

/// Whether `name` matches at least one pattern. An empty list matches
/// nothing, which is what `IgnoreUsers` wants.
pub fn matches_any(name: &str, patterns: &[String]) -> bool {
    let name = name.to_lowercase();
    patterns
        .iter()
        .any(|p| wildcard(p.to_lowercase().as_bytes(), name.as_bytes()))
}

fn wildcard(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|skip| wildcard(rest, &text[skip..])),
        Some((c, rest)) => text
            .split_first()
            .is_some_and(|(t, tail)| t == c && wildcard(rest, tail)),
    }
}
