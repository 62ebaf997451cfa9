//! Name conversion from physical column names (snake_case) to display names (PascalCase).

/// Segments rendered fully upper-case in display names.
const ACRONYMS: &[&str] = &["id", "uid", "url", "uri", "crs"];

/// Convert a physical identifier to its display name.
/// e.g. "name" -> "Name", "parent_uid" -> "ParentUID", "source_url" -> "SourceURL"
pub fn to_display_name(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for part in s.split('_').filter(|p| !p.is_empty()) {
        if ACRONYMS.contains(&part.to_ascii_lowercase().as_str()) {
            out.push_str(&part.to_ascii_uppercase());
            continue;
        }
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Key used for case-insensitive column lookup.
pub fn lookup_key(s: &str) -> String {
    s.to_lowercase()
}
