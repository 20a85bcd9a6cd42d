//! Conversion between internal snake_case field names and camelCase wire keys.
//!
//! `from` is a reserved word in several client languages, so the field is
//! named `from_` internally and maps to `from` on the wire.

/// Converts a snake_case name to its camelCase wire key.
///
/// Every component after the first is title-cased. A trailing underscore
/// (as in `from_`) is dropped.
#[must_use]
pub fn to_camel_case(snake: &str) -> String {
    let mut components = snake.split('_');
    let mut out = String::with_capacity(snake.len());
    if let Some(first) = components.next() {
        out.push_str(first);
    }
    for component in components {
        let mut chars = component.chars();
        if let Some(head) = chars.next() {
            out.extend(head.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }
    out
}

/// Converts a camelCase wire key (or a dashed/dotted/spaced name) to
/// snake_case. `from` becomes `from_`.
#[must_use]
pub fn to_snake_case(name: &str) -> String {
    let normalized: String = name
        .chars()
        .map(|c| {
            if c == '-' || c == '.' || c.is_whitespace() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let mut chars = normalized.chars();
    let Some(first) = chars.next() else {
        return normalized;
    };

    let mut out = String::with_capacity(normalized.len() + 4);
    out.extend(first.to_lowercase());
    for c in chars {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }

    if out == "from" {
        out.push('_');
    }
    out
}
