//! JSON Pointer (RFC 6901) evaluation with the JMAP `*` extension.
//!
//! A `*` token applied to an array evaluates the rest of the pointer against
//! every element. Results that are themselves arrays are flattened one level
//! into the output, so `/list/*/threadId` yields a flat list of ids and
//! `/list/*/emailIds` a flat list of every thread's email ids.

use serde_json::Value as JsonValue;

/// Pointer evaluation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PointerError {
    #[error("pointer {0:?} must be empty or start with '/'")]
    Syntax(String),
    #[error("no member {0:?}")]
    MissingKey(String),
    #[error("{0:?} is not a valid array index")]
    InvalidIndex(String),
    #[error("index {index} out of range for array of length {len}")]
    OutOfRange { index: usize, len: usize },
    #[error("cannot index into {kind} with {token:?}")]
    NotContainer { kind: &'static str, token: String },
    #[error("wildcard applied to {0}, expected array")]
    WildcardOnNonArray(&'static str),
}

/// Escapes a single reference token (`~` → `~0`, `/` → `~1`).
#[must_use]
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Evaluates `path` against `doc`. The empty path selects the whole document.
///
/// # Errors
///
/// Returns a [`PointerError`] naming the first token that cannot be applied.
pub fn resolve(doc: &JsonValue, path: &str) -> Result<JsonValue, PointerError> {
    if path.is_empty() {
        return Ok(doc.clone());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PointerError::Syntax(path.to_string()));
    };
    let tokens: Vec<String> = rest.split('/').map(unescape_token).collect();
    evaluate(doc, &tokens)
}

fn evaluate(doc: &JsonValue, tokens: &[String]) -> Result<JsonValue, PointerError> {
    let Some((token, rest)) = tokens.split_first() else {
        return Ok(doc.clone());
    };

    if token == "*" {
        let JsonValue::Array(items) = doc else {
            return Err(PointerError::WildcardOnNonArray(kind(doc)));
        };
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match evaluate(item, rest)? {
                JsonValue::Array(nested) => out.extend(nested),
                other => out.push(other),
            }
        }
        return Ok(JsonValue::Array(out));
    }

    match doc {
        JsonValue::Object(map) => map
            .get(token)
            .ok_or_else(|| PointerError::MissingKey(token.clone()))
            .and_then(|child| evaluate(child, rest)),
        JsonValue::Array(items) => {
            let index = parse_index(token)?;
            let child = items.get(index).ok_or(PointerError::OutOfRange {
                index,
                len: items.len(),
            })?;
            evaluate(child, rest)
        }
        scalar => Err(PointerError::NotContainer {
            kind: kind(scalar),
            token: token.clone(),
        }),
    }
}

/// Array indices are decimal without leading zeros; `-` is never valid for
/// reads.
fn parse_index(token: &str) -> Result<usize, PointerError> {
    let valid = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if !valid {
        return Err(PointerError::InvalidIndex(token.to_string()));
    }
    token
        .parse()
        .map_err(|_| PointerError::InvalidIndex(token.to_string()))
}
