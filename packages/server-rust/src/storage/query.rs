//! Filtering, sorting and windowing shared by the `/query` methods.

use std::cmp::Ordering;

use jmap_core::case::to_snake_case;
use jmap_core::{MethodError, Record, Value};

/// Evaluates a `FilterOperator`/condition tree, calling `test` on each leaf
/// condition.
///
/// # Errors
///
/// Propagates errors from `test`, and reports malformed operators as
/// `unsupportedFilter`.
pub fn matches<F>(filter: &Record, test: &F) -> Result<bool, MethodError>
where
    F: Fn(&Record) -> Result<bool, MethodError>,
{
    if filter.schema().field("conditions").is_none() {
        return test(filter);
    }

    let operator = filter.str("operator").unwrap_or_default();
    let conditions = filter.list("conditions").unwrap_or_default();
    let mut any = false;
    let mut all = true;
    for condition in conditions {
        let Some(condition) = condition.as_record() else {
            return Err(MethodError::unsupported_filter("filter condition must be an object"));
        };
        if matches(condition, test)? {
            any = true;
        } else {
            all = false;
        }
    }
    match operator {
        "And" => Ok(all),
        "Or" => Ok(any),
        "Not" => Ok(!any),
        other => Err(MethodError::unsupported_filter(format!(
            "unknown filter operator {other:?}"
        ))),
    }
}

/// Case-insensitive substring test.
#[must_use]
pub fn contains_text(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Int(x)), Some(Value::Int(y))) => x.cmp(y),
        (Some(Value::Date(x)), Some(Value::Date(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(a), Some(b)) => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        },
        (Some(v), None) if !v.is_null() => Ordering::Greater,
        (None, Some(v)) if !v.is_null() => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// Sorts `items` by the `sort` comparator records. Only `sortable`
/// properties (camelCase) are accepted. Ties fall back to the `id` field.
///
/// # Errors
///
/// Returns `unsupportedSort` for any other property.
pub fn sort_records(
    items: &mut [&Record],
    sort: &[Value],
    sortable: &[&str],
) -> Result<(), MethodError> {
    let mut keys: Vec<(String, bool)> = Vec::with_capacity(sort.len());
    for comparator in sort {
        let Some(comparator) = comparator.as_record() else {
            return Err(MethodError::unsupported_sort("comparator must be an object"));
        };
        let property = comparator.str("property").unwrap_or_default();
        if !sortable.contains(&property) {
            return Err(MethodError::unsupported_sort(format!(
                "cannot sort by {property:?}"
            )));
        }
        keys.push((
            to_snake_case(property),
            comparator.bool("is_ascending").unwrap_or(true),
        ));
    }

    items.sort_by(|a, b| {
        for (field, ascending) in &keys {
            let ord = compare_values(a.get(field), b.get(field));
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.str("id").cmp(&b.str("id"))
    });
    Ok(())
}

/// A page of query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Index of the first returned id in the full result.
    pub position: usize,
    pub ids: Vec<String>,
    pub total: usize,
}

/// Applies `position`/`anchor`/`anchorOffset`/`limit` from `args` to the
/// sorted `ids`.
///
/// # Errors
///
/// `anchorNotFound` if `anchor` is not among `ids`.
pub fn window(ids: Vec<String>, args: &Record) -> Result<Window, MethodError> {
    let total = ids.len();
    let start = match args.str("anchor") {
        Some(anchor) => {
            let idx = ids
                .iter()
                .position(|id| id == anchor)
                .ok_or_else(|| MethodError::anchor_not_found(format!("{anchor} is not in the results")))?;
            offset(idx, args.int("anchor_offset").unwrap_or(0))
        }
        None => {
            let position = args.int("position").unwrap_or(0);
            if position < 0 {
                offset(total, position)
            } else {
                usize::try_from(position).unwrap_or(usize::MAX)
            }
        }
    };
    let start = start.min(total);
    let limit = args
        .int("limit")
        .and_then(|l| usize::try_from(l).ok())
        .unwrap_or(usize::MAX);
    let ids = ids.into_iter().skip(start).take(limit).collect();
    Ok(Window {
        position: start,
        ids,
        total,
    })
}

fn offset(base: usize, delta: i64) -> usize {
    let magnitude = usize::try_from(delta.unsigned_abs()).unwrap_or(usize::MAX);
    if delta < 0 {
        base.saturating_sub(magnitude)
    } else {
        base.saturating_add(magnitude)
    }
}
