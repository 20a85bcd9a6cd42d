//! Builders for the standard `/get`, `/changes`, `/query` and `/set`
//! argument and response schemas.
//!
//! Each builder is parameterized by the item schema (and where relevant the
//! filter condition) so a capability can stamp out `Foo/get` and friends
//! without repeating field lists.

use std::sync::Arc;

use crate::case::to_snake_case;
use crate::models::headers::{HeaderSchemas, PropertiesHook};
use crate::schema::{EnumDef, Field, FieldType, Schema, SchemaError};
use crate::value::Value;

fn empty_list() -> Value {
    Value::List(Vec::new())
}

fn empty_map() -> Value {
    Value::Map(std::collections::BTreeMap::new())
}

/// `AND` / `OR` / `NOT`.
#[must_use]
pub fn filter_operator_enum() -> Arc<EnumDef> {
    EnumDef::new(
        "FilterOperatorKind",
        [("And", "AND"), ("Or", "OR"), ("Not", "NOT")],
    )
}

/// A `FilterOperator` whose operands are nested operators or `condition`s.
///
/// # Errors
///
/// Returns a [`SchemaError`] if `name` is empty.
pub fn filter_operator(
    name: &str,
    condition: &Arc<Schema>,
) -> Result<Arc<Schema>, SchemaError> {
    Schema::builder(name)
        .field(Field::new("operator", FieldType::Enum(filter_operator_enum())))
        .field(Field::new(
            "conditions",
            FieldType::list(FieldType::union(vec![
                FieldType::SelfRef,
                FieldType::record(condition),
            ])),
        ))
        .build()
}

/// `Foo/get` arguments.
///
/// `default_props` is the property list assumed when the client sends none;
/// with `headers`, `header:*` strings are accepted in `properties`.
///
/// # Errors
///
/// Returns a [`SchemaError`] if `name` is empty.
pub fn get_args(
    name: &str,
    item: &Arc<Schema>,
    default_props: &[&str],
    headers: Option<&HeaderSchemas>,
) -> Result<Arc<Schema>, SchemaError> {
    let property_ty = match headers {
        Some(h) => FieldType::union(vec![FieldType::String, FieldType::record(&h.query)]),
        None => FieldType::String,
    };
    let default = if default_props.is_empty() {
        Value::Null
    } else {
        Value::List(
            default_props
                .iter()
                .map(|p| Value::String(to_snake_case(p)))
                .collect(),
        )
    };

    Schema::builder(name)
        .field(Field::new("account_id", FieldType::String))
        .field(Field::optional("ids", FieldType::string_list()))
        .field(
            Field::new("properties", FieldType::optional(FieldType::list(property_ty)))
                .with_default(default)
                .hook(PropertiesHook::new(item, headers)),
        )
        .build()
}

/// `Foo/get` response.
///
/// # Errors
///
/// Returns a [`SchemaError`] if `name` is empty.
pub fn get_response(name: &str, item: &Arc<Schema>) -> Result<Arc<Schema>, SchemaError> {
    Schema::builder(name)
        .field(Field::new("account_id", FieldType::String))
        .field(Field::new("state", FieldType::String))
        .field(Field::new("list", FieldType::list(FieldType::record(item))).with_default(empty_list()))
        .field(Field::new("not_found", FieldType::string_list()).with_default(empty_list()))
        .build()
}

/// `Foo/changes` arguments.
///
/// # Errors
///
/// Returns a [`SchemaError`] if `name` is empty.
pub fn changes_args(name: &str) -> Result<Arc<Schema>, SchemaError> {
    Schema::builder(name)
        .field(Field::new("account_id", FieldType::String))
        .field(Field::new("since_state", FieldType::String))
        .field(Field::optional("max_changes", FieldType::UnsignedInt))
        .build()
}

/// `Foo/changes` response.
///
/// # Errors
///
/// Returns a [`SchemaError`] if `name` is empty.
pub fn changes_response(name: &str) -> Result<Arc<Schema>, SchemaError> {
    Schema::builder(name)
        .field(Field::new("account_id", FieldType::String))
        .field(Field::new("old_state", FieldType::String))
        .field(Field::new("new_state", FieldType::String))
        .field(Field::new("has_more_changes", FieldType::Bool).with_default(false))
        .field(Field::new("created", FieldType::string_list()).with_default(empty_list()))
        .field(Field::new("updated", FieldType::string_list()).with_default(empty_list()))
        .field(Field::new("destroyed", FieldType::string_list()).with_default(empty_list()))
        .build()
}

/// `Foo/query` arguments. `filter` is either an `operator` or a
/// `condition`.
///
/// # Errors
///
/// Returns a [`SchemaError`] if `name` is empty.
pub fn query_args(
    name: &str,
    operator: &Arc<Schema>,
    condition: &Arc<Schema>,
    comparator: &Arc<Schema>,
) -> Result<Arc<Schema>, SchemaError> {
    Schema::builder(name)
        .field(Field::new("account_id", FieldType::String))
        .field(Field::optional(
            "filter",
            FieldType::union(vec![
                FieldType::record(operator),
                FieldType::record(condition),
            ]),
        ))
        .field(Field::optional(
            "sort",
            FieldType::list(FieldType::record(comparator)),
        ))
        .field(Field::new("position", FieldType::Int).with_default(0))
        .field(Field::optional("anchor", FieldType::String))
        .field(Field::new("anchor_offset", FieldType::Int).with_default(0))
        .field(Field::optional("limit", FieldType::UnsignedInt))
        .field(Field::new("calculate_total", FieldType::Bool).with_default(false))
        .build()
}

/// `Foo/query` response. `total` is only emitted when the handler set it.
///
/// # Errors
///
/// Returns a [`SchemaError`] if `name` is empty.
pub fn query_response(name: &str) -> Result<Arc<Schema>, SchemaError> {
    Schema::builder(name)
        .field(Field::new("account_id", FieldType::String))
        .field(Field::new("query_state", FieldType::String))
        .field(Field::new("can_calculate_changes", FieldType::Bool).with_default(false))
        .field(Field::new("position", FieldType::UnsignedInt).with_default(0))
        .field(Field::new("total", FieldType::UnsignedInt).with_default(0))
        .field(Field::new("ids", FieldType::string_list()).with_default(empty_list()))
        .build()
}

/// `Foo/set` arguments. Creates are full items, updates are patch objects.
///
/// # Errors
///
/// Returns a [`SchemaError`] if `name` is empty.
pub fn set_args(name: &str, item: &Arc<Schema>) -> Result<Arc<Schema>, SchemaError> {
    Schema::builder(name)
        .field(Field::new("account_id", FieldType::String))
        .field(Field::optional("if_in_state", FieldType::String))
        .field(Field::optional(
            "create",
            FieldType::map(FieldType::String, FieldType::record(item)),
        ))
        .field(Field::optional(
            "update",
            FieldType::map(FieldType::String, FieldType::Any),
        ))
        .field(Field::optional("destroy", FieldType::string_list()))
        .build()
}

/// `Foo/set` response.
///
/// # Errors
///
/// Returns a [`SchemaError`] if `name` is empty.
pub fn set_response(
    name: &str,
    item: &Arc<Schema>,
    set_error: &Arc<Schema>,
) -> Result<Arc<Schema>, SchemaError> {
    let errors = || {
        FieldType::optional(FieldType::map(
            FieldType::String,
            FieldType::record(set_error),
        ))
    };
    Schema::builder(name)
        .field(Field::new("account_id", FieldType::String))
        .field(Field::optional("old_state", FieldType::String))
        .field(Field::new("new_state", FieldType::String))
        .field(
            Field::new(
                "created",
                FieldType::optional(FieldType::map(FieldType::String, FieldType::record(item))),
            )
            .with_default(empty_map()),
        )
        .field(
            Field::new(
                "updated",
                FieldType::optional(FieldType::map(
                    FieldType::String,
                    FieldType::optional(FieldType::record(item)),
                )),
            )
            .with_default(empty_map()),
        )
        .field(
            Field::new("destroyed", FieldType::optional(FieldType::string_list()))
                .with_default(empty_list()),
        )
        .field(Field::new("not_created", errors()).with_default(empty_map()))
        .field(Field::new("not_updated", errors()).with_default(empty_map()))
        .field(Field::new("not_destroyed", errors()).with_default(empty_map()))
        .build()
}
