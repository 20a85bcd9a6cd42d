//! Declarative record schemas.
//!
//! A [`Schema`] is an ordered list of [`Field`]s plus two compiled views:
//! the **server view** (every field) and the **client view** (fields not
//! marked `server_set`). Views are computed once in [`SchemaBuilder::build`]
//! and shared behind `Arc<Schema>`; schemas are immutable after build.
//!
//! Schemas compose rather than inherit: [`SchemaBuilder::extend`] copies a
//! base schema's fields, and a later [`SchemaBuilder::field`] with the same
//! name replaces the inherited definition in place.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::case::to_camel_case;
use crate::marshal::{HookContext, MarshalError, ValidationError};
use crate::record::Record;
use crate::value::Value;

/// A JSON object as parsed by `serde_json`.
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// Predicate that claims raw JSON for a schema during union resolution.
pub type Recognizer = Arc<dyn Fn(&JsonValue) -> bool + Send + Sync>;

/// Post-conversion check on a field value. `Err` carries the reason.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

// ---------------------------------------------------------------------------
// View
// ---------------------------------------------------------------------------

/// Which side of the wire a record is being read or written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    /// Every field, including `server_set` ones. Used for responses and
    /// trusted fixture data.
    Server,
    /// Fields a client may supply. Used for method arguments.
    Client,
}

// ---------------------------------------------------------------------------
// EnumDef
// ---------------------------------------------------------------------------

/// A closed set of members, each with a wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    name: String,
    members: Vec<(String, String)>,
}

impl EnumDef {
    /// Creates an enum from `(member name, wire value)` pairs.
    pub fn new<N, W>(name: impl Into<String>, members: impl IntoIterator<Item = (N, W)>) -> Arc<Self>
    where
        N: Into<String>,
        W: Into<String>,
    {
        Arc::new(Self {
            name: name.into(),
            members: members
                .into_iter()
                .map(|(n, w)| (n.into(), w.into()))
                .collect(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire value for a member name.
    #[must_use]
    pub fn wire_for(&self, member: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, wire)| wire.as_str())
    }

    /// Member name for a wire value. Matching is exact.
    #[must_use]
    pub fn member_for_wire(&self, wire: &str) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, w)| w == wire)
            .map(|(name, _)| name.as_str())
    }

    #[must_use]
    pub fn wire_values(&self) -> Vec<&str> {
        self.members.iter().map(|(_, wire)| wire.as_str()).collect()
    }

    #[must_use]
    pub fn has_member(&self, member: &str) -> bool {
        self.wire_for(member).is_some()
    }
}

// ---------------------------------------------------------------------------
// FieldType
// ---------------------------------------------------------------------------

/// Declared type of a field.
#[derive(Clone)]
pub enum FieldType {
    String,
    /// Signed integer in the range -2^53+1 ..= 2^53-1.
    Int,
    /// Integer in the range 0 ..= 2^53-1.
    UnsignedInt,
    Float,
    Bool,
    /// RFC 3339 timestamp, normalized to UTC.
    Date,
    /// Untyped JSON, stored as [`Value::Raw`].
    Any,
    Enum(Arc<EnumDef>),
    Record(Arc<Schema>),
    /// Forward reference resolved through the marshaller's registry.
    Named(String),
    /// The schema whose fields are currently being processed.
    SelfRef,
    Optional(Box<FieldType>),
    List(Box<FieldType>),
    Map(Box<FieldType>, Box<FieldType>),
    Union(Arc<UnionDef>),
}

impl FieldType {
    #[must_use]
    pub fn optional(inner: FieldType) -> Self {
        Self::Optional(Box::new(inner))
    }

    #[must_use]
    pub fn list(inner: FieldType) -> Self {
        Self::List(Box::new(inner))
    }

    #[must_use]
    pub fn map(key: FieldType, value: FieldType) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    #[must_use]
    pub fn record(schema: &Arc<Schema>) -> Self {
        Self::Record(Arc::clone(schema))
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// A union over `members`, tried in declaration order.
    #[must_use]
    pub fn union(members: Vec<FieldType>) -> Self {
        Self::Union(Arc::new(UnionDef::new(members)))
    }

    /// `List[String]`, the most common collection type in JMAP.
    #[must_use]
    pub fn string_list() -> Self {
        Self::list(Self::String)
    }

    /// `Map[String, Bool]`, the JMAP "set of ids" encoding.
    #[must_use]
    pub fn string_set() -> Self {
        Self::map(Self::String, Self::Bool)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("String"),
            Self::Int => f.write_str("Int"),
            Self::UnsignedInt => f.write_str("UnsignedInt"),
            Self::Float => f.write_str("Number"),
            Self::Bool => f.write_str("Boolean"),
            Self::Date => f.write_str("UTCDate"),
            Self::Any => f.write_str("Any"),
            Self::Enum(def) => f.write_str(def.name()),
            Self::Record(schema) => f.write_str(schema.name()),
            Self::Named(name) => f.write_str(name),
            Self::SelfRef => f.write_str("Self"),
            Self::Optional(inner) => write!(f, "Optional[{inner}]"),
            Self::List(inner) => write!(f, "List[{inner}]"),
            Self::Map(key, value) => write!(f, "Map[{key}, {value}]"),
            Self::Union(def) => {
                f.write_str("Union[")?;
                for (i, member) in def.members().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// UnionDef
// ---------------------------------------------------------------------------

/// Per-member key sets that no other record member of the union declares.
/// `None` for members that are not field-driven records.
pub(crate) type UniqueKeys = Arc<Vec<Option<BTreeSet<String>>>>;

/// Ordered members of a union type plus the disambiguation cache.
pub struct UnionDef {
    members: Vec<FieldType>,
    /// Keyed by view and enclosing schema name, since `SelfRef` members
    /// resolve differently per enclosing schema.
    unique_keys: Mutex<HashMap<(View, String), UniqueKeys>>,
}

impl UnionDef {
    #[must_use]
    pub fn new(members: Vec<FieldType>) -> Self {
        Self {
            members,
            unique_keys: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn members(&self) -> &[FieldType] {
        &self.members
    }

    pub(crate) fn cached_unique_keys(&self, view: View, enclosing: &str) -> Option<UniqueKeys> {
        self.unique_keys
            .lock()
            .get(&(view, enclosing.to_string()))
            .cloned()
    }

    pub(crate) fn store_unique_keys(&self, view: View, enclosing: &str, keys: UniqueKeys) {
        self.unique_keys
            .lock()
            .insert((view, enclosing.to_string()), keys);
    }
}

// ---------------------------------------------------------------------------
// Hooks and codecs
// ---------------------------------------------------------------------------

/// Result of a [`FieldHook::unmarshal`] call.
#[derive(Debug, Clone, Default)]
pub struct HookOutput {
    /// Value to store; `None` leaves the field unset.
    pub value: Option<Value>,
    /// Input keys the hook consumed. The field's own key is always consumed.
    pub consumed: Vec<String>,
}

/// Custom marshaling for one field, with access to all sibling keys.
pub trait FieldHook: Send + Sync {
    /// Reads the field from the full input object.
    ///
    /// The hook owns required/missing handling for its field.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the input is unacceptable.
    fn unmarshal(
        &self,
        data: &JsonMap,
        field: &Field,
        cx: &HookContext<'_>,
    ) -> Result<HookOutput, ValidationError>;

    /// Writes zero or more keys for the field into `out`.
    ///
    /// # Errors
    ///
    /// Returns a [`MarshalError`] when the stored value cannot be encoded.
    fn marshal(
        &self,
        out: &mut JsonMap,
        record: &Record,
        field: &Field,
        cx: &HookContext<'_>,
    ) -> Result<(), MarshalError>;
}

/// Replaces the field-driven path for a whole schema. Used for types whose
/// wire form is not a JSON object.
pub trait RecordCodec: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when `raw` is not a valid encoding.
    fn unmarshal(&self, raw: &JsonValue, cx: &HookContext<'_>) -> Result<Record, ValidationError>;

    /// # Errors
    ///
    /// Returns a [`MarshalError`] when the record cannot be encoded.
    fn marshal(&self, record: &Record, cx: &HookContext<'_>) -> Result<JsonValue, MarshalError>;

    /// Whether `raw` has the JSON kind this codec reads.
    fn accepts(&self, raw: &JsonValue) -> bool {
        raw.is_object()
    }
}

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// One field of a schema.
#[derive(Clone)]
pub struct Field {
    name: String,
    key: String,
    ty: FieldType,
    default: Option<Value>,
    server_set: bool,
    hook: Option<Arc<dyn FieldHook>>,
    validator: Option<Validator>,
}

impl Field {
    /// A required field whose wire key is the camelCase form of `name`.
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        let name = name.into();
        Self {
            key: to_camel_case(&name),
            name,
            ty,
            default: None,
            server_set: false,
            hook: None,
            validator: None,
        }
    }

    /// An `Optional[ty]` field defaulting to null.
    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self::new(name, FieldType::optional(ty)).with_default(Value::Null)
    }

    /// Gives the field a default, making it optional on unmarshal.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Overrides the derived wire key.
    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Marks the field as assigned by the server only.
    #[must_use]
    pub fn server_set(mut self) -> Self {
        self.server_set = true;
        self
    }

    #[must_use]
    pub fn hook(mut self, hook: impl FieldHook + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    /// Adds a check run on non-null values after type conversion.
    #[must_use]
    pub fn validate<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(check));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// External (wire) key.
    #[must_use]
    pub fn wire_key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn ty(&self) -> &FieldType {
        &self.ty
    }

    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// A field without a default must be present on unmarshal.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.default.is_none()
    }

    #[must_use]
    pub fn is_server_set(&self) -> bool {
        self.server_set
    }

    #[must_use]
    pub fn field_hook(&self) -> Option<&Arc<dyn FieldHook>> {
        self.hook.as_ref()
    }

    /// Runs the validator, if any. Null values always pass.
    ///
    /// # Errors
    ///
    /// Returns the validator's reason on failure.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match (&self.validator, value) {
            (Some(check), v) if !v.is_null() => check(v),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("ty", &self.ty)
            .field("default", &self.default)
            .field("server_set", &self.server_set)
            .field("hook", &self.hook.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CompiledView {
    fields: Vec<usize>,
    by_key: HashMap<String, usize>,
}

impl CompiledView {
    fn compile(fields: &[Field], include: impl Fn(&Field) -> bool) -> Self {
        let mut view = Self::default();
        for (idx, field) in fields.iter().enumerate().filter(|(_, f)| include(f)) {
            view.fields.push(idx);
            view.by_key.insert(field.key.clone(), idx);
        }
        view
    }
}

/// Errors raised while building a schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema name must not be empty")]
    EmptyName,
    #[error("schema {schema}: duplicate wire key {key:?}")]
    DuplicateKey { schema: String, key: String },
}

/// An immutable record type.
pub struct Schema {
    name: String,
    fields: Vec<Field>,
    server: CompiledView,
    client: CompiledView,
    codec: Option<Arc<dyn RecordCodec>>,
    recognizer: Option<Recognizer>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
            codec: None,
            recognizer: None,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    #[must_use]
    pub fn view(&self, view: View) -> SchemaView<'_> {
        SchemaView {
            schema: self,
            compiled: match view {
                View::Server => &self.server,
                View::Client => &self.client,
            },
        }
    }

    #[must_use]
    pub fn codec(&self) -> Option<&Arc<dyn RecordCodec>> {
        self.codec.as_ref()
    }

    /// Whether this schema's recognizer claims `raw`.
    #[must_use]
    pub fn claims(&self, raw: &JsonValue) -> bool {
        self.recognizer.as_ref().is_some_and(|recognize| recognize(raw))
    }

    #[must_use]
    pub fn has_recognizer(&self) -> bool {
        self.recognizer.is_some()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .finish_non_exhaustive()
    }
}

/// A compiled projection of a schema for one [`View`].
#[derive(Clone, Copy)]
pub struct SchemaView<'a> {
    schema: &'a Schema,
    compiled: &'a CompiledView,
}

impl<'a> SchemaView<'a> {
    /// `(slot index, field)` pairs in declaration order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &'a Field)> + 'a {
        let fields = &self.schema.fields;
        self.compiled.fields.iter().map(move |&idx| (idx, &fields[idx]))
    }

    pub fn fields(&self) -> impl Iterator<Item = &'a Field> + 'a {
        self.entries().map(|(_, field)| field)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.fields().map(Field::wire_key)
    }

    #[must_use]
    pub fn field_by_key(&self, key: &str) -> Option<&'a Field> {
        self.compiled
            .by_key
            .get(key)
            .map(|&idx| &self.schema.fields[idx])
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.compiled.by_key.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.compiled.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.compiled.fields.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SchemaBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Schema`]. See [`Schema::builder`].
pub struct SchemaBuilder {
    name: String,
    fields: Vec<Field>,
    codec: Option<Arc<dyn RecordCodec>>,
    recognizer: Option<Recognizer>,
}

impl SchemaBuilder {
    /// Copies every field of `base`, in order.
    #[must_use]
    pub fn extend(mut self, base: &Schema) -> Self {
        for field in &base.fields {
            self = self.field(field.clone());
        }
        self
    }

    /// Appends a field, or replaces an existing field with the same name.
    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    #[must_use]
    pub fn codec(mut self, codec: impl RecordCodec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    #[must_use]
    pub fn recognizer<F>(mut self, recognize: F) -> Self
    where
        F: Fn(&JsonValue) -> bool + Send + Sync + 'static,
    {
        self.recognizer = Some(Arc::new(recognize));
        self
    }

    /// Compiles both views.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] for an empty name or two fields sharing a
    /// wire key.
    pub fn build(self) -> Result<Arc<Schema>, SchemaError> {
        if self.name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        let mut seen = BTreeSet::new();
        for field in &self.fields {
            if !seen.insert(field.key.as_str()) {
                return Err(SchemaError::DuplicateKey {
                    schema: self.name.clone(),
                    key: field.key.clone(),
                });
            }
        }

        let server = CompiledView::compile(&self.fields, |_| true);
        let client = CompiledView::compile(&self.fields, |f| !f.server_set);
        Ok(Arc::new(Schema {
            name: self.name,
            fields: self.fields,
            server,
            client,
            codec: self.codec,
            recognizer: self.recognizer,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
