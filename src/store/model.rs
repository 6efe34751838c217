use serde_json::Value;
use uuid::Uuid;

/// Field types a namespace schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    /// A keyword string.
    String,
    /// An array of strings.
    StringArray,
    /// A 64-bit integer.
    Integer,
    /// A boolean flag.
    Boolean,
}

/// One typed field of a namespace schema.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    /// Field name.
    pub name: &'static str,
    /// Field type.
    pub kind: PropertyType,
}

impl PropertySpec {
    /// Creates a property spec.
    pub const fn new(name: &'static str, kind: PropertyType) -> Self {
        Self { name, kind }
    }
}

/// Filter operators. Lookups only need equality today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Exact equality on a metadata field.
    Eq,
}

/// A field/operator/value triple constraining a store query.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Metadata field name.
    pub field: String,
    /// Operator.
    pub op: FilterOp,
    /// Comparand.
    pub value: Value,
}

impl Filter {
    /// Equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }
}

/// One entry returned from a store query.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// Entry id.
    pub id: Uuid,
    /// Similarity score, present on nearest-neighbor results.
    pub score: Option<f32>,
    /// Entry metadata fields.
    pub metadata: serde_json::Map<String, Value>,
}
