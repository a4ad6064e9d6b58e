//! Entity configuration and field mapping.
//!
//! One generic replica serves every entity type; an [`EntityConfig`] names the
//! remote table and describes how rows are shaped on each side.

use crate::{error::Result, CachedRecord, Error, Fields, RemoteId, RemoteRow, TableName};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Metadata keys that only exist on the local side and are never sent.
const LOCAL_METADATA_KEYS: &[&str] = &[
    "localId",
    "remoteId",
    "hasPendingWrites",
    "pendingAction",
    "syncError",
    "lastLocalChange",
];

/// Restricts a snapshot to rows where `column = value` (e.g. a parent id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub column: String,
    pub value: serde_json::Value,
}

impl Scope {
    pub fn new(column: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }

    /// Whether a row's fields fall inside this scope.
    pub fn matches(&self, fields: &Fields) -> bool {
        fields
            .get(&self.column)
            .is_some_and(|v| compare_json(v, &self.value) == Ordering::Equal)
    }
}

/// Ordering for remote selects and the live view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

/// The remote side of an entity: table name and primary key column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTable {
    pub name: TableName,
    pub id_column: String,
}

/// Entity-specific field mapping hooks.
///
/// The defaults pass fields through unchanged; the generic stripping of local
/// metadata and the id column happens in [`EntityConfig`] either way.
pub trait FieldMapper: Send + Sync + fmt::Debug {
    /// Shape local fields for sending to the remote store.
    fn to_remote(&self, fields: Fields) -> Fields {
        fields
    }

    /// Shape remote fields (id column already removed) for local storage.
    fn to_local(&self, fields: Fields) -> Fields {
        fields
    }
}

/// Configuration of one entity type.
#[derive(Debug, Clone)]
pub struct EntityConfig {
    /// Entity name used by callers and for local persistence
    pub name: String,
    /// Remote table name
    pub table: TableName,
    /// Remote primary key column
    pub id_column: String,
    /// Optional snapshot restriction
    pub scope: Option<Scope>,
    /// Optional ordering
    pub order_by: Option<OrderBy>,
    /// Extra fields that stay local and are stripped before sending
    pub local_only_fields: BTreeSet<String>,
    mapper: Option<Arc<dyn FieldMapper>>,
}

impl EntityConfig {
    /// Create a config whose table has the same name as the entity.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            table: name.clone(),
            name,
            id_column: "id".to_string(),
            scope: None,
            order_by: None,
            local_only_fields: BTreeSet::new(),
            mapper: None,
        }
    }

    pub fn with_table(mut self, table: impl Into<TableName>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_order(mut self, order: OrderBy) -> Self {
        self.order_by = Some(order);
        self
    }

    pub fn with_local_only(mut self, field: impl Into<String>) -> Self {
        self.local_only_fields.insert(field.into());
        self
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn FieldMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// The remote table reference for this entity.
    pub fn remote_table(&self) -> RemoteTable {
        RemoteTable {
            name: self.table.clone(),
            id_column: self.id_column.clone(),
        }
    }

    /// Fields as stored locally: local metadata and the id column removed,
    /// local-only fields kept.
    pub fn to_local_fields(&self, fields: &Fields) -> Fields {
        fields
            .iter()
            .filter(|(key, _)| {
                key.as_str() != self.id_column && !LOCAL_METADATA_KEYS.contains(&key.as_str())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Strip local-only metadata and the id column, then apply the mapper.
    pub fn to_remote_shape(&self, fields: &Fields) -> Fields {
        let sanitized: Fields = fields
            .iter()
            .filter(|(key, _)| {
                key.as_str() != self.id_column
                    && !LOCAL_METADATA_KEYS.contains(&key.as_str())
                    && !self.local_only_fields.contains(key.as_str())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        match &self.mapper {
            Some(mapper) => mapper.to_remote(sanitized),
            None => sanitized,
        }
    }

    /// Split a remote row into its remote id and local fields.
    pub fn to_local_shape(&self, row: &serde_json::Value) -> Result<RemoteRow> {
        let obj = row
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("remote row must be an object".into()))?;

        let remote_id = obj
            .get(&self.id_column)
            .and_then(RemoteId::from_value)
            .ok_or_else(|| {
                Error::InvalidPayload(format!(
                    "remote row in '{}' has no usable '{}' column",
                    self.table, self.id_column
                ))
            })?;

        let mut fields = obj.clone();
        fields.remove(&self.id_column);
        let fields = match &self.mapper {
            Some(mapper) => mapper.to_local(fields),
            None => fields,
        };

        Ok(RemoteRow { remote_id, fields })
    }

    /// Live view ordering: the configured column (nulls last), then local id.
    pub fn compare_records(&self, a: &CachedRecord, b: &CachedRecord) -> Ordering {
        let by_column = match &self.order_by {
            Some(order) => {
                let x = a.fields.get(&order.column).filter(|v| !v.is_null());
                let y = b.fields.get(&order.column).filter(|v| !v.is_null());
                match (x, y) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => return Ordering::Greater,
                    (Some(_), None) => return Ordering::Less,
                    (Some(x), Some(y)) if order.ascending => compare_json(x, y),
                    (Some(x), Some(y)) => compare_json(x, y).reverse(),
                }
            }
            None => Ordering::Equal,
        };
        by_column.then(a.local_id.cmp(&b.local_id))
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_json(a: &serde_json::Value, b: &serde_json::Value) -> Ordering {
    use serde_json::Value;

    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let x = x.as_f64().unwrap_or(f64::NAN);
                let y = y.as_f64().unwrap_or(f64::NAN);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ordering = compare_json(left, right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => rank(a).cmp(&rank(b)),
    }
}
