//! In-process remote store.
//!
//! Behaves like a small auto-increment table server: ids are assigned on
//! insert and `created_at` / `updated_at` are stamped server-side. It can be
//! switched unreachable and told to fail the next calls, which is what the
//! scenario tests drive it with.

use super::{RemoteError, RemoteStore};
use async_trait::async_trait;
use harbor_engine::{compare_json, Fields, OrderBy, RemoteId, RemoteTable, Scope};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;

/// Most recent data calls kept for inspection.
const CALL_LOG_CAPACITY: usize = 256;

#[derive(Debug)]
struct Inner {
    tables: HashMap<String, BTreeMap<i64, Fields>>,
    next_id: i64,
    reachable: bool,
    failures: VecDeque<RemoteError>,
    calls: VecDeque<String>,
}

/// Remote store held in memory.
#[derive(Debug)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tables: HashMap::new(),
                next_id: 1,
                reachable: true,
                failures: VecDeque::new(),
                calls: VecDeque::with_capacity(CALL_LOG_CAPACITY),
            }),
        }
    }

    /// Make every call (including `ping`) fail as unreachable, or undo that.
    pub async fn set_reachable(&self, reachable: bool) {
        self.inner.lock().await.reachable = reachable;
    }

    /// Fail the next data call with `error`. Queued failures apply in order.
    pub async fn fail_next(&self, error: RemoteError) {
        self.inner.lock().await.failures.push_back(error);
    }

    /// Insert a row directly, as if another client had written it.
    pub async fn seed(&self, table: &RemoteTable, payload: Fields) -> Value {
        let mut inner = self.inner.lock().await;
        inner.insert_row(table, &payload)
    }

    /// Delete a row directly, as if another client had removed it.
    pub async fn remove_row(&self, table: &RemoteTable, id: &RemoteId) -> bool {
        let mut inner = self.inner.lock().await;
        match id.as_str().parse::<i64>() {
            Ok(key) => inner
                .tables
                .get_mut(&table.name)
                .is_some_and(|rows| rows.remove(&key).is_some()),
            Err(_) => false,
        }
    }

    /// Current rows of a table in id order.
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        let inner = self.inner.lock().await;
        inner
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Most recent data calls, oldest first, e.g. `"insert cases"` or
    /// `"delete cases 3"`.
    pub async fn calls(&self) -> Vec<String> {
        self.inner.lock().await.calls.iter().cloned().collect()
    }

    async fn begin(&self, call: String) -> Result<tokio::sync::MutexGuard<'_, Inner>, RemoteError> {
        let mut inner = self.inner.lock().await;
        if !inner.reachable {
            return Err(RemoteError::Unreachable("connection refused".into()));
        }
        if inner.calls.len() == CALL_LOG_CAPACITY {
            inner.calls.pop_front();
        }
        inner.calls.push_back(call);
        match inner.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(inner),
        }
    }
}

impl Inner {
    fn insert_row(&mut self, table: &RemoteTable, payload: &Fields) -> Value {
        let id = self.next_id;
        self.next_id += 1;

        let now = chrono::Utc::now().to_rfc3339();
        let mut row = payload.clone();
        row.insert(table.id_column.clone(), Value::from(id));
        row.insert("created_at".into(), Value::String(now.clone()));
        row.insert("updated_at".into(), Value::String(now));

        self.tables
            .entry(table.name.clone())
            .or_default()
            .insert(id, row.clone());
        Value::Object(row)
    }

    fn row_mut(&mut self, table: &RemoteTable, id: &RemoteId) -> Option<&mut Fields> {
        let key = id.as_str().parse::<i64>().ok()?;
        self.tables.get_mut(&table.name)?.get_mut(&key)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn select(
        &self,
        table: &RemoteTable,
        scope: Option<&Scope>,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Value>, RemoteError> {
        let inner = self.begin(format!("select {}", table.name)).await?;

        let mut rows: Vec<Fields> = inner
            .tables
            .get(&table.name)
            .map(|rows| {
                rows.values()
                    .filter(|row| scope.map_or(true, |scope| scope.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order {
            rows.sort_by(|a, b| {
                let x = a.get(&order.column).filter(|v| !v.is_null());
                let y = b.get(&order.column).filter(|v| !v.is_null());
                match (x, y) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                    (Some(x), Some(y)) if order.ascending => compare_json(x, y),
                    (Some(x), Some(y)) => compare_json(x, y).reverse(),
                }
            });
        }

        Ok(rows.into_iter().map(Value::Object).collect())
    }

    async fn insert(&self, table: &RemoteTable, payload: &Fields) -> Result<Value, RemoteError> {
        let mut inner = self.begin(format!("insert {}", table.name)).await?;
        Ok(inner.insert_row(table, payload))
    }

    async fn update(
        &self,
        table: &RemoteTable,
        id: &RemoteId,
        payload: &Fields,
    ) -> Result<Value, RemoteError> {
        let mut inner = self.begin(format!("update {} {}", table.name, id)).await?;
        let row = inner
            .row_mut(table, id)
            .ok_or_else(|| RemoteError::NotFound(format!("{} {}", table.name, id)))?;

        for (key, value) in payload {
            if key != &table.id_column {
                row.insert(key.clone(), value.clone());
            }
        }
        row.insert(
            "updated_at".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        Ok(Value::Object(row.clone()))
    }

    async fn delete(&self, table: &RemoteTable, id: &RemoteId) -> Result<(), RemoteError> {
        let mut inner = self.begin(format!("delete {} {}", table.name, id)).await?;
        let key = id.as_str().parse::<i64>().ok();
        let removed = key
            .and_then(|key| inner.tables.get_mut(&table.name)?.remove(&key))
            .is_some();
        if removed {
            Ok(())
        } else {
            Err(RemoteError::NotFound(format!("{} {}", table.name, id)))
        }
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        if self.inner.lock().await.reachable {
            Ok(())
        } else {
            Err(RemoteError::Unreachable("connection refused".into()))
        }
    }
}
