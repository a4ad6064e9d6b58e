//! PostgreSQL remote store.
//!
//! Tables are accessed generically: rows are read back as `to_jsonb(t)` and
//! written through `jsonb_populate_record`, so no per-entity row types exist.

use super::{RemoteError, RemoteStore};
use async_trait::async_trait;
use harbor_engine::{Fields, OrderBy, RemoteId, RemoteTable, Scope};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a table name, part by part when schema-qualified (`schema.table`).
fn quote_table(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

/// Remote store backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresRemote {
    pool: PgPool,
}

impl PostgresRemote {
    /// Create a pool that connects on first use, so start-up works offline.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, RemoteError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)
            .map_err(RemoteError::classify)?;
        Ok(Self { pool })
    }
}

fn column_list(payload: &Fields) -> String {
    payload
        .keys()
        .map(|key| quote_ident(key))
        .collect::<Vec<_>>()
        .join(", ")
}

fn select_sql(table: &RemoteTable, scope: Option<&Scope>, order: Option<&OrderBy>) -> String {
    let mut sql = format!("SELECT to_jsonb(t) FROM {} AS t", quote_table(&table.name));
    if scope.is_some() {
        sql.push_str(" WHERE to_jsonb(t) -> $1 = $2");
    }
    match order {
        Some(order) => sql.push_str(&format!(
            " ORDER BY t.{} {} NULLS LAST",
            quote_ident(&order.column),
            if order.ascending { "ASC" } else { "DESC" }
        )),
        None => sql.push_str(&format!(" ORDER BY t.{}", quote_ident(&table.id_column))),
    }
    sql
}

fn insert_sql(table: &RemoteTable, payload: &Fields) -> String {
    let name = quote_table(&table.name);
    if payload.is_empty() {
        return format!("INSERT INTO {name} AS t DEFAULT VALUES RETURNING to_jsonb(t)");
    }
    format!(
        "INSERT INTO {name} AS t ({cols}) \
         SELECT {cols} FROM jsonb_populate_record(NULL::{name}, $1) \
         RETURNING to_jsonb(t)",
        cols = column_list(payload),
    )
}

fn update_sql(table: &RemoteTable, payload: &Fields) -> String {
    let name = quote_table(&table.name);
    let id = quote_ident(&table.id_column);
    let assignments = payload
        .keys()
        .map(|key| format!("{col} = r.{col}", col = quote_ident(key)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {name} AS t SET {assignments} \
         FROM jsonb_populate_record(NULL::{name}, $1) AS r \
         WHERE t.{id}::text = $2 \
         RETURNING to_jsonb(t)"
    )
}

#[async_trait]
impl RemoteStore for PostgresRemote {
    async fn select(
        &self,
        table: &RemoteTable,
        scope: Option<&Scope>,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Value>, RemoteError> {
        let sql = select_sql(table, scope, order);
        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        if let Some(scope) = scope {
            query = query
                .bind(scope.column.clone())
                .bind(sqlx::types::Json(scope.value.clone()));
        }
        query.fetch_all(&self.pool).await.map_err(RemoteError::classify)
    }

    async fn insert(&self, table: &RemoteTable, payload: &Fields) -> Result<Value, RemoteError> {
        let sql = insert_sql(table, payload);
        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        if !payload.is_empty() {
            query = query.bind(sqlx::types::Json(Value::Object(payload.clone())));
        }
        query.fetch_one(&self.pool).await.map_err(RemoteError::classify)
    }

    async fn update(
        &self,
        table: &RemoteTable,
        id: &RemoteId,
        payload: &Fields,
    ) -> Result<Value, RemoteError> {
        let payload: Fields = payload
            .iter()
            .filter(|(key, _)| **key != table.id_column)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let row = if payload.is_empty() {
            let sql = format!(
                "SELECT to_jsonb(t) FROM {} AS t WHERE t.{}::text = $1",
                quote_table(&table.name),
                quote_ident(&table.id_column)
            );
            sqlx::query_scalar::<_, Value>(&sql)
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
        } else {
            let sql = update_sql(table, &payload);
            sqlx::query_scalar::<_, Value>(&sql)
                .bind(sqlx::types::Json(Value::Object(payload)))
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
        }
        .map_err(RemoteError::classify)?;

        row.ok_or_else(|| RemoteError::NotFound(format!("{} {}", table.name, id)))
    }

    async fn delete(&self, table: &RemoteTable, id: &RemoteId) -> Result<(), RemoteError> {
        let sql = format!(
            "DELETE FROM {} WHERE {}::text = $1",
            quote_table(&table.name),
            quote_ident(&table.id_column)
        );
        let result = sqlx::query(&sql)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(RemoteError::classify)?;

        if result.rows_affected() == 0 {
            return Err(RemoteError::NotFound(format!("{} {}", table.name, id)));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), RemoteError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(RemoteError::classify)?;
        Ok(())
    }
}
