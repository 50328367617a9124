//! `SourceDB` port implementation (spec §4.6, C6): a `tokio-postgres`-backed
//! adapter for row CRUD and, in `replication`, the logical-replication
//! stream. `tokio-postgres` is the substitute our domain needs for pgdog's
//! own hand-rolled wire protocol client: pgdog is a proxy that must speak
//! both halves of the protocol, we are a client of exactly one Postgres-like
//! store, so the ecosystem driver (also depended on by
//! `examples/kokizzu-readyset` and `examples/ra-kete-materialize`) is the
//! idiomatic choice.

pub mod replication;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row as PgRow};

use crate::decoder::Frame;
use crate::model::{Row, Value};
use crate::ports::SourceDB;
use crate::{EngineError, Result};

use replication::ReplicationHandle;

pub struct PostgresSourceDb {
    client: Arc<Client>,
    /// The currently open replication stream's feedback channel, if any.
    /// One adapter instance drives at most one replication stream (spec
    /// §4.8: one CDC ingestion worker per source instance).
    replication: Mutex<Option<ReplicationHandle>>,
}

impl PostgresSourceDb {
    /// Connects and spawns the driver's background I/O task, the way every
    /// `tokio-postgres` caller must (`tokio_postgres::connect` returns both
    /// halves; the connection future is driven on its own task).
    pub async fn connect(config: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(config, NoTls)
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "source db connection task exited");
            }
        });

        Ok(Self {
            client: Arc::new(client),
            replication: Mutex::new(None),
        })
    }

    pub fn from_client(client: Arc<Client>) -> Self {
        Self {
            client,
            replication: Mutex::new(None),
        }
    }

    fn map_error(err: tokio_postgres::Error) -> EngineError {
        if let Some(code) = err.code() {
            if code == &tokio_postgres::error::SqlState::INSUFFICIENT_PRIVILEGE {
                return EngineError::Permission(err.to_string());
            }
        }
        EngineError::Transport(err.to_string())
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn pg_row_to_row(pg_row: &PgRow) -> Row {
    let mut row = Row::new();
    for (idx, column) in pg_row.columns().iter().enumerate() {
        let value = pg_value(pg_row, idx, column.type_());
        row.insert(column.name().to_string(), value);
    }
    row
}

fn pg_value(pg_row: &PgRow, idx: usize, ty: &tokio_postgres::types::Type) -> Value {
    use tokio_postgres::types::Type;
    match *ty {
        Type::INT2 => pg_row
            .get::<_, Option<i16>>(idx)
            .map(|v| Value::Integer(v as i64))
            .unwrap_or(Value::Null),
        Type::INT4 => pg_row
            .get::<_, Option<i32>>(idx)
            .map(|v| Value::Integer(v as i64))
            .unwrap_or(Value::Null),
        Type::INT8 => pg_row
            .get::<_, Option<i64>>(idx)
            .map(Value::Integer)
            .unwrap_or(Value::Null),
        Type::BOOL => pg_row
            .get::<_, Option<bool>>(idx)
            .map(Value::Boolean)
            .unwrap_or(Value::Null),
        Type::NUMERIC => pg_row
            .get::<_, Option<rust_decimal::Decimal>>(idx)
            .map(Value::Decimal)
            .unwrap_or(Value::Null),
        Type::TIMESTAMPTZ => pg_row
            .get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map(Value::Timestamp)
            .unwrap_or(Value::Null),
        Type::BYTEA => pg_row
            .get::<_, Option<Vec<u8>>>(idx)
            .map(Value::Binary)
            .unwrap_or(Value::Null),
        _ => pg_row
            .get::<_, Option<String>>(idx)
            .map(Value::Text)
            .unwrap_or(Value::Null),
    }
}

fn value_to_sql(value: &Value) -> Box<dyn ToSql + Sync + '_> {
    match value {
        Value::Null => Box::new(Option::<String>::None),
        Value::Text(s) => Box::new(s.as_str()),
        Value::Integer(i) => Box::new(*i),
        Value::Decimal(d) => Box::new(*d),
        Value::Boolean(b) => Box::new(*b),
        Value::Timestamp(ts) => Box::new(*ts),
        Value::Binary(b) => Box::new(b.as_slice()),
    }
}

#[async_trait]
impl SourceDB for PostgresSourceDb {
    async fn fetch_changed(
        &self,
        schema: &str,
        table: &str,
        cursor_col: &str,
        cursor_value: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Row>> {
        let table_ref = format!("{}.{}", quote_ident(schema), quote_ident(table));
        let column = quote_ident(cursor_col);
        let sql = match cursor_value {
            Some(_) => format!(
                "SELECT * FROM {table_ref} WHERE {column} > $1 ORDER BY {column} ASC LIMIT $2"
            ),
            None => format!("SELECT * FROM {table_ref} ORDER BY {column} ASC LIMIT $1"),
        };

        let rows = match cursor_value {
            Some(value) => self
                .client
                .query(&sql, &[&value, &(limit as i64)])
                .await
                .map_err(Self::map_error)?,
            None => self
                .client
                .query(&sql, &[&(limit as i64)])
                .await
                .map_err(Self::map_error)?,
        };

        Ok(rows.iter().map(pg_row_to_row).collect())
    }

    async fn fetch_one(&self, schema: &str, table: &str, key_col: &str, key_value: &str) -> Result<Option<Row>> {
        let table_ref = format!("{}.{}", quote_ident(schema), quote_ident(table));
        let column = quote_ident(key_col);
        let sql = format!("SELECT * FROM {table_ref} WHERE {column} = $1");
        let row = self
            .client
            .query_opt(&sql, &[&key_value])
            .await
            .map_err(Self::map_error)?;
        Ok(row.as_ref().map(pg_row_to_row))
    }

    async fn insert(&self, schema: &str, table: &str, fields: &Row) -> Result<Row> {
        let table_ref = format!("{}.{}", quote_ident(schema), quote_ident(table));
        let columns: Vec<&String> = fields.keys().collect();
        let col_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("INSERT INTO {table_ref} ({col_list}) VALUES ({placeholders}) RETURNING *");

        let boxed: Vec<Box<dyn ToSql + Sync + '_>> = fields.values().map(value_to_sql).collect();
        let params: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref()).collect();

        let row = self
            .client
            .query_one(&sql, &params)
            .await
            .map_err(Self::map_error)?;
        Ok(pg_row_to_row(&row))
    }

    async fn update(
        &self,
        schema: &str,
        table: &str,
        key_col: &str,
        key_value: &str,
        fields: &Row,
    ) -> Result<Option<Row>> {
        let table_ref = format!("{}.{}", quote_ident(schema), quote_ident(table));
        let key_column = quote_ident(key_col);
        let columns: Vec<&String> = fields.keys().collect();
        let set_list = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let key_placeholder = columns.len() + 1;
        let sql = format!(
            "UPDATE {table_ref} SET {set_list} WHERE {key_column} = ${key_placeholder} RETURNING *"
        );

        let mut boxed: Vec<Box<dyn ToSql + Sync + '_>> = fields.values().map(value_to_sql).collect();
        boxed.push(Box::new(key_value));
        let params: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| b.as_ref()).collect();

        let row = self
            .client
            .query_opt(&sql, &params)
            .await
            .map_err(Self::map_error)?;
        Ok(row.as_ref().map(pg_row_to_row))
    }

    async fn delete(&self, schema: &str, table: &str, key_col: &str, key_value: &str) -> Result<bool> {
        let table_ref = format!("{}.{}", quote_ident(schema), quote_ident(table));
        let key_column = quote_ident(key_col);
        let sql = format!("DELETE FROM {table_ref} WHERE {key_column} = $1");
        let affected = self
            .client
            .execute(&sql, &[&key_value])
            .await
            .map_err(Self::map_error)?;
        Ok(affected > 0)
    }

    async fn open_replication(
        &self,
        slot_name: &str,
        start_lsn: i64,
    ) -> Result<futures::stream::BoxStream<'static, Result<(Frame, i64)>>> {
        let (stream, handle) = replication::open_stream(&self.client, slot_name, start_lsn).await?;
        *self.replication.lock().await = Some(handle);
        Ok(stream)
    }

    async fn send_feedback(&self, lsn: i64) -> Result<()> {
        let guard = self.replication.lock().await;
        match guard.as_ref() {
            Some(handle) => handle.send_feedback(lsn),
            None => Err(EngineError::Invariant(
                "send_feedback called with no open replication stream".to_string(),
            )),
        }
    }

    async fn create_slot(&self, slot_name: &str) -> Result<()> {
        replication::create_slot(&self.client, slot_name).await
    }

    async fn drop_slot(&self, slot_name: &str) -> Result<()> {
        let sql = "SELECT pg_drop_replication_slot($1)";
        self.client
            .execute(sql, &[&slot_name])
            .await
            .map_err(Self::map_error)?;
        Ok(())
    }

    async fn list_slots(&self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query("SELECT slot_name FROM pg_replication_slots", &[])
            .await
            .map_err(Self::map_error)?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }
}
