//! Record store contract and SQLite implementation.
//!
//! # Responsibility
//! - Define the lookup/search/create/update/delete API the matrix services
//!   use over named record collections.
//! - Provide a SQLite-backed store keeping each record as a JSON document.
//!
//! # Invariants
//! - Every call is scoped to one collection; ids from another collection are
//!   reported as not found.
//! - Search results are ordered by ascending id (storage order).
//! - Persisted documents that are not JSON objects are rejected on read.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::record::{ExecContext, FieldValues, Record, RecordId};
use log::debug;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Record store failure.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    NotFound {
        collection: String,
        id: RecordId,
    },
    /// Collection or property name cannot be used in a store call.
    InvalidName(String),
    /// A value cannot be stored or compared, e.g. an array in a criterion.
    InvalidValue {
        property: String,
        message: String,
    },
    /// Persisted data cannot be decoded into a record.
    InvalidData(String),
    /// Connection schema is older than this binary expects.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { collection, id } => {
                write!(f, "record not found: {collection}({id})")
            }
            Self::InvalidName(name) => write!(f, "invalid store name `{name}`"),
            Self::InvalidValue { property, message } => {
                write!(f, "invalid value for `{property}`: {message}")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "record store requires schema version {expected_version}, got {actual_version}"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Equality criterion on one stored property.
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub property: String,
    pub value: Value,
}

impl Criterion {
    pub fn equals(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// Store contract consumed by the matrix projector and reconciler.
pub trait RecordStore {
    fn find_by_id(
        &self,
        ctx: &ExecContext,
        collection: &str,
        id: RecordId,
    ) -> StoreResult<Option<Record>>;

    /// Ids matching every criterion, in storage order. Empty criteria match
    /// the whole collection.
    fn search(
        &self,
        ctx: &ExecContext,
        collection: &str,
        criteria: &[Criterion],
        limit: Option<u32>,
    ) -> StoreResult<Vec<RecordId>>;

    fn create(&self, ctx: &ExecContext, collection: &str, values: &FieldValues)
        -> StoreResult<RecordId>;

    /// Merges `values` into the stored attributes.
    fn update(
        &self,
        ctx: &ExecContext,
        collection: &str,
        id: RecordId,
        values: &FieldValues,
    ) -> StoreResult<()>;

    fn delete(&self, ctx: &ExecContext, collection: &str, ids: &[RecordId]) -> StoreResult<()>;

    /// Runs `work` as one atomic unit.
    ///
    /// The default runs `work` directly, for stores whose caller already owns
    /// the transaction boundary.
    fn in_transaction<T, E>(&self, work: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        work()
    }
}

/// SQLite-backed record store over the `records` table.
pub struct SqliteRecordStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordStore<'conn> {
    /// Creates a store from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        let expected_version = latest_version();
        if actual_version != expected_version {
            return Err(StoreError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }
        Ok(Self { conn })
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn find_by_id(
        &self,
        _ctx: &ExecContext,
        collection: &str,
        id: RecordId,
    ) -> StoreResult<Option<Record>> {
        ensure_collection(collection)?;
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM records WHERE collection = ?1 AND id = ?2;",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()?;

        data.map(|text| decode_record(collection, id, &text))
            .transpose()
    }

    fn search(
        &self,
        ctx: &ExecContext,
        collection: &str,
        criteria: &[Criterion],
        limit: Option<u32>,
    ) -> StoreResult<Vec<RecordId>> {
        ensure_collection(collection)?;
        let mut sql = String::from("SELECT id FROM records WHERE collection = ?");
        let mut bind_values = vec![SqlValue::Text(collection.to_string())];

        for criterion in criteria {
            ensure_property(&criterion.property)?;
            let path = SqlValue::Text(json_path(&criterion.property));
            match to_sql_value(&criterion.property, &criterion.value)? {
                None => {
                    sql.push_str(" AND json_extract(data, ?) IS NULL");
                    bind_values.push(path);
                }
                Some(value) => {
                    sql.push_str(" AND json_extract(data, ?) = ?");
                    bind_values.push(path);
                    bind_values.push(value);
                }
            }
        }

        sql.push_str(" ORDER BY id ASC");
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(SqlValue::Integer(i64::from(limit)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            ids.push(row.get(0)?);
        }

        debug!(
            "event=record_search module=repo status=ok request_id={} collection={} criteria={} hits={}",
            ctx.request_id,
            collection,
            criteria.len(),
            ids.len()
        );
        Ok(ids)
    }

    fn create(
        &self,
        ctx: &ExecContext,
        collection: &str,
        values: &FieldValues,
    ) -> StoreResult<RecordId> {
        ensure_collection(collection)?;
        let data = encode_values(values)?;
        self.conn.execute(
            "INSERT INTO records (collection, data) VALUES (?1, ?2);",
            params![collection, data],
        )?;
        let id = self.conn.last_insert_rowid();

        debug!(
            "event=record_create module=repo status=ok request_id={} collection={} id={}",
            ctx.request_id, collection, id
        );
        Ok(id)
    }

    fn update(
        &self,
        ctx: &ExecContext,
        collection: &str,
        id: RecordId,
        values: &FieldValues,
    ) -> StoreResult<()> {
        let mut record = self
            .find_by_id(ctx, collection, id)?
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id,
            })?;
        for (property, value) in values {
            record.values.insert(property.clone(), value.clone());
        }
        let data = encode_values(&record.values)?;

        self.conn.execute(
            "UPDATE records
             SET
                data = ?3,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE collection = ?1 AND id = ?2;",
            params![collection, id, data],
        )?;

        debug!(
            "event=record_update module=repo status=ok request_id={} collection={} id={} fields={}",
            ctx.request_id,
            collection,
            id,
            values.len()
        );
        Ok(())
    }

    fn delete(&self, ctx: &ExecContext, collection: &str, ids: &[RecordId]) -> StoreResult<()> {
        ensure_collection(collection)?;
        for id in ids {
            let changed = self.conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2;",
                params![collection, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    id: *id,
                });
            }
        }

        if !ids.is_empty() {
            debug!(
                "event=record_delete module=repo status=ok request_id={} collection={} count={}",
                ctx.request_id,
                collection,
                ids.len()
            );
        }
        Ok(())
    }

    fn in_transaction<T, E>(&self, work: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|err| E::from(StoreError::from(err)))?;
        // Dropping `tx` on the error path rolls the whole unit back.
        let output = work()?;
        tx.commit().map_err(|err| E::from(StoreError::from(err)))?;
        Ok(output)
    }
}

fn ensure_collection(collection: &str) -> StoreResult<()> {
    if collection.trim().is_empty() {
        return Err(StoreError::InvalidName(collection.to_string()));
    }
    Ok(())
}

fn ensure_property(property: &str) -> StoreResult<()> {
    let valid = !property.is_empty()
        && property
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidName(property.to_string()));
    }
    Ok(())
}

fn json_path(property: &str) -> String {
    format!("$.\"{property}\"")
}

fn to_sql_value(property: &str, value: &Value) -> StoreResult<Option<SqlValue>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(flag) => Ok(Some(SqlValue::Integer(i64::from(*flag)))),
        Value::Number(number) => match (number.as_i64(), number.as_f64()) {
            (Some(integer), _) => Ok(Some(SqlValue::Integer(integer))),
            (None, Some(real)) => Ok(Some(SqlValue::Real(real))),
            (None, None) => Err(StoreError::InvalidValue {
                property: property.to_string(),
                message: format!("number `{number}` is out of range"),
            }),
        },
        Value::String(text) => Ok(Some(SqlValue::Text(text.clone()))),
        Value::Array(_) | Value::Object(_) => Err(StoreError::InvalidValue {
            property: property.to_string(),
            message: "only scalar values can be compared".to_string(),
        }),
    }
}

fn encode_values(values: &FieldValues) -> StoreResult<String> {
    if values.contains_key("id") {
        return Err(StoreError::InvalidValue {
            property: "id".to_string(),
            message: "record ids are assigned by the store".to_string(),
        });
    }
    for property in values.keys() {
        ensure_property(property)?;
    }
    serde_json::to_string(values).map_err(|err| StoreError::InvalidData(err.to_string()))
}

fn decode_record(collection: &str, id: RecordId, text: &str) -> StoreResult<Record> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(values)) => Ok(Record::new(id, collection, values)),
        Ok(_) => Err(StoreError::InvalidData(format!(
            "records.data of {collection}({id}) is not a JSON object"
        ))),
        Err(err) => Err(StoreError::InvalidData(format!(
            "records.data of {collection}({id}) is not valid JSON: {err}"
        ))),
    }
}
