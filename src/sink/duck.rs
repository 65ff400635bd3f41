use duckdb::{Connection, ToSql};
use std::{
    path::Path,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, info};

use super::{
    to_sales_rows, validate_identifier, AnalyticsSink, ColumnType, SalesRow, SinkError,
    TableSchema,
};
use crate::process::ProductMetric;

/// Product metrics in a DuckDB database, on disk or in memory.
pub struct DuckSink {
    conn: Mutex<Connection>,
}

impl DuckSink {
    /// Open a DuckDB database on disk at `path`, creating the file if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            SinkError::Unavailable(format!("opening DuckDB at {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "opened DuckDB sink");
        Ok(Self::from_connection(conn))
    }

    /// Open a DuckDB in‐memory database
    pub fn open_in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SinkError::Unavailable(format!("opening in-memory DuckDB: {}", e)))?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SinkError> {
        self.conn
            .lock()
            .map_err(|_| SinkError::Unavailable("DuckDB connection poisoned".into()))
    }
}

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::UInt32 => "UINTEGER",
        ColumnType::Float64 => "DOUBLE",
    }
}

/// `CREATE TABLE IF NOT EXISTS` plus an index on the ordering column.
fn create_table_sql(schema: &TableSchema) -> Result<String, SinkError> {
    validate_identifier(&schema.name)?;
    let columns: Vec<String> = schema
        .columns
        .iter()
        .map(|c| {
            validate_identifier(&c.name)?;
            Ok(format!("\"{}\" {}", c.name, sql_type(c.ty)))
        })
        .collect::<Result<_, SinkError>>()?;
    validate_identifier(&schema.order_by)?;

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" ({columns});\n\
         CREATE INDEX IF NOT EXISTS \"{table}_{key}_idx\" ON \"{table}\" (\"{key}\");",
        table = schema.name,
        columns = columns.join(", "),
        key = schema.order_by,
    ))
}

fn ensure(conn: &Connection, schema: &TableSchema) -> Result<(), SinkError> {
    let sql = create_table_sql(schema)?;
    conn.execute_batch(&sql).map_err(|e| SinkError::Ddl {
        table: schema.name.clone(),
        message: e.to_string(),
    })?;
    debug!(table = %schema.name, "ensured table");
    Ok(())
}

/// Insert rows via Appender::append_rows in bulk
fn append(conn: &Connection, table: &str, rows: &[SalesRow]) -> Result<(), SinkError> {
    validate_identifier(table)?;
    let insert_err = |e: duckdb::Error| SinkError::Insert {
        table: table.to_string(),
        message: e.to_string(),
    };

    let mut appender = conn.appender(table).map_err(insert_err)?;
    appender
        .append_rows(rows.iter().map(|row| {
            [
                &row.product_id as &dyn ToSql,
                &row.total_sales_sum as &dyn ToSql,
                &row.average_quantity as &dyn ToSql,
                &row.total_quantity as &dyn ToSql,
                &row.number_of_sales as &dyn ToSql,
            ]
        }))
        .map_err(insert_err)?;
    appender.flush().map_err(insert_err)?;
    Ok(())
}

impl AnalyticsSink for DuckSink {
    fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError> {
        let conn = self.lock()?;
        ensure(&conn, schema)
    }

    fn insert_rows(&self, table: &str, rows: &[ProductMetric]) -> Result<(), SinkError> {
        let rows = to_sales_rows(rows)?;
        let conn = self.lock()?;
        append(&conn, table, &rows)
    }

    /// Ensure + insert inside one transaction: a failed insert leaves nothing behind.
    fn write_metrics(&self, schema: &TableSchema, rows: &[ProductMetric]) -> Result<(), SinkError> {
        let rows = to_sales_rows(rows)?;

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| SinkError::Unavailable(format!("starting transaction: {}", e)))?;
        ensure(&tx, schema)?;
        if !rows.is_empty() {
            append(&tx, &schema.name, &rows)?;
        }
        tx.commit().map_err(|e| SinkError::Insert {
            table: schema.name.clone(),
            message: format!("commit failed: {}", e),
        })?;

        debug!(table = %schema.name, rows = rows.len(), "committed product metrics");
        Ok(())
    }
}
