// src/sink/mod.rs

pub mod duck;
pub mod warehouse;

pub use duck::DuckSink;
pub use warehouse::ParquetSink;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::{ProductId, ProductMetric};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("analytical store unavailable: {0}")]
    Unavailable(String),

    #[error("creating table `{table}` failed: {message}")]
    Ddl { table: String, message: String },

    #[error("inserting into `{table}` failed: {message}")]
    Insert { table: String, message: String },

    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    UInt32,
    Float64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

/// Destination table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
    /// Column the table is ordered/indexed by.
    pub order_by: String,
}

impl TableSchema {
    /// The product metrics table.
    pub fn sales(name: impl Into<String>) -> Self {
        let col = |name: &str, ty| Column {
            name: name.to_string(),
            ty,
        };
        Self {
            name: name.into(),
            columns: vec![
                col("product_id", ColumnType::UInt32),
                col("total_sales_sum", ColumnType::Float64),
                col("average_quantity", ColumnType::Float64),
                col("total_quantity", ColumnType::UInt32),
                col("number_of_sales", ColumnType::UInt32),
            ],
            order_by: "product_id".to_string(),
        }
    }
}

/// One row of the destination table, with `product_id` narrowed to its stored type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SalesRow {
    pub product_id: u32,
    pub total_sales_sum: f64,
    pub average_quantity: f64,
    pub total_quantity: u32,
    pub number_of_sales: u32,
}

impl TryFrom<&ProductMetric> for SalesRow {
    type Error = SinkError;

    fn try_from(m: &ProductMetric) -> Result<Self, SinkError> {
        let product_id = match &m.product_id {
            ProductId::Numeric(n) => u32::try_from(*n).ok(),
            ProductId::Text(_) => None,
        }
        .ok_or_else(|| {
            SinkError::Rejected(format!(
                "product_id `{}` is not an unsigned 32-bit integer",
                m.product_id
            ))
        })?;
        Ok(SalesRow {
            product_id,
            total_sales_sum: m.total_sales_sum,
            average_quantity: m.average_quantity,
            total_quantity: m.total_quantity,
            number_of_sales: m.number_of_sales,
        })
    }
}

pub fn to_sales_rows(metrics: &[ProductMetric]) -> Result<Vec<SalesRow>, SinkError> {
    metrics.iter().map(SalesRow::try_from).collect()
}

/// Table names are spliced into SQL and file paths, so only plain identifiers pass.
pub fn validate_identifier(name: &str) -> Result<(), SinkError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SinkError::Rejected(format!(
            "`{}` is not a valid table name",
            name
        )))
    }
}

/// An append-only analytical store for product metrics.
pub trait AnalyticsSink: Send + Sync {
    /// Create the table if it is absent. Safe to call repeatedly and concurrently.
    fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError>;

    /// Append one row per metric.
    fn insert_rows(&self, table: &str, rows: &[ProductMetric]) -> Result<(), SinkError>;

    /// Ensure the table, then insert. Sinks that support transactions override this
    /// to make the pair atomic.
    fn write_metrics(&self, schema: &TableSchema, rows: &[ProductMetric]) -> Result<(), SinkError> {
        self.ensure_table(schema)?;
        if rows.is_empty() {
            return Ok(());
        }
        self.insert_rows(&schema.name, rows)
    }
}
