// src/sink/warehouse.rs

use arrow::{
    array::{ArrayRef, Float64Array, UInt32Array},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use chrono::Utc;
use glob::glob;
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter},
    basic::Compression,
    file::properties::WriterProperties,
};
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, info};

use super::{
    to_sales_rows, validate_identifier, AnalyticsSink, ColumnType, SalesRow, SinkError,
    TableSchema,
};
use crate::process::ProductMetric;

const SCHEMA_FILE: &str = "_schema.json";

/// A directory-per-table store of append-only Parquet part files.
///
/// `<root>/<table>/_schema.json` marks the table as created; each insert adds one
/// `part-<micros>-<seq>.parquet`. Parts are written to a dot-prefixed temp file
/// and renamed, so readers only ever see complete files.
pub struct ParquetSink {
    root: PathBuf,
    seq: AtomicU64,
}

/// Map a column type onto its Arrow DataType.
fn arrow_type(ty: ColumnType) -> DataType {
    match ty {
        ColumnType::UInt32 => DataType::UInt32,
        ColumnType::Float64 => DataType::Float64,
    }
}

/// Build an ArrowSchema (inside an Arc) from a table definition.
fn arrow_schema(schema: &TableSchema) -> Arc<Schema> {
    let fields: Vec<Field> = schema
        .columns
        .iter()
        .map(|col| Field::new(&col.name, arrow_type(col.ty), false))
        .collect();
    Arc::new(Schema::new(fields))
}

fn to_record_batch(schema: &TableSchema, rows: &[SalesRow]) -> Result<RecordBatch, SinkError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.product_id))),
        Arc::new(Float64Array::from_iter_values(
            rows.iter().map(|r| r.total_sales_sum),
        )),
        Arc::new(Float64Array::from_iter_values(
            rows.iter().map(|r| r.average_quantity),
        )),
        Arc::new(UInt32Array::from_iter_values(
            rows.iter().map(|r| r.total_quantity),
        )),
        Arc::new(UInt32Array::from_iter_values(
            rows.iter().map(|r| r.number_of_sales),
        )),
    ];
    RecordBatch::try_new(arrow_schema(schema), columns).map_err(|e| SinkError::Insert {
        table: schema.name.clone(),
        message: format!("building record batch: {}", e),
    })
}

impl ParquetSink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            SinkError::Unavailable(format!("creating warehouse {}: {}", root.display(), e))
        })?;
        info!(root = %root.display(), "opened Parquet sink");
        Ok(Self {
            root,
            seq: AtomicU64::new(0),
        })
    }

    fn table_dir(&self, table: &str) -> Result<PathBuf, SinkError> {
        validate_identifier(table)?;
        Ok(self.root.join(table))
    }

    fn load_schema(dir: &Path) -> Result<Option<TableSchema>, SinkError> {
        let path = dir.join(SCHEMA_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let file = File::open(&path)
            .map_err(|e| SinkError::Unavailable(format!("opening {}: {}", path.display(), e)))?;
        serde_json::from_reader(file)
            .map(Some)
            .map_err(|e| SinkError::Unavailable(format!("corrupt {}: {}", path.display(), e)))
    }

    fn next_part_name(&self) -> String {
        format!(
            "part-{}-{:06}.parquet",
            Utc::now().timestamp_micros(),
            self.seq.fetch_add(1, Ordering::Relaxed)
        )
    }

    /// Read every row of `table` back, part by part in name order.
    pub fn read_rows(&self, table: &str) -> Result<Vec<SalesRow>, SinkError> {
        let dir = self.table_dir(table)?;
        let read_err = |e: String| SinkError::Unavailable(format!("reading {}: {}", table, e));

        let pattern = format!("{}/part-*.parquet", dir.display());
        let mut parts: Vec<PathBuf> = glob(&pattern)
            .map_err(|e| read_err(e.to_string()))?
            .filter_map(Result::ok)
            .collect();
        parts.sort();

        let mut rows = Vec::new();
        for part in parts {
            let file = File::open(&part).map_err(|e| read_err(e.to_string()))?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(file)
                .and_then(|b| b.build())
                .map_err(|e| read_err(e.to_string()))?;
            for batch in reader {
                let batch = batch.map_err(|e| read_err(e.to_string()))?;
                let u32_col = |i: usize| {
                    batch
                        .column(i)
                        .as_any()
                        .downcast_ref::<UInt32Array>()
                        .ok_or_else(|| read_err(format!("column {} is not UInt32", i)))
                };
                let f64_col = |i: usize| {
                    batch
                        .column(i)
                        .as_any()
                        .downcast_ref::<Float64Array>()
                        .ok_or_else(|| read_err(format!("column {} is not Float64", i)))
                };
                let (product_id, total_sales_sum, average_quantity, total_quantity, sales) =
                    (u32_col(0)?, f64_col(1)?, f64_col(2)?, u32_col(3)?, u32_col(4)?);
                for i in 0..batch.num_rows() {
                    rows.push(SalesRow {
                        product_id: product_id.value(i),
                        total_sales_sum: total_sales_sum.value(i),
                        average_quantity: average_quantity.value(i),
                        total_quantity: total_quantity.value(i),
                        number_of_sales: sales.value(i),
                    });
                }
            }
        }
        Ok(rows)
    }
}

impl AnalyticsSink for ParquetSink {
    fn ensure_table(&self, schema: &TableSchema) -> Result<(), SinkError> {
        let dir = self.table_dir(&schema.name)?;
        let ddl_err = |message: String| SinkError::Ddl {
            table: schema.name.clone(),
            message,
        };

        fs::create_dir_all(&dir).map_err(|e| ddl_err(e.to_string()))?;
        match Self::load_schema(&dir)? {
            Some(existing) if existing == *schema => return Ok(()),
            Some(_) => return Err(ddl_err("table exists with a different schema".into())),
            None => {}
        }

        // Racing creators write identical content, so the last rename wins harmlessly.
        let tmp = dir.join(format!(
            ".{}.{}.tmp",
            SCHEMA_FILE,
            self.seq.fetch_add(1, Ordering::Relaxed)
        ));
        let body = serde_json::to_vec_pretty(schema).map_err(|e| ddl_err(e.to_string()))?;
        fs::write(&tmp, body).map_err(|e| ddl_err(e.to_string()))?;
        fs::rename(&tmp, dir.join(SCHEMA_FILE)).map_err(|e| ddl_err(e.to_string()))?;

        info!(table = %schema.name, "created table");
        Ok(())
    }

    fn insert_rows(&self, table: &str, rows: &[ProductMetric]) -> Result<(), SinkError> {
        let dir = self.table_dir(table)?;
        let schema = Self::load_schema(&dir)?
            .ok_or_else(|| SinkError::Rejected(format!("table `{}` does not exist", table)))?;
        if schema.columns != TableSchema::sales(table).columns {
            return Err(SinkError::Rejected(format!(
                "table `{}` is not a product metrics table",
                table
            )));
        }

        let mut rows = to_sales_rows(rows)?;
        rows.sort_by_key(|r| r.product_id);
        let batch = to_record_batch(&schema, &rows)?;

        let insert_err = |message: String| SinkError::Insert {
            table: table.to_string(),
            message,
        };
        let name = self.next_part_name();
        let tmp_path = dir.join(format!(".{}.tmp", name));
        let final_path = dir.join(&name);

        let file = File::create(&tmp_path)
            .map_err(|e| insert_err(format!("creating {}: {}", tmp_path.display(), e)))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(BufWriter::new(file), batch.schema(), Some(props))
            .map_err(|e| insert_err(format!("creating parquet writer: {}", e)))?;
        writer
            .write(&batch)
            .map_err(|e| insert_err(format!("writing batch: {}", e)))?;
        writer
            .close()
            .map_err(|e| insert_err(format!("closing parquet writer: {}", e)))?;

        fs::rename(&tmp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            insert_err(format!("renaming {}: {}", tmp_path.display(), e))
        })?;

        debug!(table, part = %name, rows = rows.len(), "wrote part file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    fn metric(product_id: &str, total_quantity: u32) -> ProductMetric {
        ProductMetric {
            product_id: product_id.into(),
            total_sales_sum: total_quantity as f64 * 10.0,
            average_quantity: total_quantity as f64 / 2.0,
            total_quantity,
            number_of_sales: 2,
        }
    }

    fn part_files(dir: &Path) -> Result<usize> {
        Ok(fs::read_dir(dir)?
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("part-"))
            .count())
    }

    #[test]
    fn ensure_table_is_idempotent() -> Result<()> {
        let dir = tempdir()?;
        let sink = ParquetSink::new(dir.path())?;
        let schema = TableSchema::sales("sales");

        sink.ensure_table(&schema)?;
        sink.ensure_table(&schema)?;

        let entries: Vec<String> = fs::read_dir(dir.path().join("sales"))?
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec![SCHEMA_FILE.to_string()]);
        Ok(())
    }

    #[test]
    fn conflicting_schema_is_a_ddl_error() -> Result<()> {
        let dir = tempdir()?;
        let sink = ParquetSink::new(dir.path())?;
        sink.ensure_table(&TableSchema::sales("sales"))?;

        let mut other = TableSchema::sales("sales");
        other.columns.pop();
        assert!(matches!(
            sink.ensure_table(&other),
            Err(SinkError::Ddl { .. })
        ));
        Ok(())
    }

    #[test]
    fn each_write_appends_a_sorted_part() -> Result<()> {
        let dir = tempdir()?;
        let sink = ParquetSink::new(dir.path())?;
        let schema = TableSchema::sales("sales");

        sink.write_metrics(&schema, &[metric("9", 1), metric("2", 4)])?;
        sink.write_metrics(&schema, &[metric("5", 3)])?;
        sink.write_metrics(&schema, &[])?;

        assert_eq!(part_files(&dir.path().join("sales"))?, 2);
        let rows = sink.read_rows("sales")?;
        let ids: Vec<u32> = rows.iter().map(|r| r.product_id).collect();
        assert_eq!(ids, vec![2, 9, 5]);
        assert_eq!(rows[0].total_quantity, 4);
        assert_eq!(rows[0].total_sales_sum, 40.0);
        assert_eq!(rows[0].average_quantity, 2.0);
        Ok(())
    }

    #[test]
    fn insert_before_ensure_is_rejected() -> Result<()> {
        let dir = tempdir()?;
        let sink = ParquetSink::new(dir.path())?;
        assert!(matches!(
            sink.insert_rows("sales", &[metric("1", 1)]),
            Err(SinkError::Rejected(_))
        ));
        Ok(())
    }

    #[test]
    fn concurrent_writers_do_not_clobber_each_other() -> Result<()> {
        let dir = tempdir()?;
        let sink = ParquetSink::new(dir.path())?;
        let schema = TableSchema::sales("sales");

        std::thread::scope(|s| {
            for i in 0..4u32 {
                let (sink, schema) = (&sink, &schema);
                s.spawn(move || {
                    sink.write_metrics(schema, &[metric(&i.to_string(), i)])
                        .unwrap()
                });
            }
        });

        assert_eq!(part_files(&dir.path().join("sales"))?, 4);
        assert_eq!(sink.read_rows("sales")?.len(), 4);
        Ok(())
    }
}
