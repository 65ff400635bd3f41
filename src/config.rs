// src/config.rs

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{path::PathBuf, sync::Arc};

use crate::{
    pipeline::Pipeline,
    sink::{validate_identifier, AnalyticsSink, DuckSink, ParquetSink},
    store::LocalObjectStore,
};

/// Where aggregated metrics are written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// A DuckDB database file (`:memory:` for a throwaway in-memory database).
    Duckdb,
    /// A directory of append-only Parquet part files.
    Parquet,
}

/// Process configuration; every flag can also be set through its env var.
#[derive(Parser, Debug, Clone)]
#[command(name = "salesflow", about = "Sales CSV ingestion and aggregation service")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Extra tracing directive, e.g. `debug` or `salesflow=trace`
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Root directory of the object store; each bucket is a subdirectory
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "SINK", value_enum, default_value_t = SinkKind::Duckdb)]
    pub sink: SinkKind,

    /// DuckDB database file, used when `--sink duckdb`
    #[arg(long, env = "DUCKDB_PATH", default_value = "sales.duckdb")]
    pub duckdb_path: PathBuf,

    /// Parquet warehouse root, used when `--sink parquet`
    #[arg(long, env = "WAREHOUSE_DIR", default_value = "warehouse")]
    pub warehouse_dir: PathBuf,

    /// Destination table for product metrics
    #[arg(long, env = "SALES_TABLE", default_value = "sales")]
    pub table: String,

    /// Largest accepted multipart upload, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub max_upload_bytes: u64,
}

impl Config {
    /// Open the configured collaborators once and hand them to a [`Pipeline`].
    pub fn build_pipeline(&self) -> Result<Pipeline> {
        validate_identifier(&self.table)
            .with_context(|| format!("invalid SALES_TABLE {:?}", self.table))?;

        let store = LocalObjectStore::new(&self.data_dir).with_context(|| {
            format!("opening object store at {}", self.data_dir.display())
        })?;

        let sink: Arc<dyn AnalyticsSink> = match self.sink {
            SinkKind::Duckdb if self.duckdb_path.as_os_str() == ":memory:" => {
                Arc::new(DuckSink::open_in_memory().context("opening in-memory DuckDB")?)
            }
            SinkKind::Duckdb => Arc::new(DuckSink::open(&self.duckdb_path).with_context(|| {
                format!("opening DuckDB at {}", self.duckdb_path.display())
            })?),
            SinkKind::Parquet => {
                Arc::new(ParquetSink::new(&self.warehouse_dir).with_context(|| {
                    format!("opening warehouse at {}", self.warehouse_dir.display())
                })?)
            }
        };

        Ok(Pipeline::new(Arc::new(store), sink, self.table.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("salesflow").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--port",
            "9000",
            "--sink",
            "parquet",
            "--table",
            "metrics",
            "--warehouse-dir",
            "/tmp/wh",
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.sink, SinkKind::Parquet);
        assert_eq!(config.table, "metrics");
        assert_eq!(config.warehouse_dir, PathBuf::from("/tmp/wh"));
    }

    #[test]
    fn unknown_sink_is_rejected() {
        assert!(Config::try_parse_from(["salesflow", "--sink", "clickhouse"]).is_err());
    }

    #[test]
    fn builds_a_pipeline_for_each_sink() -> Result<()> {
        let dir = tempdir()?;
        let data = dir.path().join("data");
        let wh = dir.path().join("wh");
        let duck = dir.path().join("sales.duckdb");

        for sink in ["duckdb", "parquet"] {
            let config = parse(&[
                "--sink",
                sink,
                "--data-dir",
                data.to_str().unwrap(),
                "--warehouse-dir",
                wh.to_str().unwrap(),
                "--duckdb-path",
                duck.to_str().unwrap(),
                "--table",
                "sales",
            ]);
            let pipeline = config.build_pipeline()?;
            assert_eq!(pipeline.schema().name, "sales");
        }
        assert!(data.is_dir());
        assert!(wh.is_dir());
        assert!(duck.exists());
        Ok(())
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let dir = tempdir().unwrap();
        let config = parse(&[
            "--duckdb-path",
            ":memory:",
            "--data-dir",
            dir.path().to_str().unwrap(),
            "--table",
            "sales; drop",
        ]);
        assert!(config.build_pipeline().is_err());
    }
}
