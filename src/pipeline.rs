// src/pipeline.rs

use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    error::PipelineError,
    process::{aggregate_and_store, clean, parse_csv, ProductMetric},
    sink::{AnalyticsSink, TableSchema},
    store::{ObjectStore, StoreError},
};

const DEFAULT_CONTENT_TYPE: &str = "text/csv";

/// A file received for ingestion.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// The sales pipeline and the collaborators it runs against.
///
/// Cloning is cheap; all clones share the same store and sink handles.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn AnalyticsSink>,
    schema: Arc<TableSchema>,
}

/// Treat an absent or blank identifier as missing.
fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, PipelineError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(PipelineError::MissingParameter(name)),
    }
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        sink: Arc<dyn AnalyticsSink>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            store,
            sink,
            schema: Arc::new(TableSchema::sales(table)),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn create_bucket(&self, bucket: Option<&str>) -> Result<(), PipelineError> {
        let bucket = required(bucket, "bucket_name")?;

        if self
            .store
            .bucket_exists(bucket)
            .map_err(PipelineError::UpstreamStoreFailure)?
        {
            return Err(PipelineError::AlreadyExists(bucket.to_string()));
        }
        match self.store.create_bucket(bucket) {
            Ok(()) => Ok(()),
            Err(StoreError::BucketAlreadyExists(name)) => Err(PipelineError::AlreadyExists(name)),
            Err(e) => Err(PipelineError::UpstreamStoreFailure(e)),
        }
    }

    /// Store an uploaded CSV as-is under its file name. Returns the object key.
    #[tracing::instrument(level = "info", skip(self, upload))]
    pub fn ingest(
        &self,
        bucket: Option<&str>,
        upload: Option<Upload>,
    ) -> Result<String, PipelineError> {
        let bucket = required(bucket, "bucket_name")?;
        let upload = upload.ok_or(PipelineError::MissingParameter("file"))?;

        // browsers may send a full client-side path
        let key = upload
            .file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        if !key.to_ascii_lowercase().ends_with(".csv") {
            return Err(PipelineError::InvalidFileFormat(
                "Please upload a CSV file".into(),
            ));
        }

        let content_type = upload
            .content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        self.store
            .store(bucket, key, &upload.body, content_type)
            .map_err(PipelineError::UpstreamStoreFailure)?;

        info!(bucket, key, bytes = upload.body.len(), "ingested sales file");
        Ok(key.to_string())
    }

    /// Fetch a stored CSV, clean it, aggregate it and persist the metrics.
    ///
    /// Nothing touches the sink until the file has been fetched and its columns
    /// validated.
    #[tracing::instrument(level = "info", skip(self))]
    pub fn transform(
        &self,
        bucket: Option<&str>,
        file_name: Option<&str>,
    ) -> Result<Vec<ProductMetric>, PipelineError> {
        let bucket = required(bucket, "bucket_name")?;
        let file_name = required(file_name, "file_name")?;

        let data = self
            .store
            .fetch(bucket, file_name)
            .map_err(PipelineError::UpstreamFetchFailure)?;
        let raw = parse_csv(&data)?;
        let cleaned = clean(&raw)?;
        if cleaned.dropped > 0 {
            warn!(
                dropped = cleaned.dropped,
                kept = cleaned.records.len(),
                "dropped rows with non-numeric quantity or price"
            );
        }

        aggregate_and_store(&cleaned, self.sink.as_ref(), &self.schema)
    }

    pub fn list_buckets(&self) -> Result<Vec<String>, PipelineError> {
        self.store
            .list_buckets()
            .map_err(PipelineError::UpstreamFetchFailure)
    }

    pub fn list_objects(&self, bucket: Option<&str>) -> Result<Vec<String>, PipelineError> {
        let bucket = required(bucket, "bucket_name")?;
        self.store
            .list_objects(bucket)
            .map_err(PipelineError::UpstreamFetchFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        process::ProductId,
        sink::{DuckSink, SinkError},
        store::LocalObjectStore,
    };
    use anyhow::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    const SCENARIO_A: &str = "sale_id,product_id,quantity,price,date\n\
                              1,1,2,10,2024-01-01\n\
                              2,1,3,10,2024-01-02\n";

    /// Counts calls and fails every write.
    #[derive(Default)]
    struct RecordingSink {
        calls: AtomicUsize,
    }

    impl AnalyticsSink for RecordingSink {
        fn ensure_table(&self, _schema: &TableSchema) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Unavailable("connection refused".into()))
        }

        fn insert_rows(&self, _table: &str, _rows: &[ProductMetric]) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Unavailable("connection refused".into()))
        }
    }

    fn upload(name: &str, body: &str) -> Option<Upload> {
        Some(Upload {
            file_name: name.into(),
            content_type: Some("text/csv".into()),
            body: body.as_bytes().to_vec(),
        })
    }

    fn pipeline_with(sink: Arc<dyn AnalyticsSink>) -> Result<(TempDir, Pipeline)> {
        let dir = tempdir()?;
        let store = LocalObjectStore::new(dir.path())?;
        store.create_bucket("sales")?;
        Ok((dir, Pipeline::new(Arc::new(store), sink, "sales")))
    }

    #[test]
    fn ingest_then_transform_produces_metrics() -> Result<()> {
        let (_dir, pipeline) = pipeline_with(Arc::new(DuckSink::open_in_memory()?))?;

        let key = pipeline.ingest(Some("sales"), upload("jan.csv", SCENARIO_A))?;
        assert_eq!(key, "jan.csv");
        assert_eq!(pipeline.list_objects(Some("sales"))?, vec!["jan.csv"]);

        let metrics = pipeline.transform(Some("sales"), Some("jan.csv"))?;
        assert_eq!(
            metrics,
            vec![ProductMetric {
                product_id: ProductId::Numeric(1),
                total_sales_sum: 50.0,
                average_quantity: 2.5,
                total_quantity: 5,
                number_of_sales: 2,
            }]
        );
        Ok(())
    }

    #[test]
    fn ingest_validates_before_storing() -> Result<()> {
        let (_dir, pipeline) = pipeline_with(Arc::new(DuckSink::open_in_memory()?))?;

        assert!(matches!(
            pipeline.ingest(None, upload("a.csv", SCENARIO_A)),
            Err(PipelineError::MissingParameter("bucket_name"))
        ));
        assert!(matches!(
            pipeline.ingest(Some("  "), upload("a.csv", SCENARIO_A)),
            Err(PipelineError::MissingParameter("bucket_name"))
        ));
        assert!(matches!(
            pipeline.ingest(Some("sales"), None),
            Err(PipelineError::MissingParameter("file"))
        ));
        assert!(matches!(
            pipeline.ingest(Some("sales"), upload("a.xlsx", SCENARIO_A)),
            Err(PipelineError::InvalidFileFormat(_))
        ));
        assert!(pipeline.list_objects(Some("sales"))?.is_empty());
        Ok(())
    }

    #[test]
    fn ingest_keeps_only_the_base_file_name() -> Result<()> {
        let (_dir, pipeline) = pipeline_with(Arc::new(DuckSink::open_in_memory()?))?;
        let key = pipeline.ingest(Some("sales"), upload("C:\\exports\\Q1.CSV", SCENARIO_A))?;
        assert_eq!(key, "Q1.CSV");
        Ok(())
    }

    #[test]
    fn ingest_into_missing_bucket_is_a_store_failure() -> Result<()> {
        let (_dir, pipeline) = pipeline_with(Arc::new(DuckSink::open_in_memory()?))?;
        assert!(matches!(
            pipeline.ingest(Some("nowhere"), upload("a.csv", SCENARIO_A)),
            Err(PipelineError::UpstreamStoreFailure(StoreError::NoSuchBucket(_)))
        ));
        Ok(())
    }

    #[test]
    fn bad_columns_never_reach_the_sink() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let (_dir, pipeline) = pipeline_with(sink.clone())?;
        pipeline.ingest(
            Some("sales"),
            upload("bad.csv", "sale_id,product_id,qty,price,date\n1,1,2,10,2024-01-01\n"),
        )?;

        assert!(matches!(
            pipeline.transform(Some("sales"), Some("bad.csv")),
            Err(PipelineError::InvalidSchema(_))
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn unknown_bucket_fails_the_fetch_without_touching_the_sink() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let (_dir, pipeline) = pipeline_with(sink.clone())?;

        assert!(matches!(
            pipeline.transform(Some("no-such-bucket"), Some("jan.csv")),
            Err(PipelineError::UpstreamFetchFailure(StoreError::NoSuchBucket(_)))
        ));
        assert!(matches!(
            pipeline.transform(Some("sales"), None),
            Err(PipelineError::MissingParameter("file_name"))
        ));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn sink_failures_surface_as_persistence_errors() -> Result<()> {
        let sink = Arc::new(RecordingSink::default());
        let (_dir, pipeline) = pipeline_with(sink.clone())?;
        pipeline.ingest(Some("sales"), upload("jan.csv", SCENARIO_A))?;

        let err = pipeline
            .transform(Some("sales"), Some("jan.csv"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));
        assert!(err.to_string().contains("connection refused"));
        Ok(())
    }

    #[test]
    fn create_bucket_reports_duplicates() -> Result<()> {
        let (_dir, pipeline) = pipeline_with(Arc::new(DuckSink::open_in_memory()?))?;

        pipeline.create_bucket(Some("reports"))?;
        assert!(matches!(
            pipeline.create_bucket(Some("reports")),
            Err(PipelineError::AlreadyExists(_))
        ));
        assert!(matches!(
            pipeline.create_bucket(None),
            Err(PipelineError::MissingParameter("bucket_name"))
        ));
        assert_eq!(pipeline.list_buckets()?, vec!["reports", "sales"]);
        Ok(())
    }

    #[test]
    fn invalid_bucket_name_is_a_store_failure() -> Result<()> {
        let (_dir, pipeline) = pipeline_with(Arc::new(DuckSink::open_in_memory()?))?;

        let err = pipeline.create_bucket(Some("Sales")).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UpstreamStoreFailure(StoreError::InvalidName { .. })
        ));
        assert!(err.to_string().starts_with("Object store upload failed"));
        Ok(())
    }
}
