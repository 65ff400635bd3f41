//! Sales CSV ingestion: upload raw files to an object store, then validate,
//! clean and aggregate them into per-product metrics stored in an analytical sink.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod server;
pub mod sink;
pub mod store;

pub use config::Config;
pub use error::PipelineError;
pub use pipeline::{Pipeline, Upload};
