// src/process/mod.rs
//! The sales transformation: CSV bytes → [`RawTable`] → [`CleanedTable`] →
//! [`ProductMetric`]s → sink.

pub mod aggregate;
pub mod clean;
pub mod raw_table;
pub mod utils;

pub use aggregate::{aggregate, aggregate_and_store, ProductId, ProductMetric};
pub use clean::{clean, CleanedSaleRecord, CleanedTable, EXPECTED_COLUMNS};
pub use raw_table::{parse_csv, RawTable};
