use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
};
use tracing::{debug, info};

use crate::{
    error::PipelineError,
    process::clean::CleanedTable,
    sink::{AnalyticsSink, TableSchema},
};

/// Grouping key for a product.
///
/// Ids that read as unsigned integers are compared by value, so `1`, `01` and `+1`
/// name the same product and serialize as the JSON number `1`. Anything else is
/// kept verbatim. Numeric ids order before text ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductId {
    Numeric(u64),
    Text(String),
}

impl From<&str> for ProductId {
    fn from(raw: &str) -> Self {
        match raw.parse::<u64>() {
            Ok(n) => ProductId::Numeric(n),
            Err(_) => ProductId::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductId::Numeric(n) => write!(f, "{}", n),
            ProductId::Text(s) => f.write_str(s),
        }
    }
}

/// Per-product summary of one cleaned dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMetric {
    pub product_id: ProductId,
    pub total_sales_sum: f64,
    pub average_quantity: f64,
    pub total_quantity: u32,
    /// Distinct `sale_id` values, not rows.
    pub number_of_sales: u32,
}

#[derive(Default)]
struct Accumulator<'a> {
    total_sales: f64,
    quantity: f64,
    rows: usize,
    sale_ids: HashSet<&'a str>,
}

impl Accumulator<'_> {
    fn finish(self, product_id: ProductId) -> ProductMetric {
        ProductMetric {
            product_id,
            total_sales_sum: self.total_sales,
            average_quantity: self.quantity / self.rows as f64,
            // float -> int `as` truncates toward zero and saturates at both ends
            total_quantity: self.quantity as u32,
            number_of_sales: u32::try_from(self.sale_ids.len()).unwrap_or(u32::MAX),
        }
    }
}

/// Group cleaned rows by [`ProductId`] and compute one [`ProductMetric`] per group,
/// ordered by that id.
///
/// Rows with an empty `product_id` belong to no group. Empty `sale_id` cells are
/// not counted as sales.
pub fn aggregate(cleaned: &CleanedTable) -> Vec<ProductMetric> {
    let mut groups: BTreeMap<ProductId, Accumulator> = BTreeMap::new();
    for record in &cleaned.records {
        if record.product_id.is_empty() {
            continue;
        }
        let acc = groups
            .entry(ProductId::from(record.product_id.as_str()))
            .or_default();
        acc.total_sales += record.total_sales;
        acc.quantity += record.quantity;
        acc.rows += 1;
        if !record.sale_id.is_empty() {
            acc.sale_ids.insert(record.sale_id.as_str());
        }
    }

    let metrics: Vec<ProductMetric> = groups
        .into_iter()
        .map(|(product_id, acc)| acc.finish(product_id))
        .collect();

    debug!(products = metrics.len(), "aggregated sales");
    metrics
}

/// Aggregate `cleaned` and write the metrics to `sink` under `schema`.
///
/// The table is ensured even when there is nothing to insert.
#[tracing::instrument(level = "info", skip_all, fields(table = %schema.name))]
pub fn aggregate_and_store(
    cleaned: &CleanedTable,
    sink: &dyn AnalyticsSink,
    schema: &TableSchema,
) -> Result<Vec<ProductMetric>, PipelineError> {
    let metrics = aggregate(cleaned);
    sink.write_metrics(schema, &metrics)
        .map_err(PipelineError::Persistence)?;
    info!(rows = metrics.len(), "stored product metrics");
    Ok(metrics)
}
