use std::collections::BTreeSet;
use tracing::debug;

use crate::{
    error::PipelineError,
    process::{
        raw_table::RawTable,
        utils::{clean_str, parse_number},
    },
};

/// The exact column set a sales CSV must carry, in any order.
pub const EXPECTED_COLUMNS: [&str; 5] = ["sale_id", "product_id", "quantity", "price", "date"];

/// A sale row whose `quantity` and `price` are known to be numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedSaleRecord {
    pub sale_id: String,
    pub product_id: String,
    pub quantity: f64,
    pub price: f64,
    pub date: String,
    /// `quantity * price`
    pub total_sales: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedTable {
    pub records: Vec<CleanedSaleRecord>,
    /// Rows discarded because `quantity` or `price` was not a number.
    pub dropped: usize,
}

/// Positions of the expected columns within a validated header row.
#[derive(Debug, Clone, Copy)]
struct ColumnIndex {
    sale_id: usize,
    product_id: usize,
    quantity: usize,
    price: usize,
    date: usize,
}

/// Check that `headers` is exactly [`EXPECTED_COLUMNS`] as a set.
fn validate_columns(table: &RawTable) -> Result<ColumnIndex, PipelineError> {
    let found: BTreeSet<&str> = table.headers.iter().map(String::as_str).collect();
    let expected: BTreeSet<&str> = EXPECTED_COLUMNS.into_iter().collect();

    if found != expected || table.headers.len() != EXPECTED_COLUMNS.len() {
        let missing: Vec<&str> = expected.difference(&found).copied().collect();
        let unexpected: Vec<&str> = found.difference(&expected).copied().collect();

        let mut problems = Vec::new();
        if !missing.is_empty() {
            problems.push(format!("missing columns: {}", missing.join(", ")));
        }
        if !unexpected.is_empty() {
            problems.push(format!("unexpected columns: {}", unexpected.join(", ")));
        }
        if problems.is_empty() {
            problems.push("duplicated columns".to_string());
        }
        return Err(PipelineError::InvalidSchema(problems.join("; ")));
    }

    let idx = |name: &str| table.column_index(name).unwrap_or_default();
    Ok(ColumnIndex {
        sale_id: idx("sale_id"),
        product_id: idx("product_id"),
        quantity: idx("quantity"),
        price: idx("price"),
        date: idx("date"),
    })
}

/// Validate the column set, coerce `quantity`/`price` and drop rows where either is
/// not a number.
///
/// A malformed numeric cell is not an error: the row is silently removed. Only a
/// wrong column set fails, and it fails before any row is looked at.
pub fn clean(table: &RawTable) -> Result<CleanedTable, PipelineError> {
    let cols = validate_columns(table)?;

    let mut cleaned = CleanedTable {
        records: Vec::with_capacity(table.rows.len()),
        dropped: 0,
    };
    for row in &table.rows {
        let cell = |i: usize| row.get(i).map(String::as_str).unwrap_or_default();

        let (Some(quantity), Some(price)) =
            (parse_number(cell(cols.quantity)), parse_number(cell(cols.price)))
        else {
            cleaned.dropped += 1;
            continue;
        };

        cleaned.records.push(CleanedSaleRecord {
            sale_id: clean_str(cell(cols.sale_id)),
            product_id: clean_str(cell(cols.product_id)),
            quantity,
            price,
            date: clean_str(cell(cols.date)),
            total_sales: quantity * price,
        });
    }

    debug!(
        kept = cleaned.records.len(),
        dropped = cleaned.dropped,
        "cleaned sales rows"
    );
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::raw_table::parse_csv;

    fn schema_error(csv: &str) -> String {
        match clean(&parse_csv(csv.as_bytes()).unwrap()) {
            Err(PipelineError::InvalidSchema(msg)) => msg,
            other => panic!("expected InvalidSchema, got {:?}", other),
        }
    }

    #[test]
    fn column_order_does_not_matter() {
        let table = parse_csv(b"date,price,quantity,product_id,sale_id\n2024-01-01,10,2,1,s1\n")
            .unwrap();
        let cleaned = clean(&table).unwrap();

        assert_eq!(
            cleaned.records,
            vec![CleanedSaleRecord {
                sale_id: "s1".into(),
                product_id: "1".into(),
                quantity: 2.0,
                price: 10.0,
                date: "2024-01-01".into(),
                total_sales: 20.0,
            }]
        );
    }

    #[test]
    fn renamed_column_is_rejected() {
        let msg = schema_error("sale_id,product_id,qty,price,date\n1,1,2,10,2024-01-01\n");
        assert!(msg.contains("missing columns: quantity"), "{msg}");
        assert!(msg.contains("unexpected columns: qty"), "{msg}");
    }

    #[test]
    fn extra_missing_and_duplicate_columns_are_rejected() {
        schema_error("sale_id,product_id,quantity,price,date,region\n");
        schema_error("sale_id,product_id,quantity,price\n");
        let msg = schema_error("sale_id,product_id,quantity,price,date,price\n");
        assert_eq!(msg, "duplicated columns");
    }

    #[test]
    fn padded_header_names_are_rejected() {
        let msg = schema_error("sale_id, product_id ,quantity,price,date\n1,1,2,10,2024-01-01\n");
        assert!(msg.contains("missing columns: product_id"), "{msg}");
        assert!(msg.contains("unexpected columns:  product_id "), "{msg}");
    }

    #[test]
    fn empty_document_is_missing_every_column() {
        let msg = schema_error("");
        assert!(msg.starts_with("missing columns:"), "{msg}");
    }

    #[test]
    fn undecodable_bytes_do_not_hide_a_wrong_header() {
        let table = parse_csv(b"sale_id,product_id,qty,price,date\n1,\xff,2,10,d\n").unwrap();
        assert!(matches!(clean(&table), Err(PipelineError::InvalidSchema(_))));
    }

    #[test]
    fn undecodable_date_keeps_the_row() {
        let table =
            parse_csv(b"sale_id,product_id,quantity,price,date\n1,1,2,10,2024-\xff\n").unwrap();
        let cleaned = clean(&table).unwrap();
        assert_eq!(cleaned.records.len(), 1);
        assert_eq!(cleaned.records[0].date, "2024-\u{FFFD}");
    }

    #[test]
    fn rows_with_non_numeric_quantity_or_price_are_dropped() {
        let table = parse_csv(
            b"sale_id,product_id,quantity,price,date\n\
              1,1,2,10,2024-01-01\n\
              2,1,abc,10,2024-01-01\n\
              3,2,1,,2024-01-02\n\
              4,2,1\n\
              5,3,\" 4 \",2.5,2024-01-03\n",
        )
        .unwrap();
        let cleaned = clean(&table).unwrap();

        let ids: Vec<&str> = cleaned.records.iter().map(|r| r.sale_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "5"]);
        assert_eq!(cleaned.dropped, 3);
        assert_eq!(cleaned.records[1].total_sales, 10.0);
    }

    #[test]
    fn negative_values_pass_through() {
        let table =
            parse_csv(b"sale_id,product_id,quantity,price,date\n1,1,-2,10,2024-01-01\n").unwrap();
        let cleaned = clean(&table).unwrap();
        assert_eq!(cleaned.records[0].total_sales, -20.0);
    }
}
