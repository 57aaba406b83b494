//! Aggregate View Response Types
//!
//! Row shapes returned by the PostgREST-style aggregate endpoint. All
//! types derive Deserialize for JSON transport.

use serde::Deserialize;

/// One row of the `product_order_stats` view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AggregateRow {
  /// Orders counted by the view. Absent or null on a product with none.
  #[serde(default, deserialize_with = "null_as_zero")]
  pub total_orders: u64,
}

/// Total carried by a filtered result set. The view has at most one row
/// per product; an empty set means no orders yet.
pub fn total_from_rows(rows: &[AggregateRow]) -> u64 {
  rows.first().map_or(0, |row| row.total_orders)
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
  D: serde::Deserializer<'de>,
{
  Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_single_row() {
    let rows: Vec<AggregateRow> = serde_json::from_str(r#"[{"total_orders":57}]"#).unwrap();
    assert_eq!(total_from_rows(&rows), 57);
  }

  #[test]
  fn test_empty_result_is_zero() {
    let rows: Vec<AggregateRow> = serde_json::from_str("[]").unwrap();
    assert_eq!(total_from_rows(&rows), 0);
  }

  #[test]
  fn test_null_total_is_zero() {
    let rows: Vec<AggregateRow> =
      serde_json::from_str(r#"[{"total_orders":null},{"total_orders":3}]"#).unwrap();
    assert_eq!(total_from_rows(&rows), 0);
  }
}
