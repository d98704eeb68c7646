//! Fact serialization.
//!
//! Turns one source row into a deterministic, human-readable fact string.
//! Identical row content always yields an identical fact; re-indexing
//! depends on that, and so does citing a fact back to its row.

use std::sync::Arc;

use serde_json::Value;

use crate::errors::CoreError;
use crate::records::{RecordReader, SourceRow};

/// Free-form or bookkeeping columns that would pollute retrieval.
const NOISY_FIELDS: [&str; 4] = ["metadata", "created_at", "updated_at", "imported_at"];

const FIELD_SEPARATOR: &str = " | ";

pub struct FactSerializer {
    records: Arc<dyn RecordReader>,
}

impl FactSerializer {
    pub fn new(records: Arc<dyn RecordReader>) -> Self {
        Self { records }
    }

    /// Serialize one row. Pure given the row content and the referenced
    /// lookup rows; any failed foreign-key dereference aborts the row with
    /// a `DataIntegrity` error rather than emitting a partial fact.
    pub async fn serialize(&self, row: &SourceRow) -> Result<String, CoreError> {
        match row.table.as_str() {
            "account_balances" => Ok(balance_fact(row)),
            "monthly_category_totals" => self.monthly_total_fact(row).await,
            "kb_entries" => Ok(formula_fact(row)),
            _ => Ok(generic_fact(row)),
        }
    }

    async fn monthly_total_fact(&self, row: &SourceRow) -> Result<String, CoreError> {
        let category_id = field_as_key(row, "category_id");
        let category = self
            .records
            .lookup_field("categories", &category_id, "name")
            .await?
            .ok_or_else(|| CoreError::DataIntegrity {
                table: row.table.clone(),
                row_id: row.id.clone(),
                detail: format!("category_id {category_id} not found in categories"),
            })?;

        Ok(format!(
            "Monthly Total{sep}category={}{sep}month={}{sep}total={}",
            render(&Value::from(category)),
            render_field(row, "month"),
            render_field(row, "total"),
            sep = FIELD_SEPARATOR,
        ))
    }
}

/// Point-in-time balance snapshot.
fn balance_fact(row: &SourceRow) -> String {
    format!(
        "Account Balance{sep}account_name={}{sep}account_type={}{sep}as_of={}{sep}cash_balance={}",
        render_field(row, "name"),
        render_field(row, "type"),
        render_field(row, "date"),
        render_field(row, "balance"),
        sep = FIELD_SEPARATOR,
    )
}

/// Glossary formulas are indexed as facts too, so a question phrased in
/// formula terms can retrieve the definition alongside the numbers.
fn formula_fact(row: &SourceRow) -> String {
    format!(
        "Formula{sep}title={}{sep}definition={}",
        render_field(row, "title"),
        render_field(row, "content"),
        sep = FIELD_SEPARATOR,
    )
}

/// Fallback for unrecognized tables: uppercase table name, then every field
/// as key=value in row order, minus noisy columns.
fn generic_fact(row: &SourceRow) -> String {
    let mut parts = vec![row.table.to_uppercase()];
    for (name, value) in &row.fields {
        if NOISY_FIELDS.contains(&name.as_str()) {
            continue;
        }
        parts.push(format!("{name}={}", render(value)));
    }
    parts.join(FIELD_SEPARATOR)
}

fn render_field(row: &SourceRow, key: &str) -> String {
    render(row.get(key).unwrap_or(&Value::Null))
}

/// JSON scalar rendering: strings double-quoted, numbers and booleans bare,
/// NULL as the bare token `null`. One canonical form everywhere.
fn render(value: &Value) -> String {
    value.to_string()
}

fn field_as_key(row: &SourceRow, key: &str) -> String {
    match row.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
