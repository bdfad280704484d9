//! Turning a local CSV file into a LIMS dataset record.

use serde_json::{json, Value};

use crate::prelude::*;
use crate::tabular::{ColumnType, Table};

/// Fail if any cell of `table` contains one of `invalid_characters`.
pub fn check_invalid_characters(table: &Table, invalid_characters: &str) -> Result<()> {
    if invalid_characters.is_empty() {
        return Ok(());
    }
    let invalid_columns = table
        .columns()
        .iter()
        .enumerate()
        .filter(|(idx, _)| {
            table
                .column_values(*idx)
                .any(|value| value.chars().any(|c| invalid_characters.contains(c)))
        })
        .map(|(_, name)| name.as_str())
        .collect::<Vec<_>>();
    if !invalid_columns.is_empty() {
        return Err(RunnerError::config(format!(
            "invalid characters found in columns: {}",
            invalid_columns.join(", ")
        )));
    }
    Ok(())
}

/// Build the `attribute` and `item` fields of a dataset record. Integer
/// cells are sent as numbers, everything else as text.
pub fn table_to_dataset_record(table: &Table) -> Record {
    let types = (0..table.columns().len())
        .map(|idx| table.column_type(idx))
        .collect::<Vec<_>>();
    let attributes = table
        .columns()
        .iter()
        .zip(&types)
        .enumerate()
        .map(|(idx, (name, ty))| json!({"name": name, "position": idx + 1, "type": ty.as_str()}))
        .collect::<Vec<_>>();
    let items = table
        .rows()
        .iter()
        .enumerate()
        .map(|(row_idx, row)| {
            let fields = row
                .iter()
                .zip(&types)
                .enumerate()
                .map(|(idx, (value, ty))| {
                    json!({"attributeposition": idx + 1, "value": cell_value(value, *ty)})
                })
                .collect::<Vec<_>>();
            json!({"field": fields, "position": row_idx + 1})
        })
        .collect::<Vec<_>>();

    let mut record = Record::new();
    record.insert("attribute".to_owned(), Value::Array(attributes));
    record.insert("item".to_owned(), Value::Array(items));
    record
}

fn cell_value(value: &str, ty: ColumnType) -> Value {
    match ty {
        ColumnType::Integer => value
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(value)),
        _ => Value::from(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::from_csv(&b"sample,count,ratio\nA,1,0.5\nB,2,1\n"[..], b',', true).unwrap()
    }

    #[test]
    fn columns_get_inferred_types() {
        let record = table_to_dataset_record(&table());
        assert_eq!(
            record["attribute"],
            json!([
                {"name": "sample", "position": 1, "type": "String"},
                {"name": "count", "position": 2, "type": "Integer"},
                {"name": "ratio", "position": 3, "type": "Float"},
            ])
        );
        assert_eq!(
            record["item"][1],
            json!({"field": [
                {"attributeposition": 1, "value": "B"},
                {"attributeposition": 2, "value": 2},
                {"attributeposition": 3, "value": "1"},
            ], "position": 2})
        );
    }

    #[test]
    fn invalid_characters_name_the_columns() {
        assert!(check_invalid_characters(&table(), "").is_ok());
        assert!(check_invalid_characters(&table(), ";").is_ok());
        let err = check_invalid_characters(&table(), ".").unwrap_err();
        assert!(err.to_string().contains("ratio"), "{}", err);
    }
}
