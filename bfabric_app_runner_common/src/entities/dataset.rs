use serde_json::Value;

use crate::client::value_as_i64;
use crate::prelude::*;
use crate::tabular::Table;

entity_view!(
    /// A small typed table stored in the LIMS.
    Dataset,
    "dataset"
);

/// One column of a dataset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DatasetAttribute {
    /// The column name.
    pub name: String,
    /// The 1-based column position.
    pub position: i64,
    /// The declared type: `Integer`, `String`, `Float`, or an entity name.
    pub type_name: String,
}

impl Dataset {
    /// The dataset name.
    pub fn name(&self) -> Option<&str> {
        self.entity.str_field("name")
    }

    /// The columns, sorted by position.
    pub fn attributes(&self) -> Result<Vec<DatasetAttribute>> {
        let raw: &[Value] = match self.entity.get("attribute") {
            Some(Value::Array(items)) => items.as_slice(),
            None | Some(Value::Null) => &[],
            Some(other) => return Err(format_err!("invalid attribute data: {}", other)),
        };
        let mut attributes = raw
            .iter()
            .map(|attr| {
                let name = attr.get("name").and_then(Value::as_str);
                let position = attr.get("position").and_then(value_as_i64);
                match (name, position) {
                    (Some(name), Some(position)) => Ok(DatasetAttribute {
                        name: name.to_owned(),
                        position,
                        type_name: attr
                            .get("type")
                            .and_then(Value::as_str)
                            .unwrap_or("String")
                            .to_owned(),
                    }),
                    _ => Err(format_err!("invalid attribute data: {}", attr)),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        attributes.sort_by_key(|attr| attr.position);
        Ok(attributes)
    }

    /// The column names, in order.
    pub fn column_names(&self) -> Result<Vec<String>> {
        Ok(self.attributes()?.into_iter().map(|a| a.name).collect())
    }

    /// Convert to a table of strings. Missing and null values become empty
    /// strings.
    pub fn to_table(&self) -> Result<Table> {
        let attributes = self.attributes()?;
        let mut table = Table::new(attributes.iter().map(|a| a.name.clone()).collect());
        let items: &[Value] = match self.entity.get("item") {
            Some(Value::Array(items)) => items.as_slice(),
            None | Some(Value::Null) => &[],
            Some(other) => return Err(format_err!("invalid item data: {}", other)),
        };
        let mut items = items.iter().collect::<Vec<_>>();
        items.sort_by_key(|item| item.get("position").and_then(value_as_i64));
        for item in items {
            let fields: &[Value] = match item.get("field") {
                Some(Value::Array(fields)) => fields.as_slice(),
                Some(field @ Value::Object(_)) => std::slice::from_ref(field),
                _ => &[],
            };
            let row = attributes
                .iter()
                .map(|attr| {
                    fields
                        .iter()
                        .find(|f| f.get("attributeposition").and_then(value_as_i64) == Some(attr.position))
                        .and_then(|f| f.get("value"))
                        .map(cell_text)
                        .unwrap_or_default()
                })
                .collect();
            table.push_row(row)?;
        }
        Ok(table)
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn example_dataset(id: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": "Imaging runs",
        "attribute": [
            {"name": "PanelDataset", "position": 2, "type": "Integer"},
            {"name": "Imzml", "position": 1, "type": "Resource"},
        ],
        "item": [
            {"position": 2, "field": [{"attributeposition": 1, "value": "11"}, {"attributeposition": 2, "value": "500"}]},
            {"position": 1, "field": [{"attributeposition": 2, "value": 501}, {"attributeposition": 1, "value": "10"}]},
        ],
    })
}

#[test]
fn dataset_becomes_a_table_ordered_by_position() {
    let dataset = Dataset::from_entity(super::Entity::from_json("dataset", example_dataset(5)).unwrap());
    let table = dataset.to_table().unwrap();
    assert_eq!(table.columns(), &["Imzml", "PanelDataset"]);
    assert_eq!(
        table.rows(),
        &[vec!["10".to_owned(), "501".to_owned()], vec!["11".to_owned(), "500".to_owned()]]
    );
}
