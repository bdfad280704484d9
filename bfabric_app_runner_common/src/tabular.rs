//! Small string-valued tables, with CSV and Parquet serialization.
//!
//! LIMS datasets hold every cell as text, so we do the same. Column types
//! are only inferred when uploading a table back to the LIMS.

use parquet::{
    basic::{ConvertedType, Repetition, Type as PhysicalType},
    data_type::{ByteArray, ByteArrayType},
    file::{properties::WriterProperties, writer::SerializedFileWriter},
    schema::types::Type,
};
use std::sync::Arc;

use crate::prelude::*;

/// A table of strings with named columns.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

/// The column types the LIMS understands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColumnType {
    /// Every value parses as an integer.
    Integer,
    /// Every value parses as a number, and at least one is not an integer.
    Float,
    /// Anything else.
    String,
}

impl ColumnType {
    /// The name used in dataset attributes.
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Integer => "Integer",
            ColumnType::Float => "Float",
            ColumnType::String => "String",
        }
    }
}

impl Table {
    /// Create an empty table with the specified columns.
    pub fn new(columns: Vec<String>) -> Table {
        Table {
            columns,
            rows: vec![],
        }
    }

    /// The column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The rows, each with one value per column.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Append a row, which must have one value per column.
    pub fn push_row(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(format_err!(
                "row has {} values but the table has {} columns",
                row.len(),
                self.columns.len(),
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Find a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Find a column by case-insensitive name.
    pub fn column_index_ignore_case(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Iterate over the values of one column.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(move |row| row[idx].as_str())
    }

    /// Keep only the rows at the specified indices, in that order.
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Append a column. Returns an error if the name is taken or the number
    /// of values is wrong.
    pub fn add_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if self.column_index(name).is_some() {
            return Err(format_err!("column {:?} already exists", name));
        }
        if values.len() != self.rows.len() {
            return Err(format_err!(
                "column {:?} has {} values but the table has {} rows",
                name,
                values.len(),
                self.rows.len(),
            ));
        }
        self.columns.push(name.to_owned());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Infer the type of a column from its values.
    pub fn column_type(&self, idx: usize) -> ColumnType {
        if self.rows.is_empty() {
            return ColumnType::String;
        }
        if self.column_values(idx).all(|v| v.trim().parse::<i64>().is_ok()) {
            ColumnType::Integer
        } else if self.column_values(idx).all(|v| v.trim().parse::<f64>().is_ok()) {
            ColumnType::Float
        } else {
            ColumnType::String
        }
    }

    /// Parse CSV data. Without a header, columns are named `column_1`,
    /// `column_2` and so on.
    pub fn from_csv<R: std::io::Read>(rdr: R, separator: u8, has_header: bool) -> Result<Table> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(separator)
            .has_headers(has_header)
            .from_reader(rdr);
        let mut rows = vec![];
        for record in rdr.records() {
            let record = record.context("could not parse CSV row")?;
            rows.push(record.iter().map(str::to_owned).collect::<Vec<_>>());
        }
        let columns = if has_header {
            rdr.headers()
                .context("could not parse CSV header")?
                .iter()
                .map(str::to_owned)
                .collect()
        } else {
            let width = rows.first().map_or(0, Vec::len);
            (1..=width).map(|i| format!("column_{}", i)).collect()
        };
        let mut table = Table::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Read a CSV file.
    pub fn read_csv(path: &Path, separator: u8, has_header: bool) -> Result<Table> {
        let file = File::open(path).with_context(|| format!("could not open {}", path.display()))?;
        Table::from_csv(file, separator, has_header)
            .with_context(|| format!("could not read {}", path.display()))
    }

    /// Serialize as CSV with a header row.
    pub fn to_csv(&self, separator: u8) -> Result<Vec<u8>> {
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(separator)
            .from_writer(vec![]);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.into_inner()
            .map_err(|err| format_err!("could not flush CSV: {}", err.error()))
    }

    /// Serialize as a Parquet file with one UTF-8 column per table column.
    pub fn to_parquet(&self) -> Result<Vec<u8>> {
        let fields = self
            .columns
            .iter()
            .map(|name| {
                Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
                    .with_repetition(Repetition::REQUIRED)
                    .with_converted_type(ConvertedType::UTF8)
                    .build()
                    .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()
            .context("could not build Parquet schema")?;
        let schema = Arc::new(
            Type::group_type_builder("schema")
                .with_fields(fields)
                .build()
                .context("could not build Parquet schema")?,
        );
        let props = Arc::new(WriterProperties::builder().build());

        let mut buf = vec![];
        let mut writer = SerializedFileWriter::new(&mut buf, schema, props)?;
        let mut row_group = writer.next_row_group()?;
        let mut idx = 0;
        while let Some(mut column) = row_group.next_column()? {
            let values = self
                .column_values(idx)
                .map(ByteArray::from)
                .collect::<Vec<_>>();
            column
                .typed::<ByteArrayType>()
                .write_batch(&values, None, None)?;
            column.close()?;
            idx += 1;
        }
        row_group.close()?;
        writer.close()?;
        Ok(buf)
    }
}

#[test]
fn csv_round_trip_preserves_values() {
    let mut table = Table::new(vec!["Resource".to_owned(), "Name".to_owned()]);
    table.push_row(vec!["1".to_owned(), "a, b".to_owned()]).unwrap();
    let csv = table.to_csv(b',').unwrap();
    assert_eq!(String::from_utf8(csv.clone()).unwrap(), "Resource,Name\n1,\"a, b\"\n");
    assert_eq!(Table::from_csv(&csv[..], b',', true).unwrap(), table);
}

#[test]
fn headerless_csv_gets_numbered_columns() {
    let table = Table::from_csv(&b"1\t2.5\tx\n3\t4\ty\n"[..], b'\t', false).unwrap();
    assert_eq!(table.columns(), &["column_1", "column_2", "column_3"]);
    assert_eq!(table.column_type(0), ColumnType::Integer);
    assert_eq!(table.column_type(1), ColumnType::Float);
    assert_eq!(table.column_type(2), ColumnType::String);
}

#[test]
fn parquet_output_has_magic_bytes() {
    let mut table = Table::new(vec!["File".to_owned()]);
    table.push_row(vec!["a.raw".to_owned()]).unwrap();
    let bytes = table.to_parquet().unwrap();
    assert_eq!(&bytes[..4], b"PAR1");
    assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
}

#[test]
fn add_column_rejects_duplicates() {
    let mut table = Table::new(vec!["File".to_owned()]);
    assert!(table.add_column("File", vec![]).is_err());
    table.add_column("File.1", vec![]).unwrap();
    assert_eq!(table.columns().len(), 2);
}
