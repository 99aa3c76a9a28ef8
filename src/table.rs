//! The sink-facing shape of a normalized dataset.

use chrono::NaiveDateTime;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    Timestamp,
}

impl ColumnKind {
    pub fn sql_type(self) -> &'static str {
        match self {
            ColumnKind::Text => "VARCHAR",
            ColumnKind::Integer => "BIGINT",
            ColumnKind::Real => "DOUBLE",
            ColumnKind::Timestamp => "TIMESTAMP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A single cell. Serializes to the plain CSV rendering of the value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Timestamp(NaiveDateTime),
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Real(f) => serializer.serialize_f64(*f),
            Value::Timestamp(ts) => serializer.collect_str(&ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map(Value::Real).unwrap_or(Value::Null)
    }
}

impl From<Option<NaiveDateTime>> for Value {
    fn from(v: Option<NaiveDateTime>) -> Self {
        v.map(Value::Timestamp).unwrap_or(Value::Null)
    }
}

/// A typed output record that knows its column layout.
pub trait Record {
    fn columns() -> Vec<Column>;
    fn values(&self) -> Vec<Value>;
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn from_records<R: Record>(records: &[R]) -> Self {
        Self {
            columns: R::columns(),
            rows: records.iter().map(Record::values).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct Sample {
        name: String,
        count: i64,
    }

    impl Record for Sample {
        fn columns() -> Vec<Column> {
            vec![
                Column::new("name", ColumnKind::Text),
                Column::new("count", ColumnKind::Integer),
            ]
        }

        fn values(&self) -> Vec<Value> {
            vec![Value::Text(self.name.clone()), Value::Integer(self.count)]
        }
    }

    #[test]
    fn test_from_records_keeps_layout() {
        let table = Table::from_records(&[
            Sample {
                name: "a".into(),
                count: 1,
            },
            Sample {
                name: "b".into(),
                count: 2,
            },
        ]);
        assert_eq!(table.column_names(), vec!["name", "count"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.column_index("count"), Some(1));
        assert_eq!(table.rows[1][1], Value::Integer(2));
    }

    #[test]
    fn test_value_serializes_for_csv() {
        let ts = NaiveDate::from_ymd_opt(2017, 10, 2)
            .unwrap()
            .and_hms_opt(7, 0, 0)
            .unwrap();
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.serialize(vec![
            Value::Timestamp(ts),
            Value::Null,
            Value::Real(1.5),
            Value::Text("x".into()),
        ])
        .unwrap();
        let out = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
        assert_eq!(out, "2017-10-02 07:00:00,,1.5,x\n");
    }
}
