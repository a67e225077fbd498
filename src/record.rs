//! Query result records

use std::sync::Arc;

use crate::value::Value;
use crate::{Error, Result};

/// One row of a query result.
///
/// Column names are shared across all records of a stream; values are owned
/// per record and can be taken out with [`Record::take`].
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    keys: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl Record {
    /// Build a record, checking that the value count matches the column count.
    pub(crate) fn new(keys: Arc<Vec<String>>, values: Vec<Value>) -> Result<Self> {
        if values.len() != keys.len() {
            return Err(Error::Protocol(format!(
                "record arity mismatch: {} columns, {} values",
                keys.len(),
                values.len()
            )));
        }
        Ok(Self { keys, values })
    }

    /// Column names, in result order
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at a column position
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value under a column name
    pub fn get(&self, key: &str) -> Option<&Value> {
        let index = self.keys.iter().position(|k| k == key)?;
        self.values.get(index)
    }

    /// All values, in column order
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Take ownership of the values, consuming the record
    pub fn take(self) -> Vec<Value> {
        self.values
    }

    /// Iterate `(column, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.keys
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Convert the record to a JSON object keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.iter()
                .map(|(k, v)| (k.to_string(), v.to_json()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(keys: &[&str], values: Vec<Value>) -> Record {
        let keys = Arc::new(keys.iter().map(|k| k.to_string()).collect::<Vec<_>>());
        Record::new(keys, values).unwrap()
    }

    #[test]
    fn test_access_by_name_and_index() {
        let rec = record(&["x", "y"], vec![Value::Integer(1), Value::from("two")]);
        assert_eq!(rec.get("x").and_then(Value::as_int), Some(1));
        assert_eq!(rec.get("y").and_then(Value::as_str), Some("two"));
        assert_eq!(rec.get_index(0).and_then(Value::as_int), Some(1));
        assert_eq!(rec.get("missing"), None);
        assert_eq!(rec.get_index(5), None);
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn test_arity_mismatch_is_protocol_error() {
        let keys = Arc::new(vec!["x".to_string(), "y".to_string()]);
        let result = Record::new(keys, vec![Value::Integer(1)]);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_iteration_order() {
        let rec = record(&["a", "b"], vec![Value::Integer(1), Value::Integer(2)]);
        let pairs: Vec<_> = rec.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), Value::Integer(1)),
                ("b".to_string(), Value::Integer(2)),
            ]
        );
    }

    #[test]
    fn test_to_json() {
        let rec = record(&["n"], vec![Value::Integer(7)]);
        assert_eq!(rec.to_json(), serde_json::json!({"n": 7}));
    }
}
