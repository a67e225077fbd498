//! Parameterized queries

use std::collections::HashMap;

use crate::value::Value;

/// A query with its parameter map.
///
/// Parameters are referenced from the query text by `$name` and sent
/// separately from the text, so values never need escaping.
///
/// # Examples
///
/// ```
/// use graphwire::Query;
///
/// let query = Query::new("CREATE (n {key: $key, value: $value})")
///     .param("key", "k1")
///     .param("value", 42i64);
/// assert_eq!(query.parameters().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    parameters: HashMap<String, Value>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
        }
    }

    /// Attach a parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Attach several parameters at once
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (k, v) in params {
            self.parameters.insert(k.into(), v.into());
        }
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    pub(crate) fn into_parts(self) -> (String, HashMap<String, Value>) {
        (self.text, self.parameters)
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::new(text)
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::new(text)
    }
}
