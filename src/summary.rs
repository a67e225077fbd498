//! Result summaries
//!
//! The SUCCESS frame that ends a record stream carries server-side metadata
//! about the finished query. [`ResultSummary`] is the decoded form, returned
//! by `ResultStream::consume()` and retained after full iteration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// What kind of statement produced the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueryType {
    /// Read-only query (`r`)
    ReadOnly,
    /// Write-only query (`w`)
    WriteOnly,
    /// Read-write query (`rw`)
    ReadWrite,
    /// Schema-changing query (`s`)
    SchemaWrite,
    /// Server did not report a type
    #[default]
    Unknown,
}

impl QueryType {
    fn from_code(code: &str) -> Self {
        match code {
            "r" => Self::ReadOnly,
            "w" => Self::WriteOnly,
            "rw" => Self::ReadWrite,
            "s" => Self::SchemaWrite,
            _ => Self::Unknown,
        }
    }
}

/// Update counters reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Counters {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
}

impl Counters {
    /// Whether the query changed anything
    pub fn contains_updates(&self) -> bool {
        self.nodes_created
            + self.nodes_deleted
            + self.relationships_created
            + self.relationships_deleted
            + self.properties_set
            + self.labels_added
            + self.labels_removed
            > 0
    }

    fn from_stats(stats: &HashMap<String, Value>) -> Self {
        let get = |key: &str| {
            stats
                .get(key)
                .and_then(Value::as_int)
                .and_then(|v| u64::try_from(v).ok())
                .unwrap_or(0)
        };
        Self {
            nodes_created: get("nodes-created"),
            nodes_deleted: get("nodes-deleted"),
            relationships_created: get("relationships-created"),
            relationships_deleted: get("relationships-deleted"),
            properties_set: get("properties-set"),
            labels_added: get("labels-added"),
            labels_removed: get("labels-removed"),
        }
    }
}

/// Server-side summary of a finished query
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSummary {
    /// Statement kind, when reported
    pub query_type: QueryType,
    /// Update counters (all zero for pure reads)
    pub counters: Counters,
    /// Database the query ran against, when reported
    pub database: Option<String>,
    /// Time until the stream became available
    pub available_after: Option<Duration>,
    /// Time until the stream was fully consumed
    pub consumed_after: Option<Duration>,
}

impl ResultSummary {
    /// Decode the metadata map of a stream-ending SUCCESS frame.
    ///
    /// Missing keys fall back to defaults; an absent `stats` map means the
    /// query reported no updates.
    pub(crate) fn from_metadata(meta: &HashMap<String, Value>) -> Self {
        let query_type = meta
            .get("type")
            .and_then(Value::as_str)
            .map(QueryType::from_code)
            .unwrap_or_default();
        let counters = meta
            .get("stats")
            .and_then(Value::as_map)
            .map(Counters::from_stats)
            .unwrap_or_default();
        let database = meta
            .get("db")
            .and_then(Value::as_str)
            .map(str::to_string);
        let millis = |key: &str| {
            meta.get(key)
                .and_then(Value::as_int)
                .and_then(|v| u64::try_from(v).ok())
                .map(Duration::from_millis)
        };
        Self {
            query_type,
            counters,
            database,
            available_after: millis("t_first"),
            consumed_after: millis("t_last"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_from_metadata() {
        let mut stats = HashMap::new();
        stats.insert("nodes-created".to_string(), Value::Integer(2));
        stats.insert("properties-set".to_string(), Value::Integer(4));

        let mut meta = HashMap::new();
        meta.insert("type".to_string(), Value::from("w"));
        meta.insert("stats".to_string(), Value::Map(stats));
        meta.insert("db".to_string(), Value::from("movies"));
        meta.insert("t_last".to_string(), Value::Integer(12));

        let summary = ResultSummary::from_metadata(&meta);
        assert_eq!(summary.query_type, QueryType::WriteOnly);
        assert_eq!(summary.counters.nodes_created, 2);
        assert_eq!(summary.counters.properties_set, 4);
        assert!(summary.counters.contains_updates());
        assert_eq!(summary.database.as_deref(), Some("movies"));
        assert_eq!(summary.consumed_after, Some(Duration::from_millis(12)));
        assert_eq!(summary.available_after, None);
    }

    #[test]
    fn test_summary_defaults_when_metadata_missing() {
        let summary = ResultSummary::from_metadata(&HashMap::new());
        assert_eq!(summary.query_type, QueryType::Unknown);
        assert!(!summary.counters.contains_updates());
        assert_eq!(summary.database, None);
    }

    #[test]
    fn test_query_type_codes() {
        assert_eq!(QueryType::from_code("r"), QueryType::ReadOnly);
        assert_eq!(QueryType::from_code("rw"), QueryType::ReadWrite);
        assert_eq!(QueryType::from_code("zzz"), QueryType::Unknown);
    }
}
