//! Parsed output of a finished job.

use std::path::Path;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SchedError, SchedResult};
use crate::job::Job;

/// Named values produced by a result parser.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedResults {
    parser: String,
    values: Map<String, Value>,
}

impl ParsedResults {
    pub fn new(parser: impl Into<String>) -> Self {
        Self {
            parser: parser.into(),
            values: Map::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(name.into(), value)
    }

    /// Name of the parser that produced these results.
    pub fn parser(&self) -> &str {
        &self.parser
    }

    pub fn get(&self, name: &str) -> SchedResult<&Value> {
        self.values.get(name).ok_or_else(|| SchedError::ResultNotFound {
            parser: self.parser.clone(),
            name: name.to_string(),
        })
    }

    /// Typed lookup; a value of the wrong shape is a validation error.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> SchedResult<T> {
        let value = self.get(name)?;
        serde_json::from_value(value.clone()).map_err(|e| {
            SchedError::Validation(format!(
                "Result '{name}' of parser '{}' has unexpected type: {e}",
                self.parser
            ))
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Turns a retrieved folder into [`ParsedResults`].
#[async_trait]
pub trait ResultParser: Send + Sync {
    /// Name recorded on the results and in `ResultNotFound` errors.
    fn name(&self) -> &str;

    async fn parse(&self, job: &Job, retrieved: &Path) -> SchedResult<ParsedResults>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn results() -> ParsedResults {
        ParsedResults::new("pw")
            .with("energy", json!(-12.5))
            .with("converged", json!(true))
    }

    #[test]
    fn test_lookup() {
        let results = results();
        assert_eq!(results.parser(), "pw");
        assert_eq!(results.get("energy").unwrap(), &json!(-12.5));
        assert!(results.get_as::<bool>("converged").unwrap());
        assert!(results.contains("energy"));
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["converged", "energy"]);
    }

    #[test]
    fn test_missing_result() {
        let err = results().get("forces").unwrap_err();
        assert_eq!(err.to_string(), "Parser 'pw' produced no result named 'forces'");
    }

    #[test]
    fn test_wrong_type() {
        let err = results().get_as::<String>("energy").unwrap_err();
        assert!(matches!(err, SchedError::Validation(_)));
    }
}
