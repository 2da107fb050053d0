//! Document validation and measurement extraction
//!
//! Turns raw JSON documents into `Measurement`s before they reach bucket
//! assignment. Everything that can be wrong with a document is reported
//! here as a `ValidationError`; the assigner only ever sees well-formed
//! timestamps.
//!
//! Accepted time values:
//!
//! - integer milliseconds since the Unix epoch
//! - RFC 3339 strings such as `"2021-04-22T20:00:00Z"`
//! - extended JSON `{"$date": ...}` wrapping either of the above

use crate::error::ValidationError;
use crate::types::{GroupingKey, Measurement, Timestamp};
use chrono::DateTime;
use serde_json::{Map, Value};

/// Extracts measurements from documents for one collection's field layout
#[derive(Debug, Clone)]
pub struct MeasurementExtractor {
    time_field: String,
    meta_field: Option<String>,
}

impl MeasurementExtractor {
    /// Create an extractor for the given time and optional meta field
    pub fn new(time_field: impl Into<String>, meta_field: Option<String>) -> Self {
        Self {
            time_field: time_field.into(),
            meta_field,
        }
    }

    /// Configured time field
    pub fn time_field(&self) -> &str {
        &self.time_field
    }

    /// Configured meta field
    pub fn meta_field(&self) -> Option<&str> {
        self.meta_field.as_deref()
    }

    /// Validate `document` and split it into key, timestamp and payload
    ///
    /// ```
    /// use kuba_buckets::ingestion::MeasurementExtractor;
    /// use kuba_buckets::types::GroupingKey;
    /// use serde_json::json;
    ///
    /// let extractor = MeasurementExtractor::new("t", Some("host".into()));
    /// let m = extractor
    ///     .extract(&json!({"t": "2021-04-22T20:00:00Z", "host": "a", "cpu": 0.5}))
    ///     .unwrap();
    /// assert_eq!(m.timestamp, 1_619_121_600_000);
    /// assert_eq!(m.key, GroupingKey::Meta("\"a\"".into()));
    /// assert_eq!(m.payload.len(), 1);
    /// ```
    pub fn extract(&self, document: &Value) -> Result<Measurement, ValidationError> {
        let fields = match document {
            Value::Object(fields) => fields,
            other => return Err(ValidationError::NotADocument(json_type(other).to_string())),
        };

        let time_value = fields
            .get(&self.time_field)
            .ok_or_else(|| ValidationError::MissingTimeField(self.time_field.clone()))?;
        let timestamp = self.parse_time(time_value)?;

        let key = self
            .meta_field
            .as_ref()
            .and_then(|meta| fields.get(meta))
            .map_or(GroupingKey::Global, GroupingKey::from_meta);

        let payload: Map<String, Value> = fields
            .iter()
            .filter(|(name, _)| {
                name.as_str() != self.time_field && Some(name.as_str()) != self.meta_field()
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Ok(Measurement {
            key,
            timestamp,
            payload,
        })
    }

    fn parse_time(&self, value: &Value) -> Result<Timestamp, ValidationError> {
        match value {
            Value::Number(n) => n.as_i64().ok_or_else(|| {
                self.invalid_time(format!("{} is not an integer millisecond timestamp", n))
            }),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp_millis())
                .map_err(|e| self.invalid_time(format!("'{}' is not an RFC 3339 date: {}", s, e))),
            Value::Object(wrapper) if wrapper.len() == 1 => match wrapper.get("$date") {
                Some(inner @ (Value::Number(_) | Value::String(_))) => self.parse_time(inner),
                _ => Err(self.invalid_time("expected a date".to_string())),
            },
            other => Err(self.invalid_time(format!("expected a date, got {}", json_type(other)))),
        }
    }

    fn invalid_time(&self, message: String) -> ValidationError {
        ValidationError::InvalidTimeField {
            field: self.time_field.clone(),
            message,
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
