//! Decoded sensor sample and its payload decoder.
//!
//! Producers publish loosely typed JSON: every field may arrive either as a
//! JSON number or as a numeric string (`"24.5"`). [`TelemetryReading::decode`]
//! accepts both and rejects anything else.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::error::ReadingError;

/// Keys accepted for the light channel, in lookup order.
const LIGHT_KEYS: [&str; 2] = ["light_raw", "light"];

/// One decoded sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TelemetryReading {
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Raw light sensor value.
    pub light: i64,
}

impl TelemetryReading {
    /// Decodes a raw telemetry payload.
    ///
    /// # Errors
    ///
    /// Returns a [`ReadingError`] if the payload is not a JSON object or if
    /// `temperature`, `humidity` or `light_raw` is missing or not numeric.
    pub fn decode(payload: &[u8]) -> Result<Self, ReadingError> {
        let Value::Object(fields) = serde_json::from_slice::<Value>(payload)? else {
            return Err(ReadingError::NotAnObject);
        };
        Self::from_fields(&fields)
    }

    /// Builds a reading from an already parsed JSON object.
    ///
    /// # Errors
    ///
    /// Returns a [`ReadingError`] if a required field is missing or not
    /// numeric.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, ReadingError> {
        let temperature = float_field(fields, "temperature")?;
        let humidity = float_field(fields, "humidity")?;
        let light = integer_field(fields)?;
        Ok(Self {
            temperature,
            humidity,
            light,
        })
    }
}

fn float_field(fields: &Map<String, Value>, name: &'static str) -> Result<f64, ReadingError> {
    let value = fields.get(name).ok_or(ReadingError::MissingField(name))?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(name, value))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integer_field(fields: &Map<String, Value>) -> Result<i64, ReadingError> {
    let Some((name, value)) = LIGHT_KEYS
        .iter()
        .find_map(|key| fields.get(*key).map(|v| (*key, v)))
    else {
        return Err(ReadingError::MissingField("light_raw"));
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .filter(|f| *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(name, value))
}

fn invalid(field: &'static str, value: &Value) -> ReadingError {
    ReadingError::InvalidField {
        field,
        value: value.to_string(),
    }
}
