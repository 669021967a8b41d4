//! Raw field values and their coercion into index encodings

use crate::search::error::{SearchError, SearchResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

/// Flat, string-keyed value map used to map documents without a live entity
pub type FieldValues = HashMap<String, FieldValue>;

/// A raw value produced by a field accessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    // Untagged variants are tried in order: JSON strings stay text so
    // keyword values keep their exact form, and date fields parse text
    Text(String),
    DateTime(DateTime<Utc>),
}

impl FieldValue {
    /// String form used for keyword, text and stored-only encodings
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            FieldValue::Text(s) => s.clone(),
        }
    }

    /// Convert a JSON value; `null` maps to `None`
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(FieldValue::Int(i)),
                None => n.as_f64().map(FieldValue::Float),
            },
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            other => Some(FieldValue::Text(other.to_string())),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "integer",
            FieldValue::Float(_) => "float",
            FieldValue::DateTime(_) => "date",
            FieldValue::Text(_) => "text",
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue::Text(value.clone())
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(i64::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::DateTime(value)
    }
}

impl From<uuid::Uuid> for FieldValue {
    fn from(value: uuid::Uuid) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// Numeric encoding of a field
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NumericKind {
    #[default]
    None,
    Int32,
    Int64,
    DateEpochMillis,
    DateEpochSeconds,
}

impl NumericKind {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, NumericKind::None)
    }

    /// Coerce a raw value into the i64 stored in the index.
    ///
    /// Integers supplied for the date kinds are taken as epoch values already
    /// expressed in the target unit.
    pub fn coerce(&self, field: &str, value: &FieldValue) -> SearchResult<i64> {
        let fail = |message: String| SearchError::FieldCoercion {
            field: field.to_string(),
            kind: *self,
            message,
        };

        match self {
            NumericKind::None => Err(fail("field is not numeric".to_string())),
            NumericKind::Int32 => {
                let wide = integer_from(value).map_err(fail)?;
                i32::try_from(wide)
                    .map(i64::from)
                    .map_err(|_| fail(format!("{} is out of range for int32", wide)))
            }
            NumericKind::Int64 => integer_from(value).map_err(fail),
            NumericKind::DateEpochMillis => match value {
                FieldValue::DateTime(dt) => Ok(dt.timestamp_millis()),
                FieldValue::Text(s) => parse_date(s)
                    .map(|dt| dt.timestamp_millis())
                    .or_else(|| s.trim().parse::<i64>().ok())
                    .ok_or_else(|| fail(format!("'{}' is not a date", s))),
                other => integer_from(other).map_err(fail),
            },
            NumericKind::DateEpochSeconds => match value {
                FieldValue::DateTime(dt) => Ok(dt.timestamp()),
                FieldValue::Text(s) => parse_date(s)
                    .map(|dt| dt.timestamp())
                    .or_else(|| s.trim().parse::<i64>().ok())
                    .ok_or_else(|| fail(format!("'{}' is not a date", s))),
                other => integer_from(other).map_err(fail),
            },
        }
    }
}

fn integer_from(value: &FieldValue) -> Result<i64, String> {
    match value {
        FieldValue::Int(i) => Ok(*i),
        FieldValue::Float(f) => {
            if f.is_finite() && f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Ok(*f as i64)
            } else {
                Err(format!("{} is not an integral value", f))
            }
        }
        FieldValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' is not an integer", s)),
        other => Err(format!("a {} value cannot be coerced", other.kind_name())),
    }
}

/// Parse the date formats accepted for date fields
pub(crate) fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Lower-case a keyword value.
///
/// Turkic cultures map the dotted and dotless capital I differently from the
/// invariant rules; every other culture uses Unicode default case folding.
pub fn fold_keyword(value: &str, culture: Option<&str>) -> String {
    let turkic = culture
        .map(|c| {
            let lang = c.split(['-', '_']).next().unwrap_or("").to_ascii_lowercase();
            lang == "tr" || lang == "az"
        })
        .unwrap_or(false);

    if turkic {
        value
            .chars()
            .map(|c| match c {
                'I' => 'ı'.to_string(),
                'İ' => 'i'.to_string(),
                other => other.to_lowercase().to_string(),
            })
            .collect()
    } else {
        value.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_epoch_millis_from_datetime() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let millis = NumericKind::DateEpochMillis
            .coerce("Published", &FieldValue::DateTime(dt))
            .unwrap();
        assert_eq!(millis, 1_704_067_200_000);
    }

    #[test]
    fn test_date_epoch_from_text() {
        let value = FieldValue::from("2024-01-01T00:00:00Z");
        assert_eq!(
            NumericKind::DateEpochMillis.coerce("d", &value).unwrap(),
            1_704_067_200_000
        );
        assert_eq!(
            NumericKind::DateEpochSeconds.coerce("d", &value).unwrap(),
            1_704_067_200
        );
        assert_eq!(
            NumericKind::DateEpochSeconds
                .coerce("d", &FieldValue::from("2024-01-01"))
                .unwrap(),
            1_704_067_200
        );
    }

    #[test]
    fn test_unparseable_date_is_a_coercion_error() {
        let err = NumericKind::DateEpochMillis
            .coerce("Published", &FieldValue::from("next tuesday"))
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::FieldCoercion { ref field, kind: NumericKind::DateEpochMillis, .. } if field == "Published"
        ));
    }

    #[test]
    fn test_int32_range_is_enforced() {
        assert_eq!(
            NumericKind::Int32.coerce("n", &FieldValue::from("42")).unwrap(),
            42
        );
        assert!(NumericKind::Int32
            .coerce("n", &FieldValue::Int(i64::from(i32::MAX) + 1))
            .is_err());
        assert!(NumericKind::Int64
            .coerce("n", &FieldValue::Int(i64::from(i32::MAX) + 1))
            .is_ok());
        assert!(NumericKind::Int64.coerce("n", &FieldValue::Float(1.5)).is_err());
        assert!(NumericKind::Int64.coerce("n", &FieldValue::Bool(true)).is_err());
    }

    #[test]
    fn test_keyword_folding() {
        assert_eq!(fold_keyword("ISTANBUL", None), "istanbul");
        assert_eq!(fold_keyword("ISTANBUL", Some("tr-TR")), "ıstanbul");
        assert_eq!(fold_keyword("İzmir", Some("tr")), "izmir");
    }

    #[test]
    fn test_json_strings_deserialize_as_text() {
        let value: FieldValue = serde_json::from_str(r#""2024-01-01T00:00:00.000Z""#).unwrap();
        assert_eq!(value, FieldValue::from("2024-01-01T00:00:00.000Z"));
        assert_eq!(value.to_text(), "2024-01-01T00:00:00.000Z");
        assert_eq!(
            NumericKind::DateEpochMillis.coerce("d", &value).unwrap(),
            1_704_067_200_000
        );
    }

    #[test]
    fn test_text_forms() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(FieldValue::from(dt).to_text(), "2024-01-01T00:00:00Z");
        assert_eq!(FieldValue::from(7i32).to_text(), "7");
        assert_eq!(FieldValue::from_json(&serde_json::json!(null)), None);
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(12)),
            Some(FieldValue::Int(12))
        );
    }
}
