//! Decoding of raw queue payloads into email requests.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Reasons a payload cannot become an [`EmailRequest`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body is not well-formed JSON, or a field has the wrong type.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The body is valid JSON but not a record.
    #[error("malformed payload: expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    /// The record parsed but carries no recipient.
    #[error("missing recipient email")]
    MissingEmail,
}

/// Email send request carried in a queue message body.
///
/// Unknown fields are ignored so producers can add data without breaking
/// older workers. `kind` and `enqueuedAt` are informational and never fail
/// a decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    /// Recipient address
    #[serde(default, deserialize_with = "null_as_empty")]
    pub email: String,
    /// Informational request kind, e.g. "login"
    #[serde(default, alias = "type", deserialize_with = "null_as_empty")]
    pub kind: String,
    /// When the producer enqueued the request; the epoch when absent or unreadable
    #[serde(
        default,
        rename = "enqueuedAt",
        alias = "timestamp",
        deserialize_with = "lenient_timestamp"
    )]
    pub enqueued_at: DateTime<Utc>,
}

/// Decode a queue message body.
///
/// Only presence of the address is checked; malformed addresses surface
/// later as send failures.
pub fn decode(body: &[u8]) -> Result<EmailRequest, DecodeError> {
    let value: Value = serde_json::from_slice(body)?;

    // Struct deserialization also accepts sequences; only records are requests.
    let record = match value {
        Value::Object(map) => map,
        other => return Err(DecodeError::NotAnObject(json_kind(&other))),
    };

    let request: EmailRequest = serde_json::from_value(Value::Object(record))?;

    if request.email.is_empty() {
        return Err(DecodeError::MissingEmail);
    }

    Ok(request)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept RFC 3339 or offset-less ISO 8601 (read as UTC); anything else is the epoch.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_str()
        .and_then(parse_timestamp)
        .unwrap_or_default())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_decode_full_request() {
        let body = br#"{"email":"a@b.com","kind":"login","enqueuedAt":"2024-01-01T00:00:00Z"}"#;

        let request = decode(body).unwrap();
        assert_eq!(request.email, "a@b.com");
        assert_eq!(request.kind, "login");
        assert_eq!(
            request.enqueued_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_decode_minimal_request() {
        let request = decode(br#"{"email":"a@b.com"}"#).unwrap();
        assert_eq!(request.kind, "");
        assert_eq!(request.enqueued_at, DateTime::<Utc>::default());
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let request = decode(br#"{"email":"a@b.com","locale":"he-IL","attempt":3}"#).unwrap();
        assert_eq!(request.email, "a@b.com");
    }

    #[test]
    fn test_decode_legacy_field_names() {
        let request =
            decode(br#"{"email":"a@b.com","type":"login","timestamp":"2024-06-01T12:00:00Z"}"#)
                .unwrap();
        assert_eq!(request.kind, "login");
        assert_eq!(
            request.enqueued_at,
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_decode_null_kind_is_empty() {
        let request = decode(br#"{"email":"a@b.com","kind":null}"#).unwrap();
        assert_eq!(request.email, "a@b.com");
        assert_eq!(request.kind, "");
    }

    #[test]
    fn test_decode_offsetless_timestamp_is_utc() {
        let request = decode(br#"{"email":"a@b.com","enqueuedAt":"2024-01-01T00:00:00"}"#).unwrap();
        assert_eq!(
            request.enqueued_at,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );

        let request =
            decode(br#"{"email":"a@b.com","enqueuedAt":"2024-01-01T08:30:00.1234567"}"#).unwrap();
        assert_eq!(
            request.enqueued_at.timestamp(),
            Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap().timestamp()
        );
    }

    #[test]
    fn test_decode_unreadable_timestamp_is_epoch() {
        for body in [
            br#"{"email":"a@b.com","enqueuedAt":null}"#.as_slice(),
            br#"{"email":"a@b.com","enqueuedAt":"yesterday"}"#.as_slice(),
            br#"{"email":"a@b.com","enqueuedAt":1704067200}"#.as_slice(),
        ] {
            let request = decode(body).unwrap();
            assert_eq!(request.enqueued_at, DateTime::<Utc>::default());
        }
    }

    #[test]
    fn test_decode_not_json() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_non_object_bodies() {
        assert!(matches!(
            decode(br#"["a@b.com"]"#),
            Err(DecodeError::NotAnObject("an array"))
        ));
        assert!(matches!(decode(b"null"), Err(DecodeError::NotAnObject("null"))));
        assert!(matches!(
            decode(br#""a@b.com""#),
            Err(DecodeError::NotAnObject("a string"))
        ));
    }

    #[test]
    fn test_decode_empty_email() {
        assert!(matches!(
            decode(br#"{"email":"","kind":"login"}"#),
            Err(DecodeError::MissingEmail)
        ));
        assert!(matches!(
            decode(br#"{"kind":"login"}"#),
            Err(DecodeError::MissingEmail)
        ));
        assert!(matches!(
            decode(br#"{"email":null}"#),
            Err(DecodeError::MissingEmail)
        ));
    }

    #[test]
    fn test_decode_passes_malformed_address_through() {
        let request = decode(br#"{"email":"not-an-address"}"#).unwrap();
        assert_eq!(request.email, "not-an-address");
    }
}
