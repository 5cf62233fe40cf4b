//! Lenient field decoders shared by the API and live-message models
//!
//! The dashboard backend is not consistent about number encoding: ids arrive
//! as strings or integers, money amounts as numbers, decimal strings or null.

use serde::{de, Deserialize, Deserializer};
use std::fmt;

#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    String(String),
    Number(i64),
}

impl From<IdValue> for String {
    fn from(value: IdValue) -> Self {
        match value {
            IdValue::String(s) => s,
            IdValue::Number(n) => n.to_string(),
        }
    }
}

/// Deserialize an id that can be either a string or a number
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    IdValue::deserialize(deserializer).map(String::from)
}

/// Deserialize an optional id that can be either a string or a number
pub(crate) fn deserialize_id_option<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<IdValue>::deserialize(deserializer)?.map(String::from))
}

/// Deserialize an f64 that may arrive as a number, string, or null
pub(crate) fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    struct F64Lenient;

    impl<'de> de::Visitor<'de> for F64Lenient {
        type Value = f64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number, string, or null")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            v.trim().parse::<f64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<f64, E> {
            Ok(0.0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
            Ok(0.0)
        }
    }

    deserializer.deserialize_any(F64Lenient)
}

/// Deserialize a count that may be a string or number
pub(crate) fn deserialize_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrNumber;

    impl<'de> de::Visitor<'de> for StringOrNumber {
        type Value = u64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a non-negative count as string or number")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
            u64::try_from(v).map_err(de::Error::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
            v.trim().parse::<u64>().map_err(de::Error::custom)
        }

        fn visit_none<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<u64, E> {
            Ok(0)
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}
