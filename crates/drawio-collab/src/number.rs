//! Number handling shared by the XML codec, the JSON form and the CRDT store.
//!
//! drawio writes coordinates without a trailing `.0`, so every writer here
//! normalizes `-0.0` to `0` and prints integral values as integers.

use serde::{Deserialize, Deserializer, Serializer};

/// Folds `-0.0` into `0.0`; every other value passes through.
pub fn normalize(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

/// Shortest text that parses back to the same `f64` (`10`, `0.5`, `0.1`).
pub fn format_number(v: f64) -> String {
    format!("{}", normalize(v))
}

/// Parses an attribute value; `None` for non-numbers and non-finite values.
pub fn parse_number(raw: &str) -> Option<f64> {
    let v = raw.trim().parse::<f64>().ok()?;
    v.is_finite().then(|| normalize(v))
}

pub fn ser_opt_compact<S>(v: &Option<f64>, s: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let Some(v) = *v else {
        return s.serialize_none();
    };
    if !v.is_finite() {
        return Err(serde::ser::Error::custom(format!(
            "non-finite float not allowed in JSON: {v}"
        )));
    }
    let v = normalize(v);
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        return s.serialize_i64(v as i64);
    }
    s.serialize_f64(v)
}

pub fn de_opt_finite<'de, D>(d: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<f64>::deserialize(d)? {
        Some(v) if !v.is_finite() => Err(serde::de::Error::custom(format!(
            "non-finite float not allowed in JSON: {v}"
        ))),
        v => Ok(v.map(normalize)),
    }
}
