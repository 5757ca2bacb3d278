//! Checks the shape of an entry point's return value.
//!
//! The entry point must return `(bool, payload)`. A mapping payload (or a
//! sequence of key/value pairs) becomes the run's metadata after every
//! key whose value is not plain data is dropped; a string payload becomes
//! the output text; `None` means no metadata.

use std::rc::Rc;

use serde_json::{Map, Number, Value as Json};
use tracing::debug;

use crate::error::SandboxError;
use crate::interp::ops;
use crate::interp::value::Value;

use super::capture::Capture;

/// What the entry point's return value says about the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub success: bool,
    /// Text returned in place of the print output.
    pub text: Option<String>,
    pub metadata: Option<Map<String, Json>>,
}

/// Plain-data conversion. `None` when `value` (or anything nested in it)
/// has no JSON form, refers back to itself, or nests deeper than
/// `ops::MAX_DEPTH` containers.
pub fn to_json(value: &Value) -> Option<Json> {
    Encoder::default().encode(value)
}

/// Containers on the current encoding path.
#[derive(Default)]
struct Encoder {
    active: Vec<*const ()>,
}

impl Encoder {
    fn encode(&mut self, value: &Value) -> Option<Json> {
        Some(match value {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(f) => Json::Number(Number::from_f64(*f)?),
            Value::Str(s) => Json::String(s.to_string()),
            Value::List(items) => self.nested(Rc::as_ptr(items) as *const (), |e| {
                e.array(&items.borrow())
            })?,
            Value::Tuple(items) => self.nested(Rc::as_ptr(items) as *const (), |e| e.array(items))?,
            Value::Dict(dict) => self.nested(Rc::as_ptr(dict) as *const (), |e| {
                let mut object = Map::new();
                for (k, v) in dict.borrow().iter() {
                    object.insert(json_key(k)?, e.encode(v)?);
                }
                Some(Json::Object(object))
            })?,
            _ => return None,
        })
    }

    fn nested(&mut self, id: *const (), encode: impl FnOnce(&mut Self) -> Option<Json>) -> Option<Json> {
        if self.active.contains(&id) || self.active.len() >= ops::MAX_DEPTH {
            return None;
        }
        self.active.push(id);
        let json = encode(self);
        self.active.pop();
        json
    }

    fn array(&mut self, items: &[Value]) -> Option<Json> {
        let items = items.iter().map(|v| self.encode(v)).collect::<Option<_>>()?;
        Some(Json::Array(items))
    }
}

/// Object key for a dict key, spelled the way a JSON encoder spells
/// scalars.
fn json_key(key: &Value) -> Option<String> {
    match key {
        Value::Str(s) => Some(s.to_string()),
        Value::Int(i) => Some(i.to_string()),
        Value::Float(f) if f.is_finite() => Some(ops::repr(key)),
        Value::Bool(b) => Some(b.to_string()),
        Value::None => Some("null".to_string()),
        _ => None,
    }
}

fn pairs(value: &Value) -> Option<Vec<(Value, Value)>> {
    match value {
        Value::Dict(dict) => Some(dict.borrow().items()),
        Value::List(_) | Value::Tuple(_) => {
            let items = match value {
                Value::List(items) => items.borrow().clone(),
                Value::Tuple(items) => items.to_vec(),
                _ => return None,
            };
            items
                .iter()
                .map(|item| match item {
                    Value::Tuple(kv) if kv.len() == 2 => Some((kv[0].clone(), kv[1].clone())),
                    Value::List(kv) if kv.borrow().len() == 2 => {
                        let kv = kv.borrow();
                        Some((kv[0].clone(), kv[1].clone()))
                    }
                    _ => None,
                })
                .collect()
        }
        _ => None,
    }
}

/// Keeps the serializable entries of `entries`, logging how many were
/// dropped.
fn metadata(entries: Vec<(Value, Value)>, capture: &Capture) -> Map<String, Json> {
    let mut kept = Map::new();
    let mut dropped = 0usize;
    for (key, value) in entries {
        match (json_key(&key), to_json(&value)) {
            (Some(key), Some(json)) => {
                kept.insert(key, json);
            }
            _ => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, "metadata keys dropped");
        capture.log(format!(
            "**Metadata**: dropped {dropped} non-serializable key(s)"
        ));
    }
    kept
}

pub fn validate(value: &Value, capture: &Capture) -> Result<Verdict, SandboxError> {
    let items = match value {
        Value::Tuple(items) => items.to_vec(),
        Value::List(items) => items.borrow().clone(),
        other => {
            return Err(SandboxError::Contract(format!(
                "entry point must return a (success, metadata) pair, not {}",
                other.kind()
            )))
        }
    };
    let [success, payload] = <[Value; 2]>::try_from(items).map_err(|items| {
        SandboxError::Contract(format!(
            "entry point must return exactly 2 values, got {}",
            items.len()
        ))
    })?;
    let Value::Bool(success) = success else {
        return Err(SandboxError::Contract(format!(
            "first returned value must be a bool, not {}",
            success.kind()
        )));
    };

    match payload {
        Value::None => Ok(Verdict {
            success,
            text: None,
            metadata: None,
        }),
        Value::Str(text) => Ok(Verdict {
            success,
            text: Some(text.to_string()),
            metadata: None,
        }),
        other => match pairs(&other) {
            Some(entries) => Ok(Verdict {
                success,
                text: None,
                metadata: Some(metadata(entries, capture)),
            }),
            None => Err(SandboxError::Contract(format!(
                "second returned value must be a dict, str or None, not {}",
                other.kind()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::table::{DataFrame, FrameData};
    use crate::interp::value::Dict;

    fn dict(pairs: Vec<(&str, Value)>) -> Value {
        let mut d = Dict::new();
        for (k, v) in pairs {
            d.insert(Value::str(k), v).unwrap();
        }
        Value::dict(d)
    }

    // ── shape ───────────────────────────────────────────

    #[test]
    fn test_pair_with_metadata() {
        let capture = Capture::new();
        let ret = Value::tuple(vec![Value::Bool(true), dict(vec![("x", Value::Int(1))])]);
        let verdict = validate(&ret, &capture).unwrap();
        assert!(verdict.success);
        assert_eq!(verdict.metadata.unwrap()["x"], 1);
        assert_eq!(capture.log_count(), 0);
    }

    #[test]
    fn test_string_payload_is_output_text() {
        let ret = Value::tuple(vec![Value::Bool(false), Value::str("try again")]);
        let verdict = validate(&ret, &Capture::new()).unwrap();
        assert_eq!(verdict.text.as_deref(), Some("try again"));
        assert!(verdict.metadata.is_none());
    }

    #[test]
    fn test_pair_sequence_becomes_mapping() {
        let payload = Value::list(vec![Value::tuple(vec![Value::str("a"), Value::Int(2)])]);
        let ret = Value::list(vec![Value::Bool(true), payload]);
        let meta = validate(&ret, &Capture::new()).unwrap().metadata.unwrap();
        assert_eq!(meta["a"], 2);
    }

    #[test]
    fn test_contract_violations() {
        let capture = Capture::new();
        for bad in [
            Value::Bool(true),
            Value::tuple(vec![Value::Bool(true)]),
            Value::tuple(vec![Value::Int(1), Value::None]),
            Value::tuple(vec![Value::Bool(true), Value::Int(3)]),
        ] {
            let err = validate(&bad, &capture).unwrap_err();
            assert!(matches!(err, SandboxError::Contract(_)), "{bad:?}");
        }
    }

    // ── serialization ───────────────────────────────────

    #[test]
    fn test_unserializable_key_is_dropped_and_counted() {
        let capture = Capture::new();
        let frame = DataFrame::new(FrameData::default()).into_value();
        let ret = Value::tuple(vec![
            Value::Bool(true),
            dict(vec![("a", Value::Int(1)), ("b", frame)]),
        ]);
        let meta = validate(&ret, &capture).unwrap().metadata.unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["a"], 1);
        assert!(capture.drain().logs.contains("dropped 1 non-serializable key(s)"));
    }

    #[test]
    fn test_nested_values() {
        let nested = dict(vec![
            ("list", Value::list(vec![Value::Float(1.5), Value::None])),
            ("inner", dict(vec![("ok", Value::Bool(true))])),
        ]);
        let json = to_json(&nested).unwrap();
        assert_eq!(json["list"][0], 1.5);
        assert_eq!(json["inner"]["ok"], true);
        assert!(to_json(&Value::Float(f64::NAN)).is_none());
        assert!(to_json(&Value::list(vec![Value::Float(f64::INFINITY)])).is_none());
    }

    #[test]
    fn test_self_reference_is_not_serializable() {
        let list = Value::list(vec![]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert!(to_json(&list).is_none());

        let capture = Capture::new();
        let ret = Value::tuple(vec![
            Value::Bool(true),
            dict(vec![("a", list.clone()), ("b", Value::Int(2))]),
        ]);
        let meta = validate(&ret, &capture).unwrap().metadata.unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["b"], 2);
        assert!(capture.drain().logs.contains("dropped 1 non-serializable key(s)"));

        if let Value::List(items) = &list {
            items.borrow_mut().clear();
        }
    }

    #[test]
    fn test_shared_values_are_not_cycles() {
        let shared = Value::list(vec![Value::Int(1)]);
        let both = Value::list(vec![shared.clone(), shared]);
        assert_eq!(to_json(&both).unwrap(), serde_json::json!([[1], [1]]));
    }

    #[test]
    fn test_over_deep_nesting_is_not_serializable() {
        let mut value = Value::Int(0);
        for _ in 0..ops::MAX_DEPTH {
            value = Value::list(vec![value]);
        }
        assert!(to_json(&value).is_some());
        let deeper = Value::list(vec![value]);
        assert!(to_json(&deeper).is_none());
    }
}
