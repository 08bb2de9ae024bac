//! Render requests and how their properties cross into the sandbox.
//!
//! Attributes are the only channel into a sandboxed instance: structured
//! values travel as JSON text under `data-prop-<name>`, scalars as plain
//! attributes. Nothing is passed by reference across the isolation boundary.

use crate::error::RenderError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property mapping as received from the caller.
pub type Properties = Map<String, Value>;

/// Prefix for attributes carrying JSON-encoded structured properties.
pub const STRUCTURED_PROP_PREFIX: &str = "data-prop-";

/// A single `(tag, props)` render request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub tag: String,
    #[serde(default)]
    pub props: Properties,
}

impl RenderRequest {
    pub fn new(tag: impl Into<String>, props: Properties) -> Self {
        Self {
            tag: tag.into(),
            props,
        }
    }

    /// Validate the loose JSON shape sent by callers.
    ///
    /// `tag` must be a non-empty string; `props` may be absent or null,
    /// otherwise it must be an object.
    pub fn from_json(value: &Value) -> Result<Self, RenderError> {
        let tag = match value.get("tag") {
            Some(Value::String(tag)) if !tag.is_empty() => tag.clone(),
            _ => {
                return Err(RenderError::InvalidRequestShape(
                    "`tag` must be a non-empty string".into(),
                ))
            }
        };
        let props = match value.get("props") {
            None | Some(Value::Null) => Properties::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(RenderError::InvalidRequestShape(
                    "`props` must be an object".into(),
                ))
            }
        };
        Ok(Self { tag, props })
    }
}

/// Convert properties into the ordered attribute list set on the element.
///
/// Null values are skipped.
pub fn to_attributes(props: &Properties) -> Vec<(String, String)> {
    props
        .iter()
        .filter_map(|(name, value)| match value {
            Value::Null => None,
            Value::Object(_) | Value::Array(_) => Some((
                format!("{}{}", STRUCTURED_PROP_PREFIX, name),
                value.to_string(),
            )),
            scalar => Some((name.clone(), scalar_to_string(scalar))),
        })
        .collect()
}

/// String conversion matching what a browser does for `String(value)`.
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e21 => {
                format!("{:.0}", f)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Deterministic JSON encoding with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
