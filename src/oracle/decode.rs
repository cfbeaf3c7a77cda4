//! Reply decoding: pull the JSON payload out of model text.

use serde_json::Value;

use super::{Expect, OracleError};

/// Locate the JSON payload in a reply.
///
/// Checks a ```json fenced block first, then a bare ``` fenced block,
/// then falls back to the whole (trimmed) text.
pub fn extract_json(content: &str) -> &str {
    for fence in ["```json", "```"] {
        if let Some(start) = content.find(fence) {
            let rest = &content[start + fence.len()..];
            let body = rest.split("```").next().unwrap_or(rest);
            return body.trim();
        }
    }
    content.trim()
}

/// Parse an extracted payload, requiring the expected top-level shape.
pub(crate) fn parse(payload: &str, expect: Expect) -> Result<Value, OracleError> {
    let value: Value = serde_json::from_str(payload).map_err(|_| OracleError::Parse {
        raw: payload.to_string(),
    })?;
    let shape_ok = match expect {
        Expect::Object => value.is_object(),
        Expect::Array => value.is_array(),
    };
    if shape_ok {
        Ok(value)
    } else {
        Err(OracleError::Parse {
            raw: payload.to_string(),
        })
    }
}
