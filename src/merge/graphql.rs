//! GraphQL response wire types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A GraphQL error as it appears in a response `errors` array.
///
/// Fields beyond the four standard ones are kept in `extra` so they can be
/// forwarded when explicitly allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn set_extension(&mut self, key: impl Into<String>, value: Value) {
        self.extensions
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.as_ref()?.get(key)
    }
}

/// Client-facing response body. `errors` is written before `data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphQLResponse {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,

    /// `Some(Value::Null)` serializes as `"data":null`; `None` omits the key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl GraphQLResponse {
    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        Self { errors, data: None }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| br#"{"errors":[{"message":"internal error"}]}"#.to_vec())
    }
}

/// Subgraph response body. Lenient: anything but an object with these keys
/// is treated as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubgraphBody {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Option<Vec<GraphQLError>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_roundtrip_keeps_extra_fields() {
        let raw = r#"{"message":"Unauthorized","path":["employees",0],"extensions":{"code":"UNAUTHORIZED"},"traceId":"abc"}"#;
        let error: GraphQLError = serde_json::from_str(raw).unwrap();
        assert_eq!(error.extension("code"), Some(&json!("UNAUTHORIZED")));
        assert_eq!(error.extra.get("traceId"), Some(&json!("abc")));
        assert_eq!(serde_json::to_string(&error).unwrap(), raw);
    }

    #[test]
    fn test_response_writes_errors_first() {
        let response = GraphQLResponse {
            errors: vec![GraphQLError::new("boom")],
            data: Some(json!({"employees": null})),
        };
        assert_eq!(
            String::from_utf8(response.to_bytes()).unwrap(),
            r#"{"errors":[{"message":"boom"}],"data":{"employees":null}}"#
        );

        let response = GraphQLResponse {
            errors: Vec::new(),
            data: Some(Value::Null),
        };
        assert_eq!(String::from_utf8(response.to_bytes()).unwrap(), r#"{"data":null}"#);
    }
}
