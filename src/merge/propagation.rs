//! Subgraph error propagation.
//!
//! Turns the errors of one failed subgraph call into the errors the client
//! sees, in either of the two configured modes:
//!
//! - `wrapped`: exactly one synthetic error per failed call, subgraph errors
//!   nested under `extensions.errors`
//! - `pass_through`: subgraph errors forwarded one by one, filtered by the
//!   allow lists
//!
//! Failures that carry no GraphQL errors (transport errors, empty or
//! malformed bodies) produce the synthetic error in both modes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::config::schema::{ErrorPropagationConfig, PropagationMode};
use crate::fetch::plan::ResponsePath;
use crate::merge::graphql::GraphQLError;
use crate::merge::merger::FetchResult;

pub struct ErrorPropagator {
    config: Arc<ErrorPropagationConfig>,
}

impl ErrorPropagator {
    pub fn new(config: Arc<ErrorPropagationConfig>) -> Self {
        Self { config }
    }

    /// Client errors for one failed call. `entity_paths` are the concrete
    /// response paths of the entities the call was made for, by index.
    pub fn errors_for(&self, result: &FetchResult, entity_paths: &[Vec<Value>]) -> Vec<GraphQLError> {
        let forward = self.config.enabled
            && self.config.mode == PropagationMode::PassThrough
            && !result.errors.is_empty();
        if forward {
            result
                .errors
                .iter()
                .map(|error| self.pass_through(error, result, entity_paths))
                .collect()
        } else {
            vec![self.wrap(result)]
        }
    }

    /// The synthetic top-level error.
    pub fn wrap(&self, result: &FetchResult) -> GraphQLError {
        let mut error = GraphQLError::new(failure_message(
            &result.subgraph_name,
            &result.path,
            result.reason.as_deref(),
        ));

        let mut extensions = BTreeMap::new();
        if self.config.enabled && !result.errors.is_empty() {
            let nested: Vec<Value> = result
                .errors
                .iter()
                .map(|e| self.nested(e))
                .filter_map(|e| serde_json::to_value(e).ok())
                .collect();
            extensions.insert("errors".to_string(), Value::Array(nested));
        }
        self.attach_common(&mut extensions, result);
        error.extensions = into_extensions(extensions);
        error
    }

    fn nested(&self, error: &GraphQLError) -> GraphQLError {
        let mut nested = error.clone();
        if self.config.omit_locations {
            nested.locations = None;
        }
        if self.config.omit_extensions {
            nested.extensions = None;
        }
        nested
    }

    fn pass_through(
        &self,
        error: &GraphQLError,
        result: &FetchResult,
        entity_paths: &[Vec<Value>],
    ) -> GraphQLError {
        let config = &self.config;

        let path = match &error.path {
            Some(path) if config.rewrite_paths => Some(rewrite_entity_path(path, entity_paths)),
            other => other.clone(),
        };
        let locations = if config.omit_locations {
            None
        } else {
            error.locations.clone()
        };

        let mut extensions = BTreeMap::new();
        if !config.omit_extensions {
            if let Some(source) = &error.extensions {
                for (key, value) in source {
                    if config.allow_all_extension_fields || config.allowed_extension_fields.contains(key) {
                        extensions.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        self.attach_common(&mut extensions, result);
        if !config.default_extension_code.is_empty() && !extensions.contains_key("code") {
            extensions.insert("code".to_string(), json!(config.default_extension_code));
        }

        let extra: Map<String, Value> = error
            .extra
            .iter()
            .filter(|(key, _)| config.allowed_fields.contains(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        GraphQLError {
            message: error.message.clone(),
            locations,
            path,
            extensions: into_extensions(extensions),
            extra,
        }
    }

    fn attach_common(&self, extensions: &mut BTreeMap<String, Value>, result: &FetchResult) {
        if self.config.attach_service_name {
            extensions.insert("serviceName".to_string(), json!(result.subgraph_name));
        }
        // No HTTP response means no status to report.
        if self.config.propagate_status_codes {
            if let Some(status) = result.http_status {
                extensions.insert("statusCode".to_string(), json!(status));
            }
        }
    }
}

/// `Failed to fetch from Subgraph '<name>'[ at Path '<path>'][, Reason: <reason>].`
pub fn failure_message(subgraph: &str, path: &ResponsePath, reason: Option<&str>) -> String {
    let mut message = format!("Failed to fetch from Subgraph '{subgraph}'");
    if !path.is_root() {
        message.push_str(&format!(" at Path '{path}'"));
    }
    if let Some(reason) = reason {
        message.push_str(", Reason: ");
        message.push_str(reason);
    }
    message.push('.');
    message
}

/// Replace a leading `_entities, <index>` with the entity's response path.
fn rewrite_entity_path(path: &[Value], entity_paths: &[Vec<Value>]) -> Vec<Value> {
    if path.first().and_then(Value::as_str) != Some("_entities") {
        return path.to_vec();
    }
    let target = path
        .get(1)
        .and_then(Value::as_u64)
        .and_then(|index| entity_paths.get(index as usize));
    match target {
        Some(prefix) => prefix.iter().chain(path.iter().skip(2)).cloned().collect(),
        None => path.to_vec(),
    }
}

fn into_extensions(extensions: BTreeMap<String, Value>) -> Option<Map<String, Value>> {
    if extensions.is_empty() {
        None
    } else {
        Some(extensions.into_iter().collect())
    }
}
