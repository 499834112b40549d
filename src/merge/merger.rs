//! Single-writer merge stage.
//!
//! # Responsibilities
//! - Merge subgraph data into the response tree at each step's path
//! - Null out the fields of failed steps and bubble nulls through non-null parents
//! - Collect client errors and propagated headers in plan order
//!
//! # Design Decisions
//! - Only the orchestrator's join loop writes to a merger, so no locking
//! - Errors and headers are keyed by plan index and emitted sorted, never in completion order
//! - A structural conflict between subgraph payloads fails the whole response with `data: null`

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde_json::{Map, Value};

use crate::config::schema::{ErrorPropagationConfig, HeaderPropagationConfig};
use crate::fetch::plan::{FetchStep, PathElement, ResponsePath};
use crate::fetch::types::{FetchError, SubgraphResponse};
use crate::merge::graphql::{GraphQLError, GraphQLResponse, SubgraphBody};
use crate::merge::headers::HeaderPropagator;
use crate::merge::propagation::{failure_message, ErrorPropagator};

/// Outcome of one subgraph call, as seen by the merge stage.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub subgraph_name: String,
    pub subgraph_id: String,
    pub path: ResponsePath,
    pub data: Option<Value>,
    pub errors: Vec<GraphQLError>,
    /// Status of the HTTP response, `None` when there was none.
    pub http_status: Option<u16>,
    pub transport_error: Option<String>,
    /// Router-side characterization of a malformed response.
    pub reason: Option<String>,
    pub headers: HeaderMap,
}

impl FetchResult {
    pub fn from_outcome(step: &FetchStep, outcome: Result<SubgraphResponse, FetchError>) -> Self {
        let mut result = Self {
            subgraph_name: step.subgraph_name.clone(),
            subgraph_id: step.subgraph_id.clone(),
            path: step.path.clone(),
            ..Self::default()
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                result.transport_error = Some(err.to_string());
                return result;
            }
        };

        result.http_status = Some(response.status);
        result.headers = response.headers;

        if response.body.iter().all(u8::is_ascii_whitespace) {
            result.reason = Some("empty response".to_string());
            return result;
        }
        match serde_json::from_slice::<SubgraphBody>(&response.body) {
            Ok(body) => {
                result.data = body.data.filter(|d| !d.is_null());
                result.errors = body.errors.unwrap_or_default();
                if result.data.is_none() && result.errors.is_empty() {
                    result.reason = Some("no data or errors in response".to_string());
                }
            }
            Err(_) => result.reason = Some("invalid JSON".to_string()),
        }
        result
    }

    pub fn is_failure(&self) -> bool {
        self.transport_error.is_some()
            || self.reason.is_some()
            || !self.errors.is_empty()
            || self.http_status.is_some_and(|s| !(200..300).contains(&s))
    }
}

/// Final product of a merge.
#[derive(Debug, Clone, Default)]
pub struct MergedResponse {
    pub response: GraphQLResponse,
    pub headers: HeaderMap,
}

#[derive(Debug)]
enum MergeConflict {
    ArrayLengths,
    Types,
    EntityCount,
}

impl MergeConflict {
    fn reason(&self) -> &'static str {
        match self {
            MergeConflict::ArrayLengths => "differing array lengths",
            MergeConflict::Types => "differing types",
            MergeConflict::EntityCount => "differing entity counts",
        }
    }
}

pub struct Merger {
    data: Value,
    propagator: ErrorPropagator,
    header_propagator: HeaderPropagator,
    errors: BTreeMap<usize, Vec<GraphQLError>>,
    headers: BTreeMap<usize, HeaderMap>,
    aborted: Option<GraphQLError>,
}

impl Merger {
    pub fn new(propagation: Arc<ErrorPropagationConfig>, headers: &HeaderPropagationConfig) -> Self {
        Self {
            data: Value::Object(Map::new()),
            propagator: ErrorPropagator::new(propagation),
            header_propagator: HeaderPropagator::new(headers),
            errors: BTreeMap::new(),
            headers: BTreeMap::new(),
            aborted: None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Objects a step resolves fields on, in response order.
    pub fn targets(&self, path: &ResponsePath) -> Vec<Value> {
        let mut found = Vec::new();
        collect_targets(&self.data, &path.0, &mut Vec::new(), &mut |_, value| {
            found.push(value.clone())
        });
        found
    }

    fn target_paths(&self, path: &ResponsePath) -> Vec<Vec<Value>> {
        let mut found = Vec::new();
        collect_targets(&self.data, &path.0, &mut Vec::new(), &mut |concrete, _| {
            found.push(concrete.to_vec())
        });
        found
    }

    /// Merge the result of the step at plan position `index`.
    pub fn merge(&mut self, index: usize, step: &FetchStep, result: FetchResult) {
        if self.aborted.is_some() || self.data.is_null() {
            return;
        }

        let target_paths = self.target_paths(&step.path);
        if !self.header_propagator.is_empty() && !result.headers.is_empty() {
            self.headers.insert(index, result.headers.clone());
        }

        if result.is_failure() {
            tracing::debug!(
                subgraph = %result.subgraph_name,
                path = %result.path,
                status = ?result.http_status,
                error = ?result.transport_error,
                reason = ?result.reason,
                "Subgraph fetch failed"
            );
            let errors = self.propagator.errors_for(&result, &target_paths);
            self.errors.entry(index).or_default().extend(errors);
        }

        match &result.data {
            Some(data) => {
                if let Err(conflict) = self.merge_data(step, &target_paths, data.clone()) {
                    tracing::warn!(
                        subgraph = %step.subgraph_name,
                        reason = conflict.reason(),
                        "Failed to merge subgraph response"
                    );
                    self.aborted = Some(GraphQLError::new(failure_message(
                        &step.subgraph_name,
                        &step.path,
                        Some(conflict.reason()),
                    )));
                }
            }
            None if result.is_failure() => self.null_fields(step, &target_paths),
            None => {}
        }
    }

    /// A step that was not executed because a dependency failed: its fields
    /// become null without an error of its own.
    pub fn skip(&mut self, step: &FetchStep) {
        if self.aborted.is_some() || self.data.is_null() {
            return;
        }
        let target_paths = self.target_paths(&step.path);
        self.null_fields(step, &target_paths);
    }

    /// Fail the whole response with an error that is not tied to one step.
    pub fn fail(&mut self, error: GraphQLError) {
        if self.aborted.is_none() {
            self.aborted = Some(error);
        }
    }

    pub fn finish(self) -> MergedResponse {
        let mut headers = HeaderMap::new();
        self.header_propagator.apply(&mut headers, self.headers.values());

        let mut errors: Vec<GraphQLError> = self.errors.into_values().flatten().collect();
        let data = match self.aborted {
            Some(error) => {
                errors.push(error);
                Value::Null
            }
            None => self.data,
        };

        MergedResponse {
            response: GraphQLResponse {
                errors,
                data: Some(data),
            },
            headers,
        }
    }

    fn merge_data(
        &mut self,
        step: &FetchStep,
        target_paths: &[Vec<Value>],
        data: Value,
    ) -> Result<(), MergeConflict> {
        if step.path.is_root() {
            return deep_merge(&mut self.data, data);
        }

        let entities = match data {
            Value::Object(mut object) => object.shift_remove("_entities"),
            _ => None,
        };
        let entities = match entities {
            Some(Value::Array(entities)) => entities,
            Some(_) => return Err(MergeConflict::Types),
            None => return Ok(()),
        };
        if entities.len() != target_paths.len() {
            return Err(MergeConflict::EntityCount);
        }
        for (concrete, entity) in target_paths.iter().zip(entities) {
            if let Some(target) = value_at_mut(&mut self.data, concrete) {
                deep_merge(target, entity)?;
            }
        }
        Ok(())
    }

    fn null_fields(&mut self, step: &FetchStep, target_paths: &[Vec<Value>]) {
        for concrete in target_paths {
            for field in &step.fields {
                if field.non_null {
                    self.null_out(concrete, &step.path.0);
                    break;
                }
                if let Some(Value::Object(target)) = value_at_mut(&mut self.data, concrete) {
                    target.insert(field.name.clone(), Value::Null);
                }
            }
            if self.data.is_null() {
                return;
            }
        }
    }

    /// Null the value at `concrete`, moving up while the position is non-null.
    fn null_out(&mut self, concrete: &[Value], elements: &[PathElement]) {
        let mut depth = concrete.len().min(elements.len());
        while depth > 0 {
            let nullable = match &elements[depth - 1] {
                PathElement::Field { non_null, .. } => !non_null,
                PathElement::Flatten { non_null_items } => !non_null_items,
            };
            if nullable {
                if let Some(slot) = value_at_mut(&mut self.data, &concrete[..depth]) {
                    *slot = Value::Null;
                }
                return;
            }
            depth -= 1;
        }
        self.data = Value::Null;
    }
}

/// Walk `path` from `value`, calling `visit` with the concrete path of every
/// object reached. Nulls and missing fields end the walk silently.
fn collect_targets<'a>(
    value: &'a Value,
    path: &[PathElement],
    concrete: &mut Vec<Value>,
    visit: &mut dyn FnMut(&[Value], &'a Value),
) {
    let Some((head, rest)) = path.split_first() else {
        if value.is_object() {
            visit(concrete, value);
        }
        return;
    };
    match head {
        PathElement::Field { name, .. } => {
            if let Some(next) = value.get(name) {
                concrete.push(Value::String(name.clone()));
                collect_targets(next, rest, concrete, visit);
                concrete.pop();
            }
        }
        PathElement::Flatten { .. } => {
            if let Value::Array(items) = value {
                for (i, item) in items.iter().enumerate() {
                    concrete.push(Value::from(i));
                    collect_targets(item, rest, concrete, visit);
                    concrete.pop();
                }
            }
        }
    }
}

fn value_at_mut<'a>(mut value: &'a mut Value, concrete: &[Value]) -> Option<&'a mut Value> {
    for segment in concrete {
        value = match segment {
            Value::String(name) => value.get_mut(name.as_str())?,
            Value::Number(n) => value.get_mut(n.as_u64()? as usize)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Merge `source` into `target`. Null yields to the other side, later
/// scalars win, and objects and arrays must agree in shape.
fn deep_merge(target: &mut Value, source: Value) -> Result<(), MergeConflict> {
    if source.is_null() {
        return Ok(());
    }
    if target.is_null() {
        *target = source;
        return Ok(());
    }
    match (target, source) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value)?,
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
            Ok(())
        }
        (Value::Array(existing), Value::Array(incoming)) => {
            if existing.len() != incoming.len() {
                return Err(MergeConflict::ArrayLengths);
            }
            for (slot, value) in existing.iter_mut().zip(incoming) {
                deep_merge(slot, value)?;
            }
            Ok(())
        }
        (Value::Object(_), _) | (Value::Array(_), _) => Err(MergeConflict::Types),
        (slot, incoming) => {
            if incoming.is_object() || incoming.is_array() {
                return Err(MergeConflict::Types);
            }
            *slot = incoming;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PropagationMode;
    use crate::fetch::plan::{FieldShape, StaticRequest};
    use reqwest::header::HeaderValue;
    use serde_json::json;

    fn step(name: &str, path: Vec<PathElement>, fields: Vec<FieldShape>) -> FetchStep {
        FetchStep {
            id: 0,
            subgraph_name: name.into(),
            subgraph_id: name.into(),
            path: ResponsePath(path),
            fields,
            depends_on: Vec::new(),
            request: Arc::new(StaticRequest::new("http://localhost", "{ a }")),
        }
    }

    fn employees_step() -> FetchStep {
        step("employees", Vec::new(), vec![FieldShape::nullable("employees")])
    }

    fn notes_step() -> FetchStep {
        step(
            "products",
            vec![PathElement::field("employees"), PathElement::flatten()],
            vec![FieldShape::nullable("notes")],
        )
    }

    fn merger(configure: impl FnOnce(&mut ErrorPropagationConfig)) -> Merger {
        let mut config = ErrorPropagationConfig::default();
        configure(&mut config);
        Merger::new(Arc::new(config), &HeaderPropagationConfig::default())
    }

    fn ok(step: &FetchStep, body: &str) -> FetchResult {
        FetchResult::from_outcome(step, Ok(SubgraphResponse::new(200, body)))
    }

    fn body(merged: MergedResponse) -> String {
        String::from_utf8(merged.response.to_bytes()).unwrap()
    }

    #[test]
    fn test_entity_failure_nulls_fields_per_item() {
        let mut merger = merger(|c| {
            c.propagate_status_codes = true;
            c.attach_service_name = false;
        });
        let root = employees_step();
        merger.merge(0, &root, ok(&root, r#"{"data":{"employees":[{"id":1},{"id":2}]}}"#));

        let notes = notes_step();
        assert_eq!(merger.targets(&notes.path), vec![json!({"id":1}), json!({"id":2})]);
        let failed = FetchResult::from_outcome(
            &notes,
            Ok(SubgraphResponse::new(
                403,
                r#"{"errors":[{"message":"Unauthorized","extensions":{"code":"UNAUTHORIZED"}}]}"#,
            )),
        );
        merger.merge(1, &notes, failed);

        assert_eq!(
            body(merger.finish()),
            concat!(
                r#"{"errors":[{"message":"Failed to fetch from Subgraph 'products' at Path 'employees'.","#,
                r#""extensions":{"errors":[{"message":"Unauthorized","extensions":{"code":"UNAUTHORIZED"}}],"statusCode":403}}],"#,
                r#""data":{"employees":[{"id":1,"notes":null},{"id":2,"notes":null}]}}"#
            )
        );
    }

    #[test]
    fn test_entities_merge_into_items() {
        let mut merger = merger(|_| {});
        let root = employees_step();
        merger.merge(0, &root, ok(&root, r#"{"data":{"employees":[{"id":1},{"id":2}]}}"#));
        let notes = notes_step();
        merger.merge(
            1,
            &notes,
            ok(&notes, r#"{"data":{"_entities":[{"notes":"a"},{"notes":"b"}]}}"#),
        );
        assert_eq!(
            body(merger.finish()),
            r#"{"data":{"employees":[{"id":1,"notes":"a"},{"id":2,"notes":"b"}]}}"#
        );
    }

    #[test]
    fn test_empty_response_reason() {
        let mut merger = merger(|c| {
            c.propagate_status_codes = true;
            c.attach_service_name = false;
        });
        let root = employees_step();
        merger.merge(
            0,
            &root,
            FetchResult::from_outcome(&root, Ok(SubgraphResponse::new(502, ""))),
        );
        assert_eq!(
            body(merger.finish()),
            r#"{"errors":[{"message":"Failed to fetch from Subgraph 'employees', Reason: empty response.","extensions":{"statusCode":502}}],"data":{"employees":null}}"#
        );
    }

    #[test]
    fn test_invalid_json_reason() {
        let mut merger = merger(|c| c.attach_service_name = false);
        let root = employees_step();
        merger.merge(0, &root, ok(&root, "not json"));
        let merged = merger.finish();
        assert_eq!(
            merged.response.errors[0].message,
            "Failed to fetch from Subgraph 'employees', Reason: invalid JSON."
        );
    }

    #[test]
    fn test_body_without_data_or_errors_is_a_failure() {
        for raw in ["{}", r#"{"data":null}"#, r#"{"data":null,"errors":[]}"#] {
            let mut merger = merger(|c| c.attach_service_name = false);
            let root = employees_step();
            let result = ok(&root, raw);
            assert!(result.is_failure(), "{raw}");
            merger.merge(0, &root, result);
            let merged = merger.finish();
            assert_eq!(
                merged.response.errors[0].message,
                "Failed to fetch from Subgraph 'employees', Reason: no data or errors in response."
            );
            assert_eq!(merged.response.data, Some(json!({"employees": null})));
        }
    }

    #[test]
    fn test_body_without_data_or_errors_nulls_non_null_root() {
        let mut merger = merger(|c| {
            c.propagate_status_codes = true;
            c.attach_service_name = false;
        });
        let root = step("employees", Vec::new(), vec![FieldShape::non_null("employees")]);
        merger.merge(0, &root, ok(&root, "{}"));
        assert_eq!(
            body(merger.finish()),
            r#"{"errors":[{"message":"Failed to fetch from Subgraph 'employees', Reason: no data or errors in response.","extensions":{"statusCode":200}}],"data":null}"#
        );
    }

    #[test]
    fn test_transport_failure_has_no_status() {
        let mut merger = merger(|c| {
            c.propagate_status_codes = true;
            c.attach_service_name = false;
        });
        let root = employees_step();
        let outcome = Err(FetchError::CircuitOpen {
            subgraph: "employees".into(),
        });
        merger.merge(0, &root, FetchResult::from_outcome(&root, outcome));
        assert_eq!(
            body(merger.finish()),
            r#"{"errors":[{"message":"Failed to fetch from Subgraph 'employees'."}],"data":{"employees":null}}"#
        );
    }

    #[test]
    fn test_sibling_data_survives() {
        let mut merger = merger(|_| {});
        let employees = employees_step();
        let products = step("products", Vec::new(), vec![FieldShape::nullable("products")]);
        merger.merge(0, &employees, ok(&employees, r#"{"data":{"employees":[{"id":1}]}}"#));
        merger.merge(
            1,
            &products,
            FetchResult::from_outcome(
                &products,
                Err(FetchError::Cancelled),
            ),
        );
        let merged = merger.finish();
        assert_eq!(
            merged.response.data,
            Some(json!({"employees": [{"id": 1}], "products": null}))
        );
    }

    #[test]
    fn test_non_null_bubbles_to_nullable_ancestor() {
        let mut merger = merger(|_| {});
        let root = employees_step();
        merger.merge(0, &root, ok(&root, r#"{"data":{"employees":[{"id":1},{"id":2}]}}"#));

        // employees: [Employee!] with a non-null entity field.
        let details = step(
            "details",
            vec![
                PathElement::field("employees"),
                PathElement::Flatten { non_null_items: true },
            ],
            vec![FieldShape::non_null("details")],
        );
        merger.merge(1, &details, FetchResult::from_outcome(&details, Err(FetchError::Cancelled)));
        assert_eq!(merger.finish().response.data, Some(json!({"employees": null})));
    }

    #[test]
    fn test_non_null_root_field_nulls_data() {
        let mut merger = merger(|_| {});
        let root = step("employees", Vec::new(), vec![FieldShape::non_null("employees")]);
        merger.merge(0, &root, FetchResult::from_outcome(&root, Err(FetchError::Cancelled)));
        assert_eq!(merger.finish().response.data, Some(Value::Null));
    }

    #[test]
    fn test_conflicting_shapes_abort() {
        let mut merger = merger(|_| {});
        let a = employees_step();
        let b = step("other", Vec::new(), vec![FieldShape::nullable("employees")]);
        merger.merge(0, &a, ok(&a, r#"{"data":{"employees":[{"id":1}]}}"#));
        merger.merge(1, &b, ok(&b, r#"{"data":{"employees":[{"id":1},{"id":2}]}}"#));
        assert!(merger.is_aborted());

        let merged = merger.finish();
        assert_eq!(merged.response.data, Some(Value::Null));
        assert_eq!(
            merged.response.errors[0].message,
            "Failed to fetch from Subgraph 'other', Reason: differing array lengths."
        );
    }

    #[test]
    fn test_errors_follow_plan_order() {
        let mut merger = merger(|c| {
            c.mode = PropagationMode::PassThrough;
            c.attach_service_name = false;
        });
        let a = step("a", Vec::new(), vec![FieldShape::nullable("a")]);
        let b = step("b", Vec::new(), vec![FieldShape::nullable("b")]);
        // Completion order b, a; plan order a, b.
        merger.merge(1, &b, ok(&b, r#"{"errors":[{"message":"from b"}]}"#));
        merger.merge(0, &a, ok(&a, r#"{"errors":[{"message":"from a"}]}"#));

        let messages: Vec<_> = merger
            .finish()
            .response
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["from a", "from b"]);
    }

    #[test]
    fn test_last_write_header_follows_plan_order() {
        let config = HeaderPropagationConfig {
            rules: vec![crate::config::schema::ResponseHeaderRule {
                name: "x-tag".into(),
                algorithm: crate::config::schema::HeaderAlgorithm::LastWrite,
            }],
        };
        let mut merger = Merger::new(Arc::new(ErrorPropagationConfig::default()), &config);
        let a = step("a", Vec::new(), Vec::new());
        let b = step("b", Vec::new(), Vec::new());

        let with_tag = |step: &FetchStep, tag: &'static str| {
            let mut response = SubgraphResponse::new(200, r#"{"data":{}}"#);
            response.headers.insert("x-tag", HeaderValue::from_static(tag));
            FetchResult::from_outcome(step, Ok(response))
        };
        merger.merge(1, &b, with_tag(&b, "b"));
        merger.merge(0, &a, with_tag(&a, "a"));

        assert_eq!(merger.finish().headers.get("x-tag").unwrap(), "b");
    }
}
