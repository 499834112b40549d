//! Fetch plan model.
//!
//! A plan is produced by the operation engine and only executed here. Each
//! step names a subgraph, the response path its data merges into, the
//! fields it contributes there (with nullability, for null bubbling) and
//! the steps whose data it needs first.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::schema::TimeoutConfig;
use crate::fetch::types::{FetchError, OperationKind, SubgraphRequest};

/// One element of a response path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathElement {
    /// Object field.
    Field { name: String, non_null: bool },
    /// Every item of a list (`@` in plan notation).
    Flatten { non_null_items: bool },
}

impl PathElement {
    pub fn field(name: impl Into<String>) -> Self {
        PathElement::Field {
            name: name.into(),
            non_null: false,
        }
    }

    pub fn non_null_field(name: impl Into<String>) -> Self {
        PathElement::Field {
            name: name.into(),
            non_null: true,
        }
    }

    pub fn flatten() -> Self {
        PathElement::Flatten {
            non_null_items: false,
        }
    }
}

/// Where a step's data lands in the response. Empty for root fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponsePath(pub Vec<PathElement>);

impl ResponsePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_flatten(&self) -> bool {
        self.0
            .iter()
            .any(|e| matches!(e, PathElement::Flatten { .. }))
    }
}

/// Field names joined with `.`; list markers are left out.
impl fmt::Display for ResponsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for element in &self.0 {
            if let PathElement::Field { name, .. } = element {
                if !first {
                    f.write_str(".")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// A field a step contributes at its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldShape {
    pub name: String,
    pub non_null: bool,
}

impl FieldShape {
    pub fn nullable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            non_null: false,
        }
    }

    pub fn non_null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            non_null: true,
        }
    }
}

/// Builds the subgraph request of a step from the objects at its path and
/// the client's variables. Plans are cached, so nothing request-specific may
/// be stored in a builder.
pub trait RequestBuilder: Send + Sync + fmt::Debug {
    fn build(&self, targets: &[Value], variables: &Value) -> Result<SubgraphRequest, String>;
}

/// Root fetch forwarding the client's variables.
#[derive(Debug, Clone)]
pub struct StaticRequest {
    pub url: String,
    pub query: String,
}

impl StaticRequest {
    pub fn new(url: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: query.into(),
        }
    }
}

impl RequestBuilder for StaticRequest {
    fn build(&self, _targets: &[Value], variables: &Value) -> Result<SubgraphRequest, String> {
        let mut body = json!({ "query": self.query });
        if variables.as_object().is_some_and(|v| !v.is_empty()) {
            body["variables"] = variables.clone();
        }
        Ok(SubgraphRequest::new(self.url.clone(), body))
    }
}

/// Entity fetch: one representation per target object.
#[derive(Debug, Clone)]
pub struct EntityRequest {
    pub url: String,
    pub query: String,
    pub typename: String,
    pub key_fields: Vec<String>,
}

impl RequestBuilder for EntityRequest {
    fn build(&self, targets: &[Value], variables: &Value) -> Result<SubgraphRequest, String> {
        let representations = targets
            .iter()
            .map(|target| {
                let mut representation = serde_json::Map::new();
                representation.insert("__typename".to_string(), json!(self.typename));
                for key in &self.key_fields {
                    let value = target
                        .get(key)
                        .ok_or_else(|| format!("missing key field '{key}'"))?;
                    representation.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(representation))
            })
            .collect::<Result<Vec<_>, String>>()?;

        let mut merged = variables.as_object().cloned().unwrap_or_default();
        merged.insert("representations".to_string(), Value::Array(representations));

        Ok(SubgraphRequest::new(
            self.url.clone(),
            json!({ "query": self.query, "variables": merged }),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct FetchStep {
    pub id: usize,
    pub subgraph_name: String,
    pub subgraph_id: String,
    pub path: ResponsePath,
    pub fields: Vec<FieldShape>,
    pub depends_on: Vec<usize>,
    pub request: Arc<dyn RequestBuilder>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub kind: OperationKind,
    pub steps: Vec<FetchStep>,
    pub estimated_cost: u64,
}

impl Plan {
    /// Group steps into waves: every step runs after all of its dependencies.
    /// Steps inside a wave keep plan order.
    ///
    /// Fails on unknown dependencies, cycles and dependency chains deeper
    /// than `max_depth`.
    pub fn waves(&self, max_depth: usize) -> Result<Vec<Vec<usize>>, FetchError> {
        let index: HashMap<usize, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| (step.id, i))
            .collect();
        if index.len() != self.steps.len() {
            return Err(FetchError::InvalidPlan("duplicate step id".into()));
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let resolved = step
                .depends_on
                .iter()
                .map(|id| {
                    index.get(id).copied().ok_or_else(|| {
                        FetchError::InvalidPlan(format!(
                            "step {} depends on unknown step {}",
                            step.id, id
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            deps.push(resolved);
        }

        let mut depth: Vec<Option<usize>> = vec![None; self.steps.len()];
        let mut remaining = self.steps.len();
        while remaining > 0 {
            let mut progressed = false;
            for i in 0..self.steps.len() {
                if depth[i].is_some() {
                    continue;
                }
                let resolved: Option<Vec<usize>> = deps[i].iter().map(|&d| depth[d]).collect();
                if let Some(dep_depths) = resolved {
                    let d = dep_depths.into_iter().max().map_or(0, |m| m + 1);
                    if d >= max_depth {
                        return Err(FetchError::InvalidPlan(format!(
                            "plan depth exceeds the limit of {max_depth}"
                        )));
                    }
                    depth[i] = Some(d);
                    remaining -= 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Err(FetchError::InvalidPlan("dependency cycle between fetch steps".into()));
            }
        }

        let levels = depth.iter().flatten().max().map_or(0, |m| m + 1);
        let mut waves = vec![Vec::new(); levels];
        for (i, d) in depth.into_iter().enumerate() {
            if let Some(d) = d {
                waves[d].push(i);
            }
        }
        Ok(waves)
    }
}

/// Attach the rule's timeouts to a built request.
pub(crate) fn with_timeouts(mut request: SubgraphRequest, timeouts: &TimeoutConfig) -> SubgraphRequest {
    request.timeouts = timeouts.clone();
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: usize, depends_on: Vec<usize>) -> FetchStep {
        FetchStep {
            id,
            subgraph_name: format!("s{id}"),
            subgraph_id: id.to_string(),
            path: ResponsePath::root(),
            fields: Vec::new(),
            depends_on,
            request: Arc::new(StaticRequest::new("http://localhost", "{ a }")),
        }
    }

    fn plan(steps: Vec<FetchStep>) -> Plan {
        Plan {
            kind: OperationKind::Query,
            steps,
            estimated_cost: 0,
        }
    }

    #[test]
    fn test_waves_follow_dependencies() {
        let plan = plan(vec![step(0, vec![]), step(1, vec![0]), step(2, vec![]), step(3, vec![1, 2])]);
        assert_eq!(plan.waves(32).unwrap(), vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let plan = plan(vec![step(0, vec![1]), step(1, vec![0])]);
        assert!(matches!(plan.waves(32), Err(FetchError::InvalidPlan(_))));
    }

    #[test]
    fn test_depth_guard() {
        let plan = plan(vec![step(0, vec![]), step(1, vec![0]), step(2, vec![1])]);
        assert!(plan.waves(3).is_ok());
        assert!(matches!(plan.waves(2), Err(FetchError::InvalidPlan(_))));
    }

    #[test]
    fn test_unknown_dependency() {
        let plan = plan(vec![step(0, vec![9])]);
        let err = plan.waves(32).unwrap_err();
        assert!(err.to_string().contains("unknown step 9"));
    }

    #[test]
    fn test_path_display_skips_list_markers() {
        let path = ResponsePath(vec![
            PathElement::field("employees"),
            PathElement::flatten(),
            PathElement::field("details"),
        ]);
        assert_eq!(path.to_string(), "employees.details");
        assert_eq!(ResponsePath::root().to_string(), "");
    }

    #[test]
    fn test_entity_request_representations() {
        let builder = EntityRequest {
            url: "http://products".into(),
            query: "query($representations: [_Any!]!) { _entities(representations: $representations) { ... on Employee { notes } } }".into(),
            typename: "Employee".into(),
            key_fields: vec!["id".into()],
        };
        let request = builder
            .build(&[json!({"id": 1, "details": {}}), json!({"id": 2})], &json!({"withNotes": true}))
            .unwrap();
        assert_eq!(
            request.body["variables"]["representations"],
            json!([{"__typename": "Employee", "id": 1}, {"__typename": "Employee", "id": 2}])
        );
        assert_eq!(request.body["variables"]["withNotes"], json!(true));
        assert!(builder.build(&[json!({})], &Value::Null).is_err());
    }
}
