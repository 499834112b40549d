//! Response header propagation from subgraph responses to the client.

use reqwest::header::{HeaderMap, HeaderName};

use crate::config::schema::{HeaderAlgorithm, HeaderPropagationConfig};

pub struct HeaderPropagator {
    rules: Vec<(HeaderName, HeaderAlgorithm)>,
}

impl HeaderPropagator {
    pub fn new(config: &HeaderPropagationConfig) -> Self {
        let rules = config
            .rules
            .iter()
            .filter_map(|rule| match HeaderName::from_bytes(rule.name.as_bytes()) {
                Ok(name) => Some((name, rule.algorithm)),
                Err(_) => {
                    tracing::warn!(header = %rule.name, "Ignoring invalid header propagation rule");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fold subgraph response headers into `out`. `responses` must be in plan
    /// order so that `last_write` always picks the same winner.
    pub fn apply<'a>(&self, out: &mut HeaderMap, responses: impl IntoIterator<Item = &'a HeaderMap>) {
        for headers in responses {
            for (name, algorithm) in &self.rules {
                let mut values = headers.get_all(name).iter();
                match algorithm {
                    HeaderAlgorithm::FirstWrite => {
                        if !out.contains_key(name) {
                            if let Some(value) = values.next() {
                                out.insert(name.clone(), value.clone());
                            }
                        }
                    }
                    HeaderAlgorithm::LastWrite => {
                        if let Some(value) = values.last() {
                            out.insert(name.clone(), value.clone());
                        }
                    }
                    HeaderAlgorithm::Append => {
                        for value in values {
                            out.append(name.clone(), value.clone());
                        }
                    }
                }
            }
        }
    }
}
