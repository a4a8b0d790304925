// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tool-name lookup: which tools are dashboard commands, which run in the
//! browser, and which result or argument fields feed the snapshot.

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{ArgumentMapping, ArgumentTransform, StateConfig, ToolsConfig};
use crate::protocol::StateMap;

/// A snapshot key written by a tool call
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: ToolsConfig,
    sentinel: String,
}

impl ToolCatalog {
    pub fn new(tools: ToolsConfig, state: &StateConfig) -> Self {
        Self {
            tools,
            sentinel: state.keep_sentinel.clone(),
        }
    }

    pub fn is_dashboard_command(&self, tool: &str) -> bool {
        self.tools.dashboard_commands.contains(tool)
    }

    pub fn is_frontend_only(&self, tool: &str) -> bool {
        self.tools.frontend_only.contains(tool)
    }

    pub fn is_early_snapshot_key(&self, key: &str) -> bool {
        self.tools.early_snapshot_keys.contains(key)
    }

    fn is_sentinel(&self, value: &Value) -> bool {
        value.as_str() == Some(self.sentinel.as_str())
    }

    /// Replace sentinel fields of an object with null.
    pub fn clean_sentinels(&self, value: Value) -> Value {
        match value {
            Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(name, field)| {
                        let field = if self.is_sentinel(&field) { Value::Null } else { field };
                        (name, field)
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    /// State carried by a tool result.
    ///
    /// `content` may be a JSON object or a string holding one. A top-level
    /// sentinel leaves the key alone; a sentinel inside an object keeps the
    /// field value from `current`, or null when it has none.
    pub fn extract_result(
        &self,
        tool: &str,
        content: &Value,
        current: &StateMap,
    ) -> Vec<StateUpdate> {
        let Some(mappings) = self.tools.result_mappings.get(tool) else {
            return Vec::new();
        };

        let parsed;
        let result = match content {
            Value::Object(fields) => fields,
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(fields)) => {
                    parsed = fields;
                    &parsed
                }
                _ => {
                    debug!(tool, "tool result is not a JSON object, nothing to extract");
                    return Vec::new();
                }
            },
            _ => return Vec::new(),
        };

        let mut updates = Vec::new();
        for mapping in mappings {
            let Some(value) = result.get(&mapping.field) else {
                continue;
            };
            if self.is_sentinel(value) {
                debug!(tool, key = %mapping.key, "keep sentinel, leaving key untouched");
                continue;
            }
            let value = self.resolve_nested_sentinels(value.clone(), current.get(&mapping.key));
            debug!(
                tool,
                field = %mapping.field,
                key = %mapping.key,
                "extracted state from tool result"
            );
            updates.push(StateUpdate {
                key: mapping.key.clone(),
                value,
            });
        }
        updates
    }

    fn resolve_nested_sentinels(&self, value: Value, current: Option<&Value>) -> Value {
        match value {
            Value::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(name, field)| {
                        let field = if self.is_sentinel(&field) {
                            current
                                .and_then(|current| current.get(&name))
                                .cloned()
                                .unwrap_or(Value::Null)
                        } else {
                            field
                        };
                        (name, field)
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    /// State derived from the complete argument buffer of a finished call.
    ///
    /// Malformed arguments are logged and produce nothing.
    pub fn extract_arguments(&self, tool: &str, raw_args: &str) -> Vec<StateUpdate> {
        let Some(mappings) = self.tools.argument_mappings.get(tool) else {
            return Vec::new();
        };
        if raw_args.trim().is_empty() {
            return Vec::new();
        }

        let args = match serde_json::from_str::<Value>(raw_args) {
            Ok(Value::Object(args)) => args,
            Ok(other) => {
                warn!(tool, kind = json_kind(&other), "tool arguments are not an object, ignoring");
                return Vec::new();
            }
            Err(err) => {
                warn!(tool, error = %err, "failed to parse tool arguments, ignoring");
                return Vec::new();
            }
        };

        mappings
            .iter()
            .filter_map(|mapping| apply_argument_mapping(mapping, &args))
            .collect()
    }
}

fn apply_argument_mapping(mapping: &ArgumentMapping, args: &StateMap) -> Option<StateUpdate> {
    if mapping.fields.is_empty() {
        let arg = mapping.arg.as_ref()?;
        let value = args.get(arg)?;
        return Some(StateUpdate {
            key: mapping.key.clone(),
            value: transform(value.clone(), mapping.transform),
        });
    }

    let mut object = StateMap::new();
    for field in &mapping.fields {
        let value = args
            .get(&field.arg)
            .cloned()
            .map(|value| transform(value, field.transform))
            .unwrap_or(Value::Null);
        let neutral = field.neutral.contains(&value) || value == Value::String(String::new());
        object.insert(field.field.clone(), if neutral { Value::Null } else { value });
    }

    // A cleared filter keeps its fields as nulls so it outranks older filters in the merge
    Some(StateUpdate {
        key: mapping.key.clone(),
        value: Value::Object(object),
    })
}

fn transform(value: Value, transform: ArgumentTransform) -> Value {
    match (transform, value) {
        (ArgumentTransform::RouteArrow, Value::String(route)) => {
            Value::String(normalize_route(&route))
        }
        (_, value) => value,
    }
}

/// Uppercase a route and write its endpoints as `A → B`.
pub fn normalize_route(route: &str) -> String {
    route
        .trim()
        .to_uppercase()
        .replace('-', " → ")
        .replace(" TO ", " → ")
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
