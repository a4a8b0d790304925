// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Layered application state and snapshot merging.
//!
//! Three layers feed the canonical snapshot, lowest priority first:
//! agent-declared state, state extracted from tool calls, and the
//! frontend-owned fields the client declared at the start of the turn.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

use crate::protocol::StateMap;

/// Null, `[]` and `{}` carry no information for merging purposes.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    }
}

/// Merge the three layers key by key.
///
/// A key takes the highest-priority non-empty value. When every layer that
/// declares the key holds an empty value, the lowest declaring layer wins so
/// the key is still present in the result.
pub fn merge(agent: &StateMap, tool: &StateMap, frontend: &StateMap) -> StateMap {
    let mut merged = StateMap::new();
    let keys = agent.keys().chain(tool.keys()).chain(frontend.keys());

    for key in keys {
        if merged.contains_key(key) {
            continue;
        }
        let layers = [agent.get(key), tool.get(key), frontend.get(key)];
        let value = layers
            .iter()
            .rev()
            .flatten()
            .find(|value| !is_empty_value(value))
            .or_else(|| layers.iter().flatten().next())
            .map(|value| (*value).clone())
            .unwrap_or(Value::Null);
        merged.insert(key.clone(), value);
    }

    merged
}

/// Per-turn state accumulator.
#[derive(Debug, Clone, Default)]
pub struct StateLayers {
    agent: StateMap,
    tool: StateMap,
    frontend: StateMap,
    owned: BTreeSet<String>,
}

impl StateLayers {
    pub fn new(owned: BTreeSet<String>) -> Self {
        Self {
            owned,
            ..Default::default()
        }
    }

    /// Seed the layers from the state the client sent with the turn.
    ///
    /// Owned fields with a non-null value become the frontend layer; every
    /// other field is the agent's starting point.
    pub fn from_client_state(client_state: &StateMap, owned: BTreeSet<String>) -> Self {
        let mut layers = Self::new(owned);
        for (key, value) in client_state {
            if layers.owned.contains(key) {
                if !value.is_null() {
                    layers.frontend.insert(key.clone(), value.clone());
                }
            } else {
                layers.agent.insert(key.clone(), value.clone());
            }
        }
        layers
    }

    /// Fold an agent snapshot in: non-empty values overwrite, empty values
    /// only fill keys not seen yet. Owned keys are ignored.
    pub fn absorb_agent(&mut self, snapshot: &StateMap) {
        for (key, value) in snapshot {
            if self.owned.contains(key) {
                continue;
            }
            if !is_empty_value(value) || !self.agent.contains_key(key) {
                self.agent.insert(key.clone(), value.clone());
            }
        }
    }

    /// Write a tool-derived value. Returns false for owned keys, which tools
    /// may not set.
    pub fn set_tool(&mut self, key: &str, value: Value) -> bool {
        if self.owned.contains(key) {
            debug!(key, "ignoring tool write to frontend-owned field");
            return false;
        }
        self.tool.insert(key.to_string(), value);
        true
    }

    /// Current merged value of one key
    pub fn current(&self, key: &str) -> Option<Value> {
        let layers = [self.agent.get(key), self.tool.get(key), self.frontend.get(key)];
        layers
            .iter()
            .rev()
            .flatten()
            .find(|value| !is_empty_value(value))
            .or_else(|| layers.iter().flatten().next())
            .map(|value| (*value).clone())
    }

    pub fn snapshot(&self) -> StateMap {
        merge(&self.agent, &self.tool, &self.frontend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn map(value: Value) -> StateMap {
        match value {
            Value::Object(fields) => fields,
            other => panic!("expected object, got {other}"),
        }
    }

    fn owned(keys: &[&str]) -> BTreeSet<String> {
        keys.iter().map(|key| key.to_string()).collect()
    }

    #[test]
    fn tool_layer_fills_empty_agent_value() {
        let merged = merge(
            &map(json!({"a": 1, "b": []})),
            &map(json!({"b": [1, 2]})),
            &StateMap::new(),
        );
        assert_eq!(Value::Object(merged), json!({"a": 1, "b": [1, 2]}));
    }

    #[test]
    fn frontend_wins_over_every_non_empty_layer() {
        let merged = merge(
            &map(json!({"a": 1, "b": []})),
            &map(json!({"a": 5, "b": [1, 2]})),
            &map(json!({"a": 9})),
        );
        assert_eq!(Value::Object(merged), json!({"a": 9, "b": [1, 2]}));
    }

    #[test]
    fn all_empty_keeps_lowest_declaring_layer() {
        let merged = merge(
            &map(json!({"flights": []})),
            &map(json!({"flights": null, "historicalData": {}})),
            &StateMap::new(),
        );
        assert_eq!(
            Value::Object(merged),
            json!({"flights": [], "historicalData": {}})
        );
    }

    #[test]
    fn empty_agent_snapshot_does_not_erase_earlier_values() {
        let mut layers = StateLayers::new(BTreeSet::new());
        layers.absorb_agent(&map(json!({"flights": [{"id": 1}], "viewMode": "table"})));
        layers.absorb_agent(&map(json!({"flights": [], "highlightRisks": null})));

        assert_eq!(
            Value::Object(layers.snapshot()),
            json!({"flights": [{"id": 1}], "viewMode": "table", "highlightRisks": null})
        );
    }

    #[test]
    fn owned_fields_come_only_from_the_client() {
        let client = map(json!({"selectedRoute": "LAX → ORD", "maxFlights": 20}));
        let mut layers = StateLayers::from_client_state(&client, owned(&["selectedRoute"]));

        layers.absorb_agent(&map(json!({"selectedRoute": "JFK → SFO"})));
        assert!(!layers.set_tool("selectedRoute", json!("SEA → DEN")));

        let snapshot = layers.snapshot();
        assert_eq!(snapshot["selectedRoute"], json!("LAX → ORD"));
        assert_eq!(snapshot["maxFlights"], json!(20));
    }

    #[test]
    fn null_owned_field_is_not_declared() {
        let client = map(json!({"selectedRoute": null}));
        let layers = StateLayers::from_client_state(&client, owned(&["selectedRoute"]));
        assert!(layers.snapshot().get("selectedRoute").is_none());
    }

    #[test]
    fn current_reflects_merge_rule() {
        let mut layers = StateLayers::new(BTreeSet::new());
        layers.absorb_agent(&map(json!({"activeFilter": {"route": "LAX → ORD"}})));
        layers.set_tool("activeFilter", Value::Null);
        assert_eq!(
            layers.current("activeFilter"),
            Some(json!({"route": "LAX → ORD"}))
        );
        assert_eq!(layers.current("missing"), None);
    }
}
