// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for the copilot sync layer and its server

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CopilotConfig {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// Where upstream agent events come from
    pub backend: BackendConfig,

    /// Tool-name categories and tool → state mappings
    pub tools: ToolsConfig,

    /// State layering rules
    pub state: StateConfig,

    /// Continuation token bookkeeping
    pub session: SessionConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Enable permissive CORS for browser clients
    pub cors_enabled: bool,

    /// Interval between SSE keep-alive comments
    pub keep_alive_seconds: u64,

    /// Buffered events between a running turn and its SSE response
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_enabled: true,
            keep_alive_seconds: 15,
            channel_capacity: 64,
        }
    }
}

/// Upstream backend flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Stream AG-UI events from a remote agent over HTTP
    #[default]
    Http,
    /// Replay turns from a YAML scenario file
    Scripted,
}

/// Upstream backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Agent endpoint for the `http` backend
    pub url: Option<String>,

    /// Scenario file for the `scripted` backend
    pub scenario_file: Option<std::path::PathBuf>,

    /// Request timeout for the `http` backend
    pub timeout_seconds: u64,

    /// Extra headers sent with every upstream request
    pub headers: BTreeMap<String, String>,

    /// Substrings of an upstream error that mean the continuation token
    /// is no longer usable
    pub continuation_error_markers: Vec<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Http,
            url: Some("http://127.0.0.1:8001/agent".to_string()),
            scenario_file: None,
            timeout_seconds: 120,
            headers: BTreeMap::new(),
            continuation_error_markers: vec![
                "previous_response_not_found".to_string(),
                "No tool output found".to_string(),
            ],
        }
    }
}

/// Copies one field of a tool result into the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMapping {
    /// Field name in the parsed tool result
    pub field: String,
    /// Snapshot key written in the tool-result layer
    pub key: String,
}

impl ResultMapping {
    pub fn new(field: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            key: key.into(),
        }
    }
}

/// Rewrite applied to an argument value before it is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentTransform {
    #[default]
    None,
    /// `"lax-ord"` / `"LAX to ORD"` become `"LAX → ORD"`
    RouteArrow,
}

/// One field of an object assembled from tool-call arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentField {
    /// Field name inside the assembled object
    pub field: String,
    /// Argument name to read
    pub arg: String,
    #[serde(default)]
    pub transform: ArgumentTransform,
    /// Values that count as "no filter" for this field
    #[serde(default)]
    pub neutral: Vec<Value>,
}

/// Derives a snapshot key from the arguments of a tool call.
///
/// With `fields`, an object is assembled with neutral values written as
/// null; a cleared filter is therefore an object of nulls, not `null`.
/// Without `fields`, the single `arg` is copied when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentMapping {
    pub key: String,
    #[serde(default)]
    pub arg: Option<String>,
    #[serde(default)]
    pub transform: ArgumentTransform,
    #[serde(default)]
    pub fields: Vec<ArgumentField>,
}

/// Tool-name categories and mappings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Tools whose start suppresses narrated text for the rest of the turn
    pub dashboard_commands: BTreeSet<String>,

    /// Tools executed by the UI client and never forwarded upstream
    pub frontend_only: BTreeSet<String>,

    /// Tool name → result fields copied into the snapshot
    pub result_mappings: BTreeMap<String, Vec<ResultMapping>>,

    /// Tool name → snapshot keys derived from call arguments
    pub argument_mappings: BTreeMap<String, Vec<ArgumentMapping>>,

    /// Snapshot keys that trigger an immediate snapshot when a tool writes them
    pub early_snapshot_keys: BTreeSet<String>,
}

const DATA_TOOLS: &[&str] = &[
    "get_over_utilized_flights",
    "get_under_utilized_flights",
    "get_optimal_flights",
    "get_predicted_payload",
    "get_flight_details",
    "get_utilization_risks",
    "get_historical_payload",
    "analyze_flights",
    "fetch_flights",
    "clear_filter",
];

fn set_of(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        let data_mappings = vec![
            ResultMapping::new("flights", "flights"),
            ResultMapping::new("historical_data", "historicalData"),
            ResultMapping::new("selectedFlight", "selectedFlight"),
            ResultMapping::new("activeFilter", "activeFilter"),
        ];
        let result_mappings = DATA_TOOLS
            .iter()
            .map(|tool| (tool.to_string(), data_mappings.clone()))
            .collect();

        let mut argument_mappings = BTreeMap::new();
        argument_mappings.insert(
            "filter_dashboard".to_string(),
            vec![ArgumentMapping {
                key: "activeFilter".to_string(),
                arg: None,
                transform: ArgumentTransform::None,
                fields: vec![
                    ArgumentField {
                        field: "route".to_string(),
                        arg: "route".to_string(),
                        transform: ArgumentTransform::RouteArrow,
                        neutral: Vec::new(),
                    },
                    ArgumentField {
                        field: "utilizationType".to_string(),
                        arg: "utilizationType".to_string(),
                        transform: ArgumentTransform::None,
                        neutral: vec![Value::String("all".to_string())],
                    },
                ],
            }],
        );

        Self {
            dashboard_commands: set_of(&["fetch_flights", "clear_filter"]),
            frontend_only: set_of(&[
                "filter_dashboard",
                "setThemeColor",
                "display_flight_list",
                "display_flight_detail",
                "display_historical_chart",
                "fetch_flight_details",
                "reload_all_flights",
            ]),
            result_mappings,
            argument_mappings,
            early_snapshot_keys: set_of(&["activeFilter"]),
        }
    }
}

/// State layering rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Keys only the client may set
    pub frontend_owned_fields: BTreeSet<String>,

    /// Tool-result value meaning "keep what the snapshot holds"
    pub keep_sentinel: String,

    /// Snapshot key mirrored into the turn context as the active filter
    pub filter_key: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            frontend_owned_fields: set_of(&["selectedRoute"]),
            keep_sentinel: "__KEEP__".to_string(),
            filter_key: "activeFilter".to_string(),
        }
    }
}

/// Continuation token bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Accepted token prefixes; empty accepts every token
    pub continuation_prefixes: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            continuation_prefixes: vec!["resp_".to_string(), "conv_".to_string()],
        }
    }
}

impl SessionConfig {
    pub fn accepts(&self, token: &str) -> bool {
        let prefixes = &self.continuation_prefixes;
        !token.is_empty()
            && (prefixes.is_empty()
                || prefixes.iter().any(|prefix| token.starts_with(prefix.as_str())))
    }
}

impl CopilotConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &std::path::Path) -> std::result::Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: CopilotConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_file(&self, path: &std::path::Path) -> std::result::Result<(), Error> {
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), Error> {
        if self.server.port == 0 {
            return Err(config_error("Server port cannot be 0"));
        }
        if self.server.channel_capacity == 0 {
            return Err(config_error("Server channel_capacity must be at least 1"));
        }

        match self.backend.kind {
            BackendKind::Http => {
                let url = self.backend.url.as_deref().unwrap_or_default();
                if url.is_empty() {
                    return Err(config_error("The http backend requires backend.url"));
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(config_error(format!(
                        "backend.url must be an http(s) URL, got '{}'",
                        url
                    )));
                }
            }
            BackendKind::Scripted => {
                if self.backend.scenario_file.is_none() {
                    return Err(config_error("The scripted backend requires backend.scenario_file"));
                }
            }
        }

        if self.state.keep_sentinel.is_empty() {
            return Err(config_error("state.keep_sentinel cannot be empty"));
        }
        if self.state.filter_key.is_empty() {
            return Err(config_error("state.filter_key cannot be empty"));
        }

        for tool in self.tools.result_mappings.keys() {
            if self.tools.frontend_only.contains(tool) {
                return Err(config_error(format!(
                    "Tool '{}' is frontend-only and cannot have result mappings",
                    tool
                )));
            }
        }

        for (tool, mappings) in &self.tools.argument_mappings {
            for mapping in mappings {
                if mapping.arg.is_none() && mapping.fields.is_empty() {
                    return Err(config_error(format!(
                        "Argument mapping for '{}' → '{}' needs either arg or fields",
                        tool, mapping.key
                    )));
                }
            }
        }

        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
    }
}

use crate::error::Error;
