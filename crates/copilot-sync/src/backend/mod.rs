// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Upstream agent backends.
//!
//! A backend receives the shaped history of one turn and streams back AG-UI
//! events plus, somewhere in the stream, the continuation token for the
//! next turn. It knows nothing about reconciliation.

pub mod http;
pub mod scripted;

use async_trait::async_trait;
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::{BackendKind, CopilotConfig};
use crate::context::TurnContext;
use crate::error::{Error, Result};
use crate::messages::{ContentItem, Message, Role};
use crate::protocol::{StateMap, UpstreamItem};

pub use http::HttpBackend;
pub use scripted::ScriptedBackend;

/// Items of one upstream turn
pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<UpstreamItem>> + Send>>;

/// What a backend is asked to run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamRequest {
    pub thread_id: String,
    pub run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    pub messages: Vec<Message>,
    pub state: StateMap,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(skip)]
    pub context: Option<TurnContext>,
}

impl UpstreamRequest {
    /// Text of the newest user message or tool result
    pub fn last_input_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User || message.is_tool_result())
            .map(|message| {
                message
                    .contents
                    .iter()
                    .map(|item| match item {
                        ContentItem::Text { text } => text.as_str(),
                        ContentItem::ToolResult { content, .. } => content.as_str(),
                        ContentItem::ToolCall { .. } => "",
                    })
                    .collect::<String>()
            })
    }
}

#[async_trait]
pub trait AgentBackend: Debug + Send + Sync {
    /// Start a turn. Errors before the first item are returned directly;
    /// later failures arrive as `Err` items in the stream.
    async fn run(&self, request: UpstreamRequest) -> Result<UpstreamStream>;
}

/// Build the backend selected in the configuration.
pub fn from_config(config: &CopilotConfig) -> Result<Arc<dyn AgentBackend>> {
    match config.backend.kind {
        BackendKind::Http => Ok(Arc::new(HttpBackend::new(&config.backend)?)),
        BackendKind::Scripted => {
            let path = config.backend.scenario_file.as_ref().ok_or_else(|| Error::Config {
                message: "The scripted backend requires backend.scenario_file".to_string(),
            })?;
            Ok(Arc::new(ScriptedBackend::from_file(path)?))
        }
    }
}
