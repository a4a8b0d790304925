// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Conversation history as typed content items.
//!
//! On the wire a message follows the AG-UI shape (`content`, `toolCalls`,
//! `toolCallId`). Internally every message is a role plus an ordered list of
//! [`ContentItem`]s so history shaping can match on item kinds directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::StateMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
    Developer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentItem {
    Text {
        text: String,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolResult {
        call_id: String,
        content: String,
    },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ContentItem::ToolCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentItem::ToolResult {
            call_id: call_id.into(),
            content: content.into(),
        }
    }

    pub fn is_tool_item(&self) -> bool {
        !matches!(self, ContentItem::Text { .. })
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            ContentItem::Text { .. } => None,
            ContentItem::ToolCall { call_id, .. } | ContentItem::ToolResult { call_id, .. } => {
                Some(call_id)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub struct Message {
    pub id: Option<String>,
    pub role: Role,
    pub contents: Vec<ContentItem>,
}

impl Message {
    pub fn new(role: Role, contents: Vec<ContentItem>) -> Self {
        Self {
            id: None,
            role,
            contents,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentItem::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentItem::text(text)])
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::Tool, vec![ContentItem::tool_result(call_id, content)])
    }

    pub fn has_tool_items(&self) -> bool {
        self.contents.iter().any(ContentItem::is_tool_item)
    }

    /// Tool-role message or any message carrying a tool result
    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool
            || self
                .contents
                .iter()
                .any(|item| matches!(item, ContentItem::ToolResult { .. }))
    }

    /// Concatenated text items
    pub fn text(&self) -> String {
        self.contents
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str)> {
        self.contents.iter().filter_map(|item| match item {
            ContentItem::ToolCall { call_id, name, .. } => Some((call_id.as_str(), name.as_str())),
            _ => None,
        })
    }

    pub fn result_call_ids(&self) -> impl Iterator<Item = &str> {
        self.contents.iter().filter_map(|item| match item {
            ContentItem::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

/// Flattens string, text-part arrays and other JSON into plain text.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.clone()),
                Value::Object(fields) => {
                    fields.get("text").and_then(Value::as_str).map(str::to_string)
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        other => other.to_string(),
    }
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let text = wire.content.as_ref().map(content_text).unwrap_or_default();
        let mut contents = Vec::new();

        match (wire.role, wire.tool_call_id) {
            (Role::Tool, Some(call_id)) => contents.push(ContentItem::tool_result(call_id, text)),
            (_, _) => {
                if !text.is_empty() {
                    contents.push(ContentItem::text(text));
                }
            }
        }
        contents.extend(wire.tool_calls.into_iter().map(|call| {
            ContentItem::tool_call(call.id, call.function.name, call.function.arguments)
        }));

        Message {
            id: wire.id,
            role: wire.role,
            contents,
        }
    }
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut tool_call_id = None;

        for item in message.contents {
            match item {
                ContentItem::Text { text: part } => text.push_str(&part),
                ContentItem::ToolCall {
                    call_id,
                    name,
                    arguments,
                } => tool_calls.push(WireToolCall {
                    id: call_id,
                    kind: function_kind(),
                    function: WireFunction { name, arguments },
                }),
                ContentItem::ToolResult { call_id, content } => {
                    tool_call_id.get_or_insert(call_id);
                    text.push_str(&content);
                }
            }
        }

        WireMessage {
            id: message.id,
            role: message.role,
            content: (!text.is_empty() || tool_calls.is_empty()).then_some(Value::String(text)),
            tool_calls,
            tool_call_id,
        }
    }
}

/// Body of an AG-UI run request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAgentInput {
    /// Client-side conversation identifier
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub state: Option<StateMap>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub forwarded_props: Value,
}

impl RunAgentInput {
    /// Client-declared state, empty when the client sent none
    pub fn client_state(&self) -> StateMap {
        self.state.clone().unwrap_or_default()
    }

    /// Fill in identifiers the client left blank.
    pub fn with_generated_ids(mut self) -> Self {
        if self.thread_id.is_empty() {
            self.thread_id = format!("thread-{}", uuid::Uuid::new_v4());
        }
        if self.run_id.is_empty() {
            self.run_id = format!("run-{}", uuid::Uuid::new_v4());
        }
        self
    }
}
