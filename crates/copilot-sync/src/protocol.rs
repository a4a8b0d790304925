// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! AG-UI event vocabulary shared by the upstream agent and the UI client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat key → value application state
pub type StateMap = Map<String, Value>;

/// One AG-UI protocol event.
///
/// The same vocabulary is consumed from the upstream agent and produced for
/// the UI; the reconciler only changes which events appear and in what order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgUiEvent {
    RunStarted {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
    RunFinished {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },
    RunError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    TextMessageStart {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(default = "assistant_role")]
        role: String,
    },
    TextMessageContent {
        #[serde(rename = "messageId")]
        message_id: String,
        delta: String,
    },
    TextMessageEnd {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    ToolCallStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolCallName")]
        tool_call_name: String,
        #[serde(
            rename = "parentMessageId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        parent_message_id: Option<String>,
    },
    ToolCallArgs {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnd {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },
    ToolCallResult {
        #[serde(rename = "messageId", default)]
        message_id: String,
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        content: Value,
    },
    StateSnapshot {
        snapshot: StateMap,
    },
}

fn assistant_role() -> String {
    "assistant".to_string()
}

impl AgUiEvent {
    pub fn run_started(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::RunStarted {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_finished(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self::RunFinished {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
        }
    }

    pub fn run_error(message: impl Into<String>, code: Option<&str>) -> Self {
        Self::RunError {
            message: message.into(),
            code: code.map(str::to_string),
        }
    }

    pub fn text_start(message_id: impl Into<String>) -> Self {
        Self::TextMessageStart {
            message_id: message_id.into(),
            role: assistant_role(),
        }
    }

    pub fn text_delta(message_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::TextMessageContent {
            message_id: message_id.into(),
            delta: delta.into(),
        }
    }

    pub fn text_end(message_id: impl Into<String>) -> Self {
        Self::TextMessageEnd {
            message_id: message_id.into(),
        }
    }

    pub fn tool_start(tool_call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolCallStart {
            tool_call_id: tool_call_id.into(),
            tool_call_name: name.into(),
            parent_message_id: None,
        }
    }

    pub fn tool_args(tool_call_id: impl Into<String>, delta: impl Into<String>) -> Self {
        Self::ToolCallArgs {
            tool_call_id: tool_call_id.into(),
            delta: delta.into(),
        }
    }

    pub fn tool_end(tool_call_id: impl Into<String>) -> Self {
        Self::ToolCallEnd {
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: Value) -> Self {
        let tool_call_id = tool_call_id.into();
        Self::ToolCallResult {
            message_id: format!("result-{tool_call_id}"),
            tool_call_id,
            content,
        }
    }

    pub fn snapshot(snapshot: StateMap) -> Self {
        Self::StateSnapshot { snapshot }
    }

    /// Wire name of the event, as in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd { .. } => "TEXT_MESSAGE_END",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
            Self::ToolCallResult { .. } => "TOOL_CALL_RESULT",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
        }
    }
}

/// Item produced by an upstream backend for one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamItem {
    Event(AgUiEvent),
    /// Token the upstream issued for resuming this conversation
    Continuation(String),
}

impl From<AgUiEvent> for UpstreamItem {
    fn from(event: AgUiEvent) -> Self {
        UpstreamItem::Event(event)
    }
}
