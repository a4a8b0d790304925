// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Deterministic backend that replays turns from a YAML scenario.
//!
//! ```yaml
//! turns:
//!   - match: over-utilized        # substring of the newest user input
//!     events:
//!       - { type: TOOL_CALL_START, toolCallId: "42", toolCallName: get_over_utilized_flights }
//!       - { type: TOOL_CALL_RESULT, toolCallId: "42", content: { flights: [] } }
//!   - events:                     # fallback for unmatched input
//!       - { type: TEXT_MESSAGE_START, messageId: m1 }
//!       - { type: TEXT_MESSAGE_CONTENT, messageId: m1, delta: "Hello" }
//! ```
//!
//! A turn without an explicit `continuation` hands out a fresh `resp_`
//! token after its last event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{AgentBackend, UpstreamRequest, UpstreamStream};
use crate::error::{Error, Result};
use crate::protocol::{AgUiEvent, UpstreamItem};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub turns: Vec<ScenarioTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTurn {
    /// Case-insensitive substring of the newest input; absent for the fallback turn
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,

    /// Pause between events
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default)]
    pub events: Vec<AgUiEvent>,

    /// Failure raised after the events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ScenarioFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Continuation,
    Backend,
}

impl ScenarioFailure {
    fn to_error(&self) -> Error {
        match self.kind {
            FailureKind::Continuation => Error::Continuation {
                message: self.message.clone(),
            },
            FailureKind::Backend => Error::Backend {
                message: self.message.clone(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    scenario: Scenario,
}

impl ScriptedBackend {
    pub fn new(scenario: Scenario) -> Self {
        Self { scenario }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_yaml::from_str(&contents)?;
        if scenario.turns.is_empty() {
            return Err(Error::Scenario {
                message: format!("Scenario '{}' has no turns", path.display()),
            });
        }
        info!(path = %path.display(), turns = scenario.turns.len(), "loaded scenario");
        Ok(Self::new(scenario))
    }

    fn select(&self, input: Option<&str>) -> Option<&ScenarioTurn> {
        let input = input.unwrap_or_default().to_lowercase();
        self.scenario
            .turns
            .iter()
            .find(|turn| {
                turn.matches
                    .as_deref()
                    .is_some_and(|needle| input.contains(&needle.to_lowercase()))
            })
            .or_else(|| self.scenario.turns.iter().find(|turn| turn.matches.is_none()))
    }
}

#[async_trait]
impl AgentBackend for ScriptedBackend {
    async fn run(&self, request: UpstreamRequest) -> Result<UpstreamStream> {
        let input = request.last_input_text();
        let turn = self.select(input.as_deref()).cloned().ok_or_else(|| Error::Scenario {
            message: format!("No scenario turn matches input {:?}", input),
        })?;
        debug!(
            thread_id = %request.thread_id,
            matched = ?turn.matches,
            events = turn.events.len(),
            "replaying scenario turn"
        );

        let delay = Duration::from_millis(turn.delay_ms);
        let token = turn
            .continuation
            .clone()
            .unwrap_or_else(|| format!("resp_{}", uuid::Uuid::new_v4().simple()));

        Ok(Box::pin(async_stream::stream! {
            for event in turn.events {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(UpstreamItem::Event(event));
            }
            if let Some(failure) = &turn.failure {
                yield Err(failure.to_error());
                return;
            }
            yield Ok(UpstreamItem::Continuation(token));
        }))
    }
}
