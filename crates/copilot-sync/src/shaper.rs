// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Decides what history the upstream sees for a turn.
//!
//! Frontend-only tool calls are always scrubbed. A conversation with a
//! stored continuation token sends only its newest input; a fresh one drops
//! every tool exchange the upstream has no bookkeeping for.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::interpreter::ToolCatalog;
use crate::messages::{ContentItem, Message, Role, RunAgentInput};
use crate::protocol::AgUiEvent;
use crate::session::SessionStore;

/// Outbound request for a turn that does reach the upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapedRequest {
    /// Token of the upstream conversation being resumed
    pub continuation: Option<String>,
    pub messages: Vec<Message>,
}

impl ShapedRequest {
    pub fn is_continuation(&self) -> bool {
        self.continuation.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeOutcome {
    Forward(ShapedRequest),
    /// The turn completes without calling the upstream; these are its events
    ShortCircuit(Vec<AgUiEvent>),
}

pub struct RequestShaper<'a> {
    catalog: &'a ToolCatalog,
    store: &'a dyn SessionStore,
}

impl<'a> RequestShaper<'a> {
    pub fn new(catalog: &'a ToolCatalog, store: &'a dyn SessionStore) -> Self {
        Self { catalog, store }
    }

    pub fn shape(&self, input: &RunAgentInput) -> ShapeOutcome {
        let conversation_id = input.thread_id.as_str();
        let call_names = tool_call_names(&input.messages);

        if let Some(tool) = self.frontend_result_tool(&input.messages, &call_names) {
            info!(conversation_id, tool, "frontend tool result, completing turn locally");
            // the upstream is left waiting on a tool output it will never get
            self.store.clear(conversation_id);

            let client_state = input.client_state();
            let mut events = vec![AgUiEvent::run_started(conversation_id, input.run_id.as_str())];
            if !client_state.is_empty() {
                events.push(AgUiEvent::snapshot(client_state));
            }
            events.push(AgUiEvent::run_finished(conversation_id, input.run_id.as_str()));
            return ShapeOutcome::ShortCircuit(events);
        }

        let messages = self.scrub_frontend_tools(&input.messages, &call_names);

        if let Some(token) = self.store.resolve(conversation_id) {
            match last_input(&messages) {
                Some(message) => {
                    debug!(
                        conversation_id,
                        role = ?message.role,
                        "continuing upstream conversation"
                    );
                    return ShapeOutcome::Forward(ShapedRequest {
                        continuation: Some(token),
                        messages: vec![message.clone()],
                    });
                }
                None => {
                    warn!(
                        conversation_id,
                        "continuation without a new input message, starting fresh"
                    );
                }
            }
        }

        self.store.clear(conversation_id);
        let messages = prune_for_fresh_start(messages);
        debug!(conversation_id, count = messages.len(), "starting fresh upstream conversation");
        ShapeOutcome::Forward(ShapedRequest {
            continuation: None,
            messages,
        })
    }

    /// Name of the frontend-only tool answered by the last message, if the
    /// last message is such a result.
    fn frontend_result_tool<'m>(
        &self,
        messages: &[Message],
        call_names: &HashMap<&'m str, &'m str>,
    ) -> Option<&'m str> {
        let last = messages.last()?;
        if last.role != Role::Tool {
            return None;
        }
        last.result_call_ids()
            .filter_map(|call_id| call_names.get(call_id).copied())
            .find(|name| self.catalog.is_frontend_only(name))
    }

    /// Remove frontend-only tool calls and their results.
    ///
    /// Assistant messages keep their text and other tool calls; a message
    /// left with nothing is dropped.
    fn scrub_frontend_tools(
        &self,
        messages: &[Message],
        call_names: &HashMap<&str, &str>,
    ) -> Vec<Message> {
        let frontend_ids: HashSet<&str> = call_names
            .iter()
            .filter(|(_, name)| self.catalog.is_frontend_only(name))
            .map(|(call_id, _)| *call_id)
            .collect();
        if frontend_ids.is_empty() {
            return messages.to_vec();
        }

        let mut scrubbed = Vec::with_capacity(messages.len());
        for message in messages {
            if message.role == Role::User {
                scrubbed.push(message.clone());
                continue;
            }
            let is_frontend_item = |item: &ContentItem| {
                item.is_tool_item() && item.call_id().is_some_and(|id| frontend_ids.contains(id))
            };
            if !message.contents.iter().any(is_frontend_item) {
                scrubbed.push(message.clone());
                continue;
            }

            let contents: Vec<ContentItem> = message
                .contents
                .iter()
                .filter(|item| !is_frontend_item(*item))
                .cloned()
                .collect();
            if contents.is_empty() {
                debug!(role = ?message.role, "dropping message holding only frontend tool items");
                continue;
            }
            debug!(
                removed = message.contents.len() - contents.len(),
                kept = contents.len(),
                "rebuilt message without frontend tool items"
            );
            scrubbed.push(Message {
                id: message.id.clone(),
                role: message.role,
                contents,
            });
        }
        scrubbed
    }
}

fn tool_call_names(messages: &[Message]) -> HashMap<&str, &str> {
    messages
        .iter()
        .filter(|message| message.role == Role::Assistant)
        .flat_map(Message::tool_calls)
        .collect()
}

/// The last user or tool-result message
fn last_input(messages: &[Message]) -> Option<&Message> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User || message.is_tool_result())
}

/// Keep user, system and pure-text assistant messages.
fn prune_for_fresh_start(messages: Vec<Message>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|message| match message.role {
            Role::Tool => false,
            Role::Assistant => !message.has_tool_items(),
            Role::User | Role::System | Role::Developer => true,
        })
        .collect()
}
