// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Drives one turn from the inbound request to the reconciled event stream.
//!
//! The continuation token announced by the upstream is written back only
//! after the last event has been handed to the consumer. A consumer that
//! stops polling early leaves the session store untouched.

use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::backend::{self, AgentBackend, UpstreamRequest};
use crate::config::{CopilotConfig, SessionConfig, StateConfig};
use crate::context::TurnContext;
use crate::error::{Error, Result};
use crate::interpreter::ToolCatalog;
use crate::messages::RunAgentInput;
use crate::protocol::{AgUiEvent, UpstreamItem};
use crate::reconciler::Reconciler;
use crate::session::{InMemorySessionStore, SessionStore};
use crate::shaper::{RequestShaper, ShapeOutcome};
use crate::state::StateLayers;

/// Client-facing events of one turn
pub type TurnStream = Pin<Box<dyn Stream<Item = AgUiEvent> + Send>>;

#[derive(Debug, Clone)]
pub struct TurnRunner {
    catalog: Arc<ToolCatalog>,
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn AgentBackend>,
    state: StateConfig,
    session: SessionConfig,
    channel_capacity: usize,
}

impl TurnRunner {
    pub fn new(
        config: &CopilotConfig,
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn AgentBackend>,
    ) -> Self {
        Self {
            catalog: Arc::new(ToolCatalog::new(config.tools.clone(), &config.state)),
            store,
            backend,
            state: config.state.clone(),
            session: config.session.clone(),
            channel_capacity: config.server.channel_capacity.max(1),
        }
    }

    /// Runner with a process-local session store and the configured backend.
    pub fn from_config(config: &CopilotConfig) -> Result<Self> {
        let backend = backend::from_config(config)?;
        Ok(Self::new(config, Arc::new(InMemorySessionStore::new()), backend))
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Context for a turn: the active filter starts from the client state
    /// with sentinel fields cleared.
    fn context_for(&self, input: &RunAgentInput) -> TurnContext {
        let filter = input
            .state
            .as_ref()
            .and_then(|state| state.get(&self.state.filter_key))
            .cloned()
            .map(|filter| self.catalog.clean_sentinels(filter))
            .unwrap_or(Value::Null);
        TurnContext::new(input.thread_id.as_str(), input.run_id.as_str(), filter)
    }

    /// Run a turn lazily on the caller's task.
    pub fn run(&self, input: RunAgentInput) -> TurnStream {
        let input = input.with_generated_ids();
        let context = self.context_for(&input);
        self.drive(context, input)
    }

    /// Run a turn on its own task, scoped to the turn's context, and
    /// receive its events through a bounded channel.
    pub fn spawn(&self, input: RunAgentInput) -> ReceiverStream<AgUiEvent> {
        let input = input.with_generated_ids();
        let context = self.context_for(&input);
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let mut events = self.drive(context.clone(), input);

        tokio::spawn(context.scope(async move {
            while let Some(event) = events.next().await {
                if tx.send(event).await.is_err() {
                    info!("client went away, abandoning turn");
                    return;
                }
            }
        }));

        ReceiverStream::new(rx)
    }

    fn drive(&self, context: TurnContext, input: RunAgentInput) -> TurnStream {
        let runner = self.clone();
        Box::pin(async_stream::stream! {
            let conversation_id = input.thread_id.clone();
            let outcome = RequestShaper::new(&runner.catalog, runner.store.as_ref()).shape(&input);
            let shaped = match outcome {
                ShapeOutcome::ShortCircuit(events) => {
                    for event in events {
                        yield event;
                    }
                    return;
                }
                ShapeOutcome::Forward(shaped) => shaped,
            };

            let client_state = input.client_state();
            let owned = runner.state.frontend_owned_fields.clone();
            let layers = StateLayers::from_client_state(&client_state, owned);
            let mut reconciler = Reconciler::new(
                context.clone(),
                runner.catalog.clone(),
                layers,
                runner.state.filter_key.clone(),
            );

            let request = UpstreamRequest {
                thread_id: conversation_id.clone(),
                run_id: input.run_id.clone(),
                continuation_token: shaped.continuation,
                messages: shaped.messages,
                state: client_state,
                tools: input.tools.clone(),
                context: Some(context),
            };

            let mut upstream = match runner.backend.run(request).await {
                Ok(upstream) => upstream,
                Err(err) => {
                    for event in runner.fail(&conversation_id, &mut reconciler, err) {
                        yield event;
                    }
                    return;
                }
            };

            let mut token = None;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(UpstreamItem::Event(event)) => {
                        for event in reconciler.push(event) {
                            yield event;
                        }
                    }
                    Ok(UpstreamItem::Continuation(candidate)) => {
                        if runner.session.accepts(&candidate) {
                            token = Some(candidate);
                        } else {
                            warn!(
                                %conversation_id,
                                "ignoring continuation token with unknown prefix"
                            );
                        }
                    }
                    Err(err) => {
                        for event in runner.fail(&conversation_id, &mut reconciler, err) {
                            yield event;
                        }
                        return;
                    }
                }
            }

            for event in reconciler.finish() {
                yield event;
            }

            if reconciler.is_errored() {
                debug!(
                    %conversation_id,
                    "upstream reported an error, keeping previous session state"
                );
                return;
            }
            match token {
                Some(token) => runner.store.store(&conversation_id, token),
                None => debug!(%conversation_id, "upstream issued no continuation token"),
            }
        })
    }

    fn fail(
        &self,
        conversation_id: &str,
        reconciler: &mut Reconciler,
        err: Error,
    ) -> Vec<AgUiEvent> {
        if err.requires_session_reset() {
            warn!(conversation_id, error = %err, "continuation rejected, next turn starts fresh");
            self.store.clear(conversation_id);
        } else {
            error!(conversation_id, error = %err, "upstream turn failed");
        }
        reconciler.push(AgUiEvent::run_error(err.to_string(), Some(err.code())))
    }
}
