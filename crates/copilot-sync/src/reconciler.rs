// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Turns the raw upstream event stream of one turn into a well-formed one.
//!
//! [`Reconciler::push`] is a pure function of the events seen so far: each
//! upstream event yields zero or more output events. The upstream may
//! duplicate tool-call starts, open text messages it never fills, or drop
//! the closing events; all of that is repaired here and logged, never
//! reported as an error.
//!
//! Per tool call: `Started → Ended → Resulted`, where a result may also
//! arrive straight after `Started`. Per text message:
//! `Buffered → Active → Closed`, or `Buffered → Closed` for a message that
//! never received content.

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::TurnContext;
use crate::interpreter::{StateUpdate, ToolCatalog};
use crate::protocol::{AgUiEvent, StateMap};
use crate::state::StateLayers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolPhase {
    Started,
    Ended,
    Resulted,
}

#[derive(Debug)]
struct ToolCallRecord {
    name: String,
    phase: ToolPhase,
    args: String,
}

pub struct Reconciler {
    context: TurnContext,
    catalog: Arc<ToolCatalog>,
    filter_key: String,
    layers: StateLayers,

    tool_calls: HashMap<String, ToolCallRecord>,
    /// Text starts waiting for their first content delta
    buffered: IndexMap<String, AgUiEvent>,
    /// Opened text messages, in the order they became visible
    active: IndexSet<String>,
    closed: HashSet<String>,

    suppress_text: bool,
    started: bool,
    finished: bool,
    errored: bool,
}

impl Reconciler {
    pub fn new(
        context: TurnContext,
        catalog: Arc<ToolCatalog>,
        layers: StateLayers,
        filter_key: impl Into<String>,
    ) -> Self {
        Self {
            context,
            catalog,
            filter_key: filter_key.into(),
            layers,
            tool_calls: HashMap::new(),
            buffered: IndexMap::new(),
            active: IndexSet::new(),
            closed: HashSet::new(),
            suppress_text: false,
            started: false,
            finished: false,
            errored: false,
        }
    }

    /// RUN_FINISHED or RUN_ERROR has been emitted
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The upstream reported a RUN_ERROR
    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// Merged state accumulated so far
    pub fn snapshot(&self) -> StateMap {
        self.layers.snapshot()
    }

    /// Feed one upstream event.
    pub fn push(&mut self, event: AgUiEvent) -> Vec<AgUiEvent> {
        let mut out = Vec::new();
        if self.finished {
            debug!(kind = event.kind(), "dropping event after end of run");
            return out;
        }

        if let AgUiEvent::RunStarted { .. } = event {
            if self.started {
                warn!("dropping duplicate RUN_STARTED");
            } else {
                self.start(&mut out);
            }
            return out;
        }
        // state snapshots never reach the client directly, so they do not
        // open the run either
        if !matches!(event, AgUiEvent::StateSnapshot { .. }) {
            self.start(&mut out);
        }

        match event {
            AgUiEvent::RunStarted { .. } => {}
            AgUiEvent::RunFinished { .. } => self.finalize(&mut out),
            AgUiEvent::RunError { message, code } => {
                warn!(%message, ?code, "upstream reported run error");
                self.errored = true;
                self.finished = true;
                out.push(AgUiEvent::RunError { message, code });
            }
            AgUiEvent::TextMessageStart { message_id, role } => {
                self.on_text_start(message_id, role)
            }
            AgUiEvent::TextMessageContent { message_id, delta } => {
                self.on_text_content(message_id, delta, &mut out)
            }
            AgUiEvent::TextMessageEnd { message_id } => self.on_text_end(message_id, &mut out),
            AgUiEvent::ToolCallStart {
                tool_call_id,
                tool_call_name,
                parent_message_id,
            } => self.on_tool_start(tool_call_id, tool_call_name, parent_message_id, &mut out),
            AgUiEvent::ToolCallArgs { tool_call_id, delta } => {
                self.on_tool_args(tool_call_id, delta, &mut out)
            }
            AgUiEvent::ToolCallEnd { tool_call_id } => self.on_tool_end(tool_call_id, &mut out),
            AgUiEvent::ToolCallResult {
                message_id,
                tool_call_id,
                content,
            } => self.on_tool_result(message_id, tool_call_id, content, &mut out),
            AgUiEvent::StateSnapshot { snapshot } => {
                debug!(keys = snapshot.len(), "absorbing agent state snapshot");
                self.layers.absorb_agent(&snapshot);
            }
        }

        out
    }

    /// Close the turn when the upstream stream ended without RUN_FINISHED.
    pub fn finish(&mut self) -> Vec<AgUiEvent> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        warn!("upstream ended without RUN_FINISHED, finalizing turn");
        self.start(&mut out);
        self.finalize(&mut out);
        out
    }

    fn start(&mut self, out: &mut Vec<AgUiEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        out.push(AgUiEvent::run_started(self.context.conversation_id(), self.context.run_id()));
    }

    fn finalize(&mut self, out: &mut Vec<AgUiEvent>) {
        if !self.active.is_empty() {
            warn!(count = self.active.len(), "force-closing unterminated text messages");
        }
        for message_id in self.active.drain(..) {
            out.push(AgUiEvent::text_end(message_id.as_str()));
            self.closed.insert(message_id);
        }
        if !self.buffered.is_empty() {
            debug!(
                count = self.buffered.len(),
                "discarding text messages that never received content"
            );
            self.buffered.clear();
        }

        let snapshot = self.layers.snapshot();
        info!(keys = snapshot.len(), "emitting final state snapshot");
        out.push(AgUiEvent::snapshot(snapshot));
        out.push(AgUiEvent::run_finished(self.context.conversation_id(), self.context.run_id()));
        self.finished = true;
    }

    fn on_text_start(&mut self, message_id: String, role: String) {
        if self.suppress_text {
            debug!(%message_id, "suppressing text start after dashboard command");
            return;
        }
        if self.buffered.contains_key(&message_id) || self.active.contains(&message_id) {
            warn!(%message_id, "dropping duplicate TEXT_MESSAGE_START");
            return;
        }
        if self.closed.contains(&message_id) {
            warn!(%message_id, "dropping TEXT_MESSAGE_START for closed message");
            return;
        }
        debug!(%message_id, "buffering text start until content arrives");
        let start = AgUiEvent::TextMessageStart {
            message_id: message_id.clone(),
            role,
        };
        self.buffered.insert(message_id, start);
    }

    fn on_text_content(&mut self, message_id: String, delta: String, out: &mut Vec<AgUiEvent>) {
        if self.suppress_text {
            debug!(%message_id, "suppressing text content after dashboard command");
            return;
        }
        if let Some(start) = self.buffered.shift_remove(&message_id) {
            out.push(start);
            self.active.insert(message_id.clone());
        }
        if !self.active.contains(&message_id) {
            warn!(%message_id, "dropping TEXT_MESSAGE_CONTENT for unknown message");
            return;
        }
        out.push(AgUiEvent::TextMessageContent { message_id, delta });
    }

    fn on_text_end(&mut self, message_id: String, out: &mut Vec<AgUiEvent>) {
        if self.buffered.shift_remove(&message_id).is_some() {
            debug!(%message_id, "dropping phantom text message");
            self.closed.insert(message_id);
            return;
        }
        if !self.active.shift_remove(&message_id) {
            warn!(%message_id, "dropping TEXT_MESSAGE_END for unknown message");
            return;
        }
        out.push(AgUiEvent::text_end(message_id.as_str()));
        self.closed.insert(message_id);
    }

    fn on_tool_start(
        &mut self,
        tool_call_id: String,
        tool_call_name: String,
        parent_message_id: Option<String>,
        out: &mut Vec<AgUiEvent>,
    ) {
        if self.tool_calls.contains_key(&tool_call_id) {
            warn!(%tool_call_id, tool = %tool_call_name, "dropping duplicate TOOL_CALL_START");
            return;
        }
        if self.catalog.is_dashboard_command(&tool_call_name) && !self.suppress_text {
            info!(
                tool = %tool_call_name,
                "dashboard command started, suppressing text for the rest of the turn"
            );
            self.suppress_text = true;
        }
        self.tool_calls.insert(
            tool_call_id.clone(),
            ToolCallRecord {
                name: tool_call_name.clone(),
                phase: ToolPhase::Started,
                args: String::new(),
            },
        );
        out.push(AgUiEvent::ToolCallStart {
            tool_call_id,
            tool_call_name,
            parent_message_id,
        });
    }

    fn on_tool_args(&mut self, tool_call_id: String, delta: String, out: &mut Vec<AgUiEvent>) {
        let Some(record) = self.tool_calls.get_mut(&tool_call_id) else {
            warn!(%tool_call_id, "dropping TOOL_CALL_ARGS for unknown call");
            return;
        };
        if record.phase != ToolPhase::Started {
            warn!(
                %tool_call_id,
                phase = ?record.phase,
                "dropping TOOL_CALL_ARGS for finished call"
            );
            return;
        }
        record.args.push_str(&delta);
        out.push(AgUiEvent::ToolCallArgs { tool_call_id, delta });
    }

    fn on_tool_end(&mut self, tool_call_id: String, out: &mut Vec<AgUiEvent>) {
        let Some(record) = self.tool_calls.get_mut(&tool_call_id) else {
            warn!(%tool_call_id, "dropping TOOL_CALL_END for unknown call");
            return;
        };
        if record.phase != ToolPhase::Started {
            warn!(%tool_call_id, phase = ?record.phase, "dropping duplicate TOOL_CALL_END");
            return;
        }
        record.phase = ToolPhase::Ended;
        let updates = self.catalog.extract_arguments(&record.name, &record.args);

        out.push(AgUiEvent::tool_end(tool_call_id.as_str()));
        if self.apply(updates) {
            debug!(%tool_call_id, "state derived from tool arguments");
            out.push(AgUiEvent::snapshot(self.layers.snapshot()));
        }
    }

    fn on_tool_result(
        &mut self,
        message_id: String,
        tool_call_id: String,
        content: Value,
        out: &mut Vec<AgUiEvent>,
    ) {
        let Some(record) = self.tool_calls.get_mut(&tool_call_id) else {
            warn!(%tool_call_id, "dropping TOOL_CALL_RESULT for unknown call");
            return;
        };
        if record.phase == ToolPhase::Resulted {
            warn!(%tool_call_id, "dropping duplicate TOOL_CALL_RESULT");
            return;
        }
        record.phase = ToolPhase::Resulted;
        let tool = record.name.clone();

        let current = self.layers.snapshot();
        let updates = self.catalog.extract_result(&tool, &content, &current);
        let early = updates
            .iter()
            .any(|update| self.catalog.is_early_snapshot_key(&update.key));
        let changed = self.apply(updates);

        let message_id = if message_id.is_empty() {
            format!("result-{tool_call_id}")
        } else {
            message_id
        };
        out.push(AgUiEvent::ToolCallResult {
            message_id,
            tool_call_id,
            content,
        });
        if early && changed {
            info!(%tool, "emitting early state snapshot");
            out.push(AgUiEvent::snapshot(self.layers.snapshot()));
        }
    }

    /// Write tool-derived state; true when any layer value was written.
    fn apply(&mut self, updates: Vec<StateUpdate>) -> bool {
        let mut changed = false;
        for StateUpdate { key, value } in updates {
            changed |= self.layers.set_tool(&key, value);
            if key == self.filter_key {
                let merged = self.layers.current(&key).unwrap_or(Value::Null);
                self.context.set_active_filter(merged);
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StateConfig, ToolsConfig};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeSet;
    use tracing_test::traced_test;

    fn reconciler_with(layers: StateLayers) -> Reconciler {
        let catalog = ToolCatalog::new(ToolsConfig::default(), &StateConfig::default());
        Reconciler::new(
            TurnContext::new("thread-1", "run-1", Value::Null),
            Arc::new(catalog),
            layers,
            "activeFilter",
        )
    }

    fn reconciler() -> Reconciler {
        reconciler_with(StateLayers::new(BTreeSet::from(["selectedRoute".to_string()])))
    }

    fn run(reconciler: &mut Reconciler, events: Vec<AgUiEvent>) -> Vec<AgUiEvent> {
        let mut out: Vec<AgUiEvent> =
            events.into_iter().flat_map(|event| reconciler.push(event)).collect();
        out.extend(reconciler.finish());
        out
    }

    fn kinds(events: &[AgUiEvent]) -> Vec<&'static str> {
        events.iter().map(AgUiEvent::kind).collect()
    }

    fn snapshots(events: &[AgUiEvent]) -> Vec<&StateMap> {
        events
            .iter()
            .filter_map(|event| match event {
                AgUiEvent::StateSnapshot { snapshot } => Some(snapshot),
                _ => None,
            })
            .collect()
    }

    fn snapshot(value: Value) -> AgUiEvent {
        AgUiEvent::snapshot(value.as_object().cloned().unwrap())
    }

    fn started() -> AgUiEvent {
        AgUiEvent::run_started("upstream-thread", "upstream-run")
    }

    fn finished() -> AgUiEvent {
        AgUiEvent::run_finished("upstream-thread", "upstream-run")
    }

    #[test]
    fn duplicate_tool_start_is_emitted_once() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                started(),
                AgUiEvent::tool_start("42", "get_over_utilized_flights"),
                AgUiEvent::tool_start("42", "get_over_utilized_flights"),
                AgUiEvent::tool_end("42"),
                finished(),
            ],
        );
        let starts = out
            .iter()
            .filter(|event| match event {
                AgUiEvent::ToolCallStart { tool_call_id, .. } => tool_call_id == "42",
                _ => false,
            })
            .count();
        assert_eq!(starts, 1);
    }

    #[test]
    fn phantom_text_message_is_suppressed() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![started(), AgUiEvent::text_start("m"), AgUiEvent::text_end("m"), finished()],
        );
        assert_eq!(kinds(&out), vec!["RUN_STARTED", "STATE_SNAPSHOT", "RUN_FINISHED"]);
    }

    #[test]
    fn buffered_start_is_released_with_first_delta() {
        let mut r = reconciler();
        r.push(started());
        assert!(r.push(AgUiEvent::text_start("m")).is_empty());
        assert_eq!(
            r.push(AgUiEvent::text_delta("m", "Hello")),
            vec![AgUiEvent::text_start("m"), AgUiEvent::text_delta("m", "Hello")]
        );
        assert_eq!(r.push(AgUiEvent::text_delta("m", "!")), vec![AgUiEvent::text_delta("m", "!")]);
        assert_eq!(r.push(AgUiEvent::text_end("m")), vec![AgUiEvent::text_end("m")]);
    }

    #[test]
    fn open_text_message_is_force_closed_at_run_finished() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                started(),
                AgUiEvent::text_start("m"),
                AgUiEvent::text_delta("m", "x"),
                finished(),
            ],
        );
        assert_eq!(
            kinds(&out),
            vec![
                "RUN_STARTED",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_END",
                "STATE_SNAPSHOT",
                "RUN_FINISHED"
            ]
        );
        assert_eq!(out[3], AgUiEvent::text_end("m"));
    }

    #[test]
    fn forced_closures_follow_activation_order() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                started(),
                AgUiEvent::text_start("b"),
                AgUiEvent::text_start("a"),
                AgUiEvent::text_delta("a", "1"),
                AgUiEvent::text_delta("b", "2"),
                AgUiEvent::text_start("c"),
                finished(),
            ],
        );
        let ends: Vec<_> = out
            .iter()
            .filter_map(|event| match event {
                AgUiEvent::TextMessageEnd { message_id } => Some(message_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec!["a", "b"]);
        assert!(!out.contains(&AgUiEvent::text_start("c")));
    }

    #[test]
    fn dashboard_command_suppresses_later_text() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                started(),
                AgUiEvent::tool_start("c1", "fetch_flights"),
                AgUiEvent::tool_end("c1"),
                AgUiEvent::text_start("m"),
                AgUiEvent::text_delta("m", "I filtered the dashboard"),
                AgUiEvent::text_end("m"),
                finished(),
            ],
        );
        assert!(out.iter().all(|event| !matches!(
            event,
            AgUiEvent::TextMessageStart { .. }
                | AgUiEvent::TextMessageContent { .. }
                | AgUiEvent::TextMessageEnd { .. }
        )));
    }

    #[test]
    fn text_opened_before_command_is_still_closed() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                started(),
                AgUiEvent::text_start("m"),
                AgUiEvent::text_delta("m", "Fetching"),
                AgUiEvent::tool_start("c1", "clear_filter"),
                AgUiEvent::text_delta("m", " more"),
                AgUiEvent::text_end("m"),
                finished(),
            ],
        );
        assert_eq!(
            kinds(&out),
            vec![
                "RUN_STARTED",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_CONTENT",
                "TOOL_CALL_START",
                "TEXT_MESSAGE_END",
                "STATE_SNAPSHOT",
                "RUN_FINISHED"
            ]
        );
    }

    #[traced_test]
    #[test]
    fn orphaned_tool_events_are_dropped_and_logged() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                started(),
                AgUiEvent::tool_args("ghost", "{}"),
                AgUiEvent::tool_end("ghost"),
                AgUiEvent::tool_result("ghost", json!({"flights": [1]})),
                finished(),
            ],
        );
        assert_eq!(kinds(&out), vec!["RUN_STARTED", "STATE_SNAPSHOT", "RUN_FINISHED"]);
        assert!(snapshots(&out)[0].get("flights").is_none());
        assert!(logs_contain("dropping TOOL_CALL_ARGS for unknown call"));
        assert!(logs_contain("dropping TOOL_CALL_RESULT for unknown call"));
    }

    #[test]
    fn args_and_end_after_end_are_dropped() {
        let mut r = reconciler();
        r.push(started());
        r.push(AgUiEvent::tool_start("c", "get_optimal_flights"));
        assert_eq!(r.push(AgUiEvent::tool_end("c")), vec![AgUiEvent::tool_end("c")]);
        assert!(r.push(AgUiEvent::tool_args("c", "{}")).is_empty());
        assert!(r.push(AgUiEvent::tool_end("c")).is_empty());
    }

    #[test]
    fn duplicate_result_is_dropped() {
        let mut r = reconciler();
        r.push(started());
        r.push(AgUiEvent::tool_start("c", "get_optimal_flights"));
        assert_eq!(r.push(AgUiEvent::tool_result("c", json!({}))).len(), 1);
        assert!(r.push(AgUiEvent::tool_result("c", json!({}))).is_empty());
        assert!(r.push(AgUiEvent::tool_end("c")).is_empty());
    }

    #[test]
    fn upstream_snapshots_are_merged_not_forwarded() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                started(),
                snapshot(json!({"flights": [{"id": "F1"}], "viewMode": "table"})),
                snapshot(json!({"flights": []})),
                finished(),
            ],
        );
        let snaps = snapshots(&out);
        assert_eq!(snaps.len(), 1);
        assert_eq!(
            Value::Object(snaps[0].clone()),
            json!({"flights": [{"id": "F1"}], "viewMode": "table"})
        );
    }

    #[test]
    fn filter_result_emits_early_snapshot_after_result() {
        let mut r = reconciler();
        r.push(started());
        r.push(AgUiEvent::tool_start("c", "fetch_flights"));
        r.push(AgUiEvent::tool_end("c"));
        let out = r.push(AgUiEvent::tool_result(
            "c",
            json!({"activeFilter": {"route": "LAX → ORD", "utilizationType": "__KEEP__"}}),
        ));

        assert_eq!(kinds(&out), vec!["TOOL_CALL_RESULT", "STATE_SNAPSHOT"]);
        assert_eq!(
            snapshots(&out)[0]["activeFilter"],
            json!({"route": "LAX → ORD", "utilizationType": null})
        );
        assert_eq!(
            r.context.active_filter(),
            json!({"route": "LAX → ORD", "utilizationType": null})
        );
    }

    #[test]
    fn non_filter_results_wait_for_final_snapshot() {
        let mut r = reconciler();
        r.push(started());
        r.push(AgUiEvent::tool_start("c", "get_flight_details"));
        let out = r.push(AgUiEvent::tool_result("c", json!({"selectedFlight": {"id": "F9"}})));
        assert_eq!(kinds(&out), vec!["TOOL_CALL_RESULT"]);
        assert_eq!(r.snapshot()["selectedFlight"], json!({"id": "F9"}));
    }

    #[test]
    fn sentinel_never_reaches_snapshot() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                started(),
                AgUiEvent::tool_start("c", "fetch_flights"),
                AgUiEvent::tool_result("c", json!({"activeFilter": "__KEEP__", "flights": [1]})),
                finished(),
            ],
        );
        let serialized = serde_json::to_string(&snapshots(&out)).unwrap();
        assert!(!serialized.contains("__KEEP__"));
        assert!(snapshots(&out).iter().all(|snap| snap.get("activeFilter").is_none()));
    }

    #[test]
    fn filter_arguments_emit_snapshot_after_end() {
        let mut r = reconciler();
        r.push(started());
        r.push(AgUiEvent::tool_start("f", "filter_dashboard"));
        r.push(AgUiEvent::tool_args("f", r#"{"route": "lax-"#));
        r.push(AgUiEvent::tool_args("f", r#"ord"}"#));
        let out = r.push(AgUiEvent::tool_end("f"));

        assert_eq!(kinds(&out), vec!["TOOL_CALL_END", "STATE_SNAPSHOT"]);
        assert_eq!(
            snapshots(&out)[0]["activeFilter"],
            json!({"route": "LAX → ORD", "utilizationType": null})
        );
    }

    #[test]
    fn neutral_filter_call_clears_a_client_filter() {
        let client = json!({"activeFilter": {"route": "LAX → ORD", "utilizationType": "over"}});
        let client = client.as_object().cloned().unwrap();
        let layers = StateLayers::from_client_state(&client, BTreeSet::new());
        let mut r = reconciler_with(layers);
        let out = run(
            &mut r,
            vec![
                started(),
                AgUiEvent::tool_start("f", "filter_dashboard"),
                AgUiEvent::tool_args("f", r#"{"utilizationType":"all"}"#),
                AgUiEvent::tool_end("f"),
                finished(),
            ],
        );

        let cleared = json!({"route": null, "utilizationType": null});
        let snaps = snapshots(&out);
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0]["activeFilter"], cleared);
        assert_eq!(snaps[1]["activeFilter"], cleared);
        assert_eq!(r.context.active_filter(), cleared);
    }

    #[test]
    fn malformed_arguments_emit_only_end() {
        let mut r = reconciler();
        r.push(started());
        r.push(AgUiEvent::tool_start("f", "filter_dashboard"));
        r.push(AgUiEvent::tool_args("f", "{not json"));
        assert_eq!(r.push(AgUiEvent::tool_end("f")), vec![AgUiEvent::tool_end("f")]);
    }

    #[test]
    fn frontend_owned_fields_survive_tool_and_agent_writes() {
        let client = json!({"selectedRoute": "LAX → ORD"}).as_object().cloned().unwrap();
        let owned = BTreeSet::from(["selectedRoute".to_string()]);
        let layers = StateLayers::from_client_state(&client, owned);
        let mut r = reconciler_with(layers);
        let out = run(
            &mut r,
            vec![
                started(),
                snapshot(json!({"selectedRoute": "JFK → SFO"})),
                finished(),
            ],
        );
        assert_eq!(snapshots(&out)[0]["selectedRoute"], json!("LAX → ORD"));
    }

    #[test]
    fn run_envelope_is_repaired() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                AgUiEvent::tool_start("c", "get_optimal_flights"),
                started(),
                AgUiEvent::text_start("m"),
                AgUiEvent::text_delta("m", "done"),
            ],
        );
        assert_eq!(
            kinds(&out),
            vec![
                "RUN_STARTED",
                "TOOL_CALL_START",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_END",
                "STATE_SNAPSHOT",
                "RUN_FINISHED"
            ]
        );
        assert_eq!(out[0], AgUiEvent::run_started("thread-1", "run-1"));
        assert_eq!(out[6], AgUiEvent::run_finished("thread-1", "run-1"));
        assert!(r.push(AgUiEvent::text_delta("m", "late")).is_empty());
    }

    #[test]
    fn upstream_run_error_ends_turn_without_snapshot() {
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![started(), AgUiEvent::run_error("model overloaded", Some("overloaded"))],
        );
        assert_eq!(kinds(&out), vec!["RUN_STARTED", "RUN_ERROR"]);
        assert!(r.is_errored());
    }

    #[test]
    fn end_to_end_duplicate_start_with_flights_result() {
        let flights = json!([{"id": "F1"}, {"id": "F2"}, {"id": "F3"}]);
        let mut r = reconciler();
        let out = run(
            &mut r,
            vec![
                started(),
                AgUiEvent::tool_start("42", "get_over_utilized_flights"),
                AgUiEvent::tool_start("42", "get_over_utilized_flights"),
                AgUiEvent::tool_result("42", json!({"flights": flights.clone()})),
                finished(),
            ],
        );

        assert_eq!(
            kinds(&out),
            vec![
                "RUN_STARTED",
                "TOOL_CALL_START",
                "TOOL_CALL_RESULT",
                "STATE_SNAPSHOT",
                "RUN_FINISHED"
            ]
        );
        assert_eq!(snapshots(&out)[0]["flights"], flights);
    }
}
