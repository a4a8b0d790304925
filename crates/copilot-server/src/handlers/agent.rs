// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! AG-UI run endpoint

use axum::{
    extract::{rejection::JsonRejection, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use copilot_sync::RunAgentInput;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tracing::info;

use crate::error::ServerResult;
use crate::state::AppState;

/// Run one turn and stream its events, one JSON-encoded AG-UI event per
/// `data:` frame.
pub async fn run_agent(
    State(state): State<AppState>,
    input: Result<Json<RunAgentInput>, JsonRejection>,
) -> ServerResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let Json(input) = input?;
    info!(
        thread_id = %input.thread_id,
        run_id = %input.run_id,
        messages = input.messages.len(),
        "starting agent turn"
    );

    let events = state.runner.spawn(input).map(|event| Event::default().json_data(event));
    let keep_alive =
        KeepAlive::new().interval(Duration::from_secs(state.config.server.keep_alive_seconds));
    Ok(Sse::new(events).keep_alive(keep_alive))
}
