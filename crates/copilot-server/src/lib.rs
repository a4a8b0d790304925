// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! AG-UI endpoint for the flight dashboard copilot
//!
//! Accepts run requests over HTTP and streams the reconciled AG-UI events
//! of each turn back as Server-Sent Events.

pub mod error;
pub mod handlers;
pub mod server;
pub mod state;

pub use error::{ServerError, ServerResult};
pub use server::{build_router, Server};
pub use state::AppState;
