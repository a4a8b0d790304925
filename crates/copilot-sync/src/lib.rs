// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! AG-UI event reconciliation and session-state sync for the flight
//! dashboard copilot.
//!
//! A turn flows through [`shaper`] (what history the upstream sees),
//! a [`backend`] (where raw events come from), [`reconciler`] (repairing the
//! raw stream and emitting state snapshots) and back into [`session`]
//! (the continuation token for the next turn). [`turn::TurnRunner`] ties
//! them together.

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod interpreter;
pub mod messages;
pub mod protocol;
pub mod reconciler;
pub mod session;
pub mod shaper;
pub mod state;
pub mod turn;

pub use config::CopilotConfig;
pub use error::{Error, Result};
pub use turn::{TurnRunner, TurnStream};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub use backend::{AgentBackend, HttpBackend, ScriptedBackend, UpstreamRequest, UpstreamStream};
pub use context::TurnContext;
pub use messages::{ContentItem, Message, Role, RunAgentInput};
pub use protocol::{AgUiEvent, StateMap, UpstreamItem};
pub use session::{InMemorySessionStore, SessionStore};
