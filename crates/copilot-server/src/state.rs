// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server state management

use copilot_sync::{CopilotConfig, TurnRunner};
use std::sync::Arc;

/// Shared server state
#[derive(Debug, Clone)]
pub struct AppState {
    /// Turn driver; owns the session store for the lifetime of the process
    pub runner: Arc<TurnRunner>,

    pub config: Arc<CopilotConfig>,
}

impl AppState {
    pub fn new(config: CopilotConfig) -> copilot_sync::Result<Self> {
        let runner = TurnRunner::from_config(&config)?;
        Ok(Self::with_runner(config, runner))
    }

    /// State around an already-built runner (custom store or backend)
    pub fn with_runner(config: CopilotConfig, runner: TurnRunner) -> Self {
        Self {
            runner: Arc::new(runner),
            config: Arc::new(config),
        }
    }
}
