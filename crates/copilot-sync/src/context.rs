// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-turn ambient context.
//!
//! A [`TurnContext`] is created for every turn and handed explicitly to the
//! backend and the reconciler. While a turn runs on its own task it is also
//! reachable through [`TurnContext::current`], a tokio task-local, so tool
//! code deep inside a backend can read the active filter without it ever
//! being visible to another turn.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

tokio::task_local! {
    static CURRENT_TURN: TurnContext;
}

#[derive(Debug, Clone)]
pub struct TurnContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    conversation_id: String,
    run_id: String,
    active_filter: watch::Sender<Value>,
}

impl TurnContext {
    pub fn new(
        conversation_id: impl Into<String>,
        run_id: impl Into<String>,
        active_filter: Value,
    ) -> Self {
        let (active_filter, _) = watch::channel(active_filter);
        Self {
            inner: Arc::new(Inner {
                conversation_id: conversation_id.into(),
                run_id: run_id.into(),
                active_filter,
            }),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.inner.conversation_id
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Filter in effect at this point of the turn
    pub fn active_filter(&self) -> Value {
        self.inner.active_filter.borrow().clone()
    }

    pub fn set_active_filter(&self, filter: Value) {
        self.inner.active_filter.send_replace(filter);
    }

    /// Run `future` with this context as the current turn.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_TURN.scope(self, future).await
    }

    /// Context of the turn driving the current task, if any.
    pub fn current() -> Option<TurnContext> {
        CURRENT_TURN.try_with(TurnContext::clone).ok()
    }
}
