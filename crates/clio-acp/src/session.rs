// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-session agent state, owned by the ACP connection for the lifetime of
//! the process. Each ACP session id maps to exactly one [`clio_core::Agent`]
//! plus the in-flight-turn guard that enforces "at most one `session/prompt`
//! per session" (spec §4.10).

use std::collections::HashMap;
use std::sync::Arc;

use clio_core::Agent;
use tokio::sync::Mutex;

/// One live ACP session: the agent loop plus whether a turn is in flight.
pub struct SessionEntry {
    pub agent: Mutex<Agent>,
    /// Set for the duration of a `session/prompt` call; a second prompt for
    /// the same session while this is true is rejected with `invalid_request`.
    pub turn_in_flight: std::sync::atomic::AtomicBool,
    /// Set by `session/cancel`; observed by the running turn's event loop.
    pub cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl SessionEntry {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Mutex::new(agent),
            turn_in_flight: std::sync::atomic::AtomicBool::new(false),
            cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }
}

/// Registry of all sessions this agent process currently holds.
///
/// One ACP connection (one `clio acp` process instance) may serve multiple
/// concurrent sessions; each session's turn is independently single-flight,
/// but there is no ordering guarantee *across* sessions (spec §5).
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session_id: String, entry: SessionEntry) {
        self.sessions.lock().await.insert(session_id, Arc::new(entry));
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.lock().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.lock().await.remove(session_id)
    }
}
