// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use clio_model::Message;
use uuid::Uuid;

use crate::lock::{lock_path, SessionLock};
use crate::memory::{ltm_path, Ltm, Stm, Yarn};

/// Default capacity of the STM ring buffer.
const STM_MAX_SIZE: usize = 20;

/// One saved turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub role: String,
    pub content: String,
}

/// Fraction of the model's context window reserved for input (messages +
/// tool schemas + system prompt). The remainder is headroom for the model's
/// response and for token-estimation error.
pub const INPUT_BUDGET_FRACTION: f32 = 0.58;

/// In-memory conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Approximate total token count for the current message list
    pub token_count: usize,
    /// Maximum context tokens (set from model config / provider limits)
    pub max_tokens: usize,
    /// Maximum output tokens the active model can produce in one response.
    pub max_output_tokens: usize,
    /// Estimated tokens consumed by tool schemas and the dynamic context
    /// block — sent with every request but not stored in `messages`.
    pub schema_overhead: usize,
    /// Running total of prompt-cache tokens read across the session.
    pub cache_read_total: u64,
    /// Running total of prompt-cache tokens written across the session.
    pub cache_write_total: u64,
    /// Ring buffer over the most recent messages, for ordinal/keyword recall.
    pub stm: Stm,
    /// Cross-session long-term memory: discoveries, solved problems, code
    /// patterns, workflows, failures, and standing context rules.
    pub ltm: Ltm,
    /// Append-only archive of named conversation threads.
    pub yarn: Yarn,
    /// Held while this session directory is open for writing; released on drop.
    lock: Option<SessionLock>,
}

/// On-disk shape of a session, written atomically to `session.json`.
/// `ltm` is persisted separately (shared across sessions in the same
/// directory) via [`Ltm::save`]; `stm` is rebuilt from `messages` on load.
#[derive(Serialize, Deserialize)]
struct SessionSnapshot {
    id: String,
    messages: Vec<Message>,
    max_tokens: usize,
    max_output_tokens: usize,
    schema_overhead: usize,
    cache_read_total: u64,
    cache_write_total: u64,
    yarn: Yarn,
}

impl Session {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            token_count: 0,
            max_tokens,
            max_output_tokens: 0,
            schema_overhead: 0,
            cache_read_total: 0,
            cache_write_total: 0,
            stm: Stm::new(STM_MAX_SIZE),
            ltm: Ltm::default(),
            yarn: Yarn::default(),
            lock: None,
        }
    }

    fn session_file(dir: &Path) -> std::path::PathBuf {
        dir.join("session.json")
    }

    /// Acquire the session directory's lockfile. Call once before the first
    /// [`Session::save`]; the lock is released when the session is dropped
    /// or [`Session::cleanup`] is called.
    pub fn acquire_lock(&mut self, dir: &Path, force: bool) -> Result<(), crate::lock::LockError> {
        self.lock = Some(SessionLock::acquire(lock_path(dir), force)?);
        Ok(())
    }

    /// Load a session from `dir`, or start a fresh one if no `session.json`
    /// exists yet. `max_tokens` is applied to a freshly-created session only
    /// — a loaded session keeps its persisted budget fields as-is since
    /// those are restored from the snapshot.
    pub fn load(dir: &Path, max_tokens: usize) -> anyhow::Result<Self> {
        let path = Self::session_file(dir);
        let ltm = Ltm::load(&ltm_path(dir))?;

        match std::fs::read_to_string(&path) {
            Ok(raw) => {
                let snap: SessionSnapshot = serde_json::from_str(&raw)?;
                let mut stm = Stm::new(STM_MAX_SIZE);
                for m in &snap.messages {
                    stm.add(m.clone());
                }
                let mut session = Self {
                    id: snap.id,
                    messages: snap.messages,
                    token_count: 0,
                    max_tokens: snap.max_tokens,
                    max_output_tokens: snap.max_output_tokens,
                    schema_overhead: snap.schema_overhead,
                    cache_read_total: snap.cache_read_total,
                    cache_write_total: snap.cache_write_total,
                    stm,
                    ltm,
                    yarn: snap.yarn,
                    lock: None,
                };
                session.recalculate_tokens();
                Ok(session)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut session = Self::new(max_tokens);
                session.ltm = ltm;
                Ok(session)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the session and its LTM atomically (tmp file + rename).
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;
        let snap = SessionSnapshot {
            id: self.id.clone(),
            messages: self.messages.clone(),
            max_tokens: self.max_tokens,
            max_output_tokens: self.max_output_tokens,
            schema_overhead: self.schema_overhead,
            cache_read_total: self.cache_read_total,
            cache_write_total: self.cache_write_total,
            yarn: self.yarn.clone(),
        };
        let path = Self::session_file(dir);
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, serde_json::to_string_pretty(&snap)?)?;
        std::fs::rename(&tmp, &path)?;
        self.ltm.save(&ltm_path(dir))?;
        Ok(())
    }

    /// Release the session lock (if held). Safe to call even if no lock was
    /// ever acquired.
    pub fn cleanup(&mut self) {
        if let Some(lock) = self.lock.take() {
            lock.release();
        }
    }

    /// Safe input budget: the slice of the context window available for
    /// messages + tool schemas + system prompt, leaving headroom for the
    /// response and for estimation error.
    pub fn input_budget(&self) -> usize {
        (self.max_tokens as f32 * INPUT_BUDGET_FRACTION) as usize
    }

    /// Accumulate prompt-cache usage reported by the provider for this turn.
    pub fn add_cache_usage(&mut self, cache_read: u32, cache_write: u32) {
        self.cache_read_total += cache_read as u64;
        self.cache_write_total += cache_write as u64;
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.stm.add(msg.clone());
        self.messages.push(msg);
    }

    pub fn push_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for m in msgs { self.push(m); }
    }

    /// Fraction of context window consumed (0.0–1.0)
    pub fn context_fraction(&self) -> f32 {
        if self.max_tokens == 0 { return 0.0; }
        (self.token_count as f32) / (self.max_tokens as f32)
    }

    pub fn is_near_limit(&self, threshold: f32) -> bool {
        self.context_fraction() >= threshold
    }

    /// Recalculate token count from scratch (call after compaction).
    pub fn recalculate_tokens(&mut self) {
        self.token_count = self.messages.iter().map(|m| m.approx_tokens()).sum();
    }

    /// Replace the message list and recalculate token count (for resubmit / edit).
    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.recalculate_tokens();
        self.stm = Stm::new(STM_MAX_SIZE);
        for m in &self.messages {
            self.stm.add(m.clone());
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
