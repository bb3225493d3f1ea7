// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Short-term, long-term, and thread-archive memory for a session.
//!
//! - `Stm` is a capped ring buffer over the live message history, used for
//!   ordinal/keyword lookups ("what was the third thing I asked?").
//! - `Ltm` holds five typed, dedup-aware collections plus free-form
//!   `context_rules`, persisted as a single JSON file via atomic rename.
//! - `Yarn` is an append-only per-session thread archive — the source of
//!   truth replayed on `session/load`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clio_model::Message;
use serde::{Deserialize, Serialize};

// ─── STM ─────────────────────────────────────────────────────────────────────

/// Ring buffer over the most recent `max_size` messages, kept in addition to
/// (not instead of) the session's full `messages` history — this is the
/// fast path for "repeat that" / ordinal-reference resolution.
#[derive(Debug)]
pub struct Stm {
    max_size: usize,
    buffer: Vec<Message>,
}

impl Stm {
    pub fn new(max_size: usize) -> Self {
        Self { max_size, buffer: Vec::new() }
    }

    pub fn add(&mut self, msg: Message) {
        self.buffer.push(msg);
        if self.buffer.len() > self.max_size {
            self.buffer.remove(0);
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Last `n` messages, oldest first.
    pub fn get_context(&self, n: usize) -> &[Message] {
        let start = self.buffer.len().saturating_sub(n);
        &self.buffer[start..]
    }

    /// Resolve a natural-language reference against the buffer:
    /// - "it" / "that" / "repeat it" / "repeat that" → the most recent message
    /// - "first" / "second" / ... / "last" → the ordinal message
    /// - anything else → messages whose text contains the query (keyword search)
    pub fn search_context(&self, query: &str) -> Vec<&Message> {
        let q = query.trim().to_lowercase();

        if q.contains("it") || q.contains("that") {
            return self.buffer.last().into_iter().collect();
        }

        const ORDINALS: &[&str] = &[
            "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth",
            "tenth",
        ];
        if q.contains("last") {
            return self.buffer.last().into_iter().collect();
        }
        for (i, word) in ORDINALS.iter().enumerate() {
            if q.contains(word) {
                return self.buffer.get(i).into_iter().collect();
            }
        }

        self.buffer
            .iter()
            .filter(|m| {
                m.as_text()
                    .map(|t| t.to_lowercase().contains(&q))
                    .unwrap_or(false)
            })
            .collect()
    }
}

// ─── LTM ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub content: String,
    pub confidence: f32,
    pub occurrences: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSolution {
    pub problem: String,
    pub solution: String,
    pub solved_count: u32,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodePattern {
    pub name: String,
    pub pattern: String,
    pub confidence: f32,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<String>,
    pub success_count: u32,
    pub failure_count: u32,
}

impl Workflow {
    pub fn success_rate(&self) -> f32 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.success_count as f32 / total as f32
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub description: String,
    pub cause: Option<String>,
    pub occurrences: u32,
    pub last_seen: DateTime<Utc>,
}

/// Caps and expiry applied by [`Ltm::prune`].
#[derive(Debug, Clone)]
pub struct PruneConfig {
    pub max_per_category: usize,
    pub min_confidence: f32,
    pub max_age_days: i64,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self { max_per_category: 200, min_confidence: 0.3, max_age_days: 90 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ltm {
    pub discoveries: Vec<Discovery>,
    pub problem_solutions: Vec<ProblemSolution>,
    pub code_patterns: Vec<CodePattern>,
    pub workflows: Vec<Workflow>,
    pub failures: Vec<Failure>,
    pub context_rules: Vec<String>,
}

impl Ltm {
    pub fn add_discovery(&mut self, content: &str, confidence: f32) {
        let now = Utc::now();
        if let Some(existing) = self.discoveries.iter_mut().find(|d| d.content == content) {
            existing.confidence = existing.confidence.max(confidence);
            existing.occurrences += 1;
            existing.last_seen = now;
        } else {
            self.discoveries.push(Discovery {
                content: content.to_string(),
                confidence,
                occurrences: 1,
                first_seen: now,
                last_seen: now,
            });
        }
    }

    pub fn add_problem_solution(&mut self, problem: &str, solution: &str, example: Option<&str>) {
        if let Some(existing) = self.problem_solutions.iter_mut().find(|p| p.problem == problem) {
            existing.solved_count += 1;
            existing.solution = solution.to_string();
            if let Some(ex) = example {
                if !existing.examples.iter().any(|e| e == ex) {
                    existing.examples.push(ex.to_string());
                }
            }
        } else {
            self.problem_solutions.push(ProblemSolution {
                problem: problem.to_string(),
                solution: solution.to_string(),
                solved_count: 1,
                examples: example.map(|e| vec![e.to_string()]).unwrap_or_default(),
            });
        }
    }

    pub fn add_code_pattern(&mut self, name: &str, pattern: &str, confidence: f32) {
        let now = Utc::now();
        if let Some(existing) = self.code_patterns.iter_mut().find(|p| p.name == name) {
            existing.confidence = existing.confidence.max(confidence);
            existing.pattern = pattern.to_string();
            existing.last_seen = now;
        } else {
            self.code_patterns.push(CodePattern {
                name: name.to_string(),
                pattern: pattern.to_string(),
                confidence,
                last_seen: now,
            });
        }
    }

    pub fn add_workflow(&mut self, name: &str, steps: &[String], succeeded: bool) {
        if let Some(existing) = self.workflows.iter_mut().find(|w| w.name == name) {
            if succeeded {
                existing.success_count += 1;
            } else {
                existing.failure_count += 1;
            }
        } else {
            self.workflows.push(Workflow {
                name: name.to_string(),
                steps: steps.to_vec(),
                success_count: succeeded as u32,
                failure_count: (!succeeded) as u32,
            });
        }
    }

    pub fn add_failure(&mut self, description: &str, cause: Option<&str>) {
        let now = Utc::now();
        if let Some(existing) = self.failures.iter_mut().find(|f| f.description == description) {
            existing.occurrences += 1;
            existing.last_seen = now;
            if cause.is_some() {
                existing.cause = cause.map(str::to_string);
            }
        } else {
            self.failures.push(Failure {
                description: description.to_string(),
                cause: cause.map(str::to_string),
                occurrences: 1,
                last_seen: now,
            });
        }
    }

    pub fn add_context_rule(&mut self, rule: &str) {
        if !self.context_rules.iter().any(|r| r == rule) {
            self.context_rules.push(rule.to_string());
        }
    }

    /// Drop entries below `min_confidence` / older than `max_age_days`, then
    /// cap each category at `max_per_category` (keeping the highest-
    /// confidence / most-recent survivors).
    pub fn prune(&mut self, config: &PruneConfig) {
        let cutoff = Utc::now() - chrono::Duration::days(config.max_age_days);

        self.discoveries.retain(|d| d.confidence >= config.min_confidence && d.last_seen >= cutoff);
        self.discoveries.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        self.discoveries.truncate(config.max_per_category);

        self.code_patterns.retain(|p| p.confidence >= config.min_confidence && p.last_seen >= cutoff);
        self.code_patterns.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        self.code_patterns.truncate(config.max_per_category);

        self.failures.retain(|f| f.last_seen >= cutoff);
        self.failures.truncate(config.max_per_category);

        self.problem_solutions.truncate(config.max_per_category);

        self.workflows.retain(|w| w.success_rate() >= config.min_confidence || w.success_count == 0);
        self.workflows.truncate(config.max_per_category);
    }

    /// Load from `path`, or return an empty `Ltm` if the file doesn't exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(s) => Ok(serde_json::from_str(&s)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist atomically: write to a pid-suffixed temp file in the same
    /// directory, then rename over `path`. Guarantees readers never observe
    /// a partially-written file, and concurrent writers from different
    /// processes don't clobber each other's temp files.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

// ─── YaRN ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YarnEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YarnThread {
    pub id: String,
    pub title: String,
    pub entries: Vec<YarnEntry>,
}

/// Append-only archive of conversation threads. This is the durable replay
/// log for `session/load` — entries are never rewritten or removed, only
/// appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Yarn {
    threads: Vec<YarnThread>,
}

impl Yarn {
    pub fn create_thread(&mut self, title: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.threads.push(YarnThread { id: id.clone(), title: title.to_string(), entries: Vec::new() });
        id
    }

    pub fn add_to_thread(&mut self, id: &str, role: &str, content: &str) -> bool {
        if let Some(thread) = self.threads.iter_mut().find(|t| t.id == id) {
            thread.entries.push(YarnEntry {
                role: role.to_string(),
                content: content.to_string(),
                timestamp: Utc::now(),
            });
            true
        } else {
            false
        }
    }

    pub fn get_thread(&self, id: &str) -> Option<&YarnThread> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn list_threads(&self) -> Vec<(&str, &str)> {
        self.threads.iter().map(|t| (t.id.as_str(), t.title.as_str())).collect()
    }

    /// Heuristic summary (no model call — this is a pure data layer): first
    /// and last entry, plus an entry count, truncated to stay glanceable.
    pub fn summarize_thread(&self, id: &str) -> Option<String> {
        let thread = self.get_thread(id)?;
        if thread.entries.is_empty() {
            return Some(format!("{}: (empty)", thread.title));
        }
        let first = &thread.entries[0];
        let last = thread.entries.last().unwrap();
        let truncate = |s: &str| -> String {
            if s.len() > 120 {
                format!("{}...", &s[..120])
            } else {
                s.to_string()
            }
        };
        Some(format!(
            "{} ({} entries): started \"{}\" most recently \"{}\"",
            thread.title,
            thread.entries.len(),
            truncate(&first.content),
            truncate(&last.content),
        ))
    }
}

pub fn ltm_path(home: &Path) -> PathBuf {
    home.join("ltm.json")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use clio_model::Message;

    // -- STM --

    #[test]
    fn stm_caps_at_max_size() {
        let mut stm = Stm::new(2);
        stm.add(Message::user("a"));
        stm.add(Message::user("b"));
        stm.add(Message::user("c"));
        assert_eq!(stm.len(), 2);
        assert_eq!(stm.get_context(2)[0].as_text(), Some("b"));
    }

    #[test]
    fn stm_search_resolves_repeat_that_to_most_recent() {
        let mut stm = Stm::new(10);
        stm.add(Message::user("first"));
        stm.add(Message::user("second"));
        let found = stm.search_context("repeat that");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].as_text(), Some("second"));
    }

    #[test]
    fn stm_search_resolves_ordinal_reference() {
        let mut stm = Stm::new(10);
        stm.add(Message::user("alpha"));
        stm.add(Message::user("beta"));
        stm.add(Message::user("gamma"));
        let found = stm.search_context("what was the first thing");
        assert_eq!(found[0].as_text(), Some("alpha"));
    }

    #[test]
    fn stm_search_keyword_query_matches_content() {
        let mut stm = Stm::new(10);
        stm.add(Message::user("the quick brown fox"));
        stm.add(Message::user("a slow turtle"));
        let found = stm.search_context("turtle");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].as_text(), Some("a slow turtle"));
    }

    // -- LTM --

    #[test]
    fn add_discovery_raises_confidence_only_if_higher() {
        let mut ltm = Ltm::default();
        ltm.add_discovery("uses postgres", 0.5);
        ltm.add_discovery("uses postgres", 0.3);
        assert_eq!(ltm.discoveries.len(), 1);
        assert_eq!(ltm.discoveries[0].confidence, 0.5);
        ltm.add_discovery("uses postgres", 0.9);
        assert_eq!(ltm.discoveries[0].confidence, 0.9);
        assert_eq!(ltm.discoveries[0].occurrences, 3);
    }

    #[test]
    fn add_problem_solution_increments_solved_count_and_merges_examples() {
        let mut ltm = Ltm::default();
        ltm.add_problem_solution("build fails", "clear cache", Some("ex1"));
        ltm.add_problem_solution("build fails", "clear cache", Some("ex2"));
        ltm.add_problem_solution("build fails", "clear cache", Some("ex1")); // dup, not re-added
        assert_eq!(ltm.problem_solutions.len(), 1);
        let ps = &ltm.problem_solutions[0];
        assert_eq!(ps.solved_count, 3);
        assert_eq!(ps.examples, vec!["ex1", "ex2"]);
    }

    #[test]
    fn add_workflow_maintains_running_success_rate() {
        let mut ltm = Ltm::default();
        ltm.add_workflow("deploy", &["build".into(), "push".into()], true);
        ltm.add_workflow("deploy", &[], true);
        ltm.add_workflow("deploy", &[], false);
        assert_eq!(ltm.workflows.len(), 1);
        let w = &ltm.workflows[0];
        assert_eq!(w.success_count, 2);
        assert_eq!(w.failure_count, 1);
        assert!((w.success_rate() - (2.0 / 3.0)).abs() < 1e-6);
    }

    #[test]
    fn prune_drops_low_confidence_entries() {
        let mut ltm = Ltm::default();
        ltm.add_discovery("weak", 0.1);
        ltm.add_discovery("strong", 0.9);
        ltm.prune(&PruneConfig { max_per_category: 100, min_confidence: 0.5, max_age_days: 9999 });
        assert_eq!(ltm.discoveries.len(), 1);
        assert_eq!(ltm.discoveries[0].content, "strong");
    }

    #[test]
    fn prune_caps_category_size_keeping_highest_confidence() {
        let mut ltm = Ltm::default();
        for i in 0..5 {
            ltm.add_discovery(&format!("d{i}"), i as f32 / 10.0);
        }
        ltm.prune(&PruneConfig { max_per_category: 2, min_confidence: 0.0, max_age_days: 9999 });
        assert_eq!(ltm.discoveries.len(), 2);
        assert_eq!(ltm.discoveries[0].content, "d4");
    }

    #[test]
    fn ltm_round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ltm.json");
        let mut ltm = Ltm::default();
        ltm.add_discovery("fact", 0.7);
        ltm.add_context_rule("always use tabs");
        ltm.save(&path).unwrap();

        let loaded = Ltm::load(&path).unwrap();
        assert_eq!(loaded.discoveries.len(), 1);
        assert_eq!(loaded.context_rules, vec!["always use tabs"]);
    }

    #[test]
    fn ltm_load_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.json");
        let loaded = Ltm::load(&path).unwrap();
        assert!(loaded.discoveries.is_empty());
    }

    // -- YaRN --

    #[test]
    fn yarn_create_and_append_thread() {
        let mut yarn = Yarn::default();
        let id = yarn.create_thread("debugging session");
        assert!(yarn.add_to_thread(&id, "user", "why does this crash?"));
        assert!(yarn.add_to_thread(&id, "assistant", "off-by-one in the loop"));
        let thread = yarn.get_thread(&id).unwrap();
        assert_eq!(thread.entries.len(), 2);
    }

    #[test]
    fn yarn_add_to_unknown_thread_returns_false() {
        let mut yarn = Yarn::default();
        assert!(!yarn.add_to_thread("nonexistent", "user", "hi"));
    }

    #[test]
    fn yarn_list_threads_returns_all() {
        let mut yarn = Yarn::default();
        yarn.create_thread("a");
        yarn.create_thread("b");
        assert_eq!(yarn.list_threads().len(), 2);
    }

    #[test]
    fn yarn_summarize_includes_first_and_last() {
        let mut yarn = Yarn::default();
        let id = yarn.create_thread("t");
        yarn.add_to_thread(&id, "user", "start here");
        yarn.add_to_thread(&id, "user", "end here");
        let summary = yarn.summarize_thread(&id).unwrap();
        assert!(summary.contains("start here"));
        assert!(summary.contains("end here"));
    }
}
