// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session lockfile: a pid/hostname marker that prevents two processes from
//! mutating the same session directory concurrently. Reclaimable with
//! `force` when the owning pid is no longer alive.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Serialize, Deserialize)]
struct LockMarker {
    pid: u32,
    hostname: String,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("session is locked by pid {pid} on {hostname} (still running)")]
    HeldByLiveProcess { pid: u32, hostname: String },
    #[error("io error acquiring lock: {0}")]
    Io(#[from] std::io::Error),
}

/// Held for the lifetime of a session. Dropping it (or calling
/// [`SessionLock::release`]) removes the marker file.
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    /// Acquire the lock at `lock_path`. If a marker already exists and its
    /// pid is still alive on this host, fails unless `force` is set. A
    /// marker from a different hostname is always treated as live (no
    /// remote-liveness check is possible) unless `force` is set.
    pub fn acquire(lock_path: impl Into<PathBuf>, force: bool) -> Result<Self, LockError> {
        let path = lock_path.into();

        if let Ok(existing) = std::fs::read_to_string(&path) {
            if let Ok(marker) = serde_json::from_str::<LockMarker>(&existing) {
                if !force && is_marker_live(&marker) {
                    return Err(LockError::HeldByLiveProcess {
                        pid: marker.pid,
                        hostname: marker.hostname,
                    });
                }
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let marker = LockMarker { pid: std::process::id(), hostname: hostname() };
        std::fs::write(&path, serde_json::to_string(&marker).unwrap_or_default())?;
        Ok(Self { path })
    }

    pub fn release(self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn is_marker_live(marker: &LockMarker) -> bool {
    if marker.hostname != hostname() {
        return true;
    }
    pid_is_alive(marker.pid)
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    // kill(pid, 0) sends no signal; it only checks whether the pid exists
    // and is visible to this process (fails with ESRCH if not).
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    // No portable liveness check off Unix; err on the side of "still held"
    // so only an explicit --force reclaims it.
    true
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown-host".to_string())
}

pub fn lock_path(session_dir: &Path) -> PathBuf {
    session_dir.join(".lock")
}
