// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::io::Write;

/// Write clean output to stdout — suitable for piping to the next agent.
pub fn write_stdout(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

/// Write a final newline to stdout if the text didn't already end with one.
pub fn finalise_stdout(text: &str) {
    if !text.ends_with('\n') {
        println!();
    }
}

/// Write a diagnostic / error message to stderr (never pollutes stdout pipeline).
pub fn write_stderr(msg: &str) {
    eprintln!("{msg}");
}

/// Write a structured progress line to stderr.
///
/// Lines are prefixed with `[clio:...]` so CI systems can scrape them with
/// simple pattern matching without interfering with stdout conversation output.
pub fn write_progress(msg: &str) {
    eprintln!("{msg}");
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
