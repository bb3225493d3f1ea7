// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod output;
mod runner;
pub mod context;

pub use runner::{
    CiOptions, CiRunner, OutputFormat, EXIT_AGENT_ERROR, EXIT_INTERRUPT, EXIT_SUCCESS,
    EXIT_TIMEOUT, EXIT_VALIDATION_ERROR,
};
// Re-export runtime detection utilities for callers that import from clio_ci.
pub use clio_runtime::{
    ci_template_vars, collect_git_context, detect_ci_context, find_project_root,
    load_project_context_file, CiContext, GitContext,
};
