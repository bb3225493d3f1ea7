// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Re-exports from `clio-runtime` for backwards compatibility.
//!
//! Environment-detection utilities now live in `clio-runtime`.  This module
//! re-exports them so existing code that imports from `clio_ci::context`
//! continues to compile without modification.

pub use clio_runtime::{
    ci_template_vars, collect_git_context, detect_ci_context, find_project_root,
    find_workspace_root, load_project_context_file, CiContext, GitContext,
};
