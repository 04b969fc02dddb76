//! Integration test suite for trybook.
//!
//! These tests drive the service end to end: syncing a mirror from a local
//! `file://` remote, provisioning notebooks, and running prompts against
//! shell-script agents and build tools.
//!
//! # Test Categories
//!
//! - `repo_sync`: clone-then-update of mirrors
//! - `notebooks`: worktree provisioning
//! - `executions`: prompt fan-out, build gating and summaries
//! - `http_api`: the same flows through the HTTP router
//!
//! # CI Compatibility
//!
//! No network access and no real agents are needed; only `git` and `sh`.


mod executions;
mod http_api;
mod notebooks;
mod repo_sync;
