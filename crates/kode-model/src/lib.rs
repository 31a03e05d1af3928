// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Message and provider types consumed by the tool-use scheduler.
//!
//! The model/provider wire transport (HTTP streaming, vendor request shapes,
//! retries, token accounting) is out of scope for this crate; only the shapes
//! the scheduler and the agent loop actually consume or produce live here,
//! plus a deterministic [`MockProvider`] for tests that would otherwise need
//! network access.

pub mod catalog;
mod mock;
mod provider;
pub mod sanitize;
mod types;

pub use catalog::InputModality;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::ModelProvider;
pub use types::*;

use kode_config::ModelConfig;

/// Construct a boxed [`ModelProvider`] from configuration.
///
/// Only the `mock` driver is built in; real network-backed providers are an
/// external collaborator of this core and are wired in by the embedding
/// application, not by this crate.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    match cfg.provider.as_str() {
        "mock" => Ok(Box::new(MockProvider)),
        other => anyhow::bail!(
            "unknown or unwired model provider {other:?}; only \"mock\" is built into this core"
        ),
    }
}
