// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Input modality tagging for model providers.
//!
//! The donor crate this was adapted from also carried a bundled model price/
//! context-window catalog for its `list-models` command; that command and its
//! catalog are transport/UI surface and are not part of this core, so only the
//! modality tag — consulted by the agent loop before attaching image parts to
//! a request — survives here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Image,
}
