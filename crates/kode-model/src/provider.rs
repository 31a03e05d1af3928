// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{catalog::InputModality, CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Transport-agnostic interface to a language model.
///
/// The wire protocol (HTTP streaming, retries, vendor-specific request shapes)
/// is deliberately external to this core — an implementation of this trait is
/// expected to own that, the way the donor's vendor adapters did. Only the
/// shape the agent loop actually consumes survives in the trait itself.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Input modalities supported by this provider/model combination.
    /// Conservative default: text only, so the agent loop never attaches
    /// images to a request for a provider that hasn't declared support.
    fn input_modalities(&self) -> Vec<InputModality> {
        vec![InputModality::Text]
    }

    /// Returns `true` if this model supports image input.
    fn supports_images(&self) -> bool {
        self.input_modalities().contains(&InputModality::Image)
    }
}
