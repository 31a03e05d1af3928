// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Strip image content a provider has not declared support for.
//!
//! Consulted by the agent loop right before building a [`CompletionRequest`],
//! so that switching to a text-only model mid-session doesn't send it image
//! parts it would reject or silently mishandle.

use crate::catalog::InputModality;
use crate::types::{ContentPart, Message, MessageContent, ToolContentPart, ToolResultContent};

/// Drop image parts from `messages` when `modalities` doesn't include
/// [`InputModality::Image`]. Text-only messages pass through unchanged;
/// mixed-content messages collapse to their remaining text parts.
pub fn strip_images_if_unsupported(
    messages: Vec<Message>,
    modalities: &[InputModality],
) -> Vec<Message> {
    if modalities.contains(&InputModality::Image) {
        return messages;
    }
    messages.into_iter().map(strip_message).collect()
}

fn strip_message(msg: Message) -> Message {
    let content = match msg.content {
        MessageContent::ContentParts(parts) => {
            let texts: Vec<ContentPart> =
                parts.into_iter().filter(|p| matches!(p, ContentPart::Text { .. })).collect();
            if texts.is_empty() {
                MessageContent::Text(String::new())
            } else if texts.len() == 1 {
                texts.into_iter().next().unwrap().into()
            } else {
                MessageContent::ContentParts(texts)
            }
        }
        MessageContent::ToolResult { tool_call_id, content: ToolResultContent::Parts(parts) } => {
            let texts: Vec<ToolContentPart> =
                parts.into_iter().filter(|p| matches!(p, ToolContentPart::Text { .. })).collect();
            let content = if texts.is_empty() {
                ToolResultContent::Text(String::new())
            } else {
                ToolResultContent::Parts(texts)
            };
            MessageContent::ToolResult { tool_call_id, content }
        }
        other => other,
    };
    Message { role: msg.role, content }
}

/// Allow a bare `ContentPart`/`Vec<ContentPart>` to collapse into
/// `MessageContent` the same way `Message::user_with_parts` does, so
/// `strip_message` doesn't have to special-case the single-text-part case.
impl From<ContentPart> for MessageContent {
    fn from(part: ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => MessageContent::Text(text),
            other => MessageContent::ContentParts(vec![other]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_modalities_passes_through_plain_text_messages() {
        let msgs = vec![Message::user("hello"), Message::assistant("world")];
        let out = strip_images_if_unsupported(msgs.clone(), &[InputModality::Text]);
        assert_eq!(out[0].as_text(), Some("hello"));
        assert_eq!(out[1].as_text(), Some("world"));
    }

    #[test]
    fn image_modality_present_leaves_messages_untouched() {
        let parts = vec![ContentPart::text("what is this?"), ContentPart::image("data:image/png;base64,A")];
        let msgs = vec![Message::user_with_parts(parts)];
        let out = strip_images_if_unsupported(msgs, &[InputModality::Text, InputModality::Image]);
        assert_eq!(out[0].image_urls(), vec!["data:image/png;base64,A"]);
    }

    #[test]
    fn text_only_modalities_strips_image_parts_from_user_message() {
        let parts = vec![ContentPart::text("what is this?"), ContentPart::image("data:image/png;base64,A")];
        let msgs = vec![Message::user_with_parts(parts)];
        let out = strip_images_if_unsupported(msgs, &[InputModality::Text]);
        assert!(out[0].image_urls().is_empty());
        assert_eq!(out[0].as_text(), Some("what is this?"));
    }

    #[test]
    fn text_only_modalities_collapses_to_empty_text_when_only_image_present() {
        let parts = vec![ContentPart::image("data:image/png;base64,A")];
        let msgs = vec![Message::user_with_parts(parts)];
        let out = strip_images_if_unsupported(msgs, &[InputModality::Text]);
        assert_eq!(out[0].as_text(), Some(""));
    }

    #[test]
    fn text_only_modalities_strips_image_parts_from_tool_result() {
        let parts = vec![
            ToolContentPart::Text { text: "here is the chart".into() },
            ToolContentPart::Image { image_url: "data:image/png;base64,B".into() },
        ];
        let msgs = vec![Message::tool_result_with_parts("call-1", parts)];
        let out = strip_images_if_unsupported(msgs, &[InputModality::Text]);
        assert!(out[0].image_urls().is_empty());
    }
}
