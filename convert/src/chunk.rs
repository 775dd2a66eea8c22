//! Streaming chunk ⇄ neutral IR conversion, used by the stream processor (C5)
//! for every frame it deframes and reframes — text deltas, finish-reason-only
//! frames, and synthesized tool-call frames alike (§4.5 "frame-decode...
//! frame-encode").

use dg_protocols::ir::NeutralChunk;
use dg_protocols::oai::{OaiChatChunk, OaiDelta, OaiDeltaToolCall, OaiStreamChoice};
use dg_protocols::oll::{OllChatChunk, OllMessage};
use dg_protocols::Role;

pub fn oai_chunk_to_neutral(chunk: &OaiChatChunk) -> NeutralChunk {
    let choice = chunk.choices.first();
    NeutralChunk {
        id: Some(chunk.id.clone()),
        model: Some(chunk.model.clone()),
        delta_content: choice
            .and_then(|c| c.delta.content.as_ref())
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        tool_calls: None,
        finish_reason: choice.and_then(|c| c.finish_reason.clone()),
        done: false,
    }
}

pub fn oll_chunk_to_neutral(chunk: &OllChatChunk) -> NeutralChunk {
    NeutralChunk {
        id: None,
        model: Some(chunk.model.clone()),
        delta_content: chunk.text_delta().map(|s| s.to_string()),
        tool_calls: None,
        finish_reason: chunk.done_reason.clone(),
        done: chunk.done,
    }
}

/// Render a chunk in the OAI delta shape. `id`/`model`/`created` are the
/// gateway-assigned identifiers for this stream (the source frame's own id
/// is not reused, matching non-streaming response rendering).
pub fn neutral_to_oai_chunk(n: &NeutralChunk, id: &str, model: &str, created: i64) -> OaiChatChunk {
    let tool_calls = n.tool_calls.clone().map(|calls| {
        calls
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                let call = c.into_oai(format!("call_{}", i + 1));
                OaiDeltaToolCall {
                    index: i as u32,
                    id: Some(call.id),
                    kind: Some(call.kind),
                    function: Some(call.function),
                }
            })
            .collect()
    });

    OaiChatChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: vec![OaiStreamChoice {
            index: 0,
            delta: OaiDelta {
                role: if n.delta_content.is_some() || tool_calls.is_some() {
                    Some(Role::Assistant)
                } else {
                    None
                },
                content: n.delta_content.clone().map(serde_json::Value::String),
                tool_calls,
            },
            finish_reason: n.finish_reason.clone(),
        }],
    }
}

pub fn neutral_to_oll_chunk(n: &NeutralChunk, model: &str) -> OllChatChunk {
    let message = if n.delta_content.is_some() || n.tool_calls.is_some() {
        Some(OllMessage {
            role: Role::Assistant,
            content: n.delta_content.clone().unwrap_or_default(),
            tool_calls: n
                .tool_calls
                .clone()
                .map(|calls| calls.into_iter().map(|c| c.into_oll()).collect()),
        })
    } else {
        None
    };

    OllChatChunk {
        model: model.to_string(),
        created_at: None,
        message,
        response: None,
        done: n.done,
        done_reason: n.finish_reason.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_protocols::oll::OllMessage as OllMsg;
    use dg_protocols::ExtractedToolCall;

    #[test]
    fn oll_chunk_to_neutral_extracts_text_delta() {
        let chunk = OllChatChunk {
            model: "m".into(),
            created_at: None,
            message: Some(OllMsg {
                role: Role::Assistant,
                content: "hi".into(),
                tool_calls: None,
            }),
            response: None,
            done: false,
            done_reason: None,
        };
        let n = oll_chunk_to_neutral(&chunk);
        assert_eq!(n.delta_content.as_deref(), Some("hi"));
    }

    #[test]
    fn neutral_to_oai_chunk_sets_assistant_role_when_content_present() {
        let n = NeutralChunk {
            delta_content: Some("x".to_string()),
            ..Default::default()
        };
        let chunk = neutral_to_oai_chunk(&n, "id1", "m", 0);
        assert_eq!(chunk.choices[0].delta.role, Some(Role::Assistant));
    }

    #[test]
    fn neutral_to_oai_chunk_forwards_finish_reason_with_empty_delta() {
        let n = NeutralChunk {
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        };
        let chunk = neutral_to_oai_chunk(&n, "id1", "m", 0);
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
        assert!(chunk.choices[0].delta.content.is_none());
        assert!(chunk.choices[0].delta.role.is_none());
    }

    #[test]
    fn neutral_to_oai_chunk_renders_tool_call_delta() {
        let n = NeutralChunk {
            tool_calls: Some(vec![ExtractedToolCall::new("search", serde_json::json!({"q": "tokyo"}))]),
            ..Default::default()
        };
        let chunk = neutral_to_oai_chunk(&n, "id1", "m", 0);
        let tc = chunk.choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(tc[0].function.as_ref().unwrap().name, "search");
    }

    #[test]
    fn neutral_to_oll_chunk_carries_tool_call_in_message() {
        let n = NeutralChunk {
            tool_calls: Some(vec![ExtractedToolCall::new("calc", serde_json::json!({"x": 1}))]),
            ..Default::default()
        };
        let chunk = neutral_to_oll_chunk(&n, "m");
        let message = chunk.message.unwrap();
        assert_eq!(message.tool_calls.unwrap()[0].function.name, "calc");
    }

    #[test]
    fn neutral_to_oll_chunk_has_no_message_for_pure_finish_frame() {
        let n = NeutralChunk {
            finish_reason: Some("stop".to_string()),
            ..Default::default()
        };
        let chunk = neutral_to_oll_chunk(&n, "m");
        assert!(chunk.message.is_none());
    }
}
