//! Non-streaming response dialect ⇄ neutral IR conversion, including the
//! envelope re-scan described in §4.3 ("Response conversion").

use std::collections::HashSet;

use dg_protocols::ir::NeutralResponse;
use dg_protocols::oai::{OaiChatResponse, OaiChoice, OaiMessage};
use dg_protocols::oll::{OllChatResponse, OllMessage};
use dg_protocols::{Content, ExtractedToolCall, Role};

pub fn oai_response_to_neutral(resp: OaiChatResponse) -> NeutralResponse {
    let choice = resp.choices.into_iter().next();
    let (message, finish_reason) = match choice {
        Some(c) => {
            let tool_calls = c.message.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|tc| {
                        let args = serde_json::from_str(&tc.function.arguments)
                            .unwrap_or(serde_json::Value::Null);
                        ExtractedToolCall::new(tc.function.name, args)
                    })
                    .collect()
            });
            (
                dg_protocols::ir::NeutralMessage {
                    role: c.message.role,
                    content: c
                        .message
                        .content
                        .map(|ct| ct.flatten_to_text())
                        .unwrap_or_default(),
                    tool_call_id: c.message.tool_call_id,
                    tool_calls,
                },
                c.finish_reason,
            )
        }
        None => (dg_protocols::ir::NeutralMessage::user(""), None),
    };

    NeutralResponse {
        id: Some(resp.id),
        model: resp.model,
        message,
        finish_reason,
        created: Some(resp.created),
    }
}

pub fn oll_response_to_neutral(resp: OllChatResponse) -> NeutralResponse {
    let tool_calls = resp.message.tool_calls.map(|calls| {
        calls
            .into_iter()
            .map(|tc| ExtractedToolCall::new(tc.function.name, tc.function.arguments))
            .collect()
    });

    NeutralResponse {
        id: None,
        model: resp.model,
        message: dg_protocols::ir::NeutralMessage {
            role: resp.message.role,
            content: resp.message.content,
            tool_call_id: None,
            tool_calls,
        },
        finish_reason: resp.done_reason,
        created: None,
    }
}

/// If the known-tool set is non-empty, re-scan the assistant message content
/// for a synthesized envelope and, on success, replace the textual content
/// with extracted tool calls (§4.3). If the response already carries native
/// tool calls, those are preferred and the scan result is discarded — see
/// DESIGN.md's decision on Open Question 2.
pub fn apply_envelope_extraction(response: &mut NeutralResponse, known_tools: &HashSet<String>) {
    if known_tools.is_empty() {
        return;
    }
    if response.message.tool_calls.is_some() {
        return;
    }
    if let Some(call) = dg_envelope::extract_tool_call(&response.message.content, known_tools) {
        response.message.content = String::new();
        response.message.tool_calls = Some(vec![call]);
        response.finish_reason = Some("tool_calls".to_string());
    }
}

pub fn neutral_to_oai_response(ir: &NeutralResponse) -> OaiChatResponse {
    let tool_calls = ir.message.tool_calls.clone().map(|calls| {
        calls
            .into_iter()
            .enumerate()
            .map(|(i, c)| c.into_oai(format!("call_{i}")))
            .collect()
    });

    OaiChatResponse {
        id: ir.id.clone().unwrap_or_else(|| "chatcmpl-0".to_string()),
        object: "chat.completion".to_string(),
        created: ir.created.unwrap_or(0),
        model: ir.model.clone(),
        choices: vec![OaiChoice {
            index: 0,
            message: OaiMessage {
                role: ir.message.role,
                content: if tool_calls.is_some() {
                    None
                } else {
                    Some(Content::Text(ir.message.content.clone()))
                },
                tool_call_id: ir.message.tool_call_id.clone(),
                tool_calls,
            },
            finish_reason: ir.finish_reason.clone(),
        }],
    }
}

pub fn neutral_to_oll_response(ir: &NeutralResponse) -> OllChatResponse {
    let tool_calls = ir
        .message
        .tool_calls
        .clone()
        .map(|calls| calls.into_iter().map(|c| c.into_oll()).collect());

    OllChatResponse {
        model: ir.model.clone(),
        created_at: None,
        message: OllMessage {
            role: ir.message.role,
            content: ir.message.content.clone(),
            tool_calls,
        },
        done: true,
        done_reason: ir.finish_reason.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_envelope_and_replaces_content_with_tool_calls() {
        let mut resp = NeutralResponse {
            id: None,
            model: "m".into(),
            message: dg_protocols::ir::NeutralMessage {
                role: Role::Assistant,
                content: "Sure.<toolbridge:calls><search><q>tokyo</q></search></toolbridge:calls>"
                    .to_string(),
                tool_call_id: None,
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
            created: None,
        };
        apply_envelope_extraction(&mut resp, &tools(&["search"]));
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(resp.message.tool_calls.unwrap()[0].name, "search");
        assert_eq!(resp.message.content, "");
    }

    #[test]
    fn leaves_response_untouched_when_no_known_tools() {
        let mut resp = NeutralResponse {
            id: None,
            model: "m".into(),
            message: dg_protocols::ir::NeutralMessage {
                role: Role::Assistant,
                content: "plain answer".to_string(),
                tool_call_id: None,
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
            created: None,
        };
        apply_envelope_extraction(&mut resp, &HashSet::new());
        assert_eq!(resp.message.content, "plain answer");
    }

    #[test]
    fn prefers_existing_native_tool_calls_over_rescan() {
        let mut resp = NeutralResponse {
            id: None,
            model: "m".into(),
            message: dg_protocols::ir::NeutralMessage {
                role: Role::Assistant,
                content: "<toolbridge:calls><search><q>decoy</q></search></toolbridge:calls>"
                    .to_string(),
                tool_call_id: None,
                tool_calls: Some(vec![ExtractedToolCall::new(
                    "search",
                    serde_json::json!({"q": "native"}),
                )]),
            },
            finish_reason: Some("tool_calls".to_string()),
            created: None,
        };
        apply_envelope_extraction(&mut resp, &tools(&["search"]));
        assert_eq!(
            resp.message.tool_calls.unwrap()[0].arguments,
            serde_json::json!({"q": "native"})
        );
    }
}
