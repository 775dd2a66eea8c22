//! Request-side dialect ⇄ neutral IR conversion (§4.3 parameter mapping table).

use dg_protocols::ir::{Extensions, NeutralMessage, NeutralRequest, OaiExtension, OllExtension, ResponseFormat, ToolChoice};
use dg_protocols::message::ToolSpec;
use dg_protocols::oai::{OaiChatRequest, OaiToolChoice};
use serde_json::json;
use dg_protocols::oll::{OllChatRequest, OllOptions};
use dg_protocols::Role;

pub fn oai_request_to_neutral(req: OaiChatRequest) -> NeutralRequest {
    let messages = req
        .messages
        .into_iter()
        .map(|m| NeutralMessage {
            role: m.role,
            content: m.content.map(|c| c.flatten_to_text()).unwrap_or_default(),
            tool_call_id: m.tool_call_id,
            tool_calls: m.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|c| {
                        let args = serde_json::from_str(&c.function.arguments)
                            .unwrap_or(serde_json::Value::Null);
                        dg_protocols::ExtractedToolCall::new(c.function.name, args)
                    })
                    .collect()
            }),
        })
        .collect();

    let tools = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|t| ToolSpec {
            name: t.function.name,
            description: t.function.description,
            parameters: t.function.parameters,
        })
        .collect();

    let tool_choice = req.tool_choice.map(|tc| match tc {
        OaiToolChoice::Mode(m) if m == "auto" => ToolChoice::Auto,
        OaiToolChoice::Mode(m) if m == "none" => ToolChoice::None,
        OaiToolChoice::Mode(m) if m == "required" => ToolChoice::Required,
        OaiToolChoice::Mode(other) => ToolChoice::Named(other),
        OaiToolChoice::Named { function, .. } => ToolChoice::Named(
            function
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        ),
    });

    let response_format = match req.response_format.as_ref().map(|f| f.kind.as_str()) {
        Some("json_object") | Some("json_schema") => ResponseFormat::Json,
        _ => ResponseFormat::Text,
    };

    NeutralRequest {
        model: req.model,
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: None,
        repetition_penalty: None,
        seed: req.seed,
        stop: req.stop.map(|s| s.into_vec()).unwrap_or_default(),
        tools,
        tool_choice,
        response_format,
        stream: req.stream,
        n: req.n,
        extensions: Extensions::Oai(OaiExtension {
            frequency_penalty: req.frequency_penalty,
            presence_penalty: req.presence_penalty,
            logit_bias: req.logit_bias,
        }),
    }
}

pub fn neutral_to_oai_request(ir: &NeutralRequest, include_native_tools: bool) -> OaiChatRequest {
    let oai_ext = match &ir.extensions {
        Extensions::Oai(ext) => ext.clone(),
        _ => OaiExtension::default(),
    };

    OaiChatRequest {
        model: ir.model.clone(),
        messages: ir
            .messages
            .iter()
            .map(|m| dg_protocols::oai::OaiMessage {
                role: m.role,
                content: Some(dg_protocols::Content::Text(m.content.clone())),
                tool_call_id: m.tool_call_id.clone(),
                tool_calls: m.tool_calls.clone().map(|calls| {
                    calls
                        .into_iter()
                        .enumerate()
                        .map(|(i, c)| c.into_oai(format!("call_{i}")))
                        .collect()
                }),
            })
            .collect(),
        max_tokens: ir.max_tokens,
        temperature: ir.temperature,
        top_p: ir.top_p,
        seed: ir.seed,
        stop: non_empty_stop(&ir.stop),
        stream: ir.stream,
        n: ir.n,
        tools: if include_native_tools && !ir.tools.is_empty() {
            Some(ir.tools.iter().map(Into::into).collect())
        } else {
            None
        },
        tool_choice: if include_native_tools {
            ir.tool_choice.as_ref().map(tool_choice_to_oai)
        } else {
            None
        },
        functions: None,
        function_call: None,
        response_format: match ir.response_format {
            ResponseFormat::Json => Some(dg_protocols::oai::OaiResponseFormat {
                kind: "json_object".to_string(),
            }),
            ResponseFormat::Text => None,
        },
        frequency_penalty: oai_ext.frequency_penalty,
        presence_penalty: oai_ext.presence_penalty,
        logit_bias: oai_ext.logit_bias,
    }
}

pub fn oll_request_to_neutral(req: OllChatRequest) -> NeutralRequest {
    let messages = req
        .messages
        .into_iter()
        .map(|m| NeutralMessage {
            role: m.role,
            content: m.content,
            tool_call_id: None,
            tool_calls: m.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|c| dg_protocols::ExtractedToolCall::new(c.function.name, c.function.arguments))
                    .collect()
            }),
        })
        .collect();

    let tools = req
        .tools
        .unwrap_or_default()
        .into_iter()
        .map(|t| ToolSpec {
            name: t.function.name,
            description: t.function.description,
            parameters: t.function.parameters,
        })
        .collect();

    let options = req.options.unwrap_or_default();
    let response_format = match req.format.as_deref() {
        Some("json") => ResponseFormat::Json,
        _ => ResponseFormat::Text,
    };

    NeutralRequest {
        model: req.model,
        messages,
        max_tokens: options.num_predict,
        temperature: options.temperature,
        top_p: options.top_p,
        top_k: options.top_k,
        repetition_penalty: options.repeat_penalty,
        seed: options.seed,
        stop: req.stop.unwrap_or_default(),
        tools,
        tool_choice: None,
        response_format,
        stream: req.stream,
        n: None,
        extensions: Extensions::Oll(OllExtension {
            mirostat: options.mirostat,
            num_ctx: options.num_ctx,
        }),
    }
}

pub fn neutral_to_oll_request(ir: &NeutralRequest, include_native_tools: bool) -> OllChatRequest {
    let oll_ext = match &ir.extensions {
        Extensions::Oll(ext) => ext.clone(),
        _ => OllExtension::default(),
    };

    let options = OllOptions {
        num_predict: ir.max_tokens,
        temperature: ir.temperature,
        top_p: ir.top_p,
        top_k: ir.top_k,
        repeat_penalty: ir.repetition_penalty,
        seed: ir.seed,
        mirostat: oll_ext.mirostat,
        num_ctx: oll_ext.num_ctx,
    };

    OllChatRequest {
        model: ir.model.clone(),
        messages: ir
            .messages
            .iter()
            .map(|m| dg_protocols::oll::OllMessage {
                role: m.role,
                content: m.content.clone(),
                tool_calls: m
                    .tool_calls
                    .clone()
                    .map(|calls| calls.into_iter().map(|c| c.into_oll()).collect()),
            })
            .collect(),
        stream: ir.stream,
        format: match ir.response_format {
            ResponseFormat::Json => Some("json".to_string()),
            ResponseFormat::Text => None,
        },
        options: if options.is_empty() { None } else { Some(options) },
        stop: non_empty_stop(&ir.stop).map(|s| s.into_vec()),
        tools: if include_native_tools && !ir.tools.is_empty() {
            Some(ir.tools.iter().map(Into::into).collect())
        } else {
            None
        },
    }
}

fn tool_choice_to_oai(choice: &ToolChoice) -> OaiToolChoice {
    match choice {
        ToolChoice::Auto => OaiToolChoice::Mode("auto".to_string()),
        ToolChoice::None => OaiToolChoice::Mode("none".to_string()),
        ToolChoice::Required => OaiToolChoice::Mode("required".to_string()),
        ToolChoice::Named(name) => OaiToolChoice::Named {
            r#type: "function".to_string(),
            function: json!({"name": name}),
        },
    }
}

fn non_empty_stop(stop: &[String]) -> Option<dg_protocols::oai::OaiStop> {
    if stop.is_empty() {
        None
    } else if stop.len() == 1 {
        Some(dg_protocols::oai::OaiStop::One(stop[0].clone()))
    } else {
        Some(dg_protocols::oai::OaiStop::Many(stop.to_vec()))
    }
}

/// Remove the `system` role distinction for dialects that don't care, kept
/// here as a hook point; both dialects accept a `system` role today so this is
/// presently a no-op, documented for where a future dialect would differ.
pub fn normalize_roles(messages: &mut [NeutralMessage]) {
    for m in messages {
        if !matches!(m.role, Role::System | Role::User | Role::Assistant | Role::Tool) {
            m.role = Role::User;
        }
    }
}
