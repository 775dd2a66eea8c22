//! Synthetic tool-calling prompt injection and reinjection (§4.4).
//!
//! When the backend lacks native function-calling, we teach it to emit tool
//! calls as XML inside the envelope sentinel by splicing an instruction block
//! into the message list before forwarding upstream.

use dg_envelope::OPEN_PRIMARY;
use dg_protocols::ir::NeutralMessage;
use dg_protocols::message::ToolSpec;
use dg_protocols::Role;
use serde_json::Value;

/// Zero-width marker embedded in every injected block so idempotence and
/// reinjection dedup checks don't depend on matching the full instruction text.
const INSTRUCTION_MARKER: &str = "toolbridge-instructions-v1";
const REMINDER_MARKER: &str = "toolbridge-reminder-v1";

pub struct ReinjectionPolicy {
    pub enabled: bool,
    pub n_msg: usize,
    pub n_tok: usize,
}

impl Default for ReinjectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            n_msg: 20,
            n_tok: 4000,
        }
    }
}

/// Build the full instruction block for a non-empty tool set.
pub fn build_instruction_block(tools: &[ToolSpec]) -> String {
    let mut out = String::new();
    out.push_str(&format!("<!-- {INSTRUCTION_MARKER} -->\n"));
    out.push_str("You can call tools to help answer the user. The tools listed above are the ONLY tools available.\n\n");

    out.push_str("Available tools:\n");
    for tool in tools {
        out.push_str(&format!("- {}", tool.name));
        if let Some(desc) = &tool.description {
            out.push_str(&format!(": {desc}"));
        }
        out.push('\n');
        for (name, required) in parameter_summaries(&tool.parameters) {
            out.push_str(&format!(
                "  - {name} ({}){}\n",
                parameter_type(&tool.parameters, &name),
                if required { ", required" } else { ", optional" }
            ));
        }
    }
    out.push('\n');

    out.push_str("Examples:\n");
    out.push_str(&format!(
        "{OPEN_PRIMARY}<ping></ping>{}\n",
        dg_envelope::CLOSE_PRIMARY
    ));
    out.push_str(&format!(
        "{OPEN_PRIMARY}<search><query>weather in tokyo</query></search>{}\n",
        dg_envelope::CLOSE_PRIMARY
    ));
    out.push_str(&format!(
        "{OPEN_PRIMARY}<book_flight><origin>SFO</origin><destination>NRT</destination><passengers><name>Alice</name><name>Bob</name></passengers><refundable>false</refundable></book_flight>{}\n\n",
        dg_envelope::CLOSE_PRIMARY
    ));

    out.push_str("Formatting rules:\n");
    out.push_str(&format!(
        "- Every call is wrapped in {OPEN_PRIMARY}...{}.\n",
        dg_envelope::CLOSE_PRIMARY
    ));
    out.push_str("- Emit raw XML only: no code fences, no surrounding prose.\n");
    out.push_str("- Each parameter is a child element named after the parameter.\n");
    out.push_str("- Arrays are encoded by repeating the element name once per item.\n");
    out.push_str("- Booleans are the literal words true or false.\n");
    out.push_str("- HTML or code content goes in as raw tags, not entity-encoded.\n");
    out.push_str("- Objects are nested elements.\n");
    out.push_str("- Every opening tag is matched by a closing tag.\n\n");

    out.push_str(&format!(
        "<!-- {REMINDER_MARKER} --> Tool calls are invisible to the user; never mention the envelope or XML in your reply.\n"
    ));
    out
}

fn parameter_summaries(schema: &Value) -> Vec<(String, bool)> {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    props
        .keys()
        .map(|name| (name.clone(), required.contains(&name.as_str())))
        .collect()
}

fn parameter_type(schema: &Value, name: &str) -> String {
    schema
        .get("properties")
        .and_then(|p| p.get(name))
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("string")
        .to_string()
}

fn contains_marker(content: &str) -> bool {
    content.contains(OPEN_PRIMARY)
        || content.contains(INSTRUCTION_MARKER)
        || content.contains(REMINDER_MARKER)
}

/// Splice the instruction block into the message list per the placement rules.
/// No-op when `tools` is empty or a message already carries the marker.
pub fn inject_instructions(messages: &mut Vec<NeutralMessage>, tools: &[ToolSpec]) {
    if tools.is_empty() {
        return;
    }
    if messages.iter().any(|m| contains_marker(&m.content)) {
        return;
    }

    let block = build_instruction_block(tools);
    match messages.iter_mut().find(|m| m.role == Role::System) {
        Some(system_msg) => {
            system_msg.content.push_str("\n\n");
            system_msg.content.push_str(&block);
        }
        None => {
            let mut preamble = "You are a helpful assistant.\n\n".to_string();
            preamble.push_str(&block);
            messages.insert(0, NeutralMessage::system(preamble));
        }
    }
}

fn estimate_tokens(content: &str) -> usize {
    content.len() / 4
}

/// Decide whether a reinjection reminder is due, and if so splice it in.
/// Grounded in §4.4's reinjection policy: the trigger counts messages/estimated
/// tokens since the last system message, the dedup window inspects the last 6
/// messages, and the role choice avoids displacing a sole base system message.
pub fn maybe_reinject(
    messages: &mut Vec<NeutralMessage>,
    tools: &[ToolSpec],
    policy: &ReinjectionPolicy,
) {
    if !policy.enabled || tools.is_empty() {
        return;
    }

    let last_system_idx = messages.iter().rposition(|m| m.role == Role::System);
    let Some(last_system_idx) = last_system_idx else {
        return;
    };

    let since = &messages[last_system_idx + 1..];
    let msg_count = since.len();
    let tok_count: usize = since.iter().map(|m| estimate_tokens(&m.content)).sum();
    if msg_count <= policy.n_msg && tok_count <= policy.n_tok {
        return;
    }

    let dedup_window_start = messages.len().saturating_sub(6);
    if messages[dedup_window_start..]
        .iter()
        .any(|m| contains_marker(&m.content))
    {
        return;
    }

    let system_count = messages.iter().filter(|m| m.role == Role::System).count();
    let block = build_instruction_block(tools);
    if system_count == 1 {
        messages.insert(last_system_idx + 1, NeutralMessage::system(block));
    } else {
        messages.push(NeutralMessage::user(block));
    }
}
