//! Envelope parser (C1): extracts the last complete [`ExtractedToolCall`] from a
//! string containing zero or more sentinel-wrapped XML tool invocations (§4.1).

use std::collections::HashSet;

use dg_protocols::ExtractedToolCall;
use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use serde_json::{Map, Value};

use crate::sentinel::SENTINEL_PAIRS;

/// Scan `raw` for sentinel-wrapped envelopes and return the last complete tool
/// call found, or `None` if no envelope parses to a known tool name.
///
/// `known_tools` is the per-request allowlist (§3 "Known-tool set") — the only
/// tag names ever accepted as a tool invocation root.
pub fn extract_tool_call(raw: &str, known_tools: &HashSet<String>) -> Option<ExtractedToolCall> {
    let scrubbed = dg_reasoning::scrub_reasoning(raw);
    let mut candidates = find_envelope_spans(&scrubbed);
    // "iterate from last to first" (§4.1) — sort ascending by opening offset,
    // then walk in reverse so the rightmost envelope is tried first.
    candidates.sort_by_key(|c| c.open_at);

    for candidate in candidates.into_iter().rev() {
        let inner = &scrubbed[candidate.inner_start..candidate.inner_end];
        if let Some(call) = parse_envelope_body(inner, known_tools) {
            return Some(call);
        }
    }
    None
}

struct EnvelopeSpan {
    open_at: usize,
    inner_start: usize,
    inner_end: usize,
}

/// Find every (opening, matching-closing) pair across all recognized sentinel
/// variants. For each opening occurrence, the matching close is the first
/// occurrence of its variant's closing sentinel strictly after it (§4.1).
fn find_envelope_spans(s: &str) -> Vec<EnvelopeSpan> {
    let mut spans = Vec::new();
    for (open, close) in SENTINEL_PAIRS {
        let mut search_from = 0usize;
        while let Some(rel) = s[search_from..].find(open) {
            let open_at = search_from + rel;
            let inner_start = open_at + open.len();
            if let Some(close_rel) = s[inner_start..].find(close) {
                let inner_end = inner_start + close_rel;
                spans.push(EnvelopeSpan {
                    open_at,
                    inner_start,
                    inner_end,
                });
            }
            search_from = open_at + open.len();
        }
    }
    spans
}

/// Parse the envelope body as a sequence of sibling XML elements; return the
/// first element whose tag is in `known_tools`, recursively converted to
/// `{name, arguments}` (§4.1 tie-break rule).
pub(crate) fn parse_envelope_body(
    inner: &str,
    known_tools: &HashSet<String>,
) -> Option<ExtractedToolCall> {
    let mut reader = Reader::from_str(inner);

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => return None,
            Ok(Event::Start(start)) => {
                let name = local_name(start.name());
                match read_element_body(&mut reader, &name) {
                    Ok(body) => {
                        if known_tools.contains(&name) {
                            return Some(ExtractedToolCall::new(name, as_arguments_object(body)));
                        }
                    }
                    Err(()) => return None,
                }
            }
            Ok(Event::Empty(start)) => {
                let name = local_name(start.name());
                if known_tools.contains(&name) {
                    return Some(ExtractedToolCall::new(name, Value::Object(Map::new())));
                }
            }
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

fn as_arguments_object(body: Value) -> Value {
    match body {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(Map::new()),
    }
}

fn local_name(name: QName<'_>) -> String {
    String::from_utf8_lossy(name.local_name().as_ref()).into_owned()
}

/// Read everything up to the matching close tag for an already-consumed
/// `Start(tag_name)` event, recursing into child elements. Leaf elements
/// (no element children) are parsed as a primitive (bool → number → string);
/// elements with children become a JSON object, repeated child tags becoming
/// arrays (mirrors the prompt injector's "arrays encoded by repeating the
/// element name" convention, §4.4).
fn read_element_body(reader: &mut Reader<&[u8]>, tag_name: &str) -> Result<Value, ()> {
    let mut text = String::new();
    let mut children: Vec<(String, Value)> = Vec::new();

    loop {
        match reader.read_event().map_err(|_| ())? {
            Event::Start(start) => {
                let child_name = local_name(start.name());
                let value = read_element_body(reader, &child_name)?;
                children.push((child_name, value));
            }
            Event::Empty(start) => {
                let child_name = local_name(start.name());
                children.push((child_name, Value::String(String::new())));
            }
            Event::Text(t) => {
                text.push_str(&t.unescape().map_err(|_| ())?);
            }
            Event::End(end) => {
                if local_name(end.name()) == tag_name {
                    break;
                }
                return Err(());
            }
            Event::Eof => return Err(()),
            _ => {}
        }
    }

    if children.is_empty() {
        Ok(parse_primitive(&text))
    } else {
        let mut map = Map::new();
        for (name, value) in children {
            match map.get_mut(&name) {
                Some(Value::Array(arr)) => arr.push(value),
                Some(existing) => {
                    let previous = existing.clone();
                    *existing = Value::Array(vec![previous, value]);
                }
                None => {
                    map.insert(name, value);
                }
            }
        }
        Ok(Value::Object(map))
    }
}

/// bool → number (if finite) → string, per §4.1.
fn parse_primitive(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(n) = trimmed.parse::<f64>() {
        if n.is_finite() {
            if let Some(num) = serde_json::Number::from_f64(n) {
                return Value::Number(num);
            }
        }
    }
    Value::String(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tools(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extracts_single_parameter_call() {
        let raw = "preamble<toolbridge:calls><search><q>tokyo</q></search></toolbridge:calls>tail";
        let call = extract_tool_call(raw, &tools(&["search"])).unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments, json!({"q": "tokyo"}));
    }

    #[test]
    fn parses_boolean_and_number_leaves() {
        let raw = "<toolbridge:calls><calc><x>2</x><y>3</y><verbose>true</verbose></calc></toolbridge:calls>";
        let call = extract_tool_call(raw, &tools(&["calc"])).unwrap();
        assert_eq!(
            call.arguments,
            json!({"x": 2.0, "y": 3.0, "verbose": true})
        );
    }

    #[test]
    fn repeated_child_tags_become_array() {
        let raw = "<toolbridge:calls><batch><id>1</id><id>2</id></batch></toolbridge:calls>";
        let call = extract_tool_call(raw, &tools(&["batch"])).unwrap();
        assert_eq!(call.arguments, json!({"id": [1.0, 2.0]}));
    }

    #[test]
    fn nested_object_parameters_recurse() {
        let raw = "<toolbridge:calls><search><filter><year>2024</year></filter></search></toolbridge:calls>";
        let call = extract_tool_call(raw, &tools(&["search"])).unwrap();
        assert_eq!(call.arguments, json!({"filter": {"year": 2024.0}}));
    }

    #[test]
    fn unknown_root_tag_returns_none() {
        let raw = "<toolbridge:calls><weather><city>NYC</city></weather></toolbridge:calls>";
        assert!(extract_tool_call(raw, &tools(&["search"])).is_none());
    }

    #[test]
    fn malformed_xml_returns_none() {
        let raw = "<toolbridge:calls><search></broken></toolbridge:calls>";
        assert!(extract_tool_call(raw, &tools(&["search"])).is_none());
    }

    #[test]
    fn no_envelope_returns_none() {
        assert!(extract_tool_call("just plain text", &tools(&["search"])).is_none());
    }

    #[test]
    fn multiple_calls_in_one_envelope_returns_first() {
        let raw = "<toolbridge:calls><search><q>a</q></search><search><q>b</q></search></toolbridge:calls>";
        let call = extract_tool_call(raw, &tools(&["search"])).unwrap();
        assert_eq!(call.arguments, json!({"q": "a"}));
    }

    #[test]
    fn multiple_envelopes_returns_last_complete_one() {
        let raw = "<toolbridge:calls><search><q>first</q></search></toolbridge:calls> later <toolbridge:calls><search><q>second</q></search></toolbridge:calls>";
        let call = extract_tool_call(raw, &tools(&["search"])).unwrap();
        assert_eq!(call.arguments, json!({"q": "second"}));
    }

    #[test]
    fn legacy_alias_is_recognized() {
        let raw = "<__toolcall__><search><q>tokyo</q></search></__toolcall__>";
        let call = extract_tool_call(raw, &tools(&["search"])).unwrap();
        assert_eq!(call.name, "search");
    }

    #[test]
    fn reasoning_region_is_scrubbed_before_parsing() {
        let raw = "<think>I should call <toolbridge:calls><search><q>decoy</q></search></toolbridge:calls></think>plain text only";
        assert!(extract_tool_call(raw, &tools(&["search"])).is_none());
    }
}
