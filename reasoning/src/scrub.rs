use once_cell::sync::Lazy;
use regex::Regex;

/// One delimiter pair a backend might wrap reasoning/thinking content in.
struct ReasoningDelimiter {
    start: &'static str,
    end: &'static str,
}

/// The delimiter pairs recognized by the pre-parse scrub (§4.1 "Pre-parse scrub").
/// Kept as a table rather than inlined into the regex so each pair stays
/// individually nameable and testable.
const DELIMITERS: &[ReasoningDelimiter] = &[
    ReasoningDelimiter {
        start: "<think>",
        end: "</think>",
    },
    ReasoningDelimiter {
        start: "<thinking>",
        end: "</thinking>",
    },
    ReasoningDelimiter {
        start: "◁think▷",
        end: "◁/think▷",
    },
    ReasoningDelimiter {
        start: "[thinking]",
        end: "[/thinking]",
    },
];

static SCRUB_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let alternation = DELIMITERS
        .iter()
        .map(|d| format!("{}.*?{}", regex::escape(d.start), regex::escape(d.end)))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?is){alternation}")).expect("reasoning scrub pattern is well-formed")
});

/// Remove all model-reasoning regions from `s`, case-insensitively and
/// non-greedily, before envelope parsing (§4.1). Mentions of tool use inside a
/// "thinking" region must never be promoted to an actual tool call.
pub fn scrub_reasoning(s: &str) -> String {
    SCRUB_PATTERN.replace_all(s, "").into_owned()
}
