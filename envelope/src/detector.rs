//! Streaming tool-call detector (C2): an incremental state machine driven one
//! text delta at a time (§4.2).

use std::collections::HashSet;

use dg_protocols::ExtractedToolCall;

use crate::parser::parse_envelope_body;
use crate::sentinel::SENTINEL_PAIRS;
use crate::util::floor_char_boundary;

const DEFAULT_WINDOW_MARGIN: usize = 64;
const DEFAULT_MAX_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    /// Text that should be forwarded to the client verbatim.
    Text(String),
    /// A complete, validated tool call ready to be synthesized as a native frame.
    ToolCall(ExtractedToolCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pass,
    Inside,
    Complete,
}

/// One per stream; never shared across requests (§3 "DetectorState... Lifetime:
/// one per stream. Never shared across requests.").
pub struct Detector {
    state: State,
    /// Trailing window of not-yet-emitted text while in `Pass`.
    window: String,
    /// Accumulated envelope content while in `Inside`.
    partial: String,
    /// The closing sentinel matching whichever opening sentinel was matched.
    close_sentinel: &'static str,
    window_cap: usize,
    buffer_cap: usize,
}

impl Detector {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_WINDOW_MARGIN, DEFAULT_MAX_BUFFER)
    }

    pub fn with_limits(window_margin: usize, max_buffer_bytes: usize) -> Self {
        Self {
            state: State::Pass,
            window: String::new(),
            partial: String::new(),
            close_sentinel: SENTINEL_PAIRS[0].1,
            window_cap: crate::sentinel::longest_open_len() + window_margin,
            buffer_cap: max_buffer_bytes,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// Feed one text delta; returns the events (text/tool-call) it produces,
    /// in order. May be empty if the delta was fully absorbed into a buffer.
    pub fn push(&mut self, delta: &str, known_tools: &HashSet<String>) -> Vec<DetectorEvent> {
        match self.state {
            State::Complete => Vec::new(),
            State::Pass => self.push_pass(delta, known_tools),
            State::Inside => self.push_inside(delta, known_tools),
        }
    }

    /// Called on upstream EOF / terminator frame: attempt one last parse if
    /// still `Inside`, otherwise flush whatever is buffered as text (§4.2
    /// "Stream-end policy").
    pub fn finalize(&mut self, known_tools: &HashSet<String>) -> Vec<DetectorEvent> {
        match self.state {
            State::Complete => Vec::new(),
            State::Pass => {
                if self.window.is_empty() {
                    Vec::new()
                } else {
                    let text = std::mem::take(&mut self.window);
                    vec![DetectorEvent::Text(text)]
                }
            }
            State::Inside => self.attempt_close(known_tools, true),
        }
    }

    fn push_pass(&mut self, delta: &str, known_tools: &HashSet<String>) -> Vec<DetectorEvent> {
        self.window.push_str(delta);

        if let Some((open_at, open_len, close_sentinel)) = find_earliest_open(&self.window) {
            let before = self.window[..open_at].to_string();
            let after = self.window[open_at + open_len..].to_string();
            self.window.clear();
            self.state = State::Inside;
            self.partial = after;
            self.close_sentinel = close_sentinel;

            let mut events = Vec::new();
            if !before.is_empty() {
                events.push(DetectorEvent::Text(before));
            }
            events.extend(self.attempt_close(known_tools, false));
            events
        } else {
            // Retain up to `window_cap - 1` trailing bytes: enough to catch a
            // sentinel prefix split across the next delta (§4.2 "Partial match
            // of the opening sentinel prefix").
            let keep_from = floor_char_boundary(
                &self.window,
                self.window.len().saturating_sub(self.window_cap.saturating_sub(1)),
            );
            if keep_from == 0 {
                Vec::new()
            } else {
                let text: String = self.window.drain(..keep_from).collect();
                vec![DetectorEvent::Text(text)]
            }
        }
    }

    fn push_inside(&mut self, delta: &str, known_tools: &HashSet<String>) -> Vec<DetectorEvent> {
        self.partial.push_str(delta);

        if self.partial.len() > self.buffer_cap {
            // Buffer bound exceeded: a buggy/malicious backend must not force
            // unbounded memory (§4.2 "Buffer bound").
            let text = std::mem::take(&mut self.partial);
            self.state = State::Pass;
            return vec![DetectorEvent::Text(text)];
        }

        self.attempt_close(known_tools, false)
    }

    fn attempt_close(&mut self, known_tools: &HashSet<String>, at_stream_end: bool) -> Vec<DetectorEvent> {
        let Some(close_at) = self.partial.find(self.close_sentinel) else {
            if at_stream_end {
                // Upstream ended mid-envelope with no closing sentinel ever
                // arriving: flush what we have as text (§4.2 "Stream-end policy").
                let text = std::mem::take(&mut self.partial);
                self.state = State::Pass;
                return vec![DetectorEvent::Text(text)];
            }
            return Vec::new();
        };

        let inner = self.partial[..close_at].to_string();
        let scrubbed = dg_reasoning::scrub_reasoning(&inner);
        let remainder = self.partial[close_at + self.close_sentinel.len()..].to_string();

        match parse_envelope_body(&scrubbed, known_tools) {
            Some(call) => {
                self.state = State::Complete;
                self.partial.clear();
                vec![DetectorEvent::ToolCall(call)]
            }
            None => {
                // Malformed envelope or unknown tag: flush verbatim as text
                // and resume scanning for a new envelope in the remainder
                // (§4.2 "On parse failure: flush `partial` as text to client,
                // return to PASS.").
                self.state = State::Pass;
                self.partial.clear();
                let mut flushed = self.partial_open_literal();
                flushed.push_str(&inner);
                flushed.push_str(self.close_sentinel);
                let mut events = vec![DetectorEvent::Text(flushed)];
                if !remainder.is_empty() {
                    events.extend(self.push_pass(&remainder, known_tools));
                }
                events
            }
        }
    }

    fn partial_open_literal(&self) -> String {
        SENTINEL_PAIRS
            .iter()
            .find(|(_, close)| *close == self.close_sentinel)
            .map(|(open, _)| (*open).to_string())
            .unwrap_or_default()
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the earliest occurrence of any recognized opening sentinel in `window`,
/// returning its offset, byte length, and the matching closing sentinel.
fn find_earliest_open(window: &str) -> Option<(usize, usize, &'static str)> {
    SENTINEL_PAIRS
        .iter()
        .filter_map(|(open, close)| window.find(open).map(|at| (at, open.len(), *close)))
        .min_by_key(|(at, _, _)| *at)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn passthrough_without_sentinel_is_transparent() {
        let mut d = Detector::new();
        let known = tools(&["search"]);
        let mut out = String::new();
        for delta in ["Hello, ", "world", "!"] {
            for ev in d.push(delta, &known) {
                if let DetectorEvent::Text(t) = ev {
                    out.push_str(&t);
                }
            }
        }
        for ev in d.finalize(&known) {
            if let DetectorEvent::Text(t) = ev {
                out.push_str(&t);
            }
        }
        assert_eq!(out, "Hello, world!");
    }

    #[test]
    fn single_delta_full_envelope_emits_tool_call() {
        let mut d = Detector::new();
        let known = tools(&["search"]);
        let events = d.push(
            "Okay, <toolbridge:calls><search><q>tokyo</q></search></toolbridge:calls>",
            &known,
        );
        assert_eq!(events[0], DetectorEvent::Text("Okay, ".to_string()));
        match &events[1] {
            DetectorEvent::ToolCall(call) => {
                assert_eq!(call.name, "search");
                assert_eq!(call.arguments, serde_json::json!({"q": "tokyo"}));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert!(d.is_complete());
    }

    #[test]
    fn sentinel_split_across_deltas_is_detected() {
        let mut d = Detector::new();
        let known = tools(&["calc"]);
        let mut events = Vec::new();
        for delta in [
            "I'll ",
            "<toolbr",
            "idge:calls><calc><x>2",
            "</x><y>3</y></calc></toolbridge:calls>",
        ] {
            events.extend(d.push(delta, &known));
        }
        let texts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DetectorEvent::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(texts.join(""), "I'll ");
        let calls: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DetectorEvent::ToolCall(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "calc");
        assert_eq!(calls[0].arguments, serde_json::json!({"x": 2.0, "y": 3.0}));
    }

    #[test]
    fn malformed_envelope_is_flushed_as_text() {
        let mut d = Detector::new();
        let known = tools(&["search"]);
        let mut out = String::new();
        for ev in d.push(
            "<toolbridge:calls><search></broken></toolbridge:calls>",
            &known,
        ) {
            if let DetectorEvent::Text(t) = ev {
                out.push_str(&t);
            }
        }
        assert_eq!(out, "<toolbridge:calls><search></broken></toolbridge:calls>");
    }

    #[test]
    fn unterminated_envelope_flushes_at_stream_end() {
        let mut d = Detector::new();
        let known = tools(&["search"]);
        d.push("<toolbridge:calls><search><q>tok", &known);
        let events = d.finalize(&known);
        match &events[0] {
            DetectorEvent::Text(t) => assert!(t.contains("<toolbridge:calls>")),
            other => panic!("expected text flush, got {other:?}"),
        }
    }

    #[test]
    fn buffer_overflow_flushes_and_resets_to_pass() {
        let mut d = Detector::with_limits(64, 16);
        let known = tools(&["search"]);
        d.push("<toolbridge:calls>", &known);
        let events = d.push(&"x".repeat(32), &known);
        assert!(matches!(events[0], DetectorEvent::Text(_)));
        assert!(!d.is_complete());
    }
}
