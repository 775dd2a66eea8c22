//! Stream processor (C5): deframes the upstream body by source dialect, drives
//! the streaming tool-call detector (C2), and reframes to the client's
//! dialect — waiting for the upstream terminator before emitting our own
//! (§4.5 "Rationale for waiting on upstream terminator").

use std::collections::HashSet;
use std::pin::Pin;

use bytes::Bytes;
use dg_envelope::{Detector, DetectorEvent};
use dg_protocols::ir::NeutralChunk;
use dg_protocols::{Dialect, ExtractedToolCall};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::error::{sanitize_error_body, GatewayError};

enum DeframedFrame {
    Data(NeutralChunk),
    /// OAI: bare `[DONE]`. OLL: the final `done:true` frame's `done_reason`.
    Terminator(Option<String>),
    ParseError,
}

pub struct StreamProcessor {
    source: Dialect,
    target: Dialect,
    known_tools: HashSet<String>,
    detector: Detector,
    id: String,
    model: String,
    created: i64,
    buffer: String,
    finished: bool,
}

impl StreamProcessor {
    pub fn new(
        source: Dialect,
        target: Dialect,
        known_tools: HashSet<String>,
        id: String,
        model: String,
        created: i64,
    ) -> Self {
        Self {
            source,
            target,
            known_tools,
            detector: Detector::new(),
            id,
            model,
            created,
            buffer: String::new(),
            finished: false,
        }
    }

    /// Consume the upstream byte stream and produce the reframed client body
    /// stream. One sequential consumer drives both the detector and the
    /// conversion for the lifetime of the request (§5 "Scheduling model").
    pub fn drive(
        self,
        upstream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        futures::stream::unfold(
            (self, upstream, std::collections::VecDeque::<String>::new()),
            |(mut proc, mut upstream, mut pending)| async move {
                loop {
                    if let Some(frame) = pending.pop_front() {
                        return Some((Ok(Bytes::from(frame)), (proc, upstream, pending)));
                    }
                    if proc.finished {
                        return None;
                    }

                    match upstream.next().await {
                        Some(Ok(bytes)) => {
                            proc.buffer.push_str(&String::from_utf8_lossy(&bytes));
                            let frames = proc.drain_frames();
                            pending.extend(proc.process_frames(frames));
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "upstream stream error mid-stream");
                            proc.finished = true;
                            // Headers are already flushed to the client at this point, so
                            // the failure must surface as a terminal frame, not a dropped
                            // connection (§4.6 "emit a terminal error frame").
                            let error = GatewayError::UpstreamTransient(sanitize_error_body(&e.to_string()));
                            pending.push_back(error.to_stream_frame(proc.target));
                            pending.push_back(proc.terminator_frame(None));
                        }
                        None => {
                            let flush = proc.finalize_detector();
                            proc.finished = true;
                            pending.extend(flush);
                            pending.push_back(proc.terminator_frame(None));
                        }
                    }
                }
            },
        )
    }

    fn drain_frames(&mut self) -> Vec<DeframedFrame> {
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            lines.push(line.trim_end_matches(['\r', '\n']).to_string());
        }

        match self.source {
            Dialect::Oai => lines
                .into_iter()
                .filter_map(|line| {
                    if line.is_empty() || line.starts_with(": ") {
                        return None;
                    }
                    let rest = line.strip_prefix("data: ")?;
                    if rest == "[DONE]" {
                        return Some(DeframedFrame::Terminator(None));
                    }
                    match serde_json::from_str(rest) {
                        Ok(chunk) => Some(DeframedFrame::Data(dg_convert::oai_chunk_to_neutral(&chunk))),
                        Err(_) => Some(DeframedFrame::ParseError),
                    }
                })
                .collect(),
            Dialect::Oll => lines
                .into_iter()
                .filter_map(|line| {
                    if line.trim().is_empty() {
                        return None;
                    }
                    match serde_json::from_str(&line) {
                        Ok(chunk) => {
                            let neutral = dg_convert::oll_chunk_to_neutral(&chunk);
                            if neutral.done {
                                Some(DeframedFrame::Terminator(neutral.finish_reason))
                            } else {
                                Some(DeframedFrame::Data(neutral))
                            }
                        }
                        Err(_) => Some(DeframedFrame::ParseError),
                    }
                })
                .collect(),
        }
    }

    fn process_frames(&mut self, frames: Vec<DeframedFrame>) -> Vec<String> {
        let mut out = Vec::new();
        for frame in frames {
            match frame {
                DeframedFrame::ParseError => {
                    warn!("skipping malformed upstream frame");
                }
                DeframedFrame::Terminator(done_reason) => {
                    out.extend(self.finalize_detector());
                    out.push(self.terminator_frame(done_reason));
                    self.finished = true;
                }
                DeframedFrame::Data(chunk) => match (chunk.delta_content, chunk.finish_reason) {
                    (Some(text), _) => out.extend(self.handle_text_delta(&text)),
                    (None, Some(reason)) => out.push(self.render_passthrough(Some(reason))),
                    (None, None) => {}
                },
            }
        }
        out
    }

    fn handle_text_delta(&mut self, text: &str) -> Vec<String> {
        if self.detector.is_complete() {
            return vec![self.render_text(text)];
        }
        let events = self.detector.push(text, &self.known_tools);
        self.render_events(events)
    }

    fn finalize_detector(&mut self) -> Vec<String> {
        if self.detector.is_complete() {
            return Vec::new();
        }
        let events = self.detector.finalize(&self.known_tools);
        self.render_events(events)
    }

    fn render_events(&mut self, events: Vec<DetectorEvent>) -> Vec<String> {
        events
            .into_iter()
            .flat_map(|event| match event {
                DetectorEvent::Text(text) => {
                    if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![self.render_text(&text)]
                    }
                }
                DetectorEvent::ToolCall(call) => self.render_tool_call(call),
            })
            .collect()
    }

    fn render_text(&self, text: &str) -> String {
        self.render_chunk(&NeutralChunk {
            id: Some(self.id.clone()),
            model: Some(self.model.clone()),
            delta_content: Some(text.to_string()),
            tool_calls: None,
            finish_reason: None,
            done: false,
        })
    }

    /// Forward a frame that carries no text delta but does carry framing
    /// data worth preserving, e.g. an OAI `delta:{},finish_reason:"stop"`
    /// frame (§8 scenario S3: the finish frame must still reach the client).
    fn render_passthrough(&self, finish_reason: Option<String>) -> String {
        self.render_chunk(&NeutralChunk {
            id: Some(self.id.clone()),
            model: Some(self.model.clone()),
            delta_content: None,
            tool_calls: None,
            finish_reason,
            done: false,
        })
    }

    fn render_tool_call(&mut self, call: ExtractedToolCall) -> Vec<String> {
        let call_frame = self.render_chunk(&NeutralChunk {
            id: Some(self.id.clone()),
            model: Some(self.model.clone()),
            delta_content: None,
            tool_calls: Some(vec![call]),
            finish_reason: None,
            done: false,
        });
        match self.target {
            Dialect::Oai => {
                let finish_frame = self.render_chunk(&NeutralChunk {
                    id: Some(self.id.clone()),
                    model: Some(self.model.clone()),
                    delta_content: None,
                    tool_calls: None,
                    finish_reason: Some("tool_calls".to_string()),
                    done: false,
                });
                vec![call_frame, finish_frame]
            }
            Dialect::Oll => vec![call_frame],
        }
    }

    fn render_chunk(&self, n: &NeutralChunk) -> String {
        match self.target {
            Dialect::Oai => {
                let chunk = dg_convert::neutral_to_oai_chunk(n, &self.id, &self.model, self.created);
                format!("data: {}\n\n", serde_json::to_value(chunk).unwrap_or(Value::Null))
            }
            Dialect::Oll => {
                let chunk = dg_convert::neutral_to_oll_chunk(n, &self.model);
                format!("{}\n", serde_json::to_value(chunk).unwrap_or(Value::Null))
            }
        }
    }

    /// Render the client's own stream terminator. `done_reason` carries the
    /// upstream's OLL final-frame reason, when available; `None` means a bare
    /// OAI `[DONE]` was observed.
    fn terminator_frame(&self, done_reason: Option<String>) -> String {
        match self.target {
            Dialect::Oai => "data: [DONE]\n\n".to_string(),
            Dialect::Oll => self.render_chunk(&NeutralChunk {
                id: None,
                model: Some(self.model.clone()),
                delta_content: Some(String::new()),
                tool_calls: None,
                finish_reason: done_reason,
                done: true,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn known(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn run(source: Dialect, target: Dialect, tools: &[&str], chunks: Vec<&'static str>) -> Vec<String> {
        let upstream = stream::iter(chunks.into_iter().map(|s| Ok(Bytes::from(s.to_string()))));
        let proc = StreamProcessor::new(source, target, known(tools), "id1".into(), "m".into(), 0);
        let out = proc.drive(Box::pin(upstream));
        let bytes: Vec<Bytes> = out.map(|r| r.unwrap()).collect().await;
        bytes
            .into_iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn oai_to_oai_passthrough_then_done() {
        let frames = run(
            Dialect::Oai,
            Dialect::Oai,
            &[],
            vec![
                "data: {\"id\":\"x\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
                "data: [DONE]\n\n",
            ],
        )
        .await;
        assert!(frames[0].contains("\"content\":\"hi\""));
        assert_eq!(*frames.last().unwrap(), "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn oai_to_oll_translates_frame_shape() {
        let frames = run(
            Dialect::Oai,
            Dialect::Oll,
            &[],
            vec![
                "data: {\"id\":\"x\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
                "data: [DONE]\n\n",
            ],
        )
        .await;
        assert!(frames[0].contains("\"done\":false"));
        assert!(frames.last().unwrap().contains("\"done\":true"));
    }

    #[tokio::test]
    async fn detects_tool_call_and_waits_for_upstream_terminator() {
        let frames = run(
            Dialect::Oai,
            Dialect::Oai,
            &["search"],
            vec![
                "data: {\"id\":\"x\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"<toolbridge:calls><search><q>tokyo</q></search></toolbridge:calls>\"},\"finish_reason\":null}]}\n\n",
                "data: [DONE]\n\n",
            ],
        )
        .await;
        assert!(frames.iter().any(|f| f.contains("tool_calls")));
        assert_eq!(*frames.last().unwrap(), "data: [DONE]\n\n");
        // no [DONE] should appear before the tool-call frames
        let done_pos = frames.iter().position(|f| f == "data: [DONE]\n\n").unwrap();
        let tool_pos = frames.iter().position(|f| f.contains("tool_calls")).unwrap();
        assert!(tool_pos < done_pos);
    }

    #[tokio::test]
    async fn oll_done_true_frame_is_treated_as_terminator() {
        let frames = run(
            Dialect::Oll,
            Dialect::Oll,
            &[],
            vec![
                "{\"model\":\"m\",\"message\":{\"role\":\"assistant\",\"content\":\"hi\"},\"done\":false}\n",
                "{\"model\":\"m\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true,\"done_reason\":\"stop\"}\n",
            ],
        )
        .await;
        assert!(frames.last().unwrap().contains("\"done\":true"));
        assert!(frames.last().unwrap().contains("stop"));
    }

    #[tokio::test]
    async fn standalone_finish_reason_frame_is_forwarded_without_text_delta() {
        // §8 S3: a plain pass-through stream must still deliver its finish frame.
        let frames = run(
            Dialect::Oai,
            Dialect::Oai,
            &[],
            vec![
                "data: {\"id\":\"x\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"},\"finish_reason\":null}]}\n\n",
                "data: {\"id\":\"x\",\"object\":\"chat.completion.chunk\",\"created\":0,\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            ],
        )
        .await;
        assert!(frames.iter().any(|f| f.contains("\"finish_reason\":\"stop\"")));
        let finish_pos = frames.iter().position(|f| f.contains("\"finish_reason\":\"stop\"")).unwrap();
        let done_pos = frames.iter().position(|f| f == "data: [DONE]\n\n").unwrap();
        assert!(finish_pos < done_pos);
    }

    #[tokio::test]
    async fn upstream_transport_error_emits_error_frame_before_terminator() {
        let upstream = stream::iter(vec![Err(reqwest::Client::new().get("not a url").build().unwrap_err())]);
        let proc = StreamProcessor::new(Dialect::Oai, Dialect::Oai, known(&[]), "id1".into(), "m".into(), 0);
        let out = proc.drive(Box::pin(upstream));
        let bytes: Vec<Bytes> = out.map(|r| r.unwrap()).collect().await;
        let frames: Vec<String> = bytes.into_iter().map(|b| String::from_utf8(b.to_vec()).unwrap()).collect();
        assert!(frames[0].starts_with("data: "));
        assert!(frames[0].contains("\"error\""));
        assert_eq!(*frames.last().unwrap(), "data: [DONE]\n\n");
    }
}
