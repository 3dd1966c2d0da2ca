//! Wire format shared by generated scripts and the worker.
//!
//! Results are framed on stdout as three lines: [`OUTPUT_START`], one line of
//! JSON, [`OUTPUT_END`]. Anything else a node prints is ignored. Commands to
//! the worker are single JSON lines.

use isocore::{Context, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

pub const OUTPUT_START: &str = "###JSON_OUTPUT###";
pub const OUTPUT_END: &str = "###JSON_OUTPUT_END###";
/// First line a worker prints once it accepts commands
pub const READY: &str = "READY";

/// Command sent to a worker, one JSON object per line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    RunNode {
        script_path: PathBuf,
        input_data: Context,
    },
    Exit,
}

impl WorkerCommand {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Framed reply to a `run_node` command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerReply {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Outside,
    AwaitingPayload,
    AwaitingEnd,
}

/// Line-driven extractor for marker-framed payloads.
///
/// Feed every stdout line through [`FrameDecoder::push_line`]; it yields a
/// payload once a complete start/payload/end triple has been seen. Lines
/// outside a frame are node chatter and are skipped.
#[derive(Debug)]
pub struct FrameDecoder {
    state: FrameState,
    payload: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: FrameState::Outside,
            payload: String::new(),
        }
    }

    pub fn push_line(&mut self, line: &str) -> Option<Result<Value, TransportError>> {
        let line = line.trim_end_matches(['\r', '\n']);

        match self.state {
            FrameState::Outside => {
                if opens_frame(line) {
                    self.state = FrameState::AwaitingPayload;
                }
                None
            }
            FrameState::AwaitingPayload => {
                if opens_frame(line) {
                    return None;
                }
                if line.trim() == OUTPUT_END {
                    self.state = FrameState::Outside;
                    return Some(Err(TransportError::MalformedReply(
                        "empty frame".to_string(),
                    )));
                }
                self.payload = line.to_string();
                self.state = FrameState::AwaitingEnd;
                None
            }
            FrameState::AwaitingEnd => {
                if line.trim() != OUTPUT_END {
                    // stray output inside a frame belongs to the payload line
                    self.payload.push('\n');
                    self.payload.push_str(line);
                    return None;
                }
                self.state = FrameState::Outside;
                let payload = std::mem::take(&mut self.payload);
                Some(
                    serde_json::from_str(&payload)
                        .map_err(|e| TransportError::MalformedReply(e.to_string())),
                )
            }
        }
    }

    /// A start marker was seen but its frame never closed
    pub fn is_incomplete(&self) -> bool {
        self.state != FrameState::Outside
    }
}

/// A node that printed without a trailing newline leaves its text in front
/// of the start marker on the same line.
fn opens_frame(line: &str) -> bool {
    line.trim_end().ends_with(OUTPUT_START)
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the last complete framed payload from a finished process's stdout.
///
/// `Ok(None)` means no complete frame was present.
pub fn extract_payload(stdout: &str) -> Result<Option<Value>, TransportError> {
    let mut decoder = FrameDecoder::new();
    let mut last = None;
    for line in stdout.lines() {
        if let Some(result) = decoder.push_line(line) {
            last = Some(result?);
        }
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_frame_between_chatter() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_line("loading...").is_none());
        assert!(decoder.push_line(OUTPUT_START).is_none());
        assert!(decoder.is_incomplete());
        assert!(decoder.push_line(r#"{"x": 1}"#).is_none());
        let value = decoder.push_line(OUTPUT_END).unwrap().unwrap();
        assert_eq!(value, json!({"x": 1}));
        assert!(!decoder.is_incomplete());
    }

    #[test]
    fn tolerates_crlf_line_endings() {
        let stdout = "###JSON_OUTPUT###\r\n{\"ok\": true}\r\n###JSON_OUTPUT_END###\r\n";
        assert_eq!(extract_payload(stdout).unwrap(), Some(json!({"ok": true})));
    }

    #[test]
    fn start_marker_after_unterminated_chatter() {
        let stdout = format!(
            "progress{}\n{{\"ok\": true}}\n{}\n",
            OUTPUT_START, OUTPUT_END
        );
        assert_eq!(extract_payload(&stdout).unwrap(), Some(json!({"ok": true})));

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_line("50%...100%###JSON_OUTPUT###").is_none());
        assert!(decoder.is_incomplete());
    }

    #[test]
    fn end_marker_alone_does_not_open_a_frame() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_line(OUTPUT_END).is_none());
        assert!(!decoder.is_incomplete());
    }

    #[test]
    fn invalid_payload_is_malformed() {
        let mut decoder = FrameDecoder::new();
        decoder.push_line(OUTPUT_START);
        decoder.push_line("not json");
        assert!(matches!(
            decoder.push_line(OUTPUT_END),
            Some(Err(TransportError::MalformedReply(_)))
        ));
    }

    #[test]
    fn missing_end_marker_yields_nothing() {
        let stdout = format!("{}\n{{\"x\": 1}}\n", OUTPUT_START);
        assert_eq!(extract_payload(&stdout).unwrap(), None);
    }

    #[test]
    fn decoder_is_reusable_across_frames() {
        let stdout = format!(
            "{s}\n{{\"n\": 1}}\n{e}\nnoise\n{s}\n{{\"n\": 2}}\n{e}\n",
            s = OUTPUT_START,
            e = OUTPUT_END
        );
        assert_eq!(extract_payload(&stdout).unwrap(), Some(json!({"n": 2})));
    }

    #[test]
    fn commands_serialize_with_type_tag() {
        let mut input = Context::new();
        input.insert("x".to_string(), json!(1));
        let run = WorkerCommand::RunNode {
            script_path: PathBuf::from("/tmp/node_a.py"),
            input_data: input,
        };
        let value: Value = serde_json::from_str(run.to_line().unwrap().trim()).unwrap();
        assert_eq!(
            value,
            json!({"type": "run_node", "script_path": "/tmp/node_a.py", "input_data": {"x": 1}})
        );
        assert_eq!(WorkerCommand::Exit.to_line().unwrap(), "{\"type\":\"exit\"}\n");
    }

    #[test]
    fn reply_fields_default_when_absent() {
        let reply: WorkerReply =
            serde_json::from_value(json!({"success": false, "error": "Invalid JSON input"})).unwrap();
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("Invalid JSON input"));
        assert!(reply.traceback.is_none());
        assert!(reply.data.is_none());
    }
}
