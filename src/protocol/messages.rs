/// Wire format of terminal messages
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::protocol::TerminalMessage;

/// Control message sent by a viewer as a JSON text frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Input { data: String },
    Resize { cols: u16, rows: u16 },
}

impl ClientMessage {
    /// Decode a text frame. Anything but a JSON object with a `type` key is
    /// raw input; such an object that is not a known message yields None.
    pub fn from_text(text: &str) -> Option<Self> {
        let object = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) if object.contains_key("type") => object,
            _ => {
                return Some(ClientMessage::Input {
                    data: text.to_string(),
                });
            }
        };
        match serde_json::from_value(Value::Object(object)) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("Dropping malformed control message: {}", e);
                None
            }
        }
    }
}

/// Frame carrying a chunk of process output: text when it is valid UTF-8
pub fn output_frame(chunk: &[u8]) -> TerminalMessage {
    match std::str::from_utf8(chunk) {
        Ok(text) => TerminalMessage::Text(text.to_string()),
        Err(_) => TerminalMessage::Binary(chunk.to_vec()),
    }
}

/// Diagnostic shown in the terminal before the connection is closed
pub fn error_notice(message: &str) -> String {
    format!("\r\n[Error: {}]\r\n", message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_control_messages() {
        assert_eq!(
            ClientMessage::from_text(r#"{"type":"input","data":"ls\r"}"#),
            Some(ClientMessage::Input {
                data: "ls\r".to_string()
            })
        );
        assert_eq!(
            ClientMessage::from_text(r#"{"type":"resize","cols":120,"rows":40}"#),
            Some(ClientMessage::Resize {
                cols: 120,
                rows: 40
            })
        );
    }

    #[test]
    fn anything_else_is_raw_input() {
        for text in ["echo hi\r", "{not json", r#"{"data":"x"}"#, "42", r#""quoted""#] {
            assert_eq!(
                ClientMessage::from_text(text),
                Some(ClientMessage::Input {
                    data: text.to_string()
                })
            );
        }
    }

    #[test]
    fn malformed_control_messages_are_dropped() {
        for text in [
            r#"{"type":"resize","cols":70000,"rows":40}"#,
            r#"{"type":"resize","cols":-1,"rows":40}"#,
            r#"{"type":"resize"}"#,
            r#"{"type":"input"}"#,
            r#"{"type":"paste","data":"x"}"#,
        ] {
            assert_eq!(ClientMessage::from_text(text), None, "{}", text);
        }
    }

    #[test]
    fn output_frames_follow_utf8_validity() {
        assert_eq!(
            output_frame("héllo".as_bytes()),
            TerminalMessage::Text("héllo".to_string())
        );
        assert_eq!(
            output_frame(&[0x1b, 0xff, 0x00]),
            TerminalMessage::Binary(vec![0x1b, 0xff, 0x00])
        );
    }
}
