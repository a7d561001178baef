//! The inbound command language: one JSON object per text frame (with `"ping"` as a
//! bare-text special case), parsed without throwing — every malformed or incomplete
//! frame maps to a [`Reply`] the server sends back to the originating connection only.

use serde::Serialize;
use slippi_authproxy_eventbus::QueueCommand;

/// A successfully parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// The bare text frame `"ping"`. Answered with the bare text frame `"pong"`.
    Ping,

    /// A well-formed `queue` command, ready to be emitted onto the command bus.
    Queue(QueueCommand),

    /// Stop accepting new connections; in-flight sessions are left alone.
    StopListening,
}

/// A per-connection error reply. Never broadcast — sent only to the connection that
/// sent the offending frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Reply {
    #[serde(rename = "missingArg")]
    MissingArg { what: &'static str },

    #[serde(rename = "jsonErr")]
    JsonErr,

    #[serde(rename = "unknownCommand")]
    UnknownCommand,
}

const MISSING_ARG_MESSAGE: &str = "code, timeout or discordId";

/// Parses one inbound text frame.
///
/// `"ping"` is handled before any JSON parsing is attempted, since it isn't JSON at
/// all. Everything else is parsed as a generic [`serde_json::Value`] first so that a
/// missing field can be reported as `missingArg` rather than folded into a generic
/// `jsonErr` — the two are distinct failure surfaces in the wire protocol.
pub fn parse(text: &str) -> Result<Command, Reply> {
    if text == "ping" {
        return Ok(Command::Ping);
    }

    let value: serde_json::Value = serde_json::from_str(text).map_err(|_| Reply::JsonErr)?;

    match value.get("type").and_then(serde_json::Value::as_str) {
        Some("queue") => parse_queue(&value),
        Some("stopListening") => Ok(Command::StopListening),
        _ => Err(Reply::UnknownCommand),
    }
}

fn parse_queue(value: &serde_json::Value) -> Result<Command, Reply> {
    let user_code = value.get("userCode").and_then(serde_json::Value::as_str);
    let timeout_ms = value.get("timeout").and_then(serde_json::Value::as_u64);
    let requester_id = value.get("discordId").and_then(serde_json::Value::as_u64);

    match (user_code, timeout_ms, requester_id) {
        (Some(user_code), Some(timeout_ms), Some(requester_id)) => {
            Ok(Command::Queue(QueueCommand { requester_id, target_connect_code: user_code.to_string(), timeout_ms }))
        },
        _ => Err(Reply::MissingArg { what: MISSING_ARG_MESSAGE }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_is_recognized_without_json_parsing() {
        assert_eq!(parse("ping"), Ok(Command::Ping));
    }

    #[test]
    fn queue_parses_with_all_fields_present() {
        let parsed = parse(r#"{"type":"queue","userCode":"OPP#042","timeout":30000,"discordId":7}"#).unwrap();

        assert_eq!(
            parsed,
            Command::Queue(QueueCommand { requester_id: 7, target_connect_code: "OPP#042".into(), timeout_ms: 30000 })
        );
    }

    #[test]
    fn queue_missing_a_field_is_missing_arg() {
        let err = parse(r#"{"type":"queue","userCode":"x"}"#).unwrap_err();
        assert_eq!(err, Reply::MissingArg { what: MISSING_ARG_MESSAGE });
    }

    #[test]
    fn stop_listening_parses() {
        assert_eq!(parse(r#"{"type":"stopListening"}"#).unwrap(), Command::StopListening);
    }

    #[test]
    fn unknown_type_is_unknown_command() {
        assert_eq!(parse(r#"{"type":"disconnect"}"#).unwrap_err(), Reply::UnknownCommand);
    }

    #[test]
    fn malformed_json_is_json_err() {
        assert_eq!(parse("{not json").unwrap_err(), Reply::JsonErr);
    }

    #[test]
    fn missing_type_field_is_unknown_command() {
        assert_eq!(parse(r#"{"userCode":"x"}"#).unwrap_err(), Reply::UnknownCommand);
    }

    #[test]
    fn reply_serializes_with_tag_and_fields() {
        let value = serde_json::to_value(Reply::MissingArg { what: MISSING_ARG_MESSAGE }).unwrap();
        assert_eq!(value["type"], "missingArg");
        assert_eq!(value["what"], MISSING_ARG_MESSAGE);

        assert_eq!(serde_json::to_value(Reply::JsonErr).unwrap()["type"], "jsonErr");
        assert_eq!(serde_json::to_value(Reply::UnknownCommand).unwrap()["type"], "unknownCommand");
    }
}
