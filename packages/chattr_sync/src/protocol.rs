//! Session Socket Protocol
//!
//! Frames exchanged with the agentchattr server over `/ws`. Inbound frames are
//! JSON objects tagged by `type`; each decodes into exactly one
//! [`InboundEvent`] or a [`DecodeError`] that the caller drops.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Literal sender name the server uses for its own notices.
pub const SYSTEM_SENDER: &str = "system";

const KNOWN_TYPES: &[&str] = &["message", "agents", "settings", "status", "typing", "clear"];

/// A validated inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(MessageEvent),
    /// Full roster, in server order. Replaces whatever the client had.
    Agents(Vec<AgentEntry>),
    Settings(SettingsEvent),
    /// Liveness per handle. Agents missing from the map keep their status.
    Status(HashMap<String, Liveness>),
    Typing { agent: String, active: bool },
    Clear,
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Message(_) => "message",
            InboundEvent::Agents(_) => "agents",
            InboundEvent::Settings(_) => "settings",
            InboundEvent::Status(_) => "status",
            InboundEvent::Typing { .. } => "typing",
            InboundEvent::Clear => "clear",
        }
    }
}

/// Who authored a message, relative to the local participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageEvent {
    /// Server-assigned identifier, normalized to a string. `None` when the
    /// frame omitted it (or sent an empty string).
    pub id: Option<String>,
    pub sender: Option<String>,
    pub text: String,
    /// Pre-formatted display time.
    pub time: Option<String>,
    /// The payload carried an explicit `type: "system"`.
    pub declared_system: bool,
}

impl MessageEvent {
    /// Classify against the current local username.
    ///
    /// Returns the kind and, for agent messages, the lowercased sender handle.
    pub fn classify(&self, username: &str) -> (MessageKind, Option<String>) {
        let sender = match self.sender.as_deref() {
            None | Some("") => return (MessageKind::System, None),
            Some(sender) => sender,
        };
        if self.declared_system || sender == SYSTEM_SENDER {
            return (MessageKind::System, None);
        }
        if sender.to_lowercase() == username.to_lowercase() {
            return (MessageKind::User, None);
        }
        (MessageKind::Agent, Some(sender.to_lowercase()))
    }
}

/// One roster entry from an `agents` frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentEntry {
    /// Lowercased handle.
    pub handle: String,
    pub label: Option<String>,
    pub color: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SettingsEvent {
    pub username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Liveness {
    #[serde(default)]
    pub busy: bool,
    #[serde(default)]
    pub available: bool,
}

// =============================================================================
// Raw wire shapes
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    sender: Option<String>,
    text: String,
    #[serde(default)]
    time: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct RawAgentConfig {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Deserialize)]
struct RawSettings {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawFrame {
    Message {
        data: RawMessage,
    },
    Agents {
        data: serde_json::Map<String, serde_json::Value>,
    },
    Settings {
        data: RawSettings,
    },
    Status {
        data: serde_json::Map<String, serde_json::Value>,
    },
    Typing {
        agent: String,
        #[serde(default)]
        active: bool,
    },
    Clear,
}

/// Decode one inbound text frame.
pub fn decode_frame(text: &str) -> Result<InboundEvent, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(DecodeError::Json)?;

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::MissingType)?
        .to_string();
    if !KNOWN_TYPES.contains(&kind.as_str()) {
        return Err(DecodeError::UnknownType(kind));
    }

    let raw: RawFrame = serde_json::from_value(value).map_err(|source| DecodeError::Payload {
        kind: kind.clone(),
        source,
    })?;

    let event = match raw {
        RawFrame::Message { data } => InboundEvent::Message(MessageEvent {
            id: data.id.and_then(|id| match id {
                RawId::Text(s) if s.is_empty() => None,
                RawId::Text(s) => Some(s),
                RawId::Number(n) => Some(n.to_string()),
            }),
            sender: data.sender,
            text: data.text,
            time: data.time.filter(|t| !t.is_empty()),
            declared_system: data.kind.as_deref() == Some(SYSTEM_SENDER),
        }),
        RawFrame::Agents { data } => {
            let mut seen = HashSet::new();
            let mut roster = Vec::with_capacity(data.len());
            for (name, cfg) in data {
                let cfg: RawAgentConfig = serde_json::from_value(cfg)
                    .map_err(|source| DecodeError::Payload {
                        kind: kind.clone(),
                        source,
                    })?;
                let handle = name.to_lowercase();
                // "Claude" and "claude" collapse to one handle; first wins.
                if !seen.insert(handle.clone()) {
                    continue;
                }
                roster.push(AgentEntry {
                    handle,
                    label: cfg.label.filter(|l| !l.is_empty()),
                    color: cfg.color.filter(|c| !c.is_empty()),
                    role: cfg.role.filter(|r| !r.is_empty()),
                });
            }
            InboundEvent::Agents(roster)
        }
        RawFrame::Settings { data } => InboundEvent::Settings(SettingsEvent {
            username: data.username.filter(|u| !u.is_empty()),
        }),
        RawFrame::Status { data } => {
            let mut map = HashMap::with_capacity(data.len());
            for (name, liveness) in data {
                let liveness: Liveness = serde_json::from_value(liveness)
                    .map_err(|source| DecodeError::Payload {
                        kind: kind.clone(),
                        source,
                    })?;
                // Same collapsing rule as the roster: first spelling wins.
                map.entry(name.to_lowercase()).or_insert(liveness);
            }
            InboundEvent::Status(map)
        }
        RawFrame::Typing { agent, active } => InboundEvent::Typing {
            agent: agent.to_lowercase(),
            active,
        },
        RawFrame::Clear => InboundEvent::Clear,
    };
    Ok(event)
}

/// Frames sent FROM the client TO the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundFrame {
    Message { text: String, sender: String },
}

impl OutboundFrame {
    pub fn message(text: impl Into<String>, sender: impl Into<String>) -> Self {
        OutboundFrame::Message {
            text: text.into(),
            sender: sender.into(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> Result<InboundEvent, DecodeError> {
        decode_frame(&value.to_string())
    }

    fn message(sender: Option<&str>) -> MessageEvent {
        MessageEvent {
            id: Some("1".into()),
            sender: sender.map(str::to_string),
            text: "hi".into(),
            ..Default::default()
        }
    }

    // ── message ─────────────────────────────────────────────────────────

    #[test]
    fn decodes_message_with_string_id() {
        let event = decode(json!({
            "type": "message",
            "data": {"id": "x1", "sender": "alice", "text": "hi", "time": "09:00"}
        }))
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::Message(MessageEvent {
                id: Some("x1".into()),
                sender: Some("alice".into()),
                text: "hi".into(),
                time: Some("09:00".into()),
                declared_system: false,
            })
        );
    }

    #[test]
    fn numeric_id_is_normalized_to_string() {
        let event = decode(json!({
            "type": "message",
            "data": {"id": 42, "sender": "codex", "text": "done", "attachments": []}
        }))
        .unwrap();
        match event {
            InboundEvent::Message(m) => assert_eq!(m.id.as_deref(), Some("42")),
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    #[test]
    fn empty_id_and_time_are_treated_as_missing() {
        let event = decode(json!({
            "type": "message",
            "data": {"id": "", "text": "boot", "time": ""}
        }))
        .unwrap();
        match event {
            InboundEvent::Message(m) => {
                assert!(m.id.is_none());
                assert!(m.time.is_none());
            }
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    #[test]
    fn message_without_text_is_rejected() {
        let err = decode(json!({"type": "message", "data": {"id": "1", "sender": "a"}}));
        assert!(matches!(err, Err(DecodeError::Payload { .. })));
    }

    #[test]
    fn message_with_wrong_id_type_is_rejected() {
        let err = decode(json!({"type": "message", "data": {"id": true, "text": "x"}}));
        assert!(matches!(err, Err(DecodeError::Payload { .. })));
    }

    #[test]
    fn explicit_system_kind_is_recorded() {
        let event = decode(json!({
            "type": "message",
            "data": {"id": 3, "sender": "alice", "text": "joined", "type": "system"}
        }))
        .unwrap();
        match event {
            InboundEvent::Message(m) => assert!(m.declared_system),
            other => panic!("Expected Message, got {other:?}"),
        }
    }

    // ── classification ──────────────────────────────────────────────────

    #[test]
    fn missing_sender_is_system() {
        assert_eq!(message(None).classify("ben"), (MessageKind::System, None));
        assert_eq!(message(Some("")).classify("ben"), (MessageKind::System, None));
    }

    #[test]
    fn literal_system_sender_is_system() {
        assert_eq!(
            message(Some("system")).classify("ben"),
            (MessageKind::System, None)
        );
    }

    #[test]
    fn declared_system_wins_over_sender() {
        let mut m = message(Some("ben"));
        m.declared_system = true;
        assert_eq!(m.classify("ben"), (MessageKind::System, None));
    }

    #[test]
    fn own_username_is_user_case_insensitively() {
        assert_eq!(message(Some("Ben")).classify("ben"), (MessageKind::User, None));
        assert_eq!(message(Some("ben")).classify("BEN"), (MessageKind::User, None));
    }

    #[test]
    fn anyone_else_is_agent_with_lowercased_handle() {
        assert_eq!(
            message(Some("Claude")).classify("ben"),
            (MessageKind::Agent, Some("claude".to_string()))
        );
    }

    // ── agents ──────────────────────────────────────────────────────────

    #[test]
    fn agents_keep_server_order_and_lowercase_handles() {
        let frame = r##"{"type":"agents","data":{"Zed":{"label":"Zed Agent"},"alice":{"color":"#da7756"},"Bob":{}}}"##;
        let event = decode_frame(frame).unwrap();
        let InboundEvent::Agents(roster) = event else {
            panic!("Expected Agents");
        };
        let handles: Vec<_> = roster.iter().map(|a| a.handle.as_str()).collect();
        assert_eq!(handles, vec!["zed", "alice", "bob"]);
        assert_eq!(roster[0].label.as_deref(), Some("Zed Agent"));
        assert_eq!(roster[1].color.as_deref(), Some("#da7756"));
        assert!(roster[2].label.is_none());
    }

    #[test]
    fn duplicate_handles_after_normalization_keep_first() {
        let frame = r#"{"type":"agents","data":{"Claude":{"label":"First"},"claude":{"label":"Second"}}}"#;
        let InboundEvent::Agents(roster) = decode_frame(frame).unwrap() else {
            panic!("Expected Agents");
        };
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].label.as_deref(), Some("First"));
    }

    #[test]
    fn agents_with_non_object_config_is_rejected() {
        let err = decode(json!({"type": "agents", "data": {"alice": 5}}));
        assert!(matches!(err, Err(DecodeError::Payload { .. })));
    }

    // ── settings / status / typing / clear ──────────────────────────────

    #[test]
    fn settings_ignores_unrelated_keys() {
        let event = decode(json!({
            "type": "settings",
            "data": {"username": "ben", "title": "room", "max_agent_hops": 4}
        }))
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::Settings(SettingsEvent {
                username: Some("ben".into())
            })
        );
    }

    #[test]
    fn status_defaults_missing_flags_to_false() {
        let event = decode(json!({
            "type": "status",
            "data": {"Alice": {"busy": true}, "bob": {}}
        }))
        .unwrap();
        let InboundEvent::Status(map) = event else {
            panic!("Expected Status");
        };
        assert_eq!(
            map["alice"],
            Liveness {
                busy: true,
                available: false
            }
        );
        assert_eq!(map["bob"], Liveness::default());
    }

    #[test]
    fn status_keys_differing_in_case_keep_the_first() {
        let event = decode(json!({
            "type": "status",
            "data": {
                "Alice": {"busy": true, "available": true},
                "alice": {"busy": false, "available": false}
            }
        }))
        .unwrap();
        let InboundEvent::Status(map) = event else {
            panic!("Expected Status");
        };
        assert_eq!(map.len(), 1);
        assert_eq!(
            map["alice"],
            Liveness {
                busy: true,
                available: true
            }
        );

        let event = decode(json!({
            "type": "status",
            "data": {
                "alice": {"available": true},
                "ALICE": {"busy": true}
            }
        }))
        .unwrap();
        let InboundEvent::Status(map) = event else {
            panic!("Expected Status");
        };
        assert_eq!(
            map["alice"],
            Liveness {
                busy: false,
                available: true
            }
        );
    }

    #[test]
    fn status_with_wrong_flag_type_is_rejected() {
        let err = decode(json!({"type": "status", "data": {"alice": {"busy": "yes"}}}));
        assert!(matches!(err, Err(DecodeError::Payload { .. })));
    }

    #[test]
    fn typing_reads_sibling_fields() {
        let event = decode(json!({"type": "typing", "agent": "Codex", "active": true})).unwrap();
        assert_eq!(
            event,
            InboundEvent::Typing {
                agent: "codex".into(),
                active: true
            }
        );
    }

    #[test]
    fn typing_without_agent_is_rejected() {
        let err = decode(json!({"type": "typing", "active": true}));
        assert!(matches!(err, Err(DecodeError::Payload { .. })));
    }

    #[test]
    fn clear_needs_no_payload() {
        assert_eq!(decode(json!({"type": "clear"})).unwrap(), InboundEvent::Clear);
    }

    // ── malformed ───────────────────────────────────────────────────────

    #[test]
    fn unknown_type_is_reported() {
        let err = decode(json!({"type": "log", "data": {}}));
        assert!(matches!(err, Err(DecodeError::UnknownType(t)) if t == "log"));
    }

    #[test]
    fn missing_type_is_reported() {
        assert!(matches!(
            decode(json!({"data": {}})),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(decode(json!([1, 2])), Err(DecodeError::MissingType)));
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(decode_frame("{not json"), Err(DecodeError::Json(_))));
    }

    // ── outbound ────────────────────────────────────────────────────────

    #[test]
    fn outbound_message_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&OutboundFrame::message("hello", "ben").encode().unwrap())
                .unwrap();
        assert_eq!(json, json!({"type": "message", "text": "hello", "sender": "ben"}));
    }
}
