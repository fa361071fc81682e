use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Represents a full message received or sent over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: ChannelEvent,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub message_ref: Value, // string or null
}

/// Events carried on the wire, both store notifications and socket control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEvent {
    /// Whole document at the subscribed path.
    Value,
    ChildAdded,
    ChildRemoved,
    ChildChanged,

    #[serde(rename = "phx_join")]
    PhoenixJoin,
    #[serde(rename = "phx_leave")]
    PhoenixLeave,
    #[serde(rename = "phx_reply")]
    PhoenixReply,
    #[serde(rename = "phx_error")]
    PhoenixError,
    #[serde(rename = "phx_close")]
    PhoenixClose,

    Heartbeat,
}

impl ChannelEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::ChildAdded => "child_added",
            Self::ChildRemoved => "child_removed",
            Self::ChildChanged => "child_changed",
            Self::PhoenixJoin => "phx_join",
            Self::PhoenixLeave => "phx_leave",
            Self::PhoenixReply => "phx_reply",
            Self::PhoenixError => "phx_error",
            Self::PhoenixClose => "phx_close",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which notifications a subscription asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// One `Value` event per change, carrying the whole document.
    Value,
    /// Granular `ChildAdded` / `ChildRemoved` / `ChildChanged` events.
    Children,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Children => "children",
        }
    }

    /// Events delivered to subscribers of this kind.
    pub fn events(&self) -> &'static [ChannelEvent] {
        match self {
            Self::Value => &[ChannelEvent::Value],
            Self::Children => &[
                ChannelEvent::ChildAdded,
                ChannelEvent::ChildRemoved,
                ChannelEvent::ChildChanged,
            ],
        }
    }

    /// Topic used on the socket for a path, e.g. `children:especiales`.
    pub fn topic(&self, path: &str) -> String {
        format!("{}:{}", self.as_str(), path.trim_matches('/'))
    }
}

/// A single child of the subscribed path.
///
/// `key` is the child's key under the path. Array-shaped documents use the
/// element index as key, so it doubles as a position hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSnapshot {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "prevKey", default, skip_serializing_if = "Option::is_none")]
    pub prev_key: Option<String>,
}

impl ChildSnapshot {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            prev_key: None,
        }
    }

    /// The key parsed as an array index, if it is one.
    pub fn position(&self) -> Option<usize> {
        self.key.parse().ok()
    }
}

/// A change notification for one subscribed path.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Value(Value),
    ChildAdded(ChildSnapshot),
    ChildRemoved(ChildSnapshot),
    ChildChanged(ChildSnapshot),
}

impl ChangeEvent {
    pub fn event(&self) -> ChannelEvent {
        match self {
            Self::Value(_) => ChannelEvent::Value,
            Self::ChildAdded(_) => ChannelEvent::ChildAdded,
            Self::ChildRemoved(_) => ChannelEvent::ChildRemoved,
            Self::ChildChanged(_) => ChannelEvent::ChildChanged,
        }
    }

    /// Decode a wire payload. Returns `None` for control events.
    pub fn from_wire(
        event: ChannelEvent,
        payload: Value,
    ) -> Option<Result<Self, serde_json::Error>> {
        let decoded = match event {
            ChannelEvent::Value => Ok(Self::Value(
                payload.get("value").cloned().unwrap_or(Value::Null),
            )),
            ChannelEvent::ChildAdded => serde_json::from_value(payload).map(Self::ChildAdded),
            ChannelEvent::ChildRemoved => serde_json::from_value(payload).map(Self::ChildRemoved),
            ChannelEvent::ChildChanged => serde_json::from_value(payload).map(Self::ChildChanged),
            _ => return None,
        };
        Some(decoded)
    }

    /// Encode as a wire payload, the inverse of [`ChangeEvent::from_wire`].
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Value(value) => serde_json::json!({ "value": value }),
            Self::ChildAdded(child) | Self::ChildRemoved(child) | Self::ChildChanged(child) => {
                serde_json::to_value(child).unwrap_or(Value::Null)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_child_added_message() {
        let raw = json!({
            "topic": "children:especiales",
            "event": "child_added",
            "payload": { "key": "2", "value": { "id_price": 3 }, "prevKey": "1" },
            "ref": null
        });
        let message: RealtimeMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(message.event, ChannelEvent::ChildAdded);

        let event = ChangeEvent::from_wire(message.event, message.payload)
            .unwrap()
            .unwrap();
        match event {
            ChangeEvent::ChildAdded(child) => {
                assert_eq!(child.position(), Some(2));
                assert_eq!(child.prev_key.as_deref(), Some("1"));
                assert_eq!(child.value["id_price"], 3);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_control_events_are_not_changes() {
        assert!(ChangeEvent::from_wire(ChannelEvent::PhoenixReply, json!({})).is_none());
        assert!(ChangeEvent::from_wire(ChannelEvent::Heartbeat, json!({})).is_none());
    }

    #[test]
    fn test_event_display_matches_wire_name() {
        assert_eq!(ChannelEvent::ChildChanged.to_string(), "child_changed");
        assert_eq!(
            serde_json::to_value(ChannelEvent::PhoenixJoin).unwrap(),
            json!("phx_join")
        );
    }

    #[test]
    fn test_topic_for_path() {
        assert_eq!(SubscriptionKind::Value.topic("/products/"), "value:products");
        assert_eq!(SubscriptionKind::Children.events().len(), 3);
    }

    #[test]
    fn test_non_numeric_key_has_no_position() {
        let child = ChildSnapshot::new("-Nx81", json!({}));
        assert_eq!(child.position(), None);
    }
}
