use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Message kinds, encoded as their numeric code on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Text,
    Action,
    Seen,
    File,
}

impl Event {
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Text => 0,
            Self::Action => 1,
            Self::Seen => 2,
            Self::File => 3,
        }
    }

    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Text),
            1 => Some(Self::Action),
            2 => Some(Self::Seen),
            3 => Some(Self::File),
            _ => None,
        }
    }

    /// Only TEXT and FILE messages are persisted; ACTION and SEEN are
    /// transient control messages.
    #[must_use]
    pub fn is_persisted(self) -> bool {
        matches!(self, Self::Text | Self::File)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        Self::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown event code {code}")))
    }
}

/// Fixed payloads of ACTION messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Waiting,
    Joined,
    IsTyping,
    EndTyping,
    Offline,
    Leaved,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Joined => "joined",
            Self::IsTyping => "istyping",
            Self::EndTyping => "endtyping",
            Self::Offline => "offline",
            Self::Leaved => "leaved",
        }
    }

    #[must_use]
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload {
            "waiting" => Some(Self::Waiting),
            "joined" => Some(Self::Joined),
            "istyping" => Some(Self::IsTyping),
            "endtyping" => Some(Self::EndTyping),
            "offline" => Some(Self::Offline),
            "leaved" => Some(Self::Leaved),
            _ => None,
        }
    }
}

/// A channel message as it flows through the broker and the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: u64,
    pub event: Event,
    pub channel_id: u64,
    pub user_id: u64,
    pub payload: String,
    #[serde(default)]
    pub seen: bool,
    pub time: i64,
}

impl Message {
    pub fn encode(&self) -> chatr_common::Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| chatr_common::Error::message(format!("encode message: {e}")))
    }

    pub fn decode(data: &[u8]) -> chatr_common::Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| chatr_common::Error::message(format!("decode message: {e}")))
    }
}

/// An ephemeral two-party channel and the capability to join it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: u64,
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_codes_round_trip() {
        for event in [Event::Text, Event::Action, Event::Seen, Event::File] {
            assert_eq!(Event::from_code(event.code()), Some(event));
        }
        assert_eq!(Event::from_code(4), None);
    }

    #[test]
    fn only_text_and_file_are_persisted() {
        assert!(Event::Text.is_persisted());
        assert!(Event::File.is_persisted());
        assert!(!Event::Action.is_persisted());
        assert!(!Event::Seen.is_persisted());
    }

    #[test]
    fn message_json_uses_numeric_event() {
        let message = Message {
            message_id: 1,
            event: Event::Text,
            channel_id: 2,
            user_id: 3,
            payload: "hi".into(),
            seen: false,
            time: 1000,
        };
        let value: serde_json::Value =
            serde_json::from_slice(&message.encode().expect("encode")).expect("parse");
        assert_eq!(value["event"], 0);
        assert_eq!(value["channelId"], 2);

        let decoded = Message::decode(&message.encode().expect("encode")).expect("decode");
        assert_eq!(decoded.event, Event::Text);
        assert_eq!(decoded.payload, "hi");
    }

    #[test]
    fn action_payloads_are_fixed() {
        assert_eq!(Action::from_payload("istyping"), Some(Action::IsTyping));
        assert_eq!(Action::from_payload("shrug"), None);
        assert_eq!(Action::Offline.as_str(), "offline");
    }
}
