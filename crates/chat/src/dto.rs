//! Presenter DTOs. Ids are strings on the HTTP/websocket surface so
//! 64-bit values survive JavaScript number precision.

use serde::{Deserialize, Serialize};

use chatr_common::{Error, Result};

use crate::domain::{Event, Message};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    #[serde(default)]
    pub message_id: String,
    pub event: Event,
    pub user_id: String,
    pub payload: String,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub time: i64,
}

impl MessageDto {
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|_| Error::InvalidParam)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::message(format!("encode message dto: {e}")))
    }

    /// Parse the client-supplied user id. The client's `messageId` and
    /// `time` are ignored; the server mints both, and the channel comes
    /// from the access token, never from the frame.
    pub fn user_id(&self) -> Result<u64> {
        self.user_id.parse().map_err(|_| Error::InvalidParam)
    }
}

impl Message {
    #[must_use]
    pub fn to_presenter(&self) -> MessageDto {
        MessageDto {
            message_id: self.message_id.to_string(),
            event: self.event,
            user_id: self.user_id.to_string(),
            payload: self.payload.clone(),
            seen: self.seen,
            time: self.time,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesDto {
    pub next_page_state: String,
    pub messages: Vec<MessageDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdsDto {
    pub user_ids: Vec<String>,
}
