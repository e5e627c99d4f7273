use serde::{Deserialize, Serialize};

use chatr_common::{Error, Result};

/// Outcome of one pop-or-push round, and the record published to the
/// match-result topic when a pair forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub matched: bool,
    pub user_id: u64,
    pub peer_id: u64,
    pub channel_id: u64,
    pub access_token: String,
}

impl MatchResult {
    #[must_use]
    pub fn unmatched(user_id: u64) -> Self {
        Self {
            matched: false,
            user_id,
            peer_id: 0,
            channel_id: 0,
            access_token: String::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::message(format!("encode match result: {e}")))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::message(format!("decode match result: {e}")))
    }

    /// Only the access token crosses the match websocket.
    #[must_use]
    pub fn to_presenter(&self) -> MatchResultDto {
        MatchResultDto {
            access_token: self.access_token.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResultDto {
    pub access_token: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: u64,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_round_trips_through_the_broker_encoding() {
        let result = MatchResult {
            matched: true,
            user_id: 100,
            peer_id: 200,
            channel_id: 9,
            access_token: "tok".into(),
        };
        let decoded = MatchResult::decode(&result.encode().expect("encode")).expect("decode");
        assert!(decoded.matched);
        assert_eq!(decoded.peer_id, 200);
    }

    #[test]
    fn presenter_exposes_only_the_token() {
        let result = MatchResult {
            matched: true,
            user_id: 100,
            peer_id: 200,
            channel_id: 9,
            access_token: "tok".into(),
        };
        let json = serde_json::to_value(result.to_presenter()).expect("serialize");
        assert_eq!(json, serde_json::json!({"accessToken": "tok"}));
    }
}
