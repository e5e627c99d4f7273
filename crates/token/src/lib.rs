//! Channel access tokens.
//!
//! A token is the sole capability proving channel membership when a client
//! establishes a websocket: an HMAC-SHA256 JWT carrying the channel id and
//! an expiry. Expired and tampered tokens are distinct failures so handlers
//! can report `token expired` separately from `invalid token`.

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("token expired")]
    Expired,

    #[error("invalid token")]
    Invalid,
}

impl From<Error> for chatr_common::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::Expired => Self::TokenExpired,
            Error::Invalid => Self::InvalidToken,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    channel_id: u64,
    exp: u64,
}

/// Mints and verifies channel access tokens against a shared secret.
pub struct AccessTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiration_second: u64,
    validation: Validation,
}

impl AccessTokens {
    #[must_use]
    pub fn new(secret: &str, expiration_second: u64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is exact: no clock leeway.
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiration_second,
            validation,
        }
    }

    /// Mint a token granting access to `channel_id` until the configured
    /// expiry from now.
    pub fn mint(&self, channel_id: u64) -> Result<String> {
        self.mint_at(channel_id, now_secs() + self.expiration_second)
    }

    /// Verify a token and return the channel id it grants access to.
    pub fn verify(&self, token: &str) -> Result<u64> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(data.claims.channel_id),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(Error::Expired),
                _ => Err(Error::Invalid),
            },
        }
    }

    fn mint_at(&self, channel_id: u64, exp: u64) -> Result<String> {
        let claims = Claims { channel_id, exp };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).map_err(|_| Error::Invalid)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_tokens_verify() {
        let tokens = AccessTokens::new("mysecret", 60);
        let token = tokens.mint(42).expect("mint");
        assert_eq!(tokens.verify(&token), Ok(42));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let tokens = AccessTokens::new("mysecret", 60);
        let token = tokens.mint_at(42, now_secs() - 10).expect("mint");
        assert_eq!(tokens.verify(&token), Err(Error::Expired));
    }

    #[test]
    fn wrong_secret_is_invalid_not_expired() {
        let minter = AccessTokens::new("mysecret", 60);
        let verifier = AccessTokens::new("othersecret", 60);
        let token = minter.mint(42).expect("mint");
        assert_eq!(verifier.verify(&token), Err(Error::Invalid));
    }

    #[test]
    fn tampered_claims_invalidate_the_token() {
        let tokens = AccessTokens::new("mysecret", 60);
        let token = tokens.mint(42).expect("mint");

        // Swap in a forged payload claiming a different channel, keeping the
        // original signature.
        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);
        let forged_claims = {
            use base64_fallback::encode_url_safe_no_pad;
            let json = format!(
                "{{\"channel_id\":{},\"exp\":{}}}",
                43,
                now_secs() + 60
            );
            encode_url_safe_no_pad(json.as_bytes())
        };
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);
        assert_eq!(tokens.verify(&forged), Err(Error::Invalid));
    }

    #[test]
    fn garbage_is_invalid() {
        let tokens = AccessTokens::new("mysecret", 60);
        assert_eq!(tokens.verify("not-a-token"), Err(Error::Invalid));
        assert_eq!(tokens.verify(""), Err(Error::Invalid));
    }

    /// Minimal URL-safe base64 for the tamper test, so the crate itself
    /// doesn't need a base64 dependency.
    mod base64_fallback {
        const ALPHABET: &[u8; 64] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

        pub fn encode_url_safe_no_pad(input: &[u8]) -> String {
            let mut out = String::new();
            for chunk in input.chunks(3) {
                let b = [
                    chunk[0],
                    chunk.get(1).copied().unwrap_or(0),
                    chunk.get(2).copied().unwrap_or(0),
                ];
                let n = (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]);
                out.push(ALPHABET[(n >> 18) as usize & 63] as char);
                out.push(ALPHABET[(n >> 12) as usize & 63] as char);
                if chunk.len() > 1 {
                    out.push(ALPHABET[(n >> 6) as usize & 63] as char);
                }
                if chunk.len() > 2 {
                    out.push(ALPHABET[n as usize & 63] as char);
                }
            }
            out
        }
    }
}
