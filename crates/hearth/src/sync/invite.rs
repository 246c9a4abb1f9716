//! Invite codec for joining a sync space.
//!
//! Token: URL-safe unpadded base64 of `hearth1:{room_id}:{secret}`.
//! Link: any base URL followed by `#join={token}`.

use std::fmt;
use std::sync::OnceLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::InviteError;

const TOKEN_PREFIX: &str = "hearth1";
const FRAGMENT_KEY: &str = "join";
const SECRET_BYTES: usize = 32;
const SECRET_MIN: usize = 16;
const SECRET_MAX: usize = 128;

fn room_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{8,64}$").expect("room id regex is valid"))
}

/// Credentials of one sync space.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCredentials {
    pub room_id: String,
    pub secret: String,
}

impl fmt::Debug for RoomCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomCredentials")
            .field("room_id", &self.room_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl RoomCredentials {
    /// Validated credentials.
    pub fn new(room_id: impl Into<String>, secret: impl Into<String>) -> Result<Self, InviteError> {
        let creds = Self {
            room_id: room_id.into(),
            secret: secret.into(),
        };
        creds.validate()?;
        Ok(creds)
    }

    /// Fresh space: UUID v4 room id and a 32-byte secret from the OS CSPRNG.
    pub fn generate() -> Self {
        let room_id = uuid::Uuid::new_v4().simple().to_string();
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self {
            room_id,
            secret: URL_SAFE_NO_PAD.encode(bytes),
        }
    }

    pub fn validate(&self) -> Result<(), InviteError> {
        if !room_id_regex().is_match(&self.room_id) {
            return Err(InviteError::InvalidRoomId);
        }
        let len = self.secret.chars().count();
        if !(SECRET_MIN..=SECRET_MAX).contains(&len) || self.secret.contains(':') {
            return Err(InviteError::InvalidSecret);
        }
        Ok(())
    }

    pub fn to_token(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{TOKEN_PREFIX}:{}:{}", self.room_id, self.secret))
    }

    pub fn from_token(token: &str) -> Result<Self, InviteError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| InviteError::Encoding)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| InviteError::Malformed("token is not UTF-8".to_string()))?;

        let parts: Vec<&str> = text.split(':').collect();
        let [prefix, room_id, secret] = parts.as_slice() else {
            return Err(InviteError::Malformed(format!(
                "expected 3 fields, found {}",
                parts.len()
            )));
        };
        if *prefix != TOKEN_PREFIX {
            return Err(InviteError::Malformed(format!("unknown prefix \"{prefix}\"")));
        }
        Self::new(*room_id, *secret)
    }

    /// `base` with its fragment replaced by `#join={token}`.
    pub fn to_url(&self, base: &str) -> String {
        let base = base.split('#').next().unwrap_or(base);
        format!("{base}#{FRAGMENT_KEY}={}", self.to_token())
    }

    pub fn from_url(url: &str) -> Result<Self, InviteError> {
        let (_, fragment) = url.split_once('#').ok_or(InviteError::MissingFragment)?;
        let token = fragment
            .split('&')
            .find_map(|pair| pair.strip_prefix("join="))
            .filter(|t| !t.is_empty())
            .ok_or(InviteError::MissingFragment)?;
        Self::from_token(token)
    }

    /// Accept either a full invite link or a bare token.
    pub fn parse(input: &str) -> Result<Self, InviteError> {
        let input = input.trim();
        if input.contains('#') {
            Self::from_url(input)
        } else {
            Self::from_token(input)
        }
    }
}
