//! Credentials presented at the gate.

use chrono::{DateTime, Utc};

/// Where a credential came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// Characteristic write over the short-range transport.
    ShortRange,
    /// Proximity tag read.
    ProximityTag,
}

impl std::fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::ShortRange => write!(f, "short-range"),
            CredentialSource::ProximityTag => write!(f, "proximity-tag"),
        }
    }
}

/// An opaque token awaiting verification.
///
/// The token is always trimmed and non-empty. A credential is consumed by a
/// single verification cycle and not retained afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    token: String,
    source: CredentialSource,
    received_at: DateTime<Utc>,
}

impl Credential {
    /// Build a credential from a raw delivery.
    ///
    /// Returns `None` when the payload is empty after trimming whitespace.
    pub fn from_raw(raw: &[u8], source: CredentialSource) -> Option<Self> {
        Self::from_raw_at(raw, source, Utc::now())
    }

    pub fn from_raw_at(raw: &[u8], source: CredentialSource, received_at: DateTime<Utc>) -> Option<Self> {
        let text = String::from_utf8_lossy(raw);
        let token = text.trim();
        if token.is_empty() {
            return None;
        }
        Some(Self {
            token: token.to_string(),
            source,
            received_at,
        })
    }

    /// Credential for a proximity tag, rendered as zero-padded lowercase hex of its UID.
    pub fn from_tag_uid(uid: &[u8]) -> Option<Self> {
        if uid.is_empty() {
            return None;
        }
        Self::from_raw(hex::encode(uid).as_bytes(), CredentialSource::ProximityTag)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Short form safe for logs: first and last four characters.
    pub fn preview(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}…{}", head, tail)
    }
}
