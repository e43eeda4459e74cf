//! Verification outcomes and backend reply classification.

use serde::Deserialize;

/// Decision value the backend uses for approval.
pub const APPROVAL_MARKER: &str = "ALLOW";

/// Why a verification produced no decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The network path never came up, or the backend could not be reached.
    NetworkUnavailable,
    /// The request exceeded its deadline.
    Timeout,
    /// The backend answered with a non-200 status.
    HttpStatus(u16),
    /// 200, but no decision could be read from the body.
    MalformedResponse,
}

impl ErrorKind {
    /// Short text for the second display line.
    pub fn display_reason(&self) -> String {
        match self {
            ErrorKind::NetworkUnavailable => "Wi-Fi fail".to_string(),
            ErrorKind::Timeout => "Timeout".to_string(),
            ErrorKind::HttpStatus(code) => format!("HTTP {}", code),
            ErrorKind::MalformedResponse => "Bad reply".to_string(),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NetworkUnavailable => write!(f, "network unavailable"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::HttpStatus(code) => write!(f, "http status {}", code),
            ErrorKind::MalformedResponse => write!(f, "malformed response"),
        }
    }
}

/// Outcome of one verification cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationResult {
    Allow,
    /// Explicit backend denial, with the backend's reason (possibly empty).
    Deny(String),
    Error { kind: ErrorKind, detail: String },
}

impl VerificationResult {
    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        VerificationResult::Error {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, VerificationResult::Allow)
    }

    /// Label for structured logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            VerificationResult::Allow => "allow",
            VerificationResult::Deny(_) => "deny",
            VerificationResult::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Deserialize)]
struct DecisionBody {
    decision: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<serde_json::Value>,
}

/// Map a backend reply onto a verification result.
pub fn classify_reply(status: u16, body: &[u8]) -> VerificationResult {
    if status != 200 {
        return VerificationResult::error(
            ErrorKind::HttpStatus(status),
            format!("backend returned {}", status),
        );
    }

    let parsed: DecisionBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => {
            return VerificationResult::error(ErrorKind::MalformedResponse, e.to_string());
        }
    };

    let decision = match parsed.decision {
        Some(serde_json::Value::String(d)) => d,
        _ => {
            return VerificationResult::error(ErrorKind::MalformedResponse, "missing decision");
        }
    };

    if decision == APPROVAL_MARKER {
        VerificationResult::Allow
    } else {
        let reason = match parsed.reason {
            Some(serde_json::Value::String(r)) => r,
            _ => String::new(),
        };
        VerificationResult::Deny(reason)
    }
}
