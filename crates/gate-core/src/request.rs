//! Verification request bodies.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::identity::GateIdentity;

/// Which request envelope the backend expects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// `{"gate_id", "token"}`
    #[default]
    Gate,
    /// Door id, timestamp, application data unit and controller info.
    ProximityTag,
}

#[derive(Debug, Serialize)]
struct GateBody<'a> {
    gate_id: &'a str,
    token: &'a str,
}

#[derive(Debug, Serialize)]
struct Apdu {
    payload_b64: String,
}

#[derive(Debug, Serialize)]
struct ControllerInfo<'a> {
    id: &'a str,
    fw: &'a str,
}

#[derive(Debug, Serialize)]
struct ProximityBody<'a> {
    door_id: &'a str,
    ts: i64,
    apdu: Apdu,
    controller_info: ControllerInfo<'a>,
}

/// One verification attempt's request. Built per attempt and discarded.
pub struct VerificationRequest<'a> {
    identity: &'a GateIdentity,
    credential: &'a Credential,
    kind: EnvelopeKind,
}

impl<'a> VerificationRequest<'a> {
    pub fn new(identity: &'a GateIdentity, credential: &'a Credential, kind: EnvelopeKind) -> Self {
        Self {
            identity,
            credential,
            kind,
        }
    }

    pub fn path(&self) -> &str {
        &self.identity.endpoint().verify_path
    }

    /// Serialize to the JSON request body.
    pub fn to_body(&self) -> Result<Bytes, serde_json::Error> {
        let json = match self.kind {
            EnvelopeKind::Gate => serde_json::to_vec(&GateBody {
                gate_id: self.identity.gate_id(),
                token: self.credential.token(),
            })?,
            EnvelopeKind::ProximityTag => serde_json::to_vec(&ProximityBody {
                door_id: self.identity.gate_id(),
                ts: self.credential.received_at().timestamp(),
                apdu: Apdu {
                    payload_b64: STANDARD.encode(self.credential.token()),
                },
                controller_info: ControllerInfo {
                    id: self.identity.controller_id(),
                    fw: self.identity.firmware(),
                },
            })?,
        };
        Ok(Bytes::from(json))
    }
}
