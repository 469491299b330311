//! Wire frames exchanged with the agent.
//!
//! Bodies are opaque bytes and travel base64-encoded inside the JSON line.
//! There is no correlation identifier: the n-th response answers the n-th
//! request.

use serde::{Deserialize, Serialize};

use crate::models::{Reply, WorkUnit};

/// Request frame (bridge → agent).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestFrame {
    /// Operation label.
    pub path: String,
    /// Opaque payload.
    #[serde(with = "body_base64", default)]
    pub body: Vec<u8>,
}

/// Response frame (agent → bridge).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Agent status code.
    pub status: i32,
    /// Opaque payload.
    #[serde(with = "body_base64", default)]
    pub body: Vec<u8>,
}

impl From<&WorkUnit> for RequestFrame {
    fn from(unit: &WorkUnit) -> Self {
        Self {
            path: unit.path.clone(),
            body: unit.body.clone(),
        }
    }
}

impl From<RequestFrame> for WorkUnit {
    fn from(frame: RequestFrame) -> Self {
        Self::new(frame.path, frame.body)
    }
}

impl From<Reply> for ResponseFrame {
    fn from(reply: Reply) -> Self {
        Self {
            status: reply.status,
            body: reply.body,
        }
    }
}

impl From<ResponseFrame> for Reply {
    fn from(frame: ResponseFrame) -> Self {
        Self::new(frame.status, frame.body)
    }
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
