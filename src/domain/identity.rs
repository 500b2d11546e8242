use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::embedding::Embedding;

pub const PAYLOAD_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub identity_id: String,
    pub display_name: String,
    pub prototypes: Vec<Embedding>,
    pub samples_count: u32,
}

impl Identity {
    pub fn centroid(&self) -> Option<Embedding> {
        crate::tools::prototypes::centroid(&self.prototypes)
    }
}

/// Row returned when listing employees.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct IdentitySummary {
    pub display_name: String,
    pub identity_id: String,
    pub samples_count: u32,
}

#[derive(Debug, Clone)]
pub struct IdentityForUpsert {
    pub identity_id: String,
    pub display_name: String,
    pub payload: PrototypePayload,
    pub photo: Option<Vec<u8>>,
}

/// Durable shape of an identity's embeddings.
///
/// Older rows hold a single raw vector, newer ones the versioned prototype set.
/// Both are read through [`PrototypePayload::decode`].
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum PrototypePayload {
    Legacy(Embedding),
    Versioned {
        version: u32,
        prototypes: Vec<Embedding>,
        centroid: Option<Embedding>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PayloadError {
    Malformed(String),
    UnsupportedShape(&'static str),
    Empty,
}

impl core::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            PayloadError::Malformed(message) => write!(f, "malformed prototype payload: {}", message),
            PayloadError::UnsupportedShape(kind) => write!(f, "unsupported prototype payload shape: {}", kind),
            PayloadError::Empty => write!(f, "prototype payload holds no prototype"),
        }
    }
}

impl std::error::Error for PayloadError {}

impl PrototypePayload {
    /// Builds the current payload shape. The centroid is always derived from `prototypes`.
    pub fn from_prototypes(prototypes: Vec<Embedding>) -> Self {
        let centroid = crate::tools::prototypes::centroid(&prototypes);
        PrototypePayload::Versioned { version: PAYLOAD_VERSION, prototypes, centroid }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| PayloadError::Malformed(e.to_string()))?;
        let payload = match value {
            Value::Array(values) => {
                let embedding: Embedding = serde_json::from_value(Value::Array(values)).map_err(|e| PayloadError::Malformed(e.to_string()))?;
                PrototypePayload::Legacy(embedding)
            }
            Value::Object(mut map) => {
                let version = match map.remove("version") {
                    Some(version) => version.as_u64().ok_or_else(|| PayloadError::Malformed(format!("invalid version {}", version)))?,
                    None => return Err(PayloadError::Malformed("missing version".into())),
                };
                if version > PAYLOAD_VERSION as u64 {
                    return Err(PayloadError::UnsupportedShape("future version"));
                }
                let version = version as u32;
                let prototypes: Vec<Embedding> = match map.remove("prototypes") {
                    Some(prototypes) => serde_json::from_value(prototypes).map_err(|e| PayloadError::Malformed(e.to_string()))?,
                    None => return Err(PayloadError::Malformed("missing prototypes".into())),
                };
                // stored centroid is ignored, it is recomputed from the prototypes
                PrototypePayload::from_prototypes(prototypes).with_version(version)
            }
            Value::Null => return Err(PayloadError::UnsupportedShape("null")),
            Value::Bool(_) => return Err(PayloadError::UnsupportedShape("bool")),
            Value::Number(_) => return Err(PayloadError::UnsupportedShape("number")),
            Value::String(_) => return Err(PayloadError::UnsupportedShape("string")),
        };
        if payload.prototypes().is_empty() || payload.prototypes().iter().any(|p| p.dim() == 0) {
            return Err(PayloadError::Empty);
        }
        Ok(payload)
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    fn with_version(self, new_version: u32) -> Self {
        match self {
            PrototypePayload::Versioned { prototypes, centroid, .. } => PrototypePayload::Versioned { version: new_version, prototypes, centroid },
            legacy => legacy,
        }
    }

    pub fn prototypes(&self) -> &[Embedding] {
        match self {
            PrototypePayload::Legacy(embedding) => std::slice::from_ref(embedding),
            PrototypePayload::Versioned { prototypes, .. } => prototypes,
        }
    }

    pub fn into_prototypes(self) -> Vec<Embedding> {
        match self {
            PrototypePayload::Legacy(embedding) => vec![embedding],
            PrototypePayload::Versioned { prototypes, .. } => prototypes,
        }
    }
}
