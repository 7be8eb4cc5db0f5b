//! Protocol messages, proof envelopes and extracted tokens
//!
//! Scope entries are a closed set: every entry is typed `zeroknowledgeproof`
//! and is either a proof (responses, credential fetch requests) or a proof
//! request (authorization requests). Anything else is rejected while decoding
//! the message.

use std::fmt;
use std::str::FromStr;

use ark_bn254::{G1Affine, G2Affine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::{decode_g1, decode_g2};
use crate::error::{DecodeError, DispatchError};

/// The only scope entry type
pub const ZERO_KNOWLEDGE_PROOF_TYPE: &str = "zeroknowledgeproof";

pub const AUTHORIZATION_REQUEST_TYPE: &str = "https://iden3-communication.io/authorization-request/v1";
pub const AUTHORIZATION_RESPONSE_TYPE: &str = "https://iden3-communication.io/authorization-response/v1";
pub const CREDENTIAL_FETCH_REQUEST_TYPE: &str =
    "https://iden3-communication.io/credential-fetch-request/v1";

/// Raw proof points as provers emit them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofData {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl ProofData {
    pub fn decode(&self) -> Result<DecodedProof, DecodeError> {
        Ok(DecodedProof {
            a: decode_g1(&self.pi_a)?,
            b: decode_g2(&self.pi_b)?,
            c: decode_g1(&self.pi_c)?,
        })
    }
}

/// Proof points decoded into curve groups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedProof {
    pub a: G1Affine,
    pub b: G2Affine,
    pub c: G1Affine,
}

/// A proof carried in a message scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroKnowledgeProof {
    #[serde(rename = "circuitId")]
    pub circuit_id: String,
    pub proof: ProofData,
    pub pub_signals: Vec<String>,
}

/// A proof request carried in an authorization request scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZeroKnowledgeProofRequest {
    #[serde(rename = "circuitId")]
    pub circuit_id: String,
    pub rules: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeEntry {
    Proof(ZeroKnowledgeProof),
    Request(ZeroKnowledgeProofRequest),
}

#[derive(Deserialize)]
struct RawScopeEntry {
    #[serde(rename = "type")]
    entry_type: String,
    #[serde(rename = "circuitId")]
    circuit_id: String,
    proof: Option<ProofData>,
    pub_signals: Option<Vec<String>>,
    rules: Option<Map<String, Value>>,
}

impl ScopeEntry {
    pub fn from_value(index: usize, value: &Value) -> Result<Self, DispatchError> {
        let raw = RawScopeEntry::deserialize(value)
            .map_err(|e| DispatchError::malformed(format!("scope entry {index}: {e}")))?;
        if raw.entry_type != ZERO_KNOWLEDGE_PROOF_TYPE {
            return Err(DispatchError::malformed(format!(
                "scope entry {index}: unsupported type {:?}",
                raw.entry_type
            )));
        }
        match (raw.proof, raw.pub_signals, raw.rules) {
            (Some(proof), Some(pub_signals), None) => Ok(Self::Proof(ZeroKnowledgeProof {
                circuit_id: raw.circuit_id,
                proof,
                pub_signals,
            })),
            (None, None, Some(rules)) => Ok(Self::Request(ZeroKnowledgeProofRequest {
                circuit_id: raw.circuit_id,
                rules,
            })),
            _ => Err(DispatchError::malformed(format!(
                "scope entry {index}: must carry either proof and pub_signals or rules"
            ))),
        }
    }

    pub fn circuit_id(&self) -> &str {
        match self {
            Self::Proof(p) => &p.circuit_id,
            Self::Request(r) => &r.circuit_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    AuthorizationRequest,
    AuthorizationResponse,
    CredentialFetchRequest,
}

impl MessageType {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::AuthorizationRequest => AUTHORIZATION_REQUEST_TYPE,
            Self::AuthorizationResponse => AUTHORIZATION_RESPONSE_TYPE,
            Self::CredentialFetchRequest => CREDENTIAL_FETCH_REQUEST_TYPE,
        }
    }

    /// Whether the scope of this message carries proofs rather than requests.
    pub fn carries_proofs(&self) -> bool {
        !matches!(self, Self::AuthorizationRequest)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

impl FromStr for MessageType {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            AUTHORIZATION_REQUEST_TYPE => Ok(Self::AuthorizationRequest),
            AUTHORIZATION_RESPONSE_TYPE => Ok(Self::AuthorizationResponse),
            CREDENTIAL_FETCH_REQUEST_TYPE => Ok(Self::CredentialFetchRequest),
            other => Err(DispatchError::malformed(format!("unsupported message type {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub audience: Option<String>,
    pub callback_url: Option<String>,
    pub scope: Vec<ZeroKnowledgeProofRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResponse {
    pub scope: Vec<ZeroKnowledgeProof>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFetchRequest {
    pub claim_id: String,
    pub schema: String,
    pub scope: Vec<ZeroKnowledgeProof>,
}

/// A decoded protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    AuthorizationRequest(AuthorizationRequest),
    AuthorizationResponse(AuthorizationResponse),
    CredentialFetchRequest(CredentialFetchRequest),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(alias = "body")]
    data: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct RawRequestData {
    audience: Option<String>,
    #[serde(rename = "callbackUrl")]
    callback_url: Option<String>,
}

#[derive(Deserialize)]
struct RawFetchData {
    #[serde(rename = "claimId")]
    claim_id: String,
    schema: String,
}

impl Message {
    pub fn from_json(json: &str) -> Result<Self, DispatchError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| DispatchError::malformed(format!("invalid JSON: {e}")))?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, DispatchError> {
        let raw = RawMessage::deserialize(value)
            .map_err(|e| DispatchError::malformed(format!("invalid message envelope: {e}")))?;
        let message_type: MessageType = raw.message_type.parse()?;
        let data = raw
            .data
            .ok_or_else(|| DispatchError::malformed("message has no data"))?;

        let entries = match data.get("scope") {
            Some(Value::Array(entries)) if !entries.is_empty() => entries,
            Some(Value::Array(_)) => return Err(DispatchError::malformed("scope is empty")),
            Some(_) => return Err(DispatchError::malformed("scope is not a list")),
            None => return Err(DispatchError::malformed("message has no scope")),
        };
        let scope = entries
            .iter()
            .enumerate()
            .map(|(i, v)| ScopeEntry::from_value(i, v))
            .collect::<Result<Vec<_>, _>>()?;

        let data = Value::Object(data);
        match message_type {
            MessageType::AuthorizationRequest => {
                let fields = RawRequestData::deserialize(&data)
                    .map_err(|e| DispatchError::malformed(format!("invalid request data: {e}")))?;
                Ok(Self::AuthorizationRequest(AuthorizationRequest {
                    audience: fields.audience,
                    callback_url: fields.callback_url,
                    scope: requests_only(message_type, scope)?,
                }))
            }
            MessageType::AuthorizationResponse => {
                Ok(Self::AuthorizationResponse(AuthorizationResponse {
                    scope: proofs_only(message_type, scope)?,
                }))
            }
            MessageType::CredentialFetchRequest => {
                let fields = RawFetchData::deserialize(&data).map_err(|e| {
                    DispatchError::malformed(format!("invalid credential fetch data: {e}"))
                })?;
                Ok(Self::CredentialFetchRequest(CredentialFetchRequest {
                    claim_id: fields.claim_id,
                    schema: fields.schema,
                    scope: proofs_only(message_type, scope)?,
                }))
            }
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::AuthorizationRequest(_) => MessageType::AuthorizationRequest,
            Self::AuthorizationResponse(_) => MessageType::AuthorizationResponse,
            Self::CredentialFetchRequest(_) => MessageType::CredentialFetchRequest,
        }
    }

    /// Proofs carried by the message; empty for authorization requests.
    pub fn proofs(&self) -> &[ZeroKnowledgeProof] {
        match self {
            Self::AuthorizationRequest(_) => &[],
            Self::AuthorizationResponse(m) => &m.scope,
            Self::CredentialFetchRequest(m) => &m.scope,
        }
    }
}

fn proofs_only(
    message_type: MessageType,
    scope: Vec<ScopeEntry>,
) -> Result<Vec<ZeroKnowledgeProof>, DispatchError> {
    scope
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            ScopeEntry::Proof(proof) => Ok(proof),
            ScopeEntry::Request(_) => Err(DispatchError::malformed(format!(
                "scope entry {i}: {message_type} must carry proofs, found a proof request"
            ))),
        })
        .collect()
}

fn requests_only(
    message_type: MessageType,
    scope: Vec<ScopeEntry>,
) -> Result<Vec<ZeroKnowledgeProofRequest>, DispatchError> {
    scope
        .into_iter()
        .enumerate()
        .map(|(i, entry)| match entry {
            ScopeEntry::Request(request) => Ok(request),
            ScopeEntry::Proof(_) => Err(DispatchError::malformed(format!(
                "scope entry {i}: {message_type} must carry proof requests, found a proof"
            ))),
        })
        .collect()
}

/// Normalized output of a successful verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedToken {
    pub challenge: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(rename = "claimID", default, skip_serializing_if = "Option::is_none")]
    pub claim_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_schema: Option<String>,
}
