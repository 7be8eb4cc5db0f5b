//! Circuit verifier registry
//!
//! One [`CircuitVerifier`] per supported circuit kind, selected through an
//! explicit table keyed by [`CircuitId`]. The registry is built once and is
//! immutable afterwards, so it can be shared across concurrent verifications.

mod atomic_mtp;
mod auth;
mod kyc;

pub use atomic_mtp::{
    AtomicQueryMtpPubSignals, AtomicQueryMtpVerifier, IssuerStateSource, ATOMIC_QUERY_VALUES,
};
pub use auth::{AuthPubSignals, AuthVerifier};
pub use kyc::{KycBySignaturesVerifier, KycPubSignals};

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigUint;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::codec::parse_decimal;
use crate::error::{DecodeError, QueryViolation, RegistryBuildError, StateError, VerificationError};
use crate::identity::Identifier;
use crate::query::{Query, QueryEvaluator};
use crate::state::{StateResolver, VerificationContext};
use crate::types::ExtractedToken;

/// Supported circuit kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CircuitId {
    #[serde(rename = "auth")]
    Auth,
    #[serde(rename = "kycBySignatures")]
    KycBySignatures,
    #[serde(rename = "credentialAtomicQueryMTP")]
    AtomicQueryMtp,
}

impl CircuitId {
    pub const ALL: [CircuitId; 3] = [Self::Auth, Self::KycBySignatures, Self::AtomicQueryMtp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::KycBySignatures => "kycBySignatures",
            Self::AtomicQueryMtp => "credentialAtomicQueryMTP",
        }
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitId {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| VerificationError::UnsupportedCircuit(s.to_string()))
    }
}

/// Registry record for one circuit: opaque key material plus the names of its
/// public signals, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitData {
    pub circuit_id: CircuitId,
    pub verification_key: Vec<u8>,
    pub public_signals_schema: Vec<String>,
}

/// Per-circuit interpretation of public signals.
///
/// Every method receives the raw signal vector and decodes it against the
/// circuit's fixed schema; a vector of the wrong shape is a [`DecodeError`].
#[async_trait]
pub trait CircuitVerifier: Send + Sync {
    fn circuit_id(&self) -> CircuitId;

    /// Accepted public-signal vector lengths.
    fn signal_counts(&self) -> &'static [usize];

    /// Query rules this circuit can evaluate.
    fn supported_rules(&self) -> &'static [&'static str];

    async fn verify_query(
        &self,
        query: &Query,
        signals: &[String],
        evaluator: &QueryEvaluator,
    ) -> Result<(), VerificationError>;

    async fn verify_states(
        &self,
        signals: &[String],
        resolver: &StateResolver,
        ctx: &VerificationContext,
    ) -> Result<(), StateError>;

    fn extract_metadata(&self, signals: &[String]) -> Result<ExtractedToken, DecodeError>;

    fn check_signal_count(&self, signals: &[String]) -> Result<(), DecodeError> {
        if self.signal_counts().contains(&signals.len()) {
            Ok(())
        } else {
            Err(DecodeError::SignalCount {
                circuit: self.circuit_id(),
                expected: describe_counts(self.signal_counts()),
                got: signals.len(),
            })
        }
    }

    /// Reject rules present in `query` that this circuit cannot evaluate.
    fn check_rules_supported(&self, query: &Query) -> Result<(), QueryViolation> {
        let supported = self.supported_rules();
        match query.rule_names().into_iter().find(|r| !supported.contains(r)) {
            Some(rule) => Err(QueryViolation::InvalidRule {
                rule,
                reason: format!("not supported by circuit {}", self.circuit_id()),
            }),
            None => Ok(()),
        }
    }
}

fn describe_counts(counts: &[usize]) -> String {
    counts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ")
}

/// A registered circuit: its data and the verifier that interprets it.
#[derive(Clone)]
pub struct RegisteredCircuit {
    pub data: CircuitData,
    pub verifier: Arc<dyn CircuitVerifier>,
}

impl fmt::Debug for RegisteredCircuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredCircuit")
            .field("circuit_id", &self.data.circuit_id)
            .field("schema_len", &self.data.public_signals_schema.len())
            .finish()
    }
}

impl RegisteredCircuit {
    /// Proofs must carry exactly as many signals as the registered schema names.
    pub fn check_signal_count(&self, signals: &[String]) -> Result<(), DecodeError> {
        let expected = self.data.public_signals_schema.len();
        if signals.len() == expected {
            Ok(())
        } else {
            Err(DecodeError::SignalCount {
                circuit: self.data.circuit_id,
                expected: expected.to_string(),
                got: signals.len(),
            })
        }
    }
}

/// Read-only circuit table
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    circuits: HashMap<CircuitId, RegisteredCircuit>,
}

impl CircuitRegistry {
    pub fn builder() -> CircuitRegistryBuilder {
        CircuitRegistryBuilder::default()
    }

    pub fn get(&self, id: CircuitId) -> Result<&RegisteredCircuit, VerificationError> {
        self.circuits
            .get(&id)
            .ok_or(VerificationError::CircuitNotRegistered(id))
    }

    pub fn circuit_data(&self, id: CircuitId) -> Result<&CircuitData, VerificationError> {
        self.get(id).map(|c| &c.data)
    }

    /// Registered circuit ids, sorted.
    pub fn supported(&self) -> Vec<CircuitId> {
        let mut ids: Vec<_> = self.circuits.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CircuitRegistryBuilder {
    circuits: HashMap<CircuitId, RegisteredCircuit>,
    issuer_state_source: IssuerStateSource,
}

impl CircuitRegistryBuilder {
    /// Which identity the atomic-query verifier resolves the issuer state for.
    pub fn issuer_state_source(mut self, source: IssuerStateSource) -> Self {
        self.issuer_state_source = source;
        self
    }

    /// Register `data` with the bundled verifier for its circuit kind.
    pub fn register(self, data: CircuitData) -> Result<Self, RegistryBuildError> {
        let verifier: Arc<dyn CircuitVerifier> = match data.circuit_id {
            CircuitId::Auth => Arc::new(AuthVerifier),
            CircuitId::KycBySignatures => Arc::new(KycBySignaturesVerifier),
            CircuitId::AtomicQueryMtp => {
                Arc::new(AtomicQueryMtpVerifier::new(self.issuer_state_source))
            }
        };
        self.register_with(data, verifier)
    }

    /// Register `data` with a caller-supplied verifier.
    pub fn register_with(
        mut self,
        data: CircuitData,
        verifier: Arc<dyn CircuitVerifier>,
    ) -> Result<Self, RegistryBuildError> {
        let id = data.circuit_id;
        let declared = data.public_signals_schema.len();
        if !verifier.signal_counts().contains(&declared) {
            return Err(RegistryBuildError::SchemaLength {
                circuit: id,
                declared,
                expected: describe_counts(verifier.signal_counts()),
            });
        }
        if self.circuits.contains_key(&id) {
            return Err(RegistryBuildError::Duplicate(id));
        }
        self.circuits.insert(id, RegisteredCircuit { data, verifier });
        Ok(self)
    }

    pub fn build(self) -> CircuitRegistry {
        CircuitRegistry {
            circuits: self.circuits,
        }
    }
}

/// Parse signal `index` as a decimal integer.
pub(crate) fn signal_int(signals: &[String], index: usize) -> Result<BigUint, DecodeError> {
    parse_decimal(&signals[index])
}

/// Parse signal `index` as an identifier.
pub(crate) fn signal_id(signals: &[String], index: usize) -> Result<Identifier, DecodeError> {
    Identifier::from_int(&signal_int(signals, index)?)
}

/// Parse signal `index` as a small unsigned number.
pub(crate) fn signal_u64(
    signals: &[String],
    index: usize,
    name: &'static str,
) -> Result<u64, DecodeError> {
    signal_int(signals, index)?
        .to_u64()
        .ok_or_else(|| DecodeError::SignalOutOfRange {
            index,
            name,
            reason: "does not fit in 64 bits".into(),
        })
}

/// Require signals in `range` to be zero.
pub(crate) fn require_zero(
    signals: &[String],
    range: std::ops::RangeInclusive<usize>,
    name: &'static str,
) -> Result<(), DecodeError> {
    for index in range {
        if !signal_int(signals, index)?.is_zero() {
            return Err(DecodeError::SignalOutOfRange {
                index,
                name,
                reason: "must be zero".into(),
            });
        }
    }
    Ok(())
}
