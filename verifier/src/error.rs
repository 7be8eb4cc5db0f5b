//! Error taxonomy for the verification pipeline.
//!
//! Every failure is returned to the caller as a typed value. Only
//! [`StateError::is_retryable`] errors are worth retrying; everything else is
//! a final answer about trust.

use thiserror::Error;

use crate::circuits::CircuitId;

/// Malformed numeral, short coordinate tuple, invalid point encoding, or a
/// public-signal vector that does not match its circuit schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("not enough data for {kind}: expected at least 3 elements, got {got}")]
    NotEnoughCoordinates { kind: &'static str, got: usize },
    #[error("G2 limb {limb} must have 2 elements, got {got}")]
    MalformedG2Limb { limb: usize, got: usize },
    #[error("cannot parse numeral {0:?}")]
    InvalidNumeral(String),
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),
    #[error("value does not fit in a {0}-byte field element")]
    FieldElementOverflow(usize),
    #[error("coordinate is not a canonical base field element")]
    NonCanonicalCoordinate,
    #[error("{kind} encoding must be {expected} bytes, got {got}")]
    InvalidLength {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{0} point is not on the curve")]
    NotOnCurve(&'static str),
    #[error("{0} point is not in the prime-order subgroup")]
    NotInSubgroup(&'static str),
    #[error("public signal {index} is not a canonical scalar field element")]
    NonCanonicalSignal { index: usize },
    #[error("circuit {circuit} expects {expected} public signals, got {got}")]
    SignalCount {
        circuit: CircuitId,
        expected: String,
        got: usize,
    },
    #[error("public signal {index} ({name}) is out of range: {reason}")]
    SignalOutOfRange {
        index: usize,
        name: &'static str,
        reason: String,
    },
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// A query rule the proof failed to satisfy, or a rule that cannot be
/// evaluated as configured.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryViolation {
    #[error("issuer of claim is not in allowed list: {issuer}")]
    IssuerNotAllowed { issuer: String },
    #[error("issuer allow-list is empty")]
    EmptyIssuerAllowList,
    #[error("query does not define a {0} rule")]
    MissingRule(&'static str),
    #[error("claim schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },
    #[error("claim schema could not be resolved: {0}")]
    SchemaResolution(#[from] SchemaError),
    #[error("challenge mismatch: expected {expected}, got {actual}")]
    ChallengeMismatch { expected: String, actual: String },
    #[error("country {0} is blacklisted")]
    CountryBlacklisted(u64),
    #[error("proven minimum age {proven} is below required {required}")]
    AgeBelowMinimum { proven: u64, required: u64 },
    #[error("proof date {proven} is before the required date {required}")]
    DateBeforeCutoff { proven: String, required: String },
    #[error("audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch { expected: String, actual: String },
    #[error("no expected audience configured for audience rule")]
    AudienceNotConfigured,
    #[error("unsupported rule {0:?}")]
    UnsupportedRule(String),
    #[error("invalid value for rule {rule}: {reason}")]
    InvalidRule { rule: &'static str, reason: String },
    /// A request entry that no proof of the response answers
    #[error("no proof answers request entry {request_index}")]
    ProofNotProvided { request_index: usize },
}

impl QueryViolation {
    /// Name of the rule that failed.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::IssuerNotAllowed { .. } | Self::EmptyIssuerAllowList => "allowedIssuers",
            Self::MissingRule(rule) => rule,
            Self::SchemaMismatch { .. } | Self::SchemaResolution(_) => "schema",
            Self::ChallengeMismatch { .. } => "challenge",
            Self::CountryBlacklisted(_) => "countryBlacklist",
            Self::AgeBelowMinimum { .. } => "minAge",
            Self::DateBeforeCutoff { .. } => "currentDate",
            Self::AudienceMismatch { .. } | Self::AudienceNotConfigured => "audience",
            Self::UnsupportedRule(_) => "unsupported",
            Self::InvalidRule { rule, .. } => rule,
            Self::ProofNotProvided { .. } => "scope",
        }
    }
}

/// Failure of the schema-resolution collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema {0} is unknown")]
    Unknown(String),
    #[error("schema lookup failed: {0}")]
    Lookup(String),
}

/// Failure reported by a state registry client. Always a transport-level
/// problem: the registry could not be read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("state registry unavailable: {0}")]
pub struct RegistryError(pub String);

/// Why a claimed state was judged invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidState {
    #[error("state is not genesis and not registered in the smart contract")]
    NotGenesisAndUnpublished,
    #[error("state is neither current nor part of the identity's history")]
    UnknownState,
    #[error("transition info contains invalid id")]
    StateOwnedByOtherIdentity,
    #[error("no information of transition for non-latest state")]
    NoTransitionRecord,
    #[error("user state is not latest")]
    UserStateNotLatest,
    #[error("issuer state could not be resolved")]
    IssuerStateNotFound,
}

/// State-resolution failure: either we could not determine the state, or we
/// determined it is invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error(transparent)]
    Transport(#[from] RegistryError),
    #[error("state resolution timed out")]
    Timeout,
    #[error("state resolution cancelled")]
    Cancelled,
    #[error("invalid state: {0}")]
    Invalid(#[from] InvalidState),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl StateError {
    /// Transport failures and timeouts may be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid(_))
    }
}

/// Failure of the pairing oracle or of its verification key material.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("invalid verification key: {0}")]
    InvalidKey(String),
    #[error("verification key expects {expected} public inputs, got {got}")]
    InputCount { expected: usize, got: usize },
    #[error("pairing check failed to run: {0}")]
    Pairing(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Why one proof failed verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unsupported circuit {0:?}")]
    UnsupportedCircuit(String),
    #[error("circuit {0} is not registered")]
    CircuitNotRegistered(CircuitId),
    #[error("proof does not satisfy the verification key")]
    InvalidProof,
    #[error(transparent)]
    Oracle(#[from] OracleError),
    #[error("query violation ({}): {0}", .0.rule())]
    Query(#[from] QueryViolation),
    #[error(transparent)]
    State(#[from] StateError),
}

/// Error raised while registering circuits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryBuildError {
    #[error("circuit {circuit} declares {declared} public signals, verifier expects {expected}")]
    SchemaLength {
        circuit: CircuitId,
        declared: usize,
        expected: String,
    },
    #[error("circuit {0} registered twice")]
    Duplicate(CircuitId),
}

/// The three terminal outcomes of message verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Verified,
    Rejected,
    MalformedMessage,
}

/// Failure of a whole message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("scope entry {index} ({circuit_id}) rejected: {source}")]
    Rejected {
        index: usize,
        circuit_id: String,
        #[source]
        source: VerificationError,
    },
}

impl DispatchError {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Malformed(_) => Outcome::MalformedMessage,
            Self::Rejected { .. } => Outcome::Rejected,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_failures_are_retryable() {
        assert!(StateError::Transport(RegistryError("connection refused".into())).is_retryable());
        assert!(StateError::Timeout.is_retryable());
        assert!(!StateError::Cancelled.is_retryable());
        assert!(!StateError::Invalid(InvalidState::UserStateNotLatest).is_retryable());
    }

    #[test]
    fn test_query_violation_names_rule() {
        let err = QueryViolation::CountryBlacklisted(840);
        assert_eq!(err.rule(), "countryBlacklist");
        let err = VerificationError::from(QueryViolation::EmptyIssuerAllowList);
        assert_eq!(
            err.to_string(),
            "query violation (allowedIssuers): issuer allow-list is empty"
        );
    }

    #[test]
    fn test_dispatch_outcome() {
        assert_eq!(
            DispatchError::malformed("empty scope").outcome(),
            Outcome::MalformedMessage
        );
        let rejected = DispatchError::Rejected {
            index: 0,
            circuit_id: "auth".into(),
            source: VerificationError::InvalidProof,
        };
        assert_eq!(rejected.outcome(), Outcome::Rejected);
    }
}
