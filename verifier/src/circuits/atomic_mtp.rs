use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{signal_id, signal_int, signal_u64, CircuitId, CircuitVerifier};
use crate::error::{DecodeError, InvalidState, StateError, VerificationError};
use crate::identity::Identifier;
use crate::query::{
    Query, QueryEvaluator, SchemaHash, RULE_ALLOWED_ISSUERS, RULE_AUDIENCE, RULE_CHALLENGE,
    RULE_SCHEMA,
};
use crate::state::{StateResolver, StateTarget, VerificationContext};
use crate::types::ExtractedToken;

pub const ATOMIC_QUERY_VALUES: usize = 64;
pub const ATOMIC_QUERY_MTP_SIGNAL_COUNT: usize = 9 + ATOMIC_QUERY_VALUES;

/// Public signals of the Merkle-tree-proof credential query circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicQueryMtpPubSignals {
    pub user_id: Identifier,
    pub user_state: BigUint,
    pub challenge: BigUint,
    pub issuer_claim_iden_state: BigUint,
    pub issuer_id: Identifier,
    pub timestamp: u64,
    pub claim_schema: SchemaHash,
    pub slot_index: u64,
    pub operator: u64,
    pub values: Vec<BigUint>,
}

impl AtomicQueryMtpPubSignals {
    pub fn from_signals(signals: &[String]) -> Result<Self, DecodeError> {
        if signals.len() != ATOMIC_QUERY_MTP_SIGNAL_COUNT {
            return Err(DecodeError::SignalCount {
                circuit: CircuitId::AtomicQueryMtp,
                expected: ATOMIC_QUERY_MTP_SIGNAL_COUNT.to_string(),
                got: signals.len(),
            });
        }
        let claim_schema =
            SchemaHash::from_int(&signal_int(signals, 6)?).ok_or(DecodeError::SignalOutOfRange {
                index: 6,
                name: "claimSchema",
                reason: "wider than 16 bytes".into(),
            })?;
        Ok(Self {
            user_id: signal_id(signals, 0)?,
            user_state: signal_int(signals, 1)?,
            challenge: signal_int(signals, 2)?,
            issuer_claim_iden_state: signal_int(signals, 3)?,
            issuer_id: signal_id(signals, 4)?,
            timestamp: signal_u64(signals, 5, "timestamp")?,
            claim_schema,
            slot_index: signal_u64(signals, 7, "slotIndex")?,
            operator: signal_u64(signals, 8, "operator")?,
            values: (9..ATOMIC_QUERY_MTP_SIGNAL_COUNT)
                .map(|i| signal_int(signals, i))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Identity whose state is checked as the issuer's claim issuance state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuerStateSource {
    /// The user's identifier and state. Matches deployed verifier behaviour.
    #[default]
    User,
    /// The issuer's identifier and claim issuance state
    Issuer,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicQueryMtpVerifier {
    issuer_state_source: IssuerStateSource,
}

impl AtomicQueryMtpVerifier {
    pub fn new(issuer_state_source: IssuerStateSource) -> Self {
        Self {
            issuer_state_source,
        }
    }

    /// User and issuer resolution targets.
    pub fn state_targets(&self, s: &AtomicQueryMtpPubSignals) -> (StateTarget, StateTarget) {
        let user = StateTarget::new(s.user_id.to_int(), s.user_state.clone());
        let issuer = match self.issuer_state_source {
            IssuerStateSource::User => user.clone(),
            IssuerStateSource::Issuer => {
                StateTarget::new(s.issuer_id.to_int(), s.issuer_claim_iden_state.clone())
            }
        };
        (user, issuer)
    }
}

#[async_trait]
impl CircuitVerifier for AtomicQueryMtpVerifier {
    fn circuit_id(&self) -> CircuitId {
        CircuitId::AtomicQueryMtp
    }

    fn signal_counts(&self) -> &'static [usize] {
        &[ATOMIC_QUERY_MTP_SIGNAL_COUNT]
    }

    fn supported_rules(&self) -> &'static [&'static str] {
        &[RULE_ALLOWED_ISSUERS, RULE_SCHEMA, RULE_CHALLENGE, RULE_AUDIENCE]
    }

    async fn verify_query(
        &self,
        query: &Query,
        signals: &[String],
        evaluator: &QueryEvaluator,
    ) -> Result<(), VerificationError> {
        self.check_rules_supported(query)?;
        let s = AtomicQueryMtpPubSignals::from_signals(signals)?;
        evaluator.require_issuer(query, &s.issuer_id)?;
        evaluator.check_schema(query, &s.claim_schema).await?;
        evaluator.check_challenge(query, &s.challenge)?;
        evaluator.check_audience(query)?;
        Ok(())
    }

    async fn verify_states(
        &self,
        signals: &[String],
        resolver: &StateResolver,
        ctx: &VerificationContext,
    ) -> Result<(), StateError> {
        let s = AtomicQueryMtpPubSignals::from_signals(signals)?;
        let (user, issuer) = self.state_targets(&s);

        let resolved = resolver.resolve(&user, ctx).await?;
        if !resolved.latest {
            return Err(InvalidState::UserStateNotLatest.into());
        }

        match resolver.resolve(&issuer, ctx).await {
            Ok(_) => Ok(()),
            Err(StateError::Invalid(reason)) => {
                debug!(%reason, "issuer state rejected");
                Err(InvalidState::IssuerStateNotFound.into())
            }
            Err(e) => Err(e),
        }
    }

    fn extract_metadata(&self, signals: &[String]) -> Result<ExtractedToken, DecodeError> {
        let s = AtomicQueryMtpPubSignals::from_signals(signals)?;
        Ok(ExtractedToken {
            challenge: s.challenge.to_string(),
            id: Some(s.user_id.to_string()),
            state: Some(s.user_state.to_string()),
            ..ExtractedToken::default()
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::parse_decimal;
    use crate::error::QueryViolation;
    use crate::query::{ConfiguredSchemas, SchemaRef};
    use crate::state::tests::{MockRegistry, USER_ID, USER_STATE};
    use crate::state::TransitionInfo;
    use serde_json::json;
    use std::sync::Arc;

    pub const ISSUER_A: &str = "115xno2abzZzJsqBwCRGxNznuFvxKm8FaVKx8KBwTJ";
    pub const ISSUER_B: &str = "119tqceWdRd2F6WnAyVuFQRFjK3WUXq2LorSPyG9LJ";
    pub const ISSUER_A_STATE: &str =
        "20826763141600863538041346956386832863527621891653741934199228821528372364336";
    pub const KYC_SCHEMA_HASH: &str = "7c0844a075a9ddc7fcbdfb4f88acd9bc";

    pub fn kyc_schema() -> SchemaRef {
        SchemaRef {
            url: "https://schema.example.com/kyc-v2.json-ld".into(),
            schema_type: "KYCAgeCredential".into(),
        }
    }

    pub fn schemas() -> ConfiguredSchemas {
        ConfiguredSchemas::new().with(&kyc_schema(), SchemaHash::from_hex(KYC_SCHEMA_HASH).unwrap())
    }

    /// Signals of a proof by the fixture user over a claim issued by `issuer`.
    pub fn mtp_signals(issuer: &str) -> Vec<String> {
        let issuer: Identifier = issuer.parse().unwrap();
        let schema = SchemaHash::from_hex(KYC_SCHEMA_HASH).unwrap();
        let mut signals = vec![
            USER_ID.to_string(),
            USER_STATE.to_string(),
            "12345".to_string(),
            ISSUER_A_STATE.to_string(),
            issuer.to_int().to_string(),
            "1642074362".to_string(),
            schema.to_int().to_string(),
            "2".to_string(),
            "1".to_string(),
            "20000101".to_string(),
        ];
        signals.extend(std::iter::repeat("0".to_string()).take(ATOMIC_QUERY_VALUES - 1));
        signals
    }

    fn query(rules: serde_json::Value) -> Query {
        Query::from_rules(rules.as_object().unwrap()).unwrap()
    }

    fn evaluator() -> QueryEvaluator {
        QueryEvaluator::new(Arc::new(schemas()))
    }

    #[test]
    fn test_decode_signals() {
        let s = AtomicQueryMtpPubSignals::from_signals(&mtp_signals(ISSUER_A)).unwrap();
        assert_eq!(s.issuer_id.to_string(), ISSUER_A);
        assert_eq!(s.values.len(), ATOMIC_QUERY_VALUES);
        assert_eq!(s.values[0], BigUint::from(20000101u32));
        assert_eq!(s.claim_schema.to_string(), KYC_SCHEMA_HASH);

        let token = AtomicQueryMtpVerifier::default()
            .extract_metadata(&mtp_signals(ISSUER_A))
            .unwrap();
        assert_eq!(token.challenge, "12345");
        assert_eq!(token.state.as_deref(), Some(USER_STATE));
    }

    #[test]
    fn test_short_signal_vector_is_decode_error() {
        let mut signals = mtp_signals(ISSUER_A);
        signals.pop();
        assert!(matches!(
            AtomicQueryMtpPubSignals::from_signals(&signals),
            Err(DecodeError::SignalCount { got: 72, .. })
        ));
    }

    #[tokio::test]
    async fn test_issuer_allow_list() {
        let verifier = AtomicQueryMtpVerifier::default();
        let rules = json!({
            "allowedIssuers": [ISSUER_A],
            "schema": { "url": kyc_schema().url, "type": kyc_schema().schema_type },
        });

        let err = verifier
            .verify_query(&query(rules.clone()), &mtp_signals(ISSUER_B), &evaluator())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VerificationError::Query(QueryViolation::IssuerNotAllowed {
                issuer: ISSUER_B.into()
            })
        );

        verifier
            .verify_query(&query(rules), &mtp_signals(ISSUER_A), &evaluator())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_allow_list_and_schema_are_required() {
        let verifier = AtomicQueryMtpVerifier::default();
        let err = verifier
            .verify_query(&Query::default(), &mtp_signals(ISSUER_A), &evaluator())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VerificationError::Query(QueryViolation::MissingRule(RULE_ALLOWED_ISSUERS))
        );

        let err = verifier
            .verify_query(
                &query(json!({ "allowedIssuers": [ISSUER_A] })),
                &mtp_signals(ISSUER_A),
                &evaluator(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            VerificationError::Query(QueryViolation::MissingRule(RULE_SCHEMA))
        );
    }

    #[tokio::test]
    async fn test_schema_mismatch_and_resolution_failure_differ() {
        let verifier = AtomicQueryMtpVerifier::default();
        let mut signals = mtp_signals(ISSUER_A);
        signals[6] = "5".into();
        let rules = json!({
            "allowedIssuers": [ISSUER_A],
            "schema": { "url": kyc_schema().url, "type": kyc_schema().schema_type },
        });
        let err = verifier
            .verify_query(&query(rules), &signals, &evaluator())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::Query(QueryViolation::SchemaMismatch { .. })
        ));

        let rules = json!({
            "allowedIssuers": [ISSUER_A],
            "schema": { "url": "https://schema.example.com/unknown", "type": "Unknown" },
        });
        let err = verifier
            .verify_query(&query(rules), &mtp_signals(ISSUER_A), &evaluator())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::Query(QueryViolation::SchemaResolution(_))
        ));
    }

    #[tokio::test]
    async fn test_issuer_state_source_selects_target() {
        let signals = mtp_signals(ISSUER_A);

        let registry = Arc::new(MockRegistry::default());
        let resolver = StateResolver::new(registry.clone());
        AtomicQueryMtpVerifier::new(IssuerStateSource::User)
            .verify_states(&signals, &resolver, &VerificationContext::new())
            .await
            .unwrap();
        let user_call = format!("latest:{USER_ID}");
        assert_eq!(*registry.calls.lock().unwrap(), vec![user_call.clone(), user_call.clone()]);

        let registry = Arc::new(MockRegistry::default());
        let resolver = StateResolver::new(registry.clone());
        AtomicQueryMtpVerifier::new(IssuerStateSource::Issuer)
            .verify_states(&signals, &resolver, &VerificationContext::new())
            .await
            .unwrap();
        let issuer_int = ISSUER_A.parse::<Identifier>().unwrap().to_int();
        assert_eq!(
            *registry.calls.lock().unwrap(),
            vec![user_call, format!("latest:{issuer_int}")]
        );
    }

    #[tokio::test]
    async fn test_user_state_must_be_latest() {
        let id = parse_decimal(USER_ID).unwrap();
        let mut registry = MockRegistry::default();
        registry.latest.insert(id.clone(), BigUint::from(9u8));
        registry.transitions.insert(
            parse_decimal(USER_STATE).unwrap(),
            TransitionInfo {
                id,
                replaced_at_timestamp: 10,
                ..TransitionInfo::default()
            },
        );
        let err = AtomicQueryMtpVerifier::default()
            .verify_states(
                &mtp_signals(ISSUER_A),
                &StateResolver::new(Arc::new(registry)),
                &VerificationContext::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StateError::Invalid(InvalidState::UserStateNotLatest));
    }

    #[tokio::test]
    async fn test_unresolvable_issuer_state() {
        let issuer = ISSUER_A.parse::<Identifier>().unwrap().to_int();
        let mut registry = MockRegistry::default();
        registry.latest.insert(issuer, BigUint::from(3u8));
        let err = AtomicQueryMtpVerifier::new(IssuerStateSource::Issuer)
            .verify_states(
                &mtp_signals(ISSUER_A),
                &StateResolver::new(Arc::new(registry)),
                &VerificationContext::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, StateError::Invalid(InvalidState::IssuerStateNotFound));
    }
}
