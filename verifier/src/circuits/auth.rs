use async_trait::async_trait;
use num_bigint::BigUint;

use super::{signal_id, signal_int, CircuitId, CircuitVerifier};
use crate::error::{DecodeError, InvalidState, StateError, VerificationError};
use crate::identity::{Identifier, DEFAULT_ID_TYPE};
use crate::query::{Query, QueryEvaluator, RULE_AUDIENCE, RULE_CHALLENGE};
use crate::state::{StateResolver, StateTarget, VerificationContext};
use crate::types::ExtractedToken;

/// Public signals of the basic authentication circuit.
///
/// The extended form is `[userID, challenge, userState]`; the short form
/// `[userState, challenge]` carries no identifier, so it is derived from the
/// state as a genesis identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPubSignals {
    pub user_id: Identifier,
    pub challenge: BigUint,
    pub user_state: BigUint,
}

impl AuthPubSignals {
    pub fn from_signals(signals: &[String]) -> Result<Self, DecodeError> {
        AuthVerifier.check_signal_count(signals)?;
        if signals.len() == 3 {
            Ok(Self {
                user_id: signal_id(signals, 0)?,
                challenge: signal_int(signals, 1)?,
                user_state: signal_int(signals, 2)?,
            })
        } else {
            let user_state = signal_int(signals, 0)?;
            Ok(Self {
                user_id: Identifier::from_genesis_state(DEFAULT_ID_TYPE, &user_state)?,
                challenge: signal_int(signals, 1)?,
                user_state,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthVerifier;

#[async_trait]
impl CircuitVerifier for AuthVerifier {
    fn circuit_id(&self) -> CircuitId {
        CircuitId::Auth
    }

    fn signal_counts(&self) -> &'static [usize] {
        &[2, 3]
    }

    fn supported_rules(&self) -> &'static [&'static str] {
        &[RULE_CHALLENGE, RULE_AUDIENCE]
    }

    async fn verify_query(
        &self,
        query: &Query,
        signals: &[String],
        evaluator: &QueryEvaluator,
    ) -> Result<(), VerificationError> {
        self.check_rules_supported(query)?;
        let pub_signals = AuthPubSignals::from_signals(signals)?;
        evaluator.check_challenge(query, &pub_signals.challenge)?;
        evaluator.check_audience(query)?;
        Ok(())
    }

    async fn verify_states(
        &self,
        signals: &[String],
        resolver: &StateResolver,
        ctx: &VerificationContext,
    ) -> Result<(), StateError> {
        let pub_signals = AuthPubSignals::from_signals(signals)?;
        let target = StateTarget::new(pub_signals.user_id.to_int(), pub_signals.user_state);
        let resolved = resolver.resolve(&target, ctx).await?;
        if !resolved.latest {
            return Err(InvalidState::UserStateNotLatest.into());
        }
        Ok(())
    }

    fn extract_metadata(&self, signals: &[String]) -> Result<ExtractedToken, DecodeError> {
        let pub_signals = AuthPubSignals::from_signals(signals)?;
        Ok(ExtractedToken {
            challenge: pub_signals.challenge.to_string(),
            id: Some(pub_signals.user_id.to_string()),
            state: Some(pub_signals.user_state.to_string()),
            ..ExtractedToken::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryViolation;
    use crate::state::tests::{MockRegistry, USER_ID, USER_STATE};
    use crate::state::TransitionInfo;
    use serde_json::json;
    use std::sync::Arc;

    fn signals() -> Vec<String> {
        vec![USER_ID.to_string(), "12345".to_string(), USER_STATE.to_string()]
    }

    fn query(rules: serde_json::Value) -> Query {
        Query::from_rules(rules.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_extract_metadata_from_extended_signals() {
        let token = AuthVerifier.extract_metadata(&signals()).unwrap();
        assert_eq!(token.challenge, "12345");
        assert_eq!(token.state.as_deref(), Some(USER_STATE));
        assert_eq!(
            token.id.as_deref(),
            Some("11A2HgCZ1pUcY8HoNDMjNWEBQXZdUnL3YVnVCUvR5s")
        );
        assert_eq!(token.claim_id, None);
    }

    #[test]
    fn test_short_form_derives_genesis_identifier() {
        let short = vec![USER_STATE.to_string(), "12345".to_string()];
        let token = AuthVerifier.extract_metadata(&short).unwrap();
        assert_eq!(token.challenge, "12345");
        assert_eq!(
            token.id.as_deref(),
            Some("11A2HgCZ1pUcY8HoNDMjNWEBQXZdUnL3YVnVCUvR5s")
        );
    }

    #[test]
    fn test_wrong_signal_count_is_decode_error() {
        let err = AuthVerifier
            .extract_metadata(&["1".to_string(), "2".to_string(), "3".to_string(), "4".to_string()])
            .unwrap_err();
        assert!(matches!(err, DecodeError::SignalCount { got: 4, .. }));
    }

    #[tokio::test]
    async fn test_challenge_rule() {
        let evaluator = QueryEvaluator::default();
        assert!(AuthVerifier
            .verify_query(&query(json!({ "challenge": 12345 })), &signals(), &evaluator)
            .await
            .is_ok());

        let err = AuthVerifier
            .verify_query(&query(json!({ "challenge": 10 })), &signals(), &evaluator)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::Query(QueryViolation::ChallengeMismatch { .. })
        ));

        let err = AuthVerifier
            .verify_query(&query(json!({ "minAge": 18 })), &signals(), &evaluator)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::Query(QueryViolation::InvalidRule { rule: "minAge", .. })
        ));
    }

    #[tokio::test]
    async fn test_latest_state_passes() {
        let resolver = StateResolver::new(Arc::new(MockRegistry::default()));
        AuthVerifier
            .verify_states(&signals(), &resolver, &VerificationContext::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_superseded_state_fails() {
        let id = crate::codec::parse_decimal(USER_ID).unwrap();
        let state = crate::codec::parse_decimal(USER_STATE).unwrap();
        let mut registry = MockRegistry::default();
        registry.latest.insert(id.clone(), BigUint::from(5u8));
        registry.transitions.insert(
            state,
            TransitionInfo {
                id,
                replaced_at_timestamp: 100,
                ..TransitionInfo::default()
            },
        );
        let resolver = StateResolver::new(Arc::new(registry));
        let err = AuthVerifier
            .verify_states(&signals(), &resolver, &VerificationContext::new())
            .await
            .unwrap_err();
        assert_eq!(err, StateError::Invalid(InvalidState::UserStateNotLatest));
    }
}
