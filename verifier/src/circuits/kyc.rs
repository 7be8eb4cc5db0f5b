use async_trait::async_trait;
use num_bigint::BigUint;

use super::{require_zero, signal_id, signal_int, signal_u64, CircuitId, CircuitVerifier};
use crate::error::{DecodeError, StateError, VerificationError};
use crate::identity::Identifier;
use crate::query::{
    Query, QueryDate, QueryEvaluator, RULE_ALLOWED_ISSUERS, RULE_AUDIENCE, RULE_CHALLENGE,
    RULE_COUNTRY_BLACKLIST, RULE_CURRENT_DAY, RULE_CURRENT_MONTH, RULE_CURRENT_YEAR, RULE_MIN_AGE,
};
use crate::state::{StateResolver, StateTarget, VerificationContext};
use crate::types::ExtractedToken;

pub const KYC_SIGNAL_COUNT: usize = 26;

/// Public signals of the attribute proof built from two signed claims: one
/// for the holder's country of residence and one for their birthday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KycPubSignals {
    pub user_id: Identifier,
    pub challenge: BigUint,
    pub country_issuer_id: Identifier,
    pub country_issuer_state: BigUint,
    pub country_code: u64,
    pub birthday_issuer_id: Identifier,
    pub birthday_issuer_state: BigUint,
    pub current_date: QueryDate,
    pub min_age: u64,
}

impl KycPubSignals {
    pub fn from_signals(signals: &[String]) -> Result<Self, DecodeError> {
        KycBySignaturesVerifier.check_signal_count(signals)?;
        require_zero(signals, 5..=19, "reserved")?;
        Ok(Self {
            user_id: signal_id(signals, 0)?,
            challenge: signal_int(signals, 1)?,
            country_issuer_id: signal_id(signals, 2)?,
            country_issuer_state: signal_int(signals, 3)?,
            country_code: signal_u64(signals, 4, "countryCode")?,
            birthday_issuer_id: signal_id(signals, 20)?,
            birthday_issuer_state: signal_int(signals, 21)?,
            current_date: QueryDate {
                year: signal_u64(signals, 22, "currentYear")?,
                month: signal_u64(signals, 23, "currentMonth")?,
                day: signal_u64(signals, 24, "currentDay")?,
            },
            min_age: signal_u64(signals, 25, "minAge")?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KycBySignaturesVerifier;

#[async_trait]
impl CircuitVerifier for KycBySignaturesVerifier {
    fn circuit_id(&self) -> CircuitId {
        CircuitId::KycBySignatures
    }

    fn signal_counts(&self) -> &'static [usize] {
        &[KYC_SIGNAL_COUNT]
    }

    fn supported_rules(&self) -> &'static [&'static str] {
        &[
            RULE_CHALLENGE,
            RULE_ALLOWED_ISSUERS,
            RULE_COUNTRY_BLACKLIST,
            RULE_MIN_AGE,
            RULE_CURRENT_YEAR,
            RULE_CURRENT_MONTH,
            RULE_CURRENT_DAY,
            RULE_AUDIENCE,
        ]
    }

    async fn verify_query(
        &self,
        query: &Query,
        signals: &[String],
        evaluator: &QueryEvaluator,
    ) -> Result<(), VerificationError> {
        self.check_rules_supported(query)?;
        let s = KycPubSignals::from_signals(signals)?;
        evaluator.check_challenge(query, &s.challenge)?;
        evaluator.check_issuer(query, &s.country_issuer_id)?;
        evaluator.check_issuer(query, &s.birthday_issuer_id)?;
        evaluator.check_country(query, s.country_code)?;
        evaluator.check_min_age(query, s.min_age)?;
        evaluator.check_date(query, s.current_date)?;
        evaluator.check_audience(query)?;
        Ok(())
    }

    async fn verify_states(
        &self,
        signals: &[String],
        resolver: &StateResolver,
        ctx: &VerificationContext,
    ) -> Result<(), StateError> {
        let s = KycPubSignals::from_signals(signals)?;
        let issuers = [
            StateTarget::new(s.country_issuer_id.to_int(), s.country_issuer_state),
            StateTarget::new(s.birthday_issuer_id.to_int(), s.birthday_issuer_state),
        ];
        for target in &issuers {
            // issuer claims may be signed with superseded states
            resolver.resolve(target, ctx).await?;
        }
        Ok(())
    }

    fn extract_metadata(&self, signals: &[String]) -> Result<ExtractedToken, DecodeError> {
        let s = KycPubSignals::from_signals(signals)?;
        Ok(ExtractedToken {
            challenge: s.challenge.to_string(),
            id: Some(s.user_id.to_string()),
            ..ExtractedToken::default()
        })
    }
}
