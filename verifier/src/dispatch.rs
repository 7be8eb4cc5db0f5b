//! Message dispatcher
//!
//! Routes every scope entry of a message through decode, circuit lookup,
//! pairing check, query check and state check. Entries are processed in order
//! and the first failure is reported with its scope index, so error output is
//! reproducible.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::circuits::{CircuitId, CircuitRegistry, RegisteredCircuit};
use crate::error::{DispatchError, OracleError, QueryViolation, VerificationError};
use crate::groth16::ProofVerifier;
use crate::query::{Query, QueryEvaluator};
use crate::state::{StateResolver, VerificationContext};
use crate::types::{ExtractedToken, Message, ZeroKnowledgeProof, ZeroKnowledgeProofRequest};

#[derive(Debug, Clone)]
pub struct VerifierOptions {
    /// Resolve claimed states against the registry after the query check
    pub check_states: bool,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self { check_states: true }
    }
}

pub struct Dispatcher {
    registry: Arc<CircuitRegistry>,
    oracle: Arc<dyn ProofVerifier>,
    resolver: StateResolver,
    evaluator: QueryEvaluator,
    options: VerifierOptions,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("resolver", &self.resolver)
            .field("evaluator", &self.evaluator)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CircuitRegistry>,
        oracle: Arc<dyn ProofVerifier>,
        resolver: StateResolver,
        evaluator: QueryEvaluator,
    ) -> Self {
        Self {
            registry,
            oracle,
            resolver,
            evaluator,
            options: VerifierOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VerifierOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &CircuitRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &StateResolver {
        &self.resolver
    }

    /// Verify every proof of `message`. When the originating authorization
    /// `request` is supplied, each proof is checked against the request entry
    /// for the same circuit, and every request entry must be answered by a
    /// proof. An unanswered entry is rejected with its request scope index.
    ///
    /// Returns one token per proof, or the first failure.
    pub async fn verify(
        &self,
        message: &Message,
        request: Option<&Message>,
        ctx: &VerificationContext,
    ) -> Result<Vec<ExtractedToken>, DispatchError> {
        let proofs = proofs_of(message)?;
        let queries = match request {
            Some(request) => {
                let scope = request_scope(request)?;
                let (queries, answered) = match_requests(proofs, scope);
                if let Some(index) = answered.iter().position(|a| !a) {
                    let violation = QueryViolation::ProofNotProvided {
                        request_index: index,
                    };
                    return Err(rejected(index, &scope[index].circuit_id, violation.into()));
                }
                queries
            }
            None => proofs.iter().map(|_| Ok(Query::default())).collect(),
        };

        let mut tokens = Vec::with_capacity(proofs.len());
        for (index, (proof, query)) in proofs.iter().zip(queries).enumerate() {
            debug!(scope_index = index, circuit_id = %proof.circuit_id, "verifying scope entry");
            let result = match query {
                Ok(query) => self.verify_proof(proof, &query, ctx).await,
                Err(violation) => Err(violation.into()),
            };
            match result {
                Ok(token) => tokens.push(token),
                Err(source) => return Err(rejected(index, &proof.circuit_id, source)),
            }
        }

        annotate(message, &mut tokens);
        Ok(tokens)
    }

    /// Verify a single proof against `query`.
    pub async fn verify_proof(
        &self,
        proof: &ZeroKnowledgeProof,
        query: &Query,
        ctx: &VerificationContext,
    ) -> Result<ExtractedToken, VerificationError> {
        let circuit = self.lookup(&proof.circuit_id)?;
        let verifier = &circuit.verifier;
        let signals = &proof.pub_signals;

        circuit.check_signal_count(signals)?;
        let decoded = proof.proof.decode()?;

        // pairing is CPU-bound; keep it off the async workers
        let oracle = Arc::clone(&self.oracle);
        let key = circuit.data.verification_key.clone();
        let inputs = signals.clone();
        let valid = tokio::task::spawn_blocking(move || oracle.verify(&key, &decoded, &inputs))
            .await
            .map_err(|e| OracleError::Pairing(format!("pairing task failed: {e}")))??;
        if !valid {
            return Err(VerificationError::InvalidProof);
        }

        verifier.verify_query(query, signals, &self.evaluator).await?;

        if self.options.check_states {
            verifier.verify_states(signals, &self.resolver, ctx).await?;
        }

        Ok(verifier.extract_metadata(signals)?)
    }

    /// Decode every proof and extract its metadata without running the
    /// pairing, query or state checks.
    pub fn extract_metadata(&self, message: &Message) -> Result<Vec<ExtractedToken>, DispatchError> {
        let proofs = proofs_of(message)?;
        let mut tokens = proofs
            .iter()
            .enumerate()
            .map(|(index, proof)| {
                self.extract_one(proof)
                    .map_err(|source| rejected(index, &proof.circuit_id, source))
            })
            .collect::<Result<Vec<_>, _>>()?;
        annotate(message, &mut tokens);
        Ok(tokens)
    }

    fn extract_one(&self, proof: &ZeroKnowledgeProof) -> Result<ExtractedToken, VerificationError> {
        let circuit = self.lookup(&proof.circuit_id)?;
        circuit.check_signal_count(&proof.pub_signals)?;
        proof.proof.decode()?;
        Ok(circuit.verifier.extract_metadata(&proof.pub_signals)?)
    }

    /// Check that an authorization request only asks for registered circuits
    /// with rules those circuits can evaluate.
    pub fn validate_request(&self, message: &Message) -> Result<(), DispatchError> {
        for (index, entry) in request_scope(message)?.iter().enumerate() {
            let checked = self.lookup(&entry.circuit_id).and_then(|circuit| {
                let query = Query::from_rules(&entry.rules)?;
                circuit.verifier.check_rules_supported(&query)?;
                Ok(())
            });
            if let Err(source) = checked {
                return Err(rejected(index, &entry.circuit_id, source));
            }
        }
        Ok(())
    }

    fn lookup(&self, circuit_id: &str) -> Result<&RegisteredCircuit, VerificationError> {
        let id: CircuitId = circuit_id.parse()?;
        self.registry.get(id)
    }
}

fn rejected(index: usize, circuit_id: &str, source: VerificationError) -> DispatchError {
    warn!(scope_index = index, circuit_id, error = %source, "scope entry rejected");
    DispatchError::Rejected {
        index,
        circuit_id: circuit_id.to_string(),
        source,
    }
}

fn proofs_of(message: &Message) -> Result<&[ZeroKnowledgeProof], DispatchError> {
    match message {
        Message::AuthorizationRequest(_) => Err(DispatchError::malformed(
            "authorization requests carry no proofs to verify",
        )),
        _ => Ok(message.proofs()),
    }
}

fn request_scope(message: &Message) -> Result<&[ZeroKnowledgeProofRequest], DispatchError> {
    match message {
        Message::AuthorizationRequest(request) => Ok(&request.scope),
        other => Err(DispatchError::malformed(format!(
            "expected an authorization request, got {}",
            other.message_type()
        ))),
    }
}

/// Pair each proof with the first unused request entry of the same circuit.
/// Also returns which request entries were answered.
fn match_requests(
    proofs: &[ZeroKnowledgeProof],
    requests: &[ZeroKnowledgeProofRequest],
) -> (Vec<Result<Query, QueryViolation>>, Vec<bool>) {
    let mut used = vec![false; requests.len()];
    let queries = proofs
        .iter()
        .map(|proof| {
            let found = requests
                .iter()
                .enumerate()
                .find(|(i, r)| !used[*i] && r.circuit_id == proof.circuit_id);
            match found {
                Some((i, request)) => {
                    used[i] = true;
                    Query::from_rules(&request.rules)
                }
                None => Ok(Query::default()),
            }
        })
        .collect();
    (queries, used)
}

fn annotate(message: &Message, tokens: &mut [ExtractedToken]) {
    if let Message::CredentialFetchRequest(fetch) = message {
        for token in tokens {
            token.claim_id = Some(fetch.claim_id.clone());
            token.claim_schema = Some(fetch.schema.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuits::CircuitData;
    use crate::error::{DecodeError, Outcome};
    use crate::state::tests::{MockRegistry, USER_ID, USER_STATE};
    use crate::types::{DecodedProof, AUTHORIZATION_REQUEST_TYPE, AUTHORIZATION_RESPONSE_TYPE};
    use serde_json::{json, Value};

    struct Oracle(bool);

    impl ProofVerifier for Oracle {
        fn verify(&self, _: &[u8], _: &DecodedProof, _: &[String]) -> Result<bool, OracleError> {
            Ok(self.0)
        }
    }

    fn dispatcher(oracle: bool) -> Dispatcher {
        let registry = CircuitRegistry::builder()
            .register(CircuitData {
                circuit_id: CircuitId::Auth,
                verification_key: Vec::new(),
                public_signals_schema: vec!["userID".into(), "challenge".into(), "userState".into()],
            })
            .unwrap()
            .build();
        Dispatcher::new(
            Arc::new(registry),
            Arc::new(Oracle(oracle)),
            StateResolver::new(Arc::new(MockRegistry::default())),
            QueryEvaluator::default(),
        )
    }

    fn auth_entry(circuit_id: &str) -> Value {
        json!({
            "type": "zeroknowledgeproof",
            "circuitId": circuit_id,
            "proof": {
                "pi_a": [
                    "8286889681087188684411199510889276918687181609540093440568310458198317956303",
                    "20120810686068956496055592376395897424117861934161580256832624025185006492545",
                    "1"
                ],
                "pi_b": [
                    [
                        "8781021494687726640921078755116610543888920881180197598360798979078295904948",
                        "19202155147447713148677957576892776380573753514701598304555554559013661311518"
                    ],
                    [
                        "15726655173394887666308034684678118482468533753607200826879522418086507576197",
                        "16663572050292231627606042532825469225281493999513959929720171494729819874292"
                    ],
                    ["1", "0"]
                ],
                "pi_c": [
                    "9723779257940517259310236863517792034982122114581325631102251752415874164616",
                    "3242951480985471018890459433562773969741463856458716743271162635077379852479",
                    "1"
                ]
            },
            "pub_signals": [USER_ID, "12345", USER_STATE]
        })
    }

    fn response(entries: Vec<Value>) -> Message {
        Message::from_value(&json!({
            "type": AUTHORIZATION_RESPONSE_TYPE,
            "data": { "scope": entries }
        }))
        .unwrap()
    }

    fn request(rules: Value) -> Message {
        Message::from_value(&json!({
            "type": AUTHORIZATION_REQUEST_TYPE,
            "data": {
                "scope": [{ "type": "zeroknowledgeproof", "circuitId": "auth", "rules": rules }]
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_verified_response_yields_tokens() {
        let tokens = dispatcher(true)
            .verify(&response(vec![auth_entry("auth")]), None, &VerificationContext::new())
            .await
            .unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].challenge, "12345");
        assert_eq!(
            tokens[0].id.as_deref(),
            Some("11A2HgCZ1pUcY8HoNDMjNWEBQXZdUnL3YVnVCUvR5s")
        );
    }

    #[tokio::test]
    async fn test_failed_pairing_is_rejected() {
        let err = dispatcher(false)
            .verify(&response(vec![auth_entry("auth")]), None, &VerificationContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::Rejected);
        assert!(matches!(
            err,
            DispatchError::Rejected { index: 0, source: VerificationError::InvalidProof, .. }
        ));
    }

    #[tokio::test]
    async fn test_first_failure_reports_lowest_index() {
        let message = response(vec![
            auth_entry("auth"),
            auth_entry("doesNotExist"),
            auth_entry("kycBySignatures"),
        ]);
        let err = dispatcher(true)
            .verify(&message, None, &VerificationContext::new())
            .await
            .unwrap_err();
        match err {
            DispatchError::Rejected { index, circuit_id, source } => {
                assert_eq!(index, 1);
                assert_eq!(circuit_id, "doesNotExist");
                assert_eq!(source, VerificationError::UnsupportedCircuit("doesNotExist".into()));
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn test_known_but_unregistered_circuit() {
        let err = dispatcher(true)
            .verify(&response(vec![auth_entry("kycBySignatures")]), None, &VerificationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Rejected {
                source: VerificationError::CircuitNotRegistered(CircuitId::KycBySignatures),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_request_rules_are_applied() {
        let dispatcher = dispatcher(true);
        let message = response(vec![auth_entry("auth")]);
        let ctx = VerificationContext::new();

        assert!(dispatcher
            .verify(&message, Some(&request(json!({ "challenge": 12345 }))), &ctx)
            .await
            .is_ok());

        let err = dispatcher
            .verify(&message, Some(&request(json!({ "challenge": 1 }))), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Rejected { source: VerificationError::Query(_), .. }
        ));

        let err = dispatcher
            .verify(&message, Some(&request(json!({ "nonsense": true }))), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Rejected {
                source: VerificationError::Query(QueryViolation::UnsupportedRule(_)),
                ..
            }
        ));

        let err = dispatcher
            .verify(&message, Some(&message), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::MalformedMessage);
    }

    #[tokio::test]
    async fn test_unanswered_request_entry_is_rejected() {
        let request = Message::from_value(&json!({
            "type": AUTHORIZATION_REQUEST_TYPE,
            "data": {
                "scope": [
                    { "type": "zeroknowledgeproof", "circuitId": "auth", "rules": {} },
                    { "type": "zeroknowledgeproof", "circuitId": "kycBySignatures", "rules": { "minAge": 21 } }
                ]
            }
        }))
        .unwrap();
        let err = dispatcher(true)
            .verify(&response(vec![auth_entry("auth")]), Some(&request), &VerificationContext::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Rejected {
                index: 1,
                circuit_id: "kycBySignatures".into(),
                source: VerificationError::Query(QueryViolation::ProofNotProvided {
                    request_index: 1
                }),
            }
        );
    }

    #[test]
    fn test_signal_count_follows_registered_schema() {
        let dispatcher = dispatcher(true);
        let mut entry = auth_entry("auth");
        entry["pub_signals"] = json!([USER_STATE, "12345"]);
        let err = dispatcher.extract_metadata(&response(vec![entry])).unwrap_err();
        assert_eq!(
            err,
            DispatchError::Rejected {
                index: 0,
                circuit_id: "auth".into(),
                source: VerificationError::Decode(DecodeError::SignalCount {
                    circuit: CircuitId::Auth,
                    expected: "3".into(),
                    got: 2,
                }),
            }
        );
    }

    #[tokio::test]
    async fn test_requests_are_not_verifiable() {
        let err = dispatcher(true)
            .verify(&request(json!({})), None, &VerificationContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::MalformedMessage);
    }

    #[test]
    fn test_extract_metadata_checks_points() {
        let dispatcher = dispatcher(false);
        let tokens = dispatcher
            .extract_metadata(&response(vec![auth_entry("auth")]))
            .unwrap();
        assert_eq!(tokens[0].state.as_deref(), Some(USER_STATE));

        let mut entry = auth_entry("auth");
        entry["proof"]["pi_a"] = json!(["1", "2"]);
        let err = dispatcher.extract_metadata(&response(vec![entry])).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Rejected {
                source: VerificationError::Decode(DecodeError::NotEnoughCoordinates { .. }),
                ..
            }
        ));
    }

    #[test]
    fn test_validate_request() {
        let dispatcher = dispatcher(true);
        assert!(dispatcher
            .validate_request(&request(json!({ "challenge": 10 })))
            .is_ok());
        assert!(dispatcher
            .validate_request(&request(json!({ "minAge": 18 })))
            .is_err());
        assert_eq!(
            dispatcher
                .validate_request(&response(vec![auth_entry("auth")]))
                .unwrap_err()
                .outcome(),
            Outcome::MalformedMessage
        );
    }
}
