// Shared fixtures and stub collaborators for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde_json::{json, Value};

use zk_auth_verifier::codec::parse_decimal;
use zk_auth_verifier::types::DecodedProof;
use zk_auth_verifier::{
    CircuitData, CircuitId, CircuitRegistry, ConfiguredSchemas, Dispatcher, OracleError,
    ProofVerifier, QueryEvaluator, RegistryError, SchemaHash, SchemaRef, StateRegistry,
    StateResolver, TransitionInfo,
};

pub use zk_auth_verifier::types::{
    AUTHORIZATION_REQUEST_TYPE, AUTHORIZATION_RESPONSE_TYPE, CREDENTIAL_FETCH_REQUEST_TYPE,
};

pub const USER_ID: &str =
    "371135506535866236563870411357090963344408827476607986362864968105378316288";
pub const USER_STATE: &str =
    "16751774198505232045539489584666775489135471631443877047826295522719290880931";
pub const USER_DID: &str = "11A2HgCZ1pUcY8HoNDMjNWEBQXZdUnL3YVnVCUvR5s";

pub const ISSUER_A: &str = "115xno2abzZzJsqBwCRGxNznuFvxKm8FaVKx8KBwTJ";
pub const ISSUER_B: &str = "119tqceWdRd2F6WnAyVuFQRFjK3WUXq2LorSPyG9LJ";
pub const ISSUER_A_STATE: &str =
    "20826763141600863538041346956386832863527621891653741934199228821528372364336";

pub const KYC_SCHEMA_HASH: &str = "7c0844a075a9ddc7fcbdfb4f88acd9bc";

/// Pairing oracle with a fixed answer
pub struct StubOracle {
    pub answer: bool,
    pub calls: AtomicUsize,
}

impl StubOracle {
    pub fn new(answer: bool) -> Arc<Self> {
        Arc::new(Self {
            answer,
            calls: AtomicUsize::new(0),
        })
    }
}

impl ProofVerifier for StubOracle {
    fn verify(&self, _: &[u8], _: &DecodedProof, _: &[String]) -> Result<bool, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer)
    }
}

/// In-memory state registry
#[derive(Default)]
pub struct InMemoryRegistry {
    pub latest: HashMap<BigUint, BigUint>,
    pub transitions: HashMap<BigUint, TransitionInfo>,
    pub offline: bool,
}

impl InMemoryRegistry {
    pub fn publish(mut self, id: &BigUint, state: &BigUint) -> Self {
        self.latest.insert(id.clone(), state.clone());
        self
    }

    /// Record that `old` was replaced by the current state of `id`.
    pub fn supersede(mut self, id: &BigUint, old: &BigUint, new: &BigUint) -> Self {
        self.transitions.insert(
            old.clone(),
            TransitionInfo {
                replaced_at_timestamp: 1_650_000_000,
                created_at_timestamp: 1_640_000_000,
                replaced_at_block: 2_000,
                created_at_block: 1_000,
                replaced_by: new.clone(),
                id: id.clone(),
            },
        );
        self.latest.insert(id.clone(), new.clone());
        self
    }
}

#[async_trait]
impl StateRegistry for InMemoryRegistry {
    async fn latest_state(&self, id: &BigUint) -> Result<BigUint, RegistryError> {
        if self.offline {
            return Err(RegistryError("rpc endpoint unreachable".into()));
        }
        Ok(self.latest.get(id).cloned().unwrap_or_default())
    }

    async fn transition_info(&self, state: &BigUint) -> Result<TransitionInfo, RegistryError> {
        if self.offline {
            return Err(RegistryError("rpc endpoint unreachable".into()));
        }
        Ok(self.transitions.get(state).cloned().unwrap_or_default())
    }
}

pub fn int(s: &str) -> BigUint {
    parse_decimal(s).unwrap()
}

pub fn kyc_schema() -> SchemaRef {
    SchemaRef {
        url: "https://schema.example.com/kyc-v2.json-ld".into(),
        schema_type: "KYCAgeCredential".into(),
    }
}

fn circuit(circuit_id: CircuitId, names: &[&str]) -> CircuitData {
    CircuitData {
        circuit_id,
        verification_key: b"{}".to_vec(),
        public_signals_schema: names.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn auth_circuit() -> CircuitData {
    circuit(CircuitId::Auth, &["userID", "challenge", "userState"])
}

pub fn kyc_circuit() -> CircuitData {
    let mut names = vec![
        "userID",
        "challenge",
        "countryClaimIssuerId",
        "countryClaimIssuerState",
        "countryCode",
    ];
    names.extend(std::iter::repeat("reserved").take(15));
    names.extend([
        "birthdayClaimIssuerId",
        "birthdayClaimIssuerState",
        "currentYear",
        "currentMonth",
        "currentDay",
        "minAge",
    ]);
    circuit(CircuitId::KycBySignatures, &names)
}

pub fn mtp_circuit() -> CircuitData {
    let mut names = vec![
        "userID",
        "userState",
        "challenge",
        "issuerClaimIdenState",
        "issuerID",
        "timestamp",
        "claimSchema",
        "slotIndex",
        "operator",
    ];
    names.extend(std::iter::repeat("value").take(64));
    circuit(CircuitId::AtomicQueryMtp, &names)
}

pub fn registry() -> Arc<CircuitRegistry> {
    Arc::new(
        CircuitRegistry::builder()
            .register(auth_circuit())
            .and_then(|b| b.register(kyc_circuit()))
            .and_then(|b| b.register(mtp_circuit()))
            .unwrap()
            .build(),
    )
}

pub fn dispatcher(oracle: Arc<dyn ProofVerifier>, state: InMemoryRegistry) -> Dispatcher {
    let schemas = ConfiguredSchemas::new()
        .with(&kyc_schema(), SchemaHash::from_hex(KYC_SCHEMA_HASH).unwrap());
    Dispatcher::new(
        registry(),
        oracle,
        StateResolver::new(Arc::new(state)),
        QueryEvaluator::new(Arc::new(schemas)).with_audience(ISSUER_B),
    )
}

fn zkp(circuit_id: &str, a: [&str; 2], b: [[&str; 2]; 2], c: [&str; 2], signals: Vec<String>) -> Value {
    json!({
        "type": "zeroknowledgeproof",
        "circuitId": circuit_id,
        "proof": {
            "pi_a": [a[0], a[1], "1"],
            "pi_b": [[b[0][0], b[0][1]], [b[1][0], b[1][1]], ["1", "0"]],
            "pi_c": [c[0], c[1], "1"],
            "protocol": "groth16"
        },
        "pub_signals": signals
    })
}

/// Recorded auth circuit proof for [`USER_ID`] answering challenge 12345
pub fn auth_proof() -> Value {
    zkp(
        "auth",
        [
            "8286889681087188684411199510889276918687181609540093440568310458198317956303",
            "20120810686068956496055592376395897424117861934161580256832624025185006492545",
        ],
        [
            [
                "8781021494687726640921078755116610543888920881180197598360798979078295904948",
                "19202155147447713148677957576892776380573753514701598304555554559013661311518",
            ],
            [
                "15726655173394887666308034684678118482468533753607200826879522418086507576197",
                "16663572050292231627606042532825469225281493999513959929720171494729819874292",
            ],
        ],
        [
            "9723779257940517259310236863517792034982122114581325631102251752415874164616",
            "3242951480985471018890459433562773969741463856458716743271162635077379852479",
        ],
        vec![USER_ID.into(), "12345".into(), USER_STATE.into()],
    )
}

/// Recorded auth proof attached to a credential fetch request
pub fn fetch_auth_proof() -> Value {
    zkp(
        "auth",
        [
            "6807142976568489254129987481389970790048870221943660648833750801722749769662",
            "13811182779758948993435669124001052501939669904238445458453308627013829993881",
        ],
        [
            [
                "1100658387420856656999617260396587549490320987275888589013664343574809180330",
                "6271619554100652532302412650545865559102683218896584596952129504406572338279",
            ],
            [
                "14732910796480272245291363689840710264816417845998668210234805961967222411399",
                "697511497805383174761860295477525070010524578030535203059896030784240207952",
            ],
        ],
        [
            "3322888400314063147927477851922827359406772099015587732727269650428166130415",
            "11791447421105500417246293414158106577578665220990150855390594651727173683574",
        ],
        vec![
            "379949150130214723420589610911161895495647789006649785264738141299135414272".into(),
            "1".into(),
            "18656147546666944484453899241916469544090258810192803949522794490493271005313".into(),
        ],
    )
}

pub fn kyc_signals() -> Vec<String> {
    let mut signals: Vec<String> = vec![
        "26592849444054787445766572449338308165040390141345377877344569181291872256".into(),
        "12345".into(),
        "164414642845063686862221124543185217840281790633605788367384240953047711744".into(),
        ISSUER_A_STATE.into(),
        "840".into(),
    ];
    signals.extend(std::iter::repeat("0".to_string()).take(15));
    signals.extend(
        [
            "164414642845063686862221124543185217840281790633605788367384240953047711744",
            ISSUER_A_STATE,
            "2021",
            "4",
            "25",
            "18",
        ]
        .map(String::from),
    );
    signals
}

/// Recorded kycBySignatures proof
pub fn kyc_proof() -> Value {
    zkp(
        "kycBySignatures",
        [
            "15410252994758206156331933443865902387659457159831652500594192431349076893658",
            "20150829872771081060142254046116588090324284033366663360366174697329414878949",
        ],
        [
            [
                "9417153075860115376893693247142868897300054298656960914587138216866082643706",
                "10202816620941554744739718000741718724240818496129635422271960203010394413915",
            ],
            [
                "15503138617167966595249072003849677537923997283726290430496888985000900792650",
                "6173958614668002844023250887062625456639056306855696879145959593623787348506",
            ],
        ],
        [
            "14084349531001200150970271267870661180690655641091539571582685666559667846160",
            "6506935406401708938070550600218341978561747347886649538986407400386963731317",
        ],
        kyc_signals(),
    )
}

/// Atomic query proof over a claim issued by `issuer`; reuses the auth proof
/// points since the pairing oracle is stubbed.
pub fn mtp_proof(issuer: &str) -> Value {
    let issuer: zk_auth_verifier::Identifier = issuer.parse().unwrap();
    let schema = SchemaHash::from_hex(KYC_SCHEMA_HASH).unwrap();
    let mut signals: Vec<String> = vec![
        USER_ID.into(),
        USER_STATE.into(),
        "12345".into(),
        ISSUER_A_STATE.into(),
        issuer.to_int().to_string(),
        "1642074362".into(),
        schema.to_int().to_string(),
        "2".into(),
        "1".into(),
    ];
    signals.extend(std::iter::repeat("0".to_string()).take(64));

    let mut proof = auth_proof();
    proof["circuitId"] = json!("credentialAtomicQueryMTP");
    proof["pub_signals"] = json!(signals);
    proof
}

pub fn response(scope: Vec<Value>) -> Value {
    json!({
        "id": "2c8f9b5a-5e3b-4f0e-9b1d-8f8e3a1c6a10",
        "type": AUTHORIZATION_RESPONSE_TYPE,
        "data": { "scope": scope }
    })
}

pub fn auth_request(scope: Vec<Value>) -> Value {
    json!({
        "type": AUTHORIZATION_REQUEST_TYPE,
        "data": {
            "audience": ISSUER_B,
            "callbackUrl": "https://verifier.example.com/callback",
            "scope": scope
        }
    })
}

pub fn credential_fetch(scope: Vec<Value>) -> Value {
    json!({
        "type": CREDENTIAL_FETCH_REQUEST_TYPE,
        "body": {
            "claimId": "992fc184-c902-4f9a-af62-b383cc5e1eb4",
            "schema": "KYCAgeCredential",
            "scope": scope
        }
    })
}

pub fn proof_request(circuit_id: &str, rules: Value) -> Value {
    json!({ "type": "zeroknowledgeproof", "circuitId": circuit_id, "rules": rules })
}
