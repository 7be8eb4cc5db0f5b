//! Groth16 pairing oracle over BN254
//!
//! The verification equation is
//! e(A, B) == e(vk_α, vk_β) · e(Σ inputᵢ·ICᵢ, vk_γ) · e(C, vk_δ)
//! and is evaluated by `ark-groth16`. Verification keys are the
//! `verification_key.json` files snarkjs exports; their coordinates go through
//! the same decimal codec as proofs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use ark_bn254::{Bn254, Fr};
use ark_groth16::{prepare_verifying_key, Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_snark::SNARK;
use serde::Deserialize;

use crate::codec::{decode_g1, decode_g2, scalar_from_decimal};
use crate::error::OracleError;
use crate::types::DecodedProof;

/// "Does this proof satisfy this key" oracle.
pub trait ProofVerifier: Send + Sync {
    fn verify(
        &self,
        verification_key: &[u8],
        proof: &DecodedProof,
        public_signals: &[String],
    ) -> Result<bool, OracleError>;
}

/// snarkjs verification key export
#[derive(Deserialize)]
struct SnarkjsVerificationKey {
    protocol: Option<String>,
    curve: Option<String>,
    #[serde(rename = "nPublic")]
    n_public: Option<usize>,
    vk_alpha_1: Vec<String>,
    vk_beta_2: Vec<Vec<String>>,
    vk_gamma_2: Vec<Vec<String>>,
    vk_delta_2: Vec<Vec<String>>,
    #[serde(rename = "IC")]
    ic: Vec<Vec<String>>,
}

/// Parse a snarkjs `verification_key.json`.
pub fn parse_verification_key(bytes: &[u8]) -> Result<VerifyingKey<Bn254>, OracleError> {
    let raw: SnarkjsVerificationKey =
        serde_json::from_slice(bytes).map_err(|e| OracleError::InvalidKey(e.to_string()))?;

    if let Some(protocol) = raw.protocol.as_deref().filter(|p| *p != "groth16") {
        return Err(OracleError::InvalidKey(format!("unsupported protocol {protocol:?}")));
    }
    if let Some(curve) = raw.curve.as_deref().filter(|c| *c != "bn128") {
        return Err(OracleError::InvalidKey(format!("unsupported curve {curve:?}")));
    }
    if raw.ic.is_empty() {
        return Err(OracleError::InvalidKey("IC is empty".into()));
    }
    if let Some(n) = raw.n_public.filter(|n| *n + 1 != raw.ic.len()) {
        return Err(OracleError::InvalidKey(format!(
            "nPublic is {n} but IC has {} points",
            raw.ic.len()
        )));
    }

    Ok(VerifyingKey {
        alpha_g1: decode_g1(&raw.vk_alpha_1)?,
        beta_g2: decode_g2(&raw.vk_beta_2)?,
        gamma_g2: decode_g2(&raw.vk_gamma_2)?,
        delta_g2: decode_g2(&raw.vk_delta_2)?,
        gamma_abc_g1: raw
            .ic
            .iter()
            .map(|point| decode_g1(point))
            .collect::<Result<_, _>>()?,
    })
}

/// Bundled [`ProofVerifier`]
///
/// Parsed and prepared keys are cached by their raw bytes, so each circuit's
/// key is decoded and subgroup-checked once.
#[derive(Default)]
pub struct Groth16Verifier {
    prepared: RwLock<HashMap<Vec<u8>, Arc<PreparedVerifyingKey<Bn254>>>>,
}

impl fmt::Debug for Groth16Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.prepared.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("Groth16Verifier")
            .field("cached_keys", &cached)
            .finish()
    }
}

impl Groth16Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn prepared_key(&self, bytes: &[u8]) -> Result<Arc<PreparedVerifyingKey<Bn254>>, OracleError> {
        if let Some(pvk) = self
            .prepared
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bytes)
        {
            return Ok(Arc::clone(pvk));
        }

        let pvk = Arc::new(prepare_verifying_key(&parse_verification_key(bytes)?));
        self.prepared
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bytes.to_vec(), Arc::clone(&pvk));
        Ok(pvk)
    }
}

impl ProofVerifier for Groth16Verifier {
    fn verify(
        &self,
        verification_key: &[u8],
        proof: &DecodedProof,
        public_signals: &[String],
    ) -> Result<bool, OracleError> {
        let pvk = self.prepared_key(verification_key)?;
        let expected = pvk.vk.gamma_abc_g1.len() - 1;
        if public_signals.len() != expected {
            return Err(OracleError::InputCount {
                expected,
                got: public_signals.len(),
            });
        }

        let inputs = public_signals
            .iter()
            .enumerate()
            .map(|(i, s)| scalar_from_decimal(s, i))
            .collect::<Result<Vec<Fr>, _>>()?;

        let proof = Proof::<Bn254> {
            a: proof.a,
            b: proof.b,
            c: proof.c,
        };
        Groth16::<Bn254>::verify_with_processed_vk(&pvk, &inputs, &proof)
            .map_err(|e| OracleError::Pairing(e.to_string()))
    }
}
