//! Circuit registry loading
//!
//! Each supported circuit's snarkjs verification key lives at
//! `<circuits_dir>/<circuitId>.json`. Keys are parsed at startup so a broken
//! file fails the server before it accepts traffic.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use zk_auth_verifier::circuits::ATOMIC_QUERY_VALUES;
use zk_auth_verifier::error::RegistryBuildError;
use zk_auth_verifier::groth16::parse_verification_key;
use zk_auth_verifier::{CircuitData, CircuitId, CircuitRegistry, IssuerStateSource, OracleError};

#[derive(Error, Debug)]
pub enum CircuitLoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("verification key {path} is invalid: {source}")]
    InvalidKey {
        path: PathBuf,
        #[source]
        source: OracleError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryBuildError),
    #[error("no verification keys found in {0}")]
    Empty(PathBuf),
}

/// Public signal names of a circuit, in signal order
pub fn public_signals_schema(circuit_id: CircuitId) -> Vec<String> {
    match circuit_id {
        CircuitId::Auth => ["userID", "challenge", "userState"]
            .map(String::from)
            .to_vec(),
        CircuitId::KycBySignatures => {
            let mut names: Vec<String> = [
                "userID",
                "challenge",
                "countryClaimIssuerId",
                "countryClaimIssuerState",
                "countryCode",
            ]
            .map(String::from)
            .to_vec();
            names.extend((0..15).map(|i| format!("reserved{i}")));
            names.extend(
                [
                    "birthdayClaimIssuerId",
                    "birthdayClaimIssuerState",
                    "currentYear",
                    "currentMonth",
                    "currentDay",
                    "minAge",
                ]
                .map(String::from),
            );
            names
        }
        CircuitId::AtomicQueryMtp => {
            let mut names: Vec<String> = [
                "userID",
                "userState",
                "challenge",
                "issuerClaimIdenState",
                "issuerID",
                "timestamp",
                "claimSchema",
                "slotIndex",
                "operator",
            ]
            .map(String::from)
            .to_vec();
            names.extend((0..ATOMIC_QUERY_VALUES).map(|i| format!("value{i}")));
            names
        }
    }
}

fn key_path(dir: &Path, circuit_id: CircuitId) -> PathBuf {
    dir.join(format!("{circuit_id}.json"))
}

/// Load every circuit whose key file exists in `dir`. Missing files are
/// skipped with a warning; an empty result is an error.
pub fn load_registry(
    dir: &Path,
    issuer_state_source: IssuerStateSource,
) -> Result<CircuitRegistry, CircuitLoadError> {
    let mut builder = CircuitRegistry::builder().issuer_state_source(issuer_state_source);

    for circuit_id in CircuitId::ALL {
        let path = key_path(dir, circuit_id);
        if !path.exists() {
            warn!(%circuit_id, path = %path.display(), "verification key not found, circuit disabled");
            continue;
        }
        let verification_key = std::fs::read(&path).map_err(|source| CircuitLoadError::Read {
            path: path.clone(),
            source,
        })?;
        parse_verification_key(&verification_key).map_err(|source| {
            CircuitLoadError::InvalidKey {
                path: path.clone(),
                source,
            }
        })?;

        builder = builder.register(CircuitData {
            circuit_id,
            verification_key,
            public_signals_schema: public_signals_schema(circuit_id),
        })?;
        info!(%circuit_id, "circuit registered");
    }

    let registry = builder.build();
    if registry.is_empty() {
        return Err(CircuitLoadError::Empty(dir.to_path_buf()));
    }
    Ok(registry)
}
