//! Verification of zero-knowledge identity proofs
//!
//! Authorization responses and credential fetch requests carry Groth16 proofs
//! over BN254. This crate decodes the proof material, runs the pairing check,
//! evaluates the requester's query rules against the public signals, and
//! reconciles the identity states the proofs claim with an on-chain state
//! registry.
//!
//! ```text
//! Message ─▶ Dispatcher ─▶ codec ─▶ CircuitVerifier ─▶ ProofVerifier (pairing)
//!                                        │           ─▶ QueryEvaluator
//!                                        └─────────▶ StateResolver ─▶ StateRegistry
//! ```
//!
//! External collaborators are traits: [`ProofVerifier`], [`StateRegistry`],
//! [`SchemaResolver`] and [`GenesisCheck`]. Configuration is injected; the
//! crate reads no environment and keeps no global state.

pub mod circuits;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod groth16;
pub mod identity;
pub mod query;
pub mod state;
pub mod types;

pub use circuits::{CircuitData, CircuitId, CircuitRegistry, CircuitVerifier, IssuerStateSource};
pub use dispatch::{Dispatcher, VerifierOptions};
pub use error::{
    DecodeError, DispatchError, InvalidState, OracleError, Outcome, QueryViolation, RegistryError,
    SchemaError, StateError, VerificationError,
};
pub use groth16::{Groth16Verifier, ProofVerifier};
pub use identity::Identifier;
pub use query::{ConfiguredSchemas, Query, QueryEvaluator, SchemaHash, SchemaRef, SchemaResolver};
pub use state::{
    GenesisCheck, IdGenesisCheck, ResolvedState, StateRegistry, StateResolver, StateTarget,
    TransitionInfo, VerificationContext,
};
pub use types::{ExtractedToken, Message, MessageType, ZeroKnowledgeProof, ZeroKnowledgeProofRequest};
