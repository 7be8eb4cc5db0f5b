//! Services for the Auth Server

pub mod circuits;
pub mod eth_state;

pub use circuits::{load_registry, public_signals_schema, CircuitLoadError};
pub use eth_state::EthStateRegistry;
