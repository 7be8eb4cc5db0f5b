//! # Auth Server
//!
//! HTTP front end for the zero-knowledge authorization verifier. Configuration,
//! circuit loading and the on-chain state registry client live here; the
//! verification logic is in `zk-auth-verifier`.

pub mod config;
pub mod routes;
pub mod services;
pub mod state;
pub mod types;
