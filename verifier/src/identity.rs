//! Identity identifiers
//!
//! An identifier is 31 bytes: a 2-byte type, the 27-byte genesis (derived
//! from the identity's first state), and a 2-byte big-endian checksum over the
//! first 29 bytes. Circuits carry it as a field element whose little-endian
//! bytes are the identifier; humans see it in base58.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;

use crate::error::DecodeError;

pub const ID_LENGTH: usize = 31;
pub const GENESIS_LENGTH: usize = 27;

/// Type prefix of identities created with the default claim tree layout
pub const DEFAULT_ID_TYPE: [u8; 2] = [0x00, 0x00];

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier([u8; ID_LENGTH]);

fn checksum(type_and_genesis: &[u8]) -> [u8; 2] {
    type_and_genesis
        .iter()
        .fold(0u16, |sum, b| sum.wrapping_add(u16::from(*b)))
        .to_be_bytes()
}

impl Identifier {
    /// Build an identifier from its type and genesis, computing the checksum.
    pub fn new(id_type: [u8; 2], genesis: [u8; GENESIS_LENGTH]) -> Self {
        let mut bytes = [0u8; ID_LENGTH];
        bytes[..2].copy_from_slice(&id_type);
        bytes[2..29].copy_from_slice(&genesis);
        let sum = checksum(&bytes[..29]);
        bytes[29..].copy_from_slice(&sum);
        Self(bytes)
    }

    /// Parse raw identifier bytes, validating the checksum.
    pub fn from_bytes(bytes: [u8; ID_LENGTH]) -> Result<Self, DecodeError> {
        if bytes.iter().all(|b| *b == 0) {
            return Err(DecodeError::InvalidIdentifier("byte array empty".into()));
        }
        if checksum(&bytes[..29]) != bytes[29..] {
            return Err(DecodeError::InvalidIdentifier("checksum error".into()));
        }
        Ok(Self(bytes))
    }

    /// Parse an identifier carried as a field element.
    pub fn from_int(value: &BigUint) -> Result<Self, DecodeError> {
        let le = value.to_bytes_le();
        if le.len() > ID_LENGTH {
            return Err(DecodeError::InvalidIdentifier(format!(
                "value needs {} bytes, identifiers are {ID_LENGTH}",
                le.len()
            )));
        }
        let mut bytes = [0u8; ID_LENGTH];
        bytes[..le.len()].copy_from_slice(&le);
        Self::from_bytes(bytes)
    }

    /// Identifier an identity has before publishing any state: its genesis is
    /// the trailing 27 bytes of the little-endian state.
    pub fn from_genesis_state(id_type: [u8; 2], state: &BigUint) -> Result<Self, DecodeError> {
        let le = state.to_bytes_le();
        if le.len() > 32 {
            return Err(DecodeError::FieldElementOverflow(32));
        }
        let mut state_bytes = [0u8; 32];
        state_bytes[..le.len()].copy_from_slice(&le);

        let mut genesis = [0u8; GENESIS_LENGTH];
        genesis.copy_from_slice(&state_bytes[32 - GENESIS_LENGTH..]);
        Ok(Self::new(id_type, genesis))
    }

    pub fn id_type(&self) -> [u8; 2] {
        [self.0[0], self.0[1]]
    }

    pub fn genesis(&self) -> &[u8] {
        &self.0[2..29]
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    /// Field-element form, as carried in public signals.
    pub fn to_int(&self) -> BigUint {
        BigUint::from_bytes_le(&self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({self})")
    }
}

impl FromStr for Identifier {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| DecodeError::InvalidIdentifier(e.to_string()))?;
        let bytes: [u8; ID_LENGTH] = decoded.try_into().map_err(|v: Vec<u8>| {
            DecodeError::InvalidIdentifier(format!("expected {ID_LENGTH} bytes, got {}", v.len()))
        })?;
        Self::from_bytes(bytes)
    }
}
