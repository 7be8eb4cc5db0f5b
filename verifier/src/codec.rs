//! Numeric and curve-point codec
//!
//! Proof material arrives as strings in one of two encodings:
//!
//! - **decimal**: each coordinate is a base-10 integer, serialized big-endian
//!   into a 32-byte field element (left-zero-padded)
//! - **hex**: the first element starts with `0x`; the elements are concatenated
//!   as-is and must already be in the canonical serialization order
//!
//! Points are serialized the EIP-197 way (the layout used by alt_bn128
//! precompiles): G1 is `x || y`, G2 is `x.c1 || x.c0 || y.c1 || y.c0`, and the
//! all-zero encoding is the point at infinity.
//!
//! In the decimal path a coordinate equal to `1` is serialized as `0`. Provers
//! emit `"1"`/`"0"` for the identity's projective coordinates, so this
//! substitution is part of the wire format and must not be dropped.

use ark_bn254::{Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ff::{BigInt, BigInteger, PrimeField};
use num_bigint::BigUint;
use num_traits::One;

use crate::error::DecodeError;

/// Byte size of one BN254 field element
pub const FIELD_ELEMENT_SIZE: usize = 32;
/// Byte size of an uncompressed G1 point
pub const G1_ENCODED_SIZE: usize = 2 * FIELD_ELEMENT_SIZE;
/// Byte size of an uncompressed G2 point
pub const G2_ENCODED_SIZE: usize = 4 * FIELD_ELEMENT_SIZE;

/// Parse a non-negative base-10 integer. Signs, separators and whitespace are
/// rejected.
pub fn parse_decimal(s: &str) -> Result<BigUint, DecodeError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeError::InvalidNumeral(s.to_string()));
    }
    BigUint::parse_bytes(s.as_bytes(), 10).ok_or_else(|| DecodeError::InvalidNumeral(s.to_string()))
}

/// Parse an integer given either as `0x`-prefixed hex or as decimal.
pub fn parse_big_int(s: &str) -> Result<BigUint, DecodeError> {
    match s.strip_prefix("0x") {
        Some(digits) => {
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(DecodeError::InvalidNumeral(s.to_string()));
            }
            BigUint::parse_bytes(digits.as_bytes(), 16)
                .ok_or_else(|| DecodeError::InvalidNumeral(s.to_string()))
        }
        None => parse_decimal(s),
    }
}

/// Big-endian, left-zero-padded 32-byte encoding of `value`.
pub fn field_bytes(value: &BigUint) -> Result<[u8; FIELD_ELEMENT_SIZE], DecodeError> {
    let bytes = value.to_bytes_be();
    if bytes.len() > FIELD_ELEMENT_SIZE {
        return Err(DecodeError::FieldElementOverflow(FIELD_ELEMENT_SIZE));
    }
    let mut out = [0u8; FIELD_ELEMENT_SIZE];
    out[FIELD_ELEMENT_SIZE - bytes.len()..].copy_from_slice(&bytes);
    Ok(out)
}

/// Encode one decimal coordinate, applying the `1 -> 0` substitution.
pub fn decimal_to_field_bytes(s: &str) -> Result<[u8; FIELD_ELEMENT_SIZE], DecodeError> {
    let mut value = parse_decimal(s)?;
    if value.is_one() {
        value = BigUint::default();
    }
    field_bytes(&value)
}

fn is_hex_encoded(s: &str) -> bool {
    s.starts_with("0x")
}

fn concat_hex<'a>(parts: impl IntoIterator<Item = &'a str>) -> Result<Vec<u8>, DecodeError> {
    let joined: String = parts
        .into_iter()
        .map(|part| part.strip_prefix("0x").unwrap_or(part))
        .collect();
    hex::decode(joined).map_err(|e| DecodeError::InvalidHex(e.to_string()))
}

/// Serialize a G1 tuple `[x, y, z]` into its 64-byte encoding. Only `x` and
/// `y` are used; `z` must be present.
pub fn g1_encoding<S: AsRef<str>>(coords: &[S]) -> Result<[u8; G1_ENCODED_SIZE], DecodeError> {
    if coords.len() <= 2 {
        return Err(DecodeError::NotEnoughCoordinates {
            kind: "G1",
            got: coords.len(),
        });
    }
    let (x, y) = (coords[0].as_ref(), coords[1].as_ref());

    if is_hex_encoded(x) {
        let bytes = concat_hex([x, y])?;
        return bytes
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::InvalidLength {
                kind: "G1",
                expected: G1_ENCODED_SIZE,
                got: bytes.len(),
            });
    }

    let mut out = [0u8; G1_ENCODED_SIZE];
    out[..FIELD_ELEMENT_SIZE].copy_from_slice(&decimal_to_field_bytes(x)?);
    out[FIELD_ELEMENT_SIZE..].copy_from_slice(&decimal_to_field_bytes(y)?);
    Ok(out)
}

/// Serialize a G2 tuple `[[x0, x1], [y0, y1], [z0, z1]]` into its 128-byte
/// encoding. Decimal limbs are written second-then-first.
pub fn g2_encoding<S, L>(coords: &[L]) -> Result<[u8; G2_ENCODED_SIZE], DecodeError>
where
    S: AsRef<str>,
    L: AsRef<[S]>,
{
    if coords.len() <= 2 {
        return Err(DecodeError::NotEnoughCoordinates {
            kind: "G2",
            got: coords.len(),
        });
    }
    let (x, y) = (coords[0].as_ref(), coords[1].as_ref());
    let first = x.first().map(|s| s.as_ref()).unwrap_or_default();

    if is_hex_encoded(first) {
        let bytes = concat_hex(x.iter().chain(y.iter()).map(|s| s.as_ref()))?;
        return bytes
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::InvalidLength {
                kind: "G2",
                expected: G2_ENCODED_SIZE,
                got: bytes.len(),
            });
    }

    for (limb, values) in [x, y].into_iter().enumerate() {
        if values.len() < 2 {
            return Err(DecodeError::MalformedG2Limb {
                limb,
                got: values.len(),
            });
        }
    }

    let ordered = [&x[1], &x[0], &y[1], &y[0]];
    let mut out = [0u8; G2_ENCODED_SIZE];
    for (chunk, value) in out.chunks_exact_mut(FIELD_ELEMENT_SIZE).zip(ordered) {
        chunk.copy_from_slice(&decimal_to_field_bytes(value.as_ref())?);
    }
    Ok(out)
}

fn limbs_be(bytes: &[u8]) -> [u64; 4] {
    let mut limbs = [0u64; 4];
    for (limb, chunk) in limbs.iter_mut().zip(bytes.rchunks(8)) {
        let mut word = [0u8; 8];
        word[8 - chunk.len()..].copy_from_slice(chunk);
        *limb = u64::from_be_bytes(word);
    }
    limbs
}

/// Interpret 32 big-endian bytes as a canonical field element; values at or
/// above the modulus are rejected rather than reduced.
fn field_from_be<F: PrimeField<BigInt = BigInt<4>>>(bytes: &[u8]) -> Option<F> {
    F::from_bigint(BigInt::new(limbs_be(bytes)))
}

fn base_field(bytes: &[u8]) -> Result<Fq, DecodeError> {
    field_from_be(bytes).ok_or(DecodeError::NonCanonicalCoordinate)
}

fn field_to_be<F: PrimeField>(value: &F) -> [u8; FIELD_ELEMENT_SIZE] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; FIELD_ELEMENT_SIZE];
    out[FIELD_ELEMENT_SIZE - bytes.len()..].copy_from_slice(&bytes);
    out
}

/// Deserialize a 64-byte G1 encoding, checking the curve equation.
pub fn g1_from_encoding(bytes: &[u8]) -> Result<G1Affine, DecodeError> {
    if bytes.len() != G1_ENCODED_SIZE {
        return Err(DecodeError::InvalidLength {
            kind: "G1",
            expected: G1_ENCODED_SIZE,
            got: bytes.len(),
        });
    }
    if bytes.iter().all(|b| *b == 0) {
        return Ok(G1Affine::identity());
    }
    let x = base_field(&bytes[..32])?;
    let y = base_field(&bytes[32..])?;
    let point = G1Affine::new_unchecked(x, y);
    if !point.is_on_curve() {
        return Err(DecodeError::NotOnCurve("G1"));
    }
    // BN254 G1 has cofactor 1
    Ok(point)
}

/// Deserialize a 128-byte G2 encoding, checking the curve equation and
/// subgroup membership.
pub fn g2_from_encoding(bytes: &[u8]) -> Result<G2Affine, DecodeError> {
    if bytes.len() != G2_ENCODED_SIZE {
        return Err(DecodeError::InvalidLength {
            kind: "G2",
            expected: G2_ENCODED_SIZE,
            got: bytes.len(),
        });
    }
    if bytes.iter().all(|b| *b == 0) {
        return Ok(G2Affine::identity());
    }
    let x = Fq2::new(base_field(&bytes[32..64])?, base_field(&bytes[..32])?);
    let y = Fq2::new(base_field(&bytes[96..])?, base_field(&bytes[64..96])?);
    let point = G2Affine::new_unchecked(x, y);
    if !point.is_on_curve() {
        return Err(DecodeError::NotOnCurve("G2"));
    }
    if !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(DecodeError::NotInSubgroup("G2"));
    }
    Ok(point)
}

/// Inverse of [`g1_from_encoding`].
pub fn g1_to_encoding(point: &G1Affine) -> [u8; G1_ENCODED_SIZE] {
    let mut out = [0u8; G1_ENCODED_SIZE];
    if point.infinity {
        return out;
    }
    out[..32].copy_from_slice(&field_to_be(&point.x));
    out[32..].copy_from_slice(&field_to_be(&point.y));
    out
}

/// Inverse of [`g2_from_encoding`].
pub fn g2_to_encoding(point: &G2Affine) -> [u8; G2_ENCODED_SIZE] {
    let mut out = [0u8; G2_ENCODED_SIZE];
    if point.infinity {
        return out;
    }
    out[..32].copy_from_slice(&field_to_be(&point.x.c1));
    out[32..64].copy_from_slice(&field_to_be(&point.x.c0));
    out[64..96].copy_from_slice(&field_to_be(&point.y.c1));
    out[96..].copy_from_slice(&field_to_be(&point.y.c0));
    out
}

/// Decode a G1 point from its string tuple.
pub fn decode_g1<S: AsRef<str>>(coords: &[S]) -> Result<G1Affine, DecodeError> {
    g1_from_encoding(&g1_encoding(coords)?)
}

/// Decode a G2 point from its string tuple.
pub fn decode_g2<S, L>(coords: &[L]) -> Result<G2Affine, DecodeError>
where
    S: AsRef<str>,
    L: AsRef<[S]>,
{
    g2_from_encoding(&g2_encoding(coords)?)
}

/// Parse public signal `index` as a canonical scalar field element.
pub fn scalar_from_decimal(s: &str, index: usize) -> Result<Fr, DecodeError> {
    let bytes = field_bytes(&parse_decimal(s)?)
        .map_err(|_| DecodeError::NonCanonicalSignal { index })?;
    field_from_be(&bytes).ok_or(DecodeError::NonCanonicalSignal { index })
}
