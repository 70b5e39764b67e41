//! Ephemeral-static elliptic-curve Diffie-Hellman over NIST P-256.


use std::fmt;

use p256::ecdh;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;


/// Length in bytes of one affine coordinate of a P-256 point.
pub const COORDINATE_LENGTH: usize = 32;

/// Length in bytes of a SEC1 uncompressed point: `04 || X || Y`.
pub const ENCODED_POINT_LENGTH: usize = 1 + 2 * COORDINATE_LENGTH;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum KeyError {
    PointLength { obtained: usize },
    InvalidScalar,
    InvalidPoint,
    DegenerateSharedSecret,
}
impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PointLength { obtained }
                => write!(f, "encoded public key has {} bytes, expected {}", obtained, ENCODED_POINT_LENGTH),
            Self::InvalidScalar
                => write!(f, "private scalar is zero or not below the curve order"),
            Self::InvalidPoint
                => write!(f, "point is not on curve P-256 or is the identity"),
            Self::DegenerateSharedSecret
                => write!(f, "shared-secret computation produced a degenerate value"),
        }
    }
}
impl std::error::Error for KeyError {
}


/// A P-256 keypair generated for a single handshake.
///
/// The private scalar is wiped when the pair is dropped.
pub struct EphemeralKeyPair {
    secret: SecretKey,
    encoded_public: [u8; ENCODED_POINT_LENGTH],
}
impl EphemeralKeyPair {
    /// Generates a fresh keypair from the operating system CSPRNG.
    pub fn generate() -> Result<Self, KeyError> {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    /// Builds the keypair from a 32-byte big-endian scalar.
    ///
    /// Used for deterministic known-answer tests; production handshakes use
    /// [`EphemeralKeyPair::generate`].
    pub fn from_secret_scalar(scalar: &[u8; COORDINATE_LENGTH]) -> Result<Self, KeyError> {
        let secret = SecretKey::from_slice(scalar)
            .map_err(|_| KeyError::InvalidScalar)?;
        Self::from_secret(secret)
    }

    fn from_secret(secret: SecretKey) -> Result<Self, KeyError> {
        let point = secret.public_key().to_encoded_point(false);
        let point_bytes = point.as_bytes();
        if point_bytes.len() != ENCODED_POINT_LENGTH || point_bytes[0] != 0x04 {
            return Err(KeyError::PointLength { obtained: point_bytes.len() });
        }
        let mut encoded_public = [0u8; ENCODED_POINT_LENGTH];
        encoded_public.copy_from_slice(point_bytes);
        Ok(Self {
            secret,
            encoded_public,
        })
    }

    /// The public key as a SEC1 uncompressed point: `04 || X(32) || Y(32)`.
    pub fn encoded_public_key(&self) -> &[u8; ENCODED_POINT_LENGTH] {
        &self.encoded_public
    }

    /// The public key coordinates `X || Y` without the SEC1 mode byte.
    pub fn public_key_xy(&self) -> &[u8] {
        &self.encoded_public[1..]
    }

    /// Computes the ECDH shared secret with the given public key.
    ///
    /// The result is the x coordinate of `priv · peer` as a 32-byte
    /// big-endian field element, leading zeroes preserved.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> Result<Zeroizing<[u8; COORDINATE_LENGTH]>, KeyError> {
        let shared = ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        let mut z = Zeroizing::new([0u8; COORDINATE_LENGTH]);
        z.copy_from_slice(shared.raw_secret_bytes().as_slice());
        if z.iter().all(|b| *b == 0) {
            return Err(KeyError::DegenerateSharedSecret);
        }
        Ok(z)
    }
}


/// Validates an encoded public key received from the card.
///
/// Decoding rejects off-curve points, the identity and malformed encodings.
/// P-256 has cofactor 1, so an on-curve point other than the identity has
/// order n.
pub fn validate_public_key(encoded: &[u8]) -> Result<PublicKey, KeyError> {
    if encoded.len() != ENCODED_POINT_LENGTH {
        return Err(KeyError::PointLength { obtained: encoded.len() });
    }
    PublicKey::from_sec1_bytes(encoded)
        .map_err(|_| KeyError::InvalidPoint)
}
