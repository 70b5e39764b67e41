//! CMAC with AES-128 (NIST SP 800-38B).
//!
//! Opacity Cipher Suite 2 uses the full 16-byte tag to authenticate the
//! card's cryptogram; no truncation and no streaming interface are needed.


use aes::Aes128;
use cmac::{Cmac, Mac};
use subtle::ConstantTimeEq;


/// Length in bytes of both the MAC key and the authentication tag.
pub const MAC_LENGTH: usize = 16;


/// Computes the CMAC-AES-128 tag over the given message.
pub fn compute(key: &[u8; MAC_LENGTH], message: &[u8]) -> [u8; MAC_LENGTH] {
    let mut mac = Cmac::<Aes128>::new(key.into());
    mac.update(message);
    let mut tag = [0u8; MAC_LENGTH];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    tag
}


/// Verifies an expected tag against the one computed over the message.
///
/// The comparison is constant-time.
pub fn verify(key: &[u8; MAC_LENGTH], message: &[u8], expected: &[u8; MAC_LENGTH]) -> bool {
    let computed = compute(key, message);
    computed.ct_eq(expected).into()
}
