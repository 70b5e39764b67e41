//! Session-key derivation for Opacity Cipher Suite 2.
//!
//! NIST SP 800-56A § 5.8.1 single-step KDF with SHA-256:
//! ```plain
//! keyblock = H(1 || Z || OtherInfo) || H(2 || Z || OtherInfo)
//! ```
//! where the counter is a 4-byte big-endian integer and the key block is
//! truncated to 64 bytes (512 bits).


use digest::Digest;
use hex_literal::hex;
use sha2::Sha256;
use zeroize::Zeroizing;
use zeroize_derive::ZeroizeOnDrop;

use crate::crypt::ecdh;


/// Length in bytes of one derived session key.
pub const SESSION_KEY_LENGTH: usize = 16;

/// Length in bytes of the derived key block (512 bits).
pub const KEY_BLOCK_LENGTH: usize = 4 * SESSION_KEY_LENGTH;

/// Length in bytes of the OtherInfo context string.
pub const OTHER_INFO_LENGTH: usize = 61;

/// Length-tagged AlgorithmID header of OtherInfo (SP 800-56A).
pub const OTHER_INFO_PREAMBLE: [u8; 6] = hex!("040909090908");


/// The session keys for the Secure Messaging tunnel, in partition order.
///
/// Wiped on drop; ownership passes to the caller on a successful handshake.
#[derive(Clone, Eq, PartialEq, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub cfrm: [u8; SESSION_KEY_LENGTH],
    pub mac: [u8; SESSION_KEY_LENGTH],
    pub enc: [u8; SESSION_KEY_LENGTH],
    pub rmac: [u8; SESSION_KEY_LENGTH],
}
impl SessionKeys {
    /// Partitions the 64-byte key block into the four session keys.
    ///
    /// The order is fixed: cfrm, mac, enc, rmac.
    pub fn from_key_block(block: &[u8; KEY_BLOCK_LENGTH]) -> Self {
        let mut keys = Self {
            cfrm: [0u8; SESSION_KEY_LENGTH],
            mac: [0u8; SESSION_KEY_LENGTH],
            enc: [0u8; SESSION_KEY_LENGTH],
            rmac: [0u8; SESSION_KEY_LENGTH],
        };
        keys.cfrm.copy_from_slice(&block[0..16]);
        keys.mac.copy_from_slice(&block[16..32]);
        keys.enc.copy_from_slice(&block[32..48]);
        keys.rmac.copy_from_slice(&block[48..64]);
        keys
    }
}


/// Derives the 64-byte key block from the shared secret and OtherInfo.
pub fn derive_key_block(z: &[u8], other_info: &[u8]) -> Zeroizing<[u8; KEY_BLOCK_LENGTH]> {
    let mut block = Zeroizing::new([0u8; KEY_BLOCK_LENGTH]);
    for (chunk, counter) in block.chunks_mut(Sha256::output_size()).zip(1u32..) {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        hasher.update(other_info);
        let digest = hasher.finalize();
        chunk.copy_from_slice(&digest[..chunk.len()]);
    }
    block
}


/// Assembles the OtherInfo string binding the derived keys to this
/// handshake's transcript.
///
/// Single-byte length prefixes are embedded in the flat buffer. Only the
/// initial 16 bytes of the host public key's x coordinate are included,
/// matching the deployed card profile.
pub fn build_other_info(
    host_id: &[u8; 8],
    host_control_byte: u8,
    host_public_key: &[u8; ecdh::ENCODED_POINT_LENGTH],
    card_id: &[u8; 8],
    card_nonce: &[u8; 16],
    card_control_byte: u8,
) -> Vec<u8> {
    let mut info = Vec::with_capacity(OTHER_INFO_LENGTH);
    info.extend_from_slice(&OTHER_INFO_PREAMBLE);
    info.extend_from_slice(host_id);
    info.push(0x01);
    info.push(host_control_byte);
    info.push(0x10);
    info.extend_from_slice(&host_public_key[1..17]);
    info.push(0x08);
    info.extend_from_slice(card_id);
    info.push(0x10);
    info.extend_from_slice(card_nonce);
    info.push(0x01);
    info.push(card_control_byte);
    debug_assert_eq!(info.len(), OTHER_INFO_LENGTH);
    info
}
