//! Opacity secure-tunnel establishment per NIST SP 800-73-4, Cipher Suite 2.
//!
//! The handshake is a single GENERAL AUTHENTICATE exchange: the host sends
//! its control byte, identifier and a fresh ephemeral P-256 public key; the
//! card replies with its signed response template. The host validates the
//! card's static key, runs ephemeral-static ECDH, derives the four session
//! keys and checks the card's authentication cryptogram under the
//! confirmation key. Either all of that succeeds and the session keys are
//! handed to the caller, or the transceiver is closed and a typed error is
//! returned.


use std::fmt;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::card_signature::{CardSignature, ParseError};
use crate::crypt::cipher_mac;
use crate::crypt::ecdh::{self, EphemeralKeyPair, KeyError};
use crate::der_util;
use crate::hex_util;
use crate::iso7816::apdu::Apdu;
use crate::iso7816::card::{CommunicationError, Transceiver};
use crate::kdf::{self, SessionKeys};


/// Host control byte CBH; zero means persistent binding is never requested.
pub const HOST_CONTROL_BYTE: u8 = 0x00;

/// KeyConfirmation label prefixed to the cryptogram message.
const KEY_CONFIRMATION_LABEL: [u8; 6] = *b"KC_1_V";

const GENERAL_AUTHENTICATE: &str = "GENERAL AUTHENTICATE";

const INS_GENERAL_AUTHENTICATE: u8 = 0x87;
// PIV algorithm reference for Cipher Suite 2 and the key reference of the
// PIV Secure Messaging key (SP 800-73-4 part 1, tables 5 and 6b)
const ALG_CIPHER_SUITE_2: u8 = 0x27;
const KEY_REF_SECURE_MESSAGING: u8 = 0x04;


/// Deployment-specific handshake parameters.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TunnelConfig {
    /// IDH, the 8-byte host application identifier.
    pub host_id: [u8; 8],
}


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TunnelMetrics {
    /// Wall-clock duration of the successful handshake.
    pub tunnel_creation_ms: u64,
}


/// The product of a successful handshake.
///
/// The card signature rides along so a caller can run the optional CVC
/// verification of SP 800-73-4 § 4.1.5 externally; the handshake itself
/// keeps no other state.
pub struct TunnelSession {
    pub keys: SessionKeys,
    pub card_signature: CardSignature,
    pub metrics: TunnelMetrics,
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("keys", &"<redacted>")
            .field("card_signature", &self.card_signature)
            .field("metrics", &self.metrics)
            .finish()
    }
}


#[derive(Debug)]
pub enum Error {
    /// Ephemeral key material could not be produced.
    CryptoInit(KeyError),
    /// The transceiver failed or the card refused the command.
    Transport(CommunicationError),
    /// The card's response template could not be decoded.
    Parse(ParseError),
    /// The card requested persistent binding, which this profile rejects.
    PersistentBindingRequested { cb: u8 },
    /// The card's static public key is not a valid P-256 point.
    KeyValidation(KeyError),
    /// The shared-secret computation failed.
    Ecdh(KeyError),
    /// The card's authentication cryptogram did not verify.
    Authentication,
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CryptoInit(e)
                => write!(f, "failed to create ephemeral key material: {}", e),
            Self::Transport(e)
                => write!(f, "card communication failed: {}", e),
            Self::Parse(e)
                => write!(f, "malformed GENERAL AUTHENTICATE response: {}", e),
            Self::PersistentBindingRequested { cb }
                => write!(f, "card requested persistent binding (control byte 0x{:02X})", cb),
            Self::KeyValidation(e)
                => write!(f, "card public key failed validation: {}", e),
            Self::Ecdh(e)
                => write!(f, "shared-secret computation failed: {}", e),
            Self::Authentication
                => write!(f, "card authentication cryptogram did not verify"),
        }
    }
}
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CryptoInit(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::PersistentBindingRequested { .. } => None,
            Self::KeyValidation(e) => Some(e),
            Self::Ecdh(e) => Some(e),
            Self::Authentication => None,
        }
    }
}
impl From<CommunicationError> for Error {
    fn from(value: CommunicationError) -> Self { Self::Transport(value) }
}
impl From<ParseError> for Error {
    fn from(value: ParseError) -> Self { Self::Parse(value) }
}


/// Opens the secure tunnel with a freshly generated ephemeral keypair.
///
/// On success the session keys, the parsed card signature and the elapsed
/// time are returned and the transceiver is left open for Secure Messaging.
/// On any failure the transceiver is closed exactly once, key material is
/// wiped and the typed error names the failing step.
#[instrument(skip_all)]
pub fn open_tunnel<T: Transceiver>(
    transceiver: &mut T,
    config: &TunnelConfig,
) -> Result<TunnelSession, Error> {
    let start = Instant::now();
    let host_keys = match EphemeralKeyPair::generate() {
        Ok(host_keys) => host_keys,
        Err(e) => {
            transceiver.close();
            return Err(Error::CryptoInit(e));
        },
    };
    run_handshake(transceiver, config, host_keys, start)
}

/// Opens the secure tunnel with a caller-supplied ephemeral keypair.
///
/// Meant for deterministic known-answer testing; production callers use
/// [`open_tunnel`].
#[instrument(skip_all)]
pub fn open_tunnel_with_keys<T: Transceiver>(
    transceiver: &mut T,
    config: &TunnelConfig,
    host_keys: EphemeralKeyPair,
) -> Result<TunnelSession, Error> {
    run_handshake(transceiver, config, host_keys, Instant::now())
}

fn run_handshake<T: Transceiver>(
    transceiver: &mut T,
    config: &TunnelConfig,
    host_keys: EphemeralKeyPair,
    start: Instant,
) -> Result<TunnelSession, Error> {
    match perform_handshake(transceiver, config, &host_keys) {
        Ok((keys, card_signature)) => {
            let tunnel_creation_ms = u64::try_from(start.elapsed().as_millis())
                .unwrap_or(u64::MAX);
            info!(tunnel_creation_ms, "opacity tunnel established");
            Ok(TunnelSession {
                keys,
                card_signature,
                metrics: TunnelMetrics { tunnel_creation_ms },
            })
        },
        Err(error) => {
            // the ephemeral scalar and any derived key material are wiped
            // on drop
            transceiver.close();
            Err(error)
        },
    }
}

fn perform_handshake<T: Transceiver>(
    transceiver: &mut T,
    config: &TunnelConfig,
    host_keys: &EphemeralKeyPair,
) -> Result<(SessionKeys, CardSignature), Error> {
    let request = Apdu {
        cla: 0x00,
        ins: INS_GENERAL_AUTHENTICATE,
        p1: ALG_CIPHER_SUITE_2,
        p2: KEY_REF_SECURE_MESSAGING,
        data: build_general_authenticate(
            HOST_CONTROL_BYTE,
            &config.host_id,
            host_keys.encoded_public_key(),
        ),
        response_length: Some(0),
    };
    let response = transceiver.transceive(GENERAL_AUTHENTICATE, &request)?;
    if !response.trailer.is_success() {
        return Err(CommunicationError::OperationFailed {
            operation: GENERAL_AUTHENTICATE.to_owned(),
            response,
        }.into());
    }

    let card_signature = CardSignature::parse(&response.data)?;
    debug!(
        card_id = %hex_util::hex_from_bytes(&card_signature.id),
        issuer_id = %hex_util::hex_from_bytes(&card_signature.issuer_id),
        guid = %hex_util::hex_from_bytes(&card_signature.guid),
        "card signature parsed",
    );

    if card_signature.cb != 0x00 {
        warn!(cb = card_signature.cb, "card requested persistent binding, terminating session");
        return Err(Error::PersistentBindingRequested { cb: card_signature.cb });
    }

    let card_public_key = ecdh::validate_public_key(&card_signature.public_key)
        .map_err(Error::KeyValidation)?;
    let z = host_keys.diffie_hellman(&card_public_key)
        .map_err(Error::Ecdh)?;

    let other_info = kdf::build_other_info(
        &config.host_id,
        HOST_CONTROL_BYTE,
        host_keys.encoded_public_key(),
        &card_signature.id,
        &card_signature.nonce,
        card_signature.cb,
    );
    let key_block = kdf::derive_key_block(z.as_slice(), &other_info);
    let keys = SessionKeys::from_key_block(&key_block);

    // KC_1_V || IDicc || IDH || Q_H without the SEC1 mode byte
    let mut message = Vec::with_capacity(KEY_CONFIRMATION_LABEL.len() + 2*8 + 2*ecdh::COORDINATE_LENGTH);
    message.extend_from_slice(&KEY_CONFIRMATION_LABEL);
    message.extend_from_slice(&card_signature.id);
    message.extend_from_slice(&config.host_id);
    message.extend_from_slice(host_keys.public_key_xy());
    if !cipher_mac::verify(&keys.cfrm, &message, &card_signature.cryptogram) {
        return Err(Error::Authentication);
    }
    debug!("card authentication cryptogram verified");

    Ok((keys, card_signature))
}

/// Builds the GENERAL AUTHENTICATE request body (SP 800-73-4 part 2,
/// § 4.1.4): a `7C` template with an empty `80` marker and the `81`
/// challenge object carrying `CBH || IDH || host public key`.
fn build_general_authenticate(
    host_control_byte: u8,
    host_id: &[u8; 8],
    host_public_key: &[u8; ecdh::ENCODED_POINT_LENGTH],
) -> Vec<u8> {
    let mut challenge = Vec::with_capacity(1 + host_id.len() + host_public_key.len());
    challenge.push(host_control_byte);
    challenge.extend_from_slice(host_id);
    challenge.extend_from_slice(host_public_key);

    let mut inner = vec![0x80, 0x00];
    inner.push(0x81);
    der_util::encode_primitive_length(&mut inner, challenge.len());
    inner.extend_from_slice(&challenge);

    let mut body = vec![0x7C];
    der_util::encode_primitive_length(&mut body, inner.len());
    body.extend_from_slice(&inner);
    body
}
