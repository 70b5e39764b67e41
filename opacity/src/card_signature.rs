//! Decoding of the card's GENERAL AUTHENTICATE response template.


use std::fmt;

use hex_literal::hex;

use crate::crypt::ecdh;
use crate::der_util;
use crate::hex_util;


/// Object identifier of ECDH key agreement on curve P-256
/// (1.2.840.10045.3.1.7), the only algorithm of Cipher Suite 2.
pub const ECDH_P256_OID: [u8; 8] = hex!("2A8648CE3D030107");

const TAG_DYNAMIC_AUTHENTICATION_TEMPLATE: u8 = 0x7C;
const TAG_NONCE: u8 = 0x81;
const TAG_AUTH_CRYPTOGRAM: u8 = 0x82;
const TAG_SIGNER: u8 = 0x83;

const NONCE_LENGTH: usize = 16;
const CRYPTOGRAM_LENGTH: usize = 16;
const ID_LENGTH: usize = 8;
const GUID_LENGTH: usize = 16;
const OID_LENGTH: usize = 8;

// cb || id || issuerId || guid || algorithm OID || public key; the CVC
// occupies whatever follows
const SIGNER_MIN_LENGTH: usize = 1 + 2*ID_LENGTH + GUID_LENGTH + OID_LENGTH + ecdh::ENCODED_POINT_LENGTH;


#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    Tlv,
    UnexpectedTemplate { tag: u8 },
    MissingField { tag: u8 },
    FieldLength { tag: u8, obtained: usize, expected: usize },
    SignerTooShort { obtained: usize },
    AlgorithmOid { obtained: [u8; OID_LENGTH] },
    PublicKeyFormat { first_byte: u8 },
}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tlv
                => write!(f, "response is not a well-formed TLV structure"),
            Self::UnexpectedTemplate { tag }
                => write!(f, "expected dynamic authentication template 0x7C, found tag 0x{:02X}", tag),
            Self::MissingField { tag }
                => write!(f, "required field 0x{:02X} is missing", tag),
            Self::FieldLength { tag, obtained, expected }
                => write!(f, "field 0x{:02X} has length {}, expected {}", tag, obtained, expected),
            Self::SignerTooShort { obtained }
                => write!(f, "signer object has {} bytes, expected at least {}", obtained, SIGNER_MIN_LENGTH),
            Self::AlgorithmOid { obtained }
                => write!(f, "unsupported key agreement algorithm OID {}", hex_util::hex_from_bytes(obtained)),
            Self::PublicKeyFormat { first_byte }
                => write!(f, "public key does not start with the uncompressed-point marker (found 0x{:02X})", first_byte),
        }
    }
}
impl std::error::Error for ParseError {
}


fn fixed<const N: usize>(tag: u8, value: &[u8]) -> Result<[u8; N], ParseError> {
    value.try_into()
        .map_err(|_| ParseError::FieldLength { tag, obtained: value.len(), expected: N })
}


/// The card's signed reply to GENERAL AUTHENTICATE.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CardSignature {
    /// Card control byte; a nonzero value requests persistent binding.
    pub cb: u8,
    /// Nicc, the card's 16-byte nonce.
    pub nonce: [u8; NONCE_LENGTH],
    /// AuthCryptogram, the CMAC the host verifies under the CFRM key.
    pub cryptogram: [u8; CRYPTOGRAM_LENGTH],
    /// Card signer identifier.
    pub id: [u8; ID_LENGTH],
    pub issuer_id: [u8; ID_LENGTH],
    pub guid: [u8; GUID_LENGTH],
    pub algorithm_oid: [u8; OID_LENGTH],
    /// The card's static public key, SEC1 uncompressed.
    pub public_key: [u8; ecdh::ENCODED_POINT_LENGTH],
    /// Card Verifiable Certificate, opaque to the handshake.
    pub cvc: Vec<u8>,
}
impl CardSignature {
    /// Parses the response body of GENERAL AUTHENTICATE.
    ///
    /// The inner data objects of the `7C` template may appear in any order;
    /// the first occurrence of each required tag is used and unknown tags
    /// are ignored. The signer object (`83`) itself has a fixed-width
    /// layout and is split by offset.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let (template, rest) = der_util::try_decode_tlv(data)
            .ok_or(ParseError::Tlv)?;
        if template.tag != TAG_DYNAMIC_AUTHENTICATION_TEMPLATE {
            return Err(ParseError::UnexpectedTemplate { tag: template.tag });
        }
        if !rest.is_empty() {
            return Err(ParseError::Tlv);
        }

        let mut nonce_field = None;
        let mut cryptogram_field = None;
        let mut signer_field = None;
        let mut inner = template.value;
        while !inner.is_empty() {
            let (tlv, rest) = der_util::try_decode_tlv(inner)
                .ok_or(ParseError::Tlv)?;
            inner = rest;
            match tlv.tag {
                TAG_NONCE => { nonce_field.get_or_insert(tlv.value); },
                TAG_AUTH_CRYPTOGRAM => { cryptogram_field.get_or_insert(tlv.value); },
                TAG_SIGNER => { signer_field.get_or_insert(tlv.value); },
                _ => {},
            }
        }

        let nonce = fixed::<NONCE_LENGTH>(
            TAG_NONCE,
            nonce_field.ok_or(ParseError::MissingField { tag: TAG_NONCE })?,
        )?;
        let cryptogram = fixed::<CRYPTOGRAM_LENGTH>(
            TAG_AUTH_CRYPTOGRAM,
            cryptogram_field.ok_or(ParseError::MissingField { tag: TAG_AUTH_CRYPTOGRAM })?,
        )?;
        let signer = signer_field
            .ok_or(ParseError::MissingField { tag: TAG_SIGNER })?;
        if signer.len() < SIGNER_MIN_LENGTH {
            return Err(ParseError::SignerTooShort { obtained: signer.len() });
        }

        // fixed offsets: cb 0, id 1..9, issuerId 9..17, guid 17..33,
        // OID 33..41, public key 41..106, CVC 106..
        let cb = signer[0];
        let id: [u8; ID_LENGTH] = signer[1..9].try_into().unwrap();
        let issuer_id: [u8; ID_LENGTH] = signer[9..17].try_into().unwrap();
        let guid: [u8; GUID_LENGTH] = signer[17..33].try_into().unwrap();
        let algorithm_oid: [u8; OID_LENGTH] = signer[33..41].try_into().unwrap();
        let public_key: [u8; ecdh::ENCODED_POINT_LENGTH] = signer[41..SIGNER_MIN_LENGTH].try_into().unwrap();
        let cvc = signer[SIGNER_MIN_LENGTH..].to_vec();

        if algorithm_oid != ECDH_P256_OID {
            return Err(ParseError::AlgorithmOid { obtained: algorithm_oid });
        }
        if public_key[0] != 0x04 {
            return Err(ParseError::PublicKeyFormat { first_byte: public_key[0] });
        }

        Ok(Self {
            cb,
            nonce,
            cryptogram,
            id,
            issuer_id,
            guid,
            algorithm_oid,
            public_key,
            cvc,
        })
    }
}
