use hex_literal::hex;
use opacity::crypt::ecdh::EphemeralKeyPair;
use opacity::der_util;
use opacity::iso7816::apdu::{Apdu, Response, StatusWord};
use opacity::iso7816::card::{CommunicationError, Transceiver};
use opacity::tunnel::{self, TunnelConfig};


const HOST_ID: [u8; 8] = hex!("00010203 04050607");

/// Fixed host ephemeral scalar; the matching card response below was
/// computed once with an independent implementation of Cipher Suite 2.
const HOST_PRIVATE: [u8; 32] = hex!("
    C58C3278 A093785A 39F3CA13 0B2164AD
    FE9CA31B D9891C75 EA3659CC 467144CD
");

const CARD_PUBLIC: [u8; 65] = hex!("
    04A6226A 2124A19C BC49C040 FEB419AE
    F8DC475D 90882CB6 98B731AF 5DB8EB6C
    B79D0376 0098F11E 1A9590D6 979C64D4
    0A1A7ABA D3FDD115 04243EAE FE03EBD4
    31
");
const CARD_NONCE: [u8; 16] = hex!("B0B1B2B3 B4B5B6B7 B8B9BABB BCBDBEBF");
const CARD_CRYPTOGRAM: [u8; 16] = hex!("C29FB8C7 1738DADE FFA56C1C FEE8BC2A");
const CARD_ID: [u8; 8] = hex!("A0A1A2A3 A4A5A6A7");
const ISSUER_ID: [u8; 8] = hex!("C0C1C2C3 C4C5C6C7");
const GUID: [u8; 16] = hex!("D0D1D2D3 D4D5D6D7 D8D9DADB DCDDDEDF");
const ECDH_P256_OID: [u8; 8] = hex!("2A8648CE 3D030107");
const CVC: [u8; 24] = hex!("E0E1E2E3 E4E5E6E7 E8E9EAEB ECEDEEEF F0F1F2F3 F4F5F6F7");

/// The full GENERAL AUTHENTICATE command APDU the host must emit for
/// `HOST_PRIVATE` and `HOST_ID`.
const EXPECTED_REQUEST: [u8; 86] = hex!("
    00872704 507C4E80 00814A00 00010203
    04050607 0493AA7E 305F2A13 5C08675B
    9E37DF0A D2A67DFC B48B8AC7 230BEEAF
    E364CF29 2EA5D3A1 8CA9FEE9 C2B3AF10
    B5448FA2 5E7D9C59 563DA1B9 3149EA42
    DD547C28 F300
");

const EXPECTED_CFRM: [u8; 16] = hex!("DF2401D3 EAC5E0C0 E5D9B7E8 6AF066B4");
const EXPECTED_MAC: [u8; 16] = hex!("23D76EB4 216F9E50 2CB06440 3D45C767");
const EXPECTED_ENC: [u8; 16] = hex!("6632A527 05FA3000 89FF251F FD32699D");
const EXPECTED_RMAC: [u8; 16] = hex!("DA1513AD AEF88360 1FD768F6 12BC10A1");


fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    der_util::encode_primitive_length(&mut out, value.len());
    out.extend_from_slice(value);
    out
}

fn card_response(cb: u8, nonce: &[u8], cryptogram: &[u8], public_key: &[u8]) -> Vec<u8> {
    let mut signer = vec![cb];
    signer.extend_from_slice(&CARD_ID);
    signer.extend_from_slice(&ISSUER_ID);
    signer.extend_from_slice(&GUID);
    signer.extend_from_slice(&ECDH_P256_OID);
    signer.extend_from_slice(public_key);
    signer.extend_from_slice(&CVC);

    let mut inner = tlv(0x81, nonce);
    inner.extend_from_slice(&tlv(0x82, cryptogram));
    inner.extend_from_slice(&tlv(0x83, &signer));
    tlv(0x7C, &inner)
}

fn reference_response() -> Vec<u8> {
    card_response(0x00, &CARD_NONCE, &CARD_CRYPTOGRAM, &CARD_PUBLIC)
}

fn host_keys() -> EphemeralKeyPair {
    EphemeralKeyPair::from_secret_scalar(&HOST_PRIVATE)
        .expect("failed to build host keypair")
}


enum Reply {
    /// Respond with the given data and status word 0x9000.
    Data(Vec<u8>),
    /// Respond with no data and the given status word.
    Status(u8, u8),
    /// Fail at the transport level.
    Fail,
}

/// A scripted card that answers exactly one GENERAL AUTHENTICATE.
struct MockTransceiver {
    expected_request: Option<Vec<u8>>,
    reply: Reply,
    transceive_count: usize,
    close_count: usize,
}
impl MockTransceiver {
    fn new(reply: Reply) -> Self {
        Self {
            expected_request: None,
            reply,
            transceive_count: 0,
            close_count: 0,
        }
    }

    fn expecting(expected_request: &[u8], reply: Reply) -> Self {
        Self {
            expected_request: Some(expected_request.to_vec()),
            reply,
            transceive_count: 0,
            close_count: 0,
        }
    }
}
impl Transceiver for MockTransceiver {
    fn transceive(&mut self, name: &str, request: &Apdu) -> Result<Response, CommunicationError> {
        assert_eq!(name, "GENERAL AUTHENTICATE");
        self.transceive_count += 1;
        if let Some(expected) = &self.expected_request {
            assert_eq!(&request.to_bytes().unwrap(), expected);
        }
        match &self.reply {
            Reply::Data(data) => Ok(Response {
                data: data.clone(),
                trailer: StatusWord::new(0x90, 0x00),
            }),
            Reply::Status(sw1, sw2) => Ok(Response {
                data: Vec::new(),
                trailer: StatusWord::new(*sw1, *sw2),
            }),
            Reply::Fail => Err(CommunicationError::ShortResponse),
        }
    }

    fn close(&mut self) {
        self.close_count += 1;
    }
}


#[test]
fn test_open_tunnel_success() {
    let mut card = MockTransceiver::expecting(&EXPECTED_REQUEST, Reply::Data(reference_response()));
    let config = TunnelConfig { host_id: HOST_ID };

    let session = tunnel::open_tunnel_with_keys(&mut card, &config, host_keys())
        .expect("handshake failed");

    assert_eq!(session.keys.cfrm, EXPECTED_CFRM);
    assert_eq!(session.keys.mac, EXPECTED_MAC);
    assert_eq!(session.keys.enc, EXPECTED_ENC);
    assert_eq!(session.keys.rmac, EXPECTED_RMAC);
    assert_eq!(session.card_signature.id, CARD_ID);
    assert_eq!(session.card_signature.guid, GUID);
    assert_eq!(session.card_signature.cvc, CVC);
    let _ = session.metrics.tunnel_creation_ms;

    // the tunnel stays open for Secure Messaging
    assert_eq!(card.transceive_count, 1);
    assert_eq!(card.close_count, 0);
}

#[test]
fn test_persistent_binding_is_rejected() {
    let response = card_response(0x01, &CARD_NONCE, &CARD_CRYPTOGRAM, &CARD_PUBLIC);
    let mut card = MockTransceiver::new(Reply::Data(response));
    let config = TunnelConfig { host_id: HOST_ID };

    let error = tunnel::open_tunnel_with_keys(&mut card, &config, host_keys())
        .expect_err("persistent binding must abort the handshake");
    assert!(matches!(error, tunnel::Error::PersistentBindingRequested { cb: 0x01 }));
    assert_eq!(card.transceive_count, 1);
    assert_eq!(card.close_count, 1);
}

#[test]
fn test_transport_failure() {
    let mut card = MockTransceiver::new(Reply::Fail);
    let config = TunnelConfig { host_id: HOST_ID };

    let error = tunnel::open_tunnel_with_keys(&mut card, &config, host_keys())
        .expect_err("transport failure must abort the handshake");
    assert!(matches!(error, tunnel::Error::Transport(_)));
    assert_eq!(card.close_count, 1);
}

#[test]
fn test_transport_failure_with_generated_keys() {
    let mut card = MockTransceiver::new(Reply::Fail);
    let config = TunnelConfig { host_id: HOST_ID };

    let error = tunnel::open_tunnel(&mut card, &config)
        .expect_err("transport failure must abort the handshake");
    assert!(matches!(error, tunnel::Error::Transport(_)));
    assert_eq!(card.transceive_count, 1);
    assert_eq!(card.close_count, 1);
}

#[test]
fn test_error_status_word() {
    let mut card = MockTransceiver::new(Reply::Status(0x69, 0x82));
    let config = TunnelConfig { host_id: HOST_ID };

    let error = tunnel::open_tunnel_with_keys(&mut card, &config, host_keys())
        .expect_err("an error status word must abort the handshake");
    match error {
        tunnel::Error::Transport(CommunicationError::OperationFailed { response, .. }) => {
            assert_eq!(response.trailer.to_word(), 0x6982);
        },
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(card.close_count, 1);
}

#[test]
fn test_mutated_cryptogram_fails_authentication() {
    let mut cryptogram = CARD_CRYPTOGRAM;
    cryptogram[15] ^= 0x01;
    let response = card_response(0x00, &CARD_NONCE, &cryptogram, &CARD_PUBLIC);
    let mut card = MockTransceiver::new(Reply::Data(response));
    let config = TunnelConfig { host_id: HOST_ID };

    let error = tunnel::open_tunnel_with_keys(&mut card, &config, host_keys())
        .expect_err("a mutated cryptogram must abort the handshake");
    assert!(matches!(error, tunnel::Error::Authentication));
    assert_eq!(card.close_count, 1);
}

#[test]
fn test_off_curve_card_key_is_rejected() {
    let mut public_key = CARD_PUBLIC;
    public_key[64] ^= 0x01;
    let response = card_response(0x00, &CARD_NONCE, &CARD_CRYPTOGRAM, &public_key);
    let mut card = MockTransceiver::new(Reply::Data(response));
    let config = TunnelConfig { host_id: HOST_ID };

    let error = tunnel::open_tunnel_with_keys(&mut card, &config, host_keys())
        .expect_err("an off-curve card key must abort the handshake");
    assert!(matches!(error, tunnel::Error::KeyValidation(_)));
    assert_eq!(card.close_count, 1);
}

#[test]
fn test_truncated_nonce_is_a_parse_error() {
    let response = card_response(0x00, &CARD_NONCE[..15], &CARD_CRYPTOGRAM, &CARD_PUBLIC);
    let mut card = MockTransceiver::new(Reply::Data(response));
    let config = TunnelConfig { host_id: HOST_ID };

    let error = tunnel::open_tunnel_with_keys(&mut card, &config, host_keys())
        .expect_err("a truncated nonce must abort the handshake");
    assert!(matches!(error, tunnel::Error::Parse(_)));
    // the handshake never got past parsing
    assert_eq!(card.transceive_count, 1);
    assert_eq!(card.close_count, 1);
}

#[test]
fn test_wrong_algorithm_oid_is_a_parse_error() {
    let response = reference_response();
    // the OID sits at offset 33 of the signer object; locate and damage it
    let mut damaged = response.clone();
    let position = damaged.windows(8)
        .position(|window| window == ECDH_P256_OID)
        .expect("OID not found in response");
    damaged[position] ^= 0x01;

    let mut card = MockTransceiver::new(Reply::Data(damaged));
    let config = TunnelConfig { host_id: HOST_ID };

    let error = tunnel::open_tunnel_with_keys(&mut card, &config, host_keys())
        .expect_err("a foreign algorithm OID must abort the handshake");
    assert!(matches!(error, tunnel::Error::Parse(_)));
    assert_eq!(card.close_count, 1);
}

#[test]
fn test_garbage_response_is_a_parse_error() {
    let mut card = MockTransceiver::new(Reply::Data(vec![0x00, 0x01, 0x02]));
    let config = TunnelConfig { host_id: HOST_ID };

    let error = tunnel::open_tunnel_with_keys(&mut card, &config, host_keys())
        .expect_err("a garbage response must abort the handshake");
    assert!(matches!(error, tunnel::Error::Parse(_)));
    assert_eq!(card.close_count, 1);
}
