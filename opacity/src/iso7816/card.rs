use std::fmt;

use tracing::debug;

use crate::iso7816::apdu::{self, Apdu, Response};


#[derive(Debug)]
pub enum CommunicationError {
    Encode(apdu::EncodeError),
    Pcsc(pcsc::Error),
    ShortResponse,
    OperationFailed { operation: String, response: Response },
}
impl fmt::Display for CommunicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode(e) => write!(f, "APDU encoding error: {}", e),
            Self::Pcsc(e) => write!(f, "PCSC error: {}", e),
            Self::ShortResponse => write!(f, "response too short"),
            Self::OperationFailed { operation, response }
                => write!(f, "{} failed with response code 0x{:04X}", operation, response.trailer.to_word()),
        }
    }
}
impl std::error::Error for CommunicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(e) => Some(e),
            Self::Pcsc(e) => Some(e),
            Self::ShortResponse => None,
            Self::OperationFailed { .. } => None,
        }
    }
}
impl From<apdu::EncodeError> for CommunicationError {
    fn from(value: apdu::EncodeError) -> Self { Self::Encode(value) }
}
impl From<pcsc::Error> for CommunicationError {
    fn from(value: pcsc::Error) -> Self { Self::Pcsc(value) }
}


/// The byte-level channel to the card.
///
/// `name` is the human-readable command name, used for logging only.
/// `close` tears the channel down; the tunnel orchestrator calls it exactly
/// once on any failed handshake.
pub trait Transceiver {
    fn transceive(&mut self, name: &str, request: &Apdu) -> Result<Response, CommunicationError>;

    fn close(&mut self);
}
impl Transceiver for pcsc::Card {
    fn transceive(&mut self, name: &str, request: &Apdu) -> Result<Response, CommunicationError> {
        let out_buf = request.to_bytes()?;
        debug!(command = name, request_length = out_buf.len(), "transmitting APDU");
        let mut in_buf = vec![0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];
        let in_slice = self.transmit(&out_buf, &mut in_buf)?;
        debug!(command = name, response_length = in_slice.len(), "received response");
        Response::from_slice(in_slice)
            .ok_or(CommunicationError::ShortResponse)
    }

    fn close(&mut self) {
        // the PC/SC handle is released when the card value is dropped
        debug!("transceiver closed");
    }
}
