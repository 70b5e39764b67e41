//! Structures related to application protocol data units (APDUs).


use std::fmt;


#[derive(Debug)]
pub enum EncodeError {
    DataTooLong { maximum: usize, obtained: usize },
}
impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataTooLong { maximum, obtained } => write!(f, "too much command data: obtained {} bytes, expected maximum {} bytes", obtained, maximum),
        }
    }
}
impl std::error::Error for EncodeError {
}


/// A command APDU using short-form length fields (ISO/IEC 7816-4).
///
/// An empty `data` encodes as an absent command data field; `response_length`
/// `Some(0)` requests up to 256 response bytes.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    pub response_length: Option<u8>,
}
impl Apdu {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::with_capacity(4 + 1 + self.data.len() + 1);
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            if self.data.len() > 255 {
                return Err(EncodeError::DataTooLong { maximum: 255, obtained: self.data.len() });
            }
            out.push(self.data.len().try_into().unwrap());
            out.extend_from_slice(&self.data);
        }
        if let Some(response_length) = self.response_length {
            out.push(response_length);
        }
        Ok(out)
    }
}


#[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StatusWord {
    pub sw1: u8,
    pub sw2: u8,
}
impl StatusWord {
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self {
            sw1,
            sw2,
        }
    }

    pub const fn to_word(&self) -> u16 {
        u16::from_be_bytes([self.sw1, self.sw2])
    }

    pub const fn is_success(&self) -> bool {
        self.to_word() == 0x9000
    }
}
impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusWord {} sw1: 0x{:02X}, sw2: 0x{:02X} {}", '{', self.sw1, self.sw2, '}')
    }
}


#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Response {
    pub data: Vec<u8>,
    pub trailer: StatusWord,
}
impl Response {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }

        let data = bytes[..bytes.len() - 2].to_vec();
        let trailer = StatusWord {
            sw1: bytes[bytes.len() - 2],
            sw2: bytes[bytes.len() - 1],
        };
        Some(Self {
            data,
            trailer,
        })
    }
}
