//! Hexadecimal string conversion.


use std::fmt;
use std::fmt::Write;


#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum HexError {
    OddDigitCount { digits: usize },
    InvalidCharacter { position: usize, character: char },
}
impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OddDigitCount { digits }
                => write!(f, "odd number of hex digits ({})", digits),
            Self::InvalidCharacter { position, character }
                => write!(f, "invalid hex character {:?} at position {}", character, position),
        }
    }
}
impl std::error::Error for HexError {
}


/// Decode a string of hex digits into bytes.
///
/// ASCII whitespace between byte pairs is skipped; whitespace splitting a
/// pair, any other non-hex character, and an odd number of digits are
/// rejected.
pub fn bytes_from_hex(hex: &str) -> Result<Vec<u8>, HexError> {
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    let mut digits = 0;
    let mut pending: Option<u8> = None;
    for (position, character) in hex.char_indices() {
        if character.is_ascii_whitespace() && pending.is_none() {
            continue;
        }
        let Some(digit) = character.to_digit(16) else {
            return Err(HexError::InvalidCharacter { position, character });
        };
        digits += 1;
        match pending.take() {
            Some(high) => bytes.push((high << 4) | (digit as u8)),
            None => pending = Some(digit as u8),
        }
    }
    if pending.is_some() {
        return Err(HexError::OddDigitCount { digits });
    }
    Ok(bytes)
}


/// Encode bytes as lowercase hex without separators.
pub fn hex_from_bytes(bytes: &[u8]) -> String {
    let mut ret = String::with_capacity(2 * bytes.len());
    for b in bytes {
        write!(ret, "{:02x}", b).unwrap();
    }
    ret
}
