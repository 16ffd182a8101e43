//! Time-ordered identifiers.
//!
//! An [`Id`] packs a 48-bit millisecond timestamp above 80 random bits, the
//! same layout as a ULID. Ids generated in sequence by one process are
//! strictly increasing: when two ids land in the same millisecond the random
//! part of the previous id is incremented instead of redrawn.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const ENCODED_LEN: usize = 26;
const RANDOM_BITS: u32 = 80;
const RANDOM_MASK: u128 = (1u128 << RANDOM_BITS) - 1;

lazy_static! {
    static ref LAST_ID: Mutex<u128> = Mutex::new(0);
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id(u128);

impl Id {
    /// Generate a new id, strictly greater than every id generated before
    /// it in this process.
    pub fn new() -> Self {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u128;
        let random = ((fastrand::u64(..) as u128) << 16 | fastrand::u16(..) as u128) & RANDOM_MASK;
        let candidate = (millis << RANDOM_BITS) | random;

        let mut last = LAST_ID.lock();
        let next = if candidate > *last {
            candidate
        } else {
            // same millisecond or clock went backwards
            last.wrapping_add(1)
        };
        *last = next;
        Id(next)
    }

    pub const fn nil() -> Self {
        Id(0)
    }

    pub const fn from_u128(value: u128) -> Self {
        Id(value)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0 == 0
    }

    /// Millisecond timestamp embedded in the id.
    pub fn timestamp_ms(&self) -> u64 {
        (self.0 >> RANDOM_BITS) as u64
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        uuid::Uuid::from_u128(self.0)
    }

    pub fn from_uuid(value: uuid::Uuid) -> Self {
        Id(value.as_u128())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = [0u8; ENCODED_LEN];
        let mut value = self.0;
        for slot in buf.iter_mut().rev() {
            *slot = ALPHABET[(value & 0x1f) as usize];
            value >>= 5;
        }
        // buf only holds ASCII from ALPHABET
        f.write_str(std::str::from_utf8(&buf).map_err(|_| fmt::Error)?)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdParseError {
    #[error("id must be 26 characters, got {0}")]
    Length(usize),
    #[error("invalid character '{0}' in id")]
    Character(char),
    #[error("id value overflows 128 bits")]
    Overflow,
}

impl FromStr for Id {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ENCODED_LEN {
            return Err(IdParseError::Length(s.len()));
        }
        let mut value: u128 = 0;
        for (i, c) in s.chars().enumerate() {
            let digit = decode_char(c).ok_or(IdParseError::Character(c))?;
            // the first character only carries 3 significant bits
            if i == 0 && digit > 7 {
                return Err(IdParseError::Overflow);
            }
            value = (value << 5) | digit as u128;
        }
        Ok(Id(value))
    }
}

fn decode_char(c: char) -> Option<u8> {
    let upper = c.to_ascii_uppercase();
    let normalized = match upper {
        'O' => '0',
        'I' | 'L' => '1',
        other => other,
    };
    ALPHABET
        .iter()
        .position(|&b| b as char == normalized)
        .map(|p| p as u8)
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids_increase() {
        let mut previous = Id::new();
        for _ in 0..1000 {
            let next = Id::new();
            assert!(next > previous);
            assert!(next.to_string() > previous.to_string());
            previous = next;
        }
    }

    #[test]
    fn test_text_roundtrip() {
        let id = Id::new();
        let text = id.to_string();
        assert_eq!(text.len(), 26);
        assert_eq!(text.parse::<Id>().unwrap(), id);
        assert_eq!(text.to_lowercase().parse::<Id>().unwrap(), id);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("abc".parse::<Id>(), Err(IdParseError::Length(3)));
        assert!(matches!(
            "8ZZZZZZZZZZZZZZZZZZZZZZZZZ".parse::<Id>(),
            Err(IdParseError::Overflow)
        ));
        assert!(matches!(
            "0000000000000000000000000U".parse::<Id>(),
            Err(IdParseError::Character('U'))
        ));
    }

    #[test]
    fn test_timestamp_is_recent() {
        let now = chrono::Utc::now().timestamp_millis() as u64;
        let ts = Id::new().timestamp_ms();
        assert!(ts <= now + 1000 && ts + 60_000 >= now);
    }

    #[test]
    fn test_serde_as_string() {
        let id = Id::from_u128(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"0000000000000000000000001A\"");
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
