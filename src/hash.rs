use std::fmt;
use std::io::Read;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// hash algorithm tag
///
/// only sha256 today; the model is extensible by tag, and short digests
/// produced by other algorithms are handled by the fan-out rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Sha256,
}

impl Algorithm {
    pub fn tag(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "sha256" => Some(Algorithm::Sha256),
            _ => None,
        }
    }
}

/// an algorithm-tagged content digest
///
/// the canonical encoding is `<algorithm>:<lowercase hex>`. The absent
/// ("nil") hash is modeled as `Option<Hash>` everywhere and serializes as
/// the empty string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash {
    algorithm: Algorithm,
    hex: String,
}

impl Hash {
    /// construct from an algorithm and a hex digest string
    ///
    /// the digest is assumed to already be valid lowercase hex.
    pub fn new(algorithm: Algorithm, hex: impl Into<String>) -> Self {
        Self {
            algorithm,
            hex: hex.into(),
        }
    }

    /// hash a byte slice with the default algorithm
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// hash the full contents of a reader with the default algorithm
    pub fn of_reader(reader: &mut dyn Read) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(hasher.finalize()),
        })
    }

    /// parse the string encoding of a hash
    ///
    /// the empty string parses to the nil hash (`None`).
    pub fn parse(s: &str) -> Result<Option<Self>> {
        if s.is_empty() {
            return Ok(None);
        }
        let (tag, contents) = s
            .split_once(':')
            .ok_or_else(|| Error::MalformedHash(s.to_string()))?;
        let algorithm = Algorithm::from_tag(tag)
            .ok_or_else(|| Error::UnsupportedAlgorithm(tag.to_string()))?;
        if hex::decode(contents).is_err() {
            return Err(Error::MalformedHashContents(contents.to_string()));
        }
        Ok(Some(Self {
            algorithm,
            hex: contents.to_string(),
        }))
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// the digest serialized as a hexadecimal string
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// split the digest into fan-out bucket directories and a file name
    ///
    /// digests longer than 4 hex chars get two 2-char buckets, lengths 3-4
    /// get one bucket, anything shorter is stored bare.
    pub fn bucket_components(&self) -> (Vec<&str>, &str) {
        let hex = self.hex.as_str();
        if hex.len() > 4 {
            (vec![&hex[..2], &hex[2..4]], &hex[4..])
        } else if hex.len() > 2 {
            (vec![&hex[..2]], &hex[2..])
        } else {
            (vec![], hex)
        }
    }
}

/// canonical encoding of an optional hash; nil encodes as the empty string
pub fn format_optional(h: Option<&Hash>) -> String {
    match h {
        Some(h) => h.to_string(),
        None => String::new(),
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.tag(), self.hex)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = if self.hex.len() > 12 {
            &self.hex[..12]
        } else {
            &self.hex
        };
        write!(f, "Hash({}:{})", self.algorithm.tag(), short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let s = "sha256:abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789";
        let h = Hash::parse(s).unwrap().unwrap();
        assert_eq!(h.to_string(), s);
        assert_eq!(h.algorithm(), Algorithm::Sha256);
    }

    #[test]
    fn test_parse_empty_is_nil() {
        assert!(Hash::parse("").unwrap().is_none());
        assert_eq!(format_optional(None), "");
    }

    #[test]
    fn test_parse_missing_separator() {
        assert!(matches!(
            Hash::parse("deadbeef"),
            Err(Error::MalformedHash(_))
        ));
    }

    #[test]
    fn test_parse_unsupported_algorithm() {
        assert!(matches!(
            Hash::parse("md5:abcd"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_parse_bad_hex() {
        assert!(matches!(
            Hash::parse("sha256:not hex"),
            Err(Error::MalformedHashContents(_))
        ));
        // odd-length hex is not decodable either
        assert!(Hash::parse("sha256:abc").is_err());
    }

    #[test]
    fn test_of_bytes_matches_of_reader() {
        let data = b"hello, world";
        let direct = Hash::of_bytes(data);
        let streamed = Hash::of_reader(&mut &data[..]).unwrap();
        assert_eq!(direct, streamed);
    }

    #[test]
    fn test_bucket_components_long() {
        let h = Hash::new(Algorithm::Sha256, "abcdef012345");
        let (dirs, name) = h.bucket_components();
        assert_eq!(dirs, vec!["ab", "cd"]);
        assert_eq!(name, "ef012345");
    }

    #[test]
    fn test_bucket_components_short() {
        let h = Hash::new(Algorithm::Sha256, "abcd");
        let (dirs, name) = h.bucket_components();
        assert_eq!(dirs, vec!["ab"]);
        assert_eq!(name, "cd");

        let h = Hash::new(Algorithm::Sha256, "ab");
        let (dirs, name) = h.bucket_components();
        assert!(dirs.is_empty());
        assert_eq!(name, "ab");
    }

    #[test]
    fn test_equality_is_componentwise() {
        let a = Hash::new(Algorithm::Sha256, "abcd");
        let b = Hash::parse("sha256:abcd").unwrap().unwrap();
        assert_eq!(a, b);
        let c = Hash::new(Algorithm::Sha256, "dcba");
        assert_ne!(a, c);
    }
}
