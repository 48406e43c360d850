//! Hierarchical names for the routing control plane.
//!
//! A [`Name`] is an ordered list of typed components, printed and parsed in
//! URI form (`/net/router-a/32=DV`). The control plane only needs a small
//! slice of the full naming spec: generic and keyword components for
//! prefixes, plus sequence-number, version and timestamp components for
//! versioned data objects.
//!
//! Tables key names by a 64-bit hash of their encoding. Collisions are not
//! detected: two distinct names hashing to the same value would corrupt
//! routing state, an accepted risk at 64 bits.

use std::fmt;
use std::str::FromStr;

use crate::tlv::{self, TlvError};

/// TLV type of a full name.
pub const TYP_NAME: u64 = 0x07;

/// Component TLV types used by the control plane.
pub const TYP_GENERIC: u64 = 8;
pub const TYP_KEYWORD: u64 = 32;
pub const TYP_VERSION: u64 = 54;
pub const TYP_TIMESTAMP: u64 = 56;
pub const TYP_SEQUENCE_NUM: u64 = 58;

/// One name component: a TLV type plus an opaque value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Component {
    pub typ: u64,
    pub value: Vec<u8>,
}

impl Component {
    pub fn generic(s: &str) -> Self {
        Component { typ: TYP_GENERIC, value: s.as_bytes().to_vec() }
    }

    pub fn keyword(s: &str) -> Self {
        Component { typ: TYP_KEYWORD, value: s.as_bytes().to_vec() }
    }

    pub fn version(v: u64) -> Self {
        Component { typ: TYP_VERSION, value: tlv::natural_bytes(v) }
    }

    pub fn timestamp(t: u64) -> Self {
        Component { typ: TYP_TIMESTAMP, value: tlv::natural_bytes(t) }
    }

    pub fn sequence_num(n: u64) -> Self {
        Component { typ: TYP_SEQUENCE_NUM, value: tlv::natural_bytes(n) }
    }

    /// Decode the component value as a nonnegative integer.
    pub fn as_number(&self) -> Option<u64> {
        tlv::natural_from_bytes(&self.value)
    }

    /// Whether this is the given keyword component.
    pub fn is_keyword(&self, kw: &str) -> bool {
        self.typ == TYP_KEYWORD && self.value == kw.as_bytes()
    }

    pub fn is_sequence_num(&self) -> bool {
        self.typ == TYP_SEQUENCE_NUM
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.typ != TYP_GENERIC {
            write!(f, "{}=", self.typ)?;
        }
        match std::str::from_utf8(&self.value) {
            Ok(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic()) => {
                write!(f, "{}", s)
            }
            _ => {
                for b in &self.value {
                    write!(f, "%{:02X}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// A hierarchical name: an ordered list of components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(pub Vec<Component>);

/// Error parsing a name from its URI form.
#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("empty name")]
    Empty,

    #[error("invalid component type in {0:?}")]
    InvalidType(String),
}

impl Name {
    pub fn empty() -> Self {
        Name(Vec::new())
    }

    /// The `/localhost` prefix (forwarder-local scope).
    pub fn localhost() -> Self {
        Name(vec![Component::generic("localhost")])
    }

    /// The `/localhop` prefix (one-hop scope).
    pub fn localhop() -> Self {
        Name(vec![Component::generic("localhop")])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn at(&self, i: usize) -> Option<&Component> {
        self.0.get(i)
    }

    /// Component counted from the end: `at_back(0)` is the last component.
    pub fn at_back(&self, i: usize) -> Option<&Component> {
        let n = self.0.len();
        if i < n {
            self.0.get(n - 1 - i)
        } else {
            None
        }
    }

    /// New name with one component appended.
    pub fn append(&self, c: Component) -> Name {
        let mut parts = self.0.clone();
        parts.push(c);
        Name(parts)
    }

    /// New name with all of `other`'s components appended.
    pub fn join(&self, other: &Name) -> Name {
        let mut parts = self.0.clone();
        parts.extend(other.0.iter().cloned());
        Name(parts)
    }

    pub fn starts_with(&self, prefix: &Name) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Name with the first `n` components removed.
    pub fn strip_prefix(&self, n: usize) -> Name {
        Name(self.0.iter().skip(n).cloned().collect())
    }

    /// 64-bit key for hash-keyed tables: first 8 bytes of the blake3 hash
    /// of the TLV encoding. See the module docs for the collision caveat.
    pub fn hash_u64(&self) -> u64 {
        let mut buf = Vec::with_capacity(64);
        self.encode_into(&mut buf);
        let digest = blake3::hash(&buf);
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(key)
    }

    /// Encode as a TLV name (type 0x07) into `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let mut inner = Vec::with_capacity(32);
        for c in &self.0 {
            tlv::write_tlv(&mut inner, c.typ, &c.value);
        }
        tlv::write_tlv(buf, TYP_NAME, &inner);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        self.encode_into(&mut buf);
        buf
    }

    /// Decode the inner components of a TLV name (the payload of type 0x07).
    pub fn decode_value(value: &[u8]) -> Result<Name, TlvError> {
        let mut r = tlv::TlvReader::new(value);
        let mut parts = Vec::new();
        while !r.done() {
            let (typ, val) = r.read_tlv()?;
            parts.push(Component { typ, value: val.to_vec() });
        }
        Ok(Name(parts))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for c in &self.0 {
            write!(f, "/{}", c)?;
        }
        Ok(())
    }
}

impl FromStr for Name {
    type Err = NameError;

    /// Parse a URI-form name. Bare segments are generic components;
    /// `TYPE=value` segments carry an explicit numeric component type.
    fn from_str(s: &str) -> Result<Self, NameError> {
        let trimmed = s.trim().trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(NameError::Empty);
        }

        let mut parts = Vec::new();
        for seg in trimmed.split('/') {
            if seg.is_empty() {
                continue;
            }
            match seg.split_once('=') {
                Some((t, v)) => {
                    let typ: u64 = t
                        .parse()
                        .map_err(|_| NameError::InvalidType(seg.to_string()))?;
                    parts.push(Component { typ, value: v.as_bytes().to_vec() });
                }
                None => parts.push(Component::generic(seg)),
            }
        }
        if parts.is_empty() {
            return Err(NameError::Empty);
        }
        Ok(Name(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_roundtrip() {
        let name: Name = "/net/router-a".parse().unwrap();
        assert_eq!(name.len(), 2);
        assert_eq!(name.to_string(), "/net/router-a");

        let keyword: Name = "/net/32=DV/32=ADS".parse().unwrap();
        assert_eq!(keyword.at(1).unwrap().typ, TYP_KEYWORD);
        assert_eq!(keyword.to_string(), "/net/32=DV/32=ADS");
    }

    #[test]
    fn parse_rejects_empty() {
        assert!(Name::from_str("/").is_err());
        assert!(Name::from_str("").is_err());
    }

    #[test]
    fn encode_decode_roundtrip() {
        let name: Name = "/a/b/32=DV".parse().unwrap();
        let buf = name.encode();

        let mut r = tlv::TlvReader::new(&buf);
        let (typ, value) = r.read_tlv().unwrap();
        assert_eq!(typ, TYP_NAME);
        assert_eq!(Name::decode_value(value).unwrap(), name);
    }

    #[test]
    fn hash_is_stable_and_distinguishes() {
        let a: Name = "/net/a".parse().unwrap();
        let b: Name = "/net/b".parse().unwrap();
        assert_eq!(a.hash_u64(), a.clone().hash_u64());
        assert_ne!(a.hash_u64(), b.hash_u64());
    }

    #[test]
    fn number_components() {
        let c = Component::sequence_num(7);
        assert!(c.is_sequence_num());
        assert_eq!(c.as_number(), Some(7));

        let big = Component::sequence_num(u64::MAX);
        assert_eq!(big.as_number(), Some(u64::MAX));
    }

    #[test]
    fn prefix_relations() {
        let base: Name = "/net".parse().unwrap();
        let full = base.append(Component::keyword("DV"));
        assert!(full.starts_with(&base));
        assert!(!base.starts_with(&full));
        assert_eq!(full.strip_prefix(1).len(), 1);
        assert_eq!(full.at_back(0).unwrap(), full.at(1).unwrap());
    }
}
