//! Update identity and validation verdicts.
//!
//! Everything the server knows about a route announcement hangs off a
//! 32 bit fingerprint derived from the announcement’s content. The
//! fingerprint covers two independent portions: the origin portion
//! (origin AS and prefix, all that origin validation cares about) and the
//! path portion (the raw path attribute bytes, all that path validation
//! cares about). [`UpdateId`] keeps the checksums of both portions next
//! to the combined one so that it can be compared in either scope.

use std::fmt;
use std::cmp::Ordering;
use std::net::IpAddr;
use std::str::FromStr;
use crc::{Crc, CRC_32_ISO_HDLC};

/// The CRC32 flavor used for all fingerprints.
///
/// ISO-HDLC is the polynomial of zlib’s `crc32()`.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);


//------------ Prefix --------------------------------------------------------

/// An IP prefix of a route announcement.
///
/// A prefix consists of an IP address and a prefix length. The length must
/// be between 1 and the address size in bits; zero-length prefixes are
/// rejected at ingest.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Prefix {
    /// The network address of the prefix.
    addr: IpAddr,

    /// The prefix length in bits.
    len: u8,
}

impl Prefix {
    /// Creates a new prefix from an address and a length.
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, PrefixError> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if len == 0 || len > max {
            return Err(PrefixError::Length(len))
        }
        Ok(Prefix { addr, len })
    }

    /// Returns the network address.
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    /// Returns the prefix length.
    pub fn len(&self) -> u8 {
        self.len
    }

    /// Returns the address bytes in network byte order.
    pub fn addr_bytes(&self) -> Vec<u8> {
        match self.addr {
            IpAddr::V4(addr) => addr.octets().to_vec(),
            IpAddr::V6(addr) => addr.octets().to_vec(),
        }
    }

    /// Returns whether `self` covers `other`.
    ///
    /// A prefix covers another prefix if it is shorter or of equal length
    /// and the first `self.len` bits of both network addresses agree.
    pub fn covers(&self, other: &Prefix) -> bool {
        match (self.addr, other.addr) {
            (IpAddr::V4(left), IpAddr::V4(right)) => {
                if self.len > other.len {
                    return false
                }
                // The length is between 1 and 32, so the shift is fine.
                let mask = u32::MAX << (32 - u32::from(self.len));
                u32::from(left) & mask == u32::from(right) & mask
            }
            (IpAddr::V6(left), IpAddr::V6(right)) => {
                if self.len > other.len {
                    return false
                }
                let mask = u128::MAX << (128 - u32::from(self.len));
                u128::from(left) & mask == u128::from(right) & mask
            }
            _ => false
        }
    }
}

impl FromStr for Prefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '/');
        let addr = parts.next().and_then(|addr| {
            IpAddr::from_str(addr).ok()
        });
        let len = parts.next().and_then(|len| u8::from_str(len).ok());
        match (addr, len) {
            (Some(addr), Some(len)) => Prefix::new(addr, len),
            _ => Err(PrefixError::Syntax)
        }
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}


//------------ PrefixError ---------------------------------------------------

/// A prefix had an illegal length or could not be parsed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrefixError {
    /// The prefix length is zero or beyond the address size.
    Length(u8),

    /// The prefix could not be parsed at all.
    Syntax,
}

impl fmt::Display for PrefixError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PrefixError::Length(len) => {
                write!(f, "invalid prefix length {}", len)
            }
            PrefixError::Syntax => f.write_str("invalid prefix"),
        }
    }
}


//------------ UpdateId ------------------------------------------------------

/// The content-derived fingerprint of a route announcement.
///
/// The canonical identifier of an update is the CRC32 checksum over an
/// uppercase hex rendering of origin AS, prefix, prefix length and the
/// path attribute bytes. Since the origin and path halves of that
/// rendering serve different validation types, their individual checksums
/// are kept as well so two updates can be compared for origin-only or
/// path-only equivalence.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct UpdateId {
    /// The checksum over the complete canonical encoding.
    id: u32,

    /// The checksum over the origin portion (origin AS, prefix, length).
    ov: u32,

    /// The checksum over the path portion (the raw path attribute bytes).
    pv: u32,
}

impl UpdateId {
    /// Computes the fingerprint of an announcement.
    ///
    /// The `path_blob` is the raw BGPsec_PATH attribute if the update has
    /// one or the four-byte-per-hop AS_PATH rendering otherwise. The
    /// function is pure; it only depends on its arguments.
    pub fn fingerprint(
        origin_as: u32, prefix: &Prefix, path_blob: &[u8]
    ) -> Self {
        let mut origin_text = format!("{:08X}", origin_as);
        for byte in prefix.addr_bytes() {
            origin_text.push_str(&format!("{:02X}", byte));
        }
        origin_text.push_str(&format!("{:02X}", prefix.len()));

        let mut path_text = String::with_capacity(path_blob.len() * 2);
        for byte in path_blob {
            path_text.push_str(&format!("{:02X}", byte));
        }

        let mut digest = CRC32.digest();
        digest.update(origin_text.as_bytes());
        digest.update(path_text.as_bytes());

        UpdateId {
            id: digest.finalize(),
            ov: CRC32.checksum(origin_text.as_bytes()),
            pv: CRC32.checksum(path_text.as_bytes()),
        }
    }

    /// Returns the full 32 bit identifier.
    pub fn as_u32(&self) -> u32 {
        self.id
    }

    /// Compares two update IDs within the given scope.
    pub fn compare(&self, other: &UpdateId, mode: CompareMode) -> Ordering {
        match mode {
            CompareMode::Origin => self.ov.cmp(&other.ov),
            CompareMode::Path => self.pv.cmp(&other.pv),
            CompareMode::Both => self.id.cmp(&other.id),
        }
    }

    /// Returns whether the two IDs are equal within the given scope.
    pub fn matches(&self, other: &UpdateId, mode: CompareMode) -> bool {
        self.compare(other, mode) == Ordering::Equal
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:08X}", self.id)
    }
}


//------------ CompareMode ---------------------------------------------------

/// The scope for comparing two update IDs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareMode {
    /// Compare only the portion relevant for origin validation.
    Origin,

    /// Compare only the portion relevant for path validation.
    Path,

    /// Compare the complete identifier. This is the default equality.
    Both,
}


//------------ Verdict -------------------------------------------------------

/// The validation result for one validation type of an update.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Verdict {
    /// The update passed validation.
    Valid,

    /// No covering attestation exists. A result, not an error.
    NotFound,

    /// The update failed validation.
    Invalid,

    /// No validation has been performed yet.
    Undefined,

    /// Validation could not be decided from registration data alone.
    Unknown,

    /// The path cannot be verified, e.g. it contains an AS_SET.
    Unverifiable,

    /// Internal sentinel meaning “leave the stored result alone.”
    ///
    /// This value must never cross the external interface.
    DoNotUse,
}

impl Verdict {
    /// Returns whether the verdict may be reported to a router.
    pub fn is_public(self) -> bool {
        !matches!(self, Verdict::DoNotUse)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            Verdict::Valid => "valid",
            Verdict::NotFound => "not-found",
            Verdict::Invalid => "invalid",
            Verdict::Undefined => "undefined",
            Verdict::Unknown => "unknown",
            Verdict::Unverifiable => "unverifiable",
            Verdict::DoNotUse => "do-not-use",
        })
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    fn make_pfx(s: &str) -> Prefix {
        Prefix::from_str(s).unwrap()
    }

    #[test]
    fn prefix_length_limits() {
        assert!(Prefix::from_str("10.0.0.0/0").is_err());
        assert!(Prefix::from_str("10.0.0.0/33").is_err());
        assert!(Prefix::from_str("2001:db8::/129").is_err());
        assert!(Prefix::from_str("10.0.0.0/24").is_ok());
        assert!(Prefix::from_str("2001:db8::/128").is_ok());
        assert!(Prefix::from_str("nonsense").is_err());
    }

    #[test]
    fn prefix_covers() {
        let outer = make_pfx("10.0.0.0/16");
        let inner = make_pfx("10.0.61.0/24");
        let sibling = make_pfx("10.1.0.0/16");
        let supernet = make_pfx("10.0.0.0/8");
        let v6 = make_pfx("2001:db8::/32");

        assert!(outer.covers(&inner));
        assert!(outer.covers(&outer));
        assert!(!outer.covers(&sibling));
        assert!(!outer.covers(&supernet));
        assert!(supernet.covers(&outer));
        assert!(!outer.covers(&v6));

        let v6_inner = make_pfx("2001:db8:8000::/48");
        assert!(v6.covers(&v6_inner));
        assert!(!v6_inner.covers(&v6));
    }

    #[test]
    fn fingerprint_is_pure() {
        let prefix = make_pfx("10.0.0.0/24");
        let left = UpdateId::fingerprint(64500, &prefix, b"\x90\x21\x00\x10");
        let right = UpdateId::fingerprint(64500, &prefix, b"\x90\x21\x00\x10");
        assert_eq!(left, right);
        assert_eq!(left.as_u32(), right.as_u32());
    }

    #[test]
    fn compare_modes() {
        let prefix = make_pfx("10.0.0.0/24");
        let left = UpdateId::fingerprint(64500, &prefix, b"blob A");
        let right = UpdateId::fingerprint(64500, &prefix, b"blob B");

        assert!(left.matches(&right, CompareMode::Origin));
        assert!(!left.matches(&right, CompareMode::Path));
        assert!(!left.matches(&right, CompareMode::Both));

        let other_origin = UpdateId::fingerprint(
            64501, &prefix, b"blob A"
        );
        assert!(!left.matches(&other_origin, CompareMode::Origin));
        assert!(left.matches(&other_origin, CompareMode::Path));
        assert!(!left.matches(&other_origin, CompareMode::Both));
    }

    #[test]
    fn distinct_inputs_distinct_ids() {
        let left = UpdateId::fingerprint(
            64500, &make_pfx("10.0.0.0/24"), b"path"
        );
        let right = UpdateId::fingerprint(
            64500, &make_pfx("10.0.0.0/25"), b"path"
        );
        assert_ne!(left, right);
    }
}
