//! Decoding the BGPsec_PATH attribute.
//!
//! The BGPsec_PATH attribute defined in RFC 8205 carries the secure
//! path, a sequence of path segments with one segment per AS hop,
//! followed by one or two signature blocks, each holding exactly one
//! signature segment per path segment.
//!
//! The parser is strict: every length field has to account for its
//! content down to the last byte. Its output feeds an index keyed by the
//! SKIs extracted from untrusted bytes; silently accepting truncated or
//! over-long attributes would register phantom SKIs that could never be
//! unregistered.

use std::fmt;

/// The length of a Subject Key Identifier in bytes.
pub const SKI_LENGTH: usize = 20;

/// The attribute flag signalling a two byte length field.
const FLAG_EXT_LENGTH: u8 = 0x10;

/// The maximum number of signature blocks per attribute.
const MAX_SIG_BLOCKS: usize = 2;


//------------ PathSegment ---------------------------------------------------

/// One hop of the secure path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PathSegment {
    /// The number of times the AS prepended itself.
    ///
    /// Zero denotes a transparent confederation member.
    pub pcount: u8,

    /// The segment flags.
    pub flags: u8,

    /// The AS number of the hop.
    pub asn: u32,
}

impl PathSegment {
    /// The flag marking a confederation segment.
    pub const FLAG_CONFED: u8 = 0x80;

    /// Creates a new segment for an AS with a pcount of one.
    pub fn new(asn: u32) -> Self {
        PathSegment { pcount: 1, flags: 0, asn }
    }

    /// Returns whether this is a confederation segment.
    pub fn is_confed(&self) -> bool {
        self.flags & Self::FLAG_CONFED != 0
    }
}


//------------ SignatureSegment ----------------------------------------------

/// One signature of a signature block.
///
/// Equality is byte-level over the SKI and the signature itself.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureSegment {
    /// The subject key identifier of the signing key.
    pub ski: [u8; SKI_LENGTH],

    /// The signature bytes.
    pub signature: Vec<u8>,
}


//------------ SignatureBlock ------------------------------------------------

/// A signature block of a BGPsec_PATH attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SignatureBlock {
    /// The algorithm suite identifier for all signatures of the block.
    pub algo_id: u8,

    /// The signature segments, one per path segment, in path order.
    pub segments: Vec<SignatureSegment>,
}


//------------ BgpsecPath ----------------------------------------------------

/// A decoded BGPsec_PATH attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BgpsecPath {
    /// The secure path segments, most recently added AS first.
    segments: Vec<PathSegment>,

    /// Between zero and two signature blocks.
    blocks: Vec<SignatureBlock>,
}

impl BgpsecPath {
    /// Creates a path from its parts.
    ///
    /// The caller is responsible for handing in at most two blocks with
    /// one signature segment per path segment each; [`parse`][Self::parse]
    /// enforces this for data from the wire.
    pub fn new(
        segments: Vec<PathSegment>, blocks: Vec<SignatureBlock>
    ) -> Self {
        BgpsecPath { segments, blocks }
    }

    /// Parses a complete BGPsec_PATH attribute.
    ///
    /// The slice has to start at the attribute flags octet and end
    /// exactly with the last byte of the attribute. Any accounting
    /// mismatch results in an error and no partial data.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut cursor = Cursor::new(bytes);
        let flags = cursor.take_u8()?;
        let _type_code = cursor.take_u8()?;
        let len = if flags & FLAG_EXT_LENGTH != 0 {
            cursor.take_u16()? as usize
        }
        else {
            cursor.take_u8()? as usize
        };
        if len < 2 {
            return Err(ParseError::Malformed("attribute too short"))
        }
        if len != cursor.remaining() {
            return Err(ParseError::Malformed(
                "attribute length disagrees with buffer"
            ))
        }

        // Secure path: two byte length including itself, then six byte
        // segments.
        let secure_path_len = cursor.take_u16()? as usize;
        if secure_path_len < 2 || (secure_path_len - 2) % 6 != 0 {
            return Err(ParseError::Malformed("illegal secure path length"))
        }
        let count = (secure_path_len - 2) / 6;
        if count == 0 {
            return Err(ParseError::Malformed("empty secure path"))
        }
        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            let pcount = cursor.take_u8()?;
            let seg_flags = cursor.take_u8()?;
            let asn = cursor.take_u32()?;
            segments.push(PathSegment { pcount, flags: seg_flags, asn });
        }

        // Signature blocks: whatever remains has to be consumed by at
        // most two blocks, each accounting for itself exactly.
        let mut blocks = Vec::new();
        while cursor.remaining() > 0 {
            if blocks.len() == MAX_SIG_BLOCKS {
                return Err(ParseError::Malformed(
                    "more than two signature blocks"
                ))
            }
            blocks.push(Self::parse_block(&mut cursor, count)?);
        }

        Ok(BgpsecPath { segments, blocks })
    }

    /// Parses a single signature block holding `count` segments.
    fn parse_block(
        cursor: &mut Cursor, count: usize
    ) -> Result<SignatureBlock, ParseError> {
        let block_len = cursor.take_u16()? as usize;
        if block_len < 3 || block_len - 2 > cursor.remaining() {
            return Err(ParseError::Malformed("illegal signature block length"))
        }
        let algo_id = cursor.take_u8()?;
        let mut body = block_len - 3;
        let mut block_segments = Vec::with_capacity(count);
        for _ in 0..count {
            if body < SKI_LENGTH + 2 {
                return Err(ParseError::Malformed(
                    "signature block too short for path"
                ))
            }
            let mut ski = [0u8; SKI_LENGTH];
            ski.copy_from_slice(cursor.take_slice(SKI_LENGTH)?);
            let sig_len = cursor.take_u16()? as usize;
            body -= SKI_LENGTH + 2;
            if sig_len > body {
                return Err(ParseError::Malformed("signature overruns block"))
            }
            let signature = cursor.take_slice(sig_len)?.to_vec();
            body -= sig_len;
            block_segments.push(SignatureSegment { ski, signature });
        }
        if body != 0 {
            return Err(ParseError::Malformed(
                "signature block length does not close"
            ))
        }
        Ok(SignatureBlock { algo_id, segments: block_segments })
    }

    /// Returns the secure path segments.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns the signature blocks.
    pub fn blocks(&self) -> &[SignatureBlock] {
        &self.blocks
    }

    /// Returns the origin AS, i.e., the AS of the last path segment.
    pub fn origin_as(&self) -> u32 {
        self.segments.last().map(|seg| seg.asn).unwrap_or(0)
    }

    /// Returns the AS numbers of the path in segment order.
    pub fn asns(&self) -> Vec<u32> {
        self.segments.iter().map(|seg| seg.asn).collect()
    }

    /// Returns an iterator over the key references of one block.
    ///
    /// The items pair the AS of each path segment with the SKI of the
    /// matching signature segment and the block’s algorithm identifier.
    pub fn block_keys<'a>(
        &'a self, block: &'a SignatureBlock
    ) -> impl Iterator<Item = (u32, &'a [u8; SKI_LENGTH], u8)> + 'a {
        self.segments.iter().zip(block.segments.iter()).map(
            move |(seg, sig)| (seg.asn, &sig.ski, block.algo_id)
        )
    }

    /// Encodes the attribute back into its wire representation.
    ///
    /// The extended length flag is chosen based on the resulting size.
    pub fn to_attribute(&self) -> Vec<u8> {
        let secure_path_len = 2 + 6 * self.segments.len();
        let mut value = Vec::new();
        value.extend_from_slice(&(secure_path_len as u16).to_be_bytes());
        for seg in &self.segments {
            value.push(seg.pcount);
            value.push(seg.flags);
            value.extend_from_slice(&seg.asn.to_be_bytes());
        }
        for block in &self.blocks {
            let block_len = 3 + block.segments.iter().map(|seg| {
                SKI_LENGTH + 2 + seg.signature.len()
            }).sum::<usize>();
            value.extend_from_slice(&(block_len as u16).to_be_bytes());
            value.push(block.algo_id);
            for seg in &block.segments {
                value.extend_from_slice(&seg.ski);
                value.extend_from_slice(
                    &(seg.signature.len() as u16).to_be_bytes()
                );
                value.extend_from_slice(&seg.signature);
            }
        }

        let mut res = Vec::with_capacity(value.len() + 4);
        if value.len() > 255 {
            res.push(FLAG_EXT_LENGTH);
            res.push(33);
            res.extend_from_slice(&(value.len() as u16).to_be_bytes());
        }
        else {
            res.push(0);
            res.push(33);
            res.push(value.len() as u8);
        }
        res.extend_from_slice(&value);
        res
    }
}


//------------ Cursor --------------------------------------------------------

/// A byte cursor over the attribute.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take_slice(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        if self.remaining() < len {
            return Err(ParseError::Malformed("unexpected end of attribute"))
        }
        let res = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(res)
    }

    fn take_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take_slice(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, ParseError> {
        let slice = self.take_slice(2)?;
        Ok(u16::from_be_bytes([slice[0], slice[1]]))
    }

    fn take_u32(&mut self) -> Result<u32, ParseError> {
        let slice = self.take_slice(4)?;
        Ok(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }
}


//------------ ParseError ----------------------------------------------------

/// A BGPsec_PATH attribute was not well-formed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The attribute violates the wire format.
    Malformed(&'static str),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ParseError::Malformed(reason) => {
                write!(f, "malformed BGPsec_PATH attribute: {}", reason)
            }
        }
    }
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    fn test_ski(fill: u8) -> [u8; SKI_LENGTH] {
        [fill; SKI_LENGTH]
    }

    fn sample_path(blocks: usize) -> BgpsecPath {
        BgpsecPath {
            segments: vec![
                PathSegment::new(64496),
                PathSegment::new(64500),
            ],
            blocks: (0..blocks).map(|idx| {
                SignatureBlock {
                    algo_id: idx as u8 + 1,
                    segments: vec![
                        SignatureSegment {
                            ski: test_ski(0xAB),
                            signature: vec![0x30, 0x46, 0x02, 0x21],
                        },
                        SignatureSegment {
                            ski: test_ski(0xCD),
                            signature: vec![0x30, 0x44],
                        },
                    ],
                }
            }).collect()
        }
    }

    #[test]
    fn parse_roundtrip() {
        for blocks in 0..=2 {
            let path = sample_path(blocks);
            let wire = path.to_attribute();
            let parsed = BgpsecPath::parse(&wire).unwrap();
            assert_eq!(parsed, path);
        }
    }

    #[test]
    fn parse_extended_length() {
        let mut path = sample_path(1);
        path.blocks[0].segments[0].signature = vec![0x42; 300];
        let wire = path.to_attribute();
        assert_eq!(wire[0] & FLAG_EXT_LENGTH, FLAG_EXT_LENGTH);
        assert_eq!(BgpsecPath::parse(&wire).unwrap(), path);
    }

    #[test]
    fn reject_truncated() {
        let wire = sample_path(1).to_attribute();
        for len in 0..wire.len() {
            assert!(BgpsecPath::parse(&wire[..len]).is_err());
        }
    }

    #[test]
    fn reject_trailing_bytes() {
        let mut wire = sample_path(1).to_attribute();
        wire.push(0);
        assert!(BgpsecPath::parse(&wire).is_err());
    }

    #[test]
    fn reject_bad_secure_path_length() {
        let mut wire = sample_path(1).to_attribute();
        // Secure path length sits right after flags, type and length.
        wire[4] = 3;
        assert!(BgpsecPath::parse(&wire).is_err());
    }

    #[test]
    fn reject_empty_secure_path() {
        // An attribute whose secure path holds no segments at all.
        let wire = [0u8, 33, 2, 0, 2];
        assert!(BgpsecPath::parse(&wire).is_err());
    }

    #[test]
    fn reject_block_segment_mismatch() {
        // Two path segments but a signature block sized for one.
        let mut path = sample_path(1);
        path.blocks[0].segments.pop();
        let wire = path.to_attribute();
        assert!(BgpsecPath::parse(&wire).is_err());
    }

    #[test]
    fn reject_third_block() {
        let path = sample_path(2);
        let mut wire = path.to_attribute();
        // Append a copy of the last block and fix up the attribute length.
        let block_len = 3 + 2 * (SKI_LENGTH + 2)
            + path.blocks[1].segments[0].signature.len()
            + path.blocks[1].segments[1].signature.len();
        let start = wire.len() - block_len;
        let extra = wire[start..].to_vec();
        wire.extend_from_slice(&extra);
        wire[2] += block_len as u8;
        assert!(BgpsecPath::parse(&wire).is_err());
    }

    #[test]
    fn reject_signature_overrun() {
        let mut path = sample_path(1);
        let wire_ok = path.to_attribute();
        // Claim a signature length beyond the block’s end.
        path.blocks[0].segments[1].signature.clear();
        let mut wire = path.to_attribute();
        let sig_len_pos = wire.len() - 2;
        wire[sig_len_pos] = 0xFF;
        wire[sig_len_pos + 1] = 0xFF;
        assert!(BgpsecPath::parse(&wire).is_err());
        assert!(BgpsecPath::parse(&wire_ok).is_ok());
    }

    #[test]
    fn accessors() {
        let path = sample_path(2);
        assert_eq!(path.origin_as(), 64500);
        assert_eq!(path.asns(), vec![64496, 64500]);
        let keys: Vec<_> = path.block_keys(&path.blocks()[0]).collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].0, 64496);
        assert_eq!(*keys[0].1, test_ski(0xAB));
        assert_eq!(keys[0].2, 1);
        assert!(!path.segments()[0].is_confed());
    }
}
